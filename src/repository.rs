//! The repository facade.
//!
//! Wires the namespace tree, the listener dispatch trie, the active-data
//! subscription registry, and the serial generator into one instance. UI,
//! import, and export collaborators talk to this facade; expression cells
//! and search sets register themselves as listeners through it so they stay
//! current on their own.
//!
//! Locking: the tree has its own coarse mutex; the dispatch trie is
//! caller-serialized, so structural access happens behind this facade's
//! mutex while notifications are delivered after the lock is released (a
//! listener is free to call back into the repository). Consistency across
//! elements is eventual: a dependent may briefly be observable after its
//! dependency changed but before it recomputed.

use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::datatype::{Datum, Value};
use crate::dispatch::{Event, EventKind, ListenerDispatchTree, RepositoryListener};
use crate::error::Result;
use crate::expression::ActiveExpression;
use crate::namespace::{
    final_segment, prefix_of, resolve_name, KeyIterator, NamespaceTree, NodeId, ROOT,
};
use crate::rename::{perform_renames, RuleHasher};
use crate::script::Script;
use crate::settings::Settings;
use std::collections::HashMap;

/// Receives value-changed notifications for subscribed names.
pub trait DataListener: Send + Sync {
    fn value_changed(&self, name: &str) -> Result<()>;
}

// ------------- Element -------------
/// A leaf of the namespace tree: a plain value or an expression cell.
#[derive(Clone)]
pub enum Element {
    Value(Datum),
    Expression(Arc<ActiveExpression>),
}

/// One entry of a bulk import.
#[derive(Clone)]
pub enum Definition {
    Value(Value),
    Script(Arc<dyn Script>),
}

// ------------- SerialGenerator -------------
pub type Serial = u64;

pub const GENESIS: Serial = 0;

/// Hands out unique serials for synthesized element names. Owned by the
/// repository instance, so independent repositories never share a counter.
#[derive(Debug)]
pub struct SerialGenerator {
    lower_bound: Serial,
    released: Vec<Serial>,
}

impl SerialGenerator {
    pub fn new() -> Self {
        Self {
            lower_bound: GENESIS,
            released: Vec::new(),
        }
    }
    pub fn release(&mut self, serial: Serial) {
        self.released.push(serial);
    }
    pub fn generate(&mut self) -> Serial {
        self.released.pop().unwrap_or_else(|| {
            self.lower_bound += 1;
            self.lower_bound
        })
    }
}

impl Default for SerialGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ------------- ListenerRegistry -------------
#[derive(Default)]
struct ListenerRegistry {
    subscribers: HashMap<String, Vec<(Arc<dyn DataListener>, String)>, RuleHasher>,
}

impl ListenerRegistry {
    fn subscribe(&mut self, name: &str, listener: Arc<dyn DataListener>, listener_name: &str) {
        let list = self.subscribers.entry(name.to_owned()).or_default();
        if !list.iter().any(|(kept, _)| Arc::ptr_eq(kept, &listener)) {
            list.push((listener, listener_name.to_owned()));
        }
    }
    fn unsubscribe(&mut self, name: &str, listener: &Arc<dyn DataListener>) {
        if let Some(list) = self.subscribers.get_mut(name) {
            list.retain(|(kept, _)| !Arc::ptr_eq(kept, listener));
            if list.is_empty() {
                self.subscribers.remove(name);
            }
        }
    }
    fn subscribers_of(&self, name: &str) -> Vec<Arc<dyn DataListener>> {
        self.subscribers
            .get(name)
            .map(|list| list.iter().map(|(kept, _)| Arc::clone(kept)).collect())
            .unwrap_or_default()
    }
}

// ------------- Repository -------------
pub struct Repository {
    // handed to expression cells so they can reach back without keeping the
    // repository alive
    weak_self: Weak<Repository>,
    tree: NamespaceTree<Element>,
    dispatch: Mutex<ListenerDispatchTree>,
    registry: Mutex<ListenerRegistry>,
    serial_generator: Mutex<SerialGenerator>,
    settings: Settings,
}

impl Repository {
    pub fn new(settings: Settings) -> Arc<Repository> {
        Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            tree: NamespaceTree::new(),
            dispatch: Mutex::new(ListenerDispatchTree::new()),
            registry: Mutex::new(ListenerRegistry::default()),
            serial_generator: Mutex::new(SerialGenerator::new()),
            settings,
        })
    }

    pub fn with_defaults() -> Arc<Repository> {
        Self::new(Settings::default())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ------------- Values -------------
    /// The current value of `name`; undefined when absent. An uncalculated
    /// expression cell is calculated synchronously by this read.
    pub fn get_simple_value(&self, name: &str) -> Value {
        let name = resolve_name("", name);
        match self.tree.get(ROOT, &name) {
            Some(Element::Value(datum)) => datum.value().clone(),
            // evaluated outside the tree lock
            Some(Element::Expression(expression)) => expression.get_simple_value(),
            None => Value::Undefined,
        }
    }

    /// The stored form of `name`, including editability.
    pub fn get_datum(&self, name: &str) -> Option<Datum> {
        let name = resolve_name("", name);
        match self.tree.get(ROOT, &name)? {
            Element::Value(datum) => Some(datum),
            Element::Expression(expression) => Some(expression.datum()),
        }
    }

    /// The alias target of `name`, when its expression result is an alias.
    pub fn get_aliased_data_name(&self, name: &str) -> Option<String> {
        let name = resolve_name("", name);
        match self.tree.get(ROOT, &name)? {
            Element::Expression(expression) => expression.get_aliased_data_name(),
            Element::Value(_) => None,
        }
    }

    pub fn put_value(&self, name: &str, value: Value) {
        let name = resolve_name("", name);
        let displaced = self.tree.put(ROOT, &name, Element::Value(Datum::new(value)));
        if let Some(Element::Expression(old)) = &displaced {
            old.dispose();
        }
        if displaced.is_none() {
            self.fire_event(EventKind::Added, &name);
        }
        self.fire_value_changed(&name);
    }

    /// Defines an expression cell. The cell stays uncalculated until its
    /// first read unless `precalculate_expressions` is set.
    pub fn put_expression(&self, name: &str, script: Arc<dyn Script>) {
        let name = resolve_name("", name);
        let expression = ActiveExpression::build(
            self.weak_self.clone(),
            &name,
            script,
            self.settings.log_script_failures,
        );
        debug!(name = %name, "defining expression cell");
        let displaced = self
            .tree
            .put(ROOT, &name, Element::Expression(Arc::clone(&expression)));
        if let Some(Element::Expression(old)) = &displaced {
            old.dispose();
        }
        if displaced.is_none() {
            self.fire_event(EventKind::Added, &name);
        }
        if self.settings.precalculate_expressions {
            expression.get_simple_value();
        }
        self.fire_value_changed(&name);
    }

    pub fn remove_value(&self, name: &str) {
        let name = resolve_name("", name);
        if let Some(element) = self.tree.remove(ROOT, &name) {
            if let Element::Expression(expression) = &element {
                expression.dispose();
            }
            self.fire_event(EventKind::Removed, &name);
            self.fire_value_changed(&name);
        }
    }

    // ------------- Data listeners -------------
    /// Subscribes `listener` to `name` and returns the canonical name the
    /// subscription landed on. With `inherit`, an absent name falls back to
    /// the closest ancestor prefix where the final segment is defined.
    pub fn add_active_data_listener(
        &self,
        name: &str,
        listener: Arc<dyn DataListener>,
        listener_name: &str,
        inherit: bool,
    ) -> String {
        let name = resolve_name("", name);
        let canonical = if inherit {
            self.resolve_inherited(&name)
        } else {
            name
        };
        self.registry
            .lock()
            .unwrap()
            .subscribe(&canonical, listener, listener_name);
        canonical
    }

    pub fn remove_data_listener(&self, name: &str, listener: &Arc<dyn DataListener>) {
        let name = resolve_name("", name);
        self.registry.lock().unwrap().unsubscribe(&name, listener);
    }

    fn resolve_inherited(&self, name: &str) -> String {
        if self.tree.get(ROOT, name).is_some() {
            return name.to_owned();
        }
        let leaf = final_segment(name).to_owned();
        let mut directory = prefix_of(name);
        while directory != "/" {
            directory = prefix_of(&directory);
            let candidate = if directory == "/" {
                format!("/{}", leaf)
            } else {
                format!("{}/{}", directory, leaf)
            };
            if self.tree.get(ROOT, &candidate).is_some() {
                return candidate;
            }
        }
        name.to_owned()
    }

    // ------------- Hierarchy listeners -------------
    pub fn add_repository_listener(&self, listener: Arc<dyn RepositoryListener>, prefix: &str) {
        self.dispatch.lock().unwrap().add_listener(listener, prefix);
    }

    pub fn remove_repository_listener(&self, listener: &Arc<dyn RepositoryListener>) {
        self.dispatch.lock().unwrap().remove_listener(listener);
    }

    /// Sink for expression cells announcing a completed re-calculation;
    /// their subscribers get a value-changed notification.
    pub fn value_recalculated(&self, name: &str) {
        self.fire_value_changed(name);
    }

    fn fire_event(&self, kind: EventKind, name: &str) {
        // structural access under the mutex, callbacks outside it
        let targets = { self.dispatch.lock().unwrap().matching_listeners(name) };
        let event = Event {
            kind,
            name: name.to_owned(),
        };
        for listener in targets {
            let outcome = match event.kind {
                EventKind::Added => listener.element_added(&event.name),
                EventKind::Removed => listener.element_removed(&event.name),
            };
            if let Err(error) = outcome {
                warn!(name = %event.name, %error, "hierarchy listener failed; continuing delivery");
            }
        }
    }

    fn fire_value_changed(&self, name: &str) {
        let targets = { self.registry.lock().unwrap().subscribers_of(name) };
        for listener in targets {
            if let Err(error) = listener.value_changed(name) {
                warn!(name = %name, %error, "data listener failed; continuing delivery");
            }
        }
    }

    // ------------- Bulk import -------------
    /// Mounts already-resolved definitions beneath `prefix`.
    pub fn mount_imported_data(&self, prefix: &str, definitions: Vec<(String, Definition)>) {
        for (name, definition) in definitions {
            let full = resolve_name(prefix, &name);
            match definition {
                Definition::Value(value) => self.put_value(&full, value),
                Definition::Script(script) => self.put_expression(&full, script),
            }
        }
    }

    /// Merges a raw child data map against an ancestor's rule source:
    /// renames resolve first, offline, and only then do values reach the
    /// tree (and fire events).
    pub fn merge_imported_data(
        &self,
        prefix: &str,
        mut values: HashMap<String, String, RuleHasher>,
        rule_source: &HashMap<String, String, RuleHasher>,
    ) {
        perform_renames(&mut values, rule_source);
        let mut resolved: Vec<(String, Definition)> = values
            .into_iter()
            .map(|(name, token)| (name, Definition::Value(Value::sniff(&token))))
            .collect();
        resolved.sort_by(|(left, _), (right, _)| left.cmp(right));
        self.mount_imported_data(prefix, resolved);
    }

    // ------------- Namespace access -------------
    /// Restartable snapshot iteration over the leaf names beneath `prefix`,
    /// optionally filtered by final segment.
    pub fn keys_under(&self, prefix: &str, name_filter: Option<&str>) -> KeyIterator {
        match self.tree.get_context(ROOT, prefix) {
            Some(node) => self.tree.keys_under(node, name_filter),
            None => KeyIterator::empty(),
        }
    }

    pub fn context_of(&self, prefix: &str) -> Option<NodeId> {
        self.tree.get_context(ROOT, prefix)
    }

    pub fn set_node_attribute(&self, prefix: &str, key: &str, value: &str) {
        let node = self.tree.put_context(ROOT, prefix);
        self.tree.set_attribute(node, key, value);
    }

    pub fn node_attribute(&self, prefix: &str, key: &str, inherit: bool) -> Option<String> {
        let node = self.tree.get_context(ROOT, prefix)?;
        self.tree.attribute(node, key, inherit)
    }

    // ------------- Serials -------------
    pub fn generate_serial(&self) -> Serial {
        self.serial_generator.lock().unwrap().generate()
    }

    pub fn release_serial(&self, serial: Serial) {
        self.serial_generator.lock().unwrap().release(serial);
    }
}
