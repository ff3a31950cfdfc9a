//! Self-recomputing expression cells.
//!
//! An [`ActiveExpression`] is a named element whose value is produced by
//! running a compiled script against the repository. The result is memoized:
//! it starts out uncalculated, a first read triggers a synchronous
//! calculation, and from then on the cell is kept current by push-based
//! recomputation whenever one of the names it read changes. There is no
//! pull-based staleness check; a calculated value stays valid until the next
//! recalculation overwrites it in place.
//!
//! Each evaluation pass records exactly the names it read through a
//! [`DependencyContext`]; names read in an earlier pass but not re-touched
//! are unsubscribed at pass end, so the tracked dependency set stays minimal
//! even when the script's branches change between passes.

use core::hash::BuildHasherDefault;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, ThreadId};

use seahash::SeaHasher;
use tracing::warn;

use crate::datatype::{Datum, Value};
use crate::error::Result;
use crate::namespace::{prefix_of, resolve_name};
use crate::repository::{DataListener, Repository};
use crate::script::{EvalStack, NameResolver, Script};

type SubscriptionHasher = BuildHasherDefault<SeaHasher>;

// ------------- DependencyContext -------------
/// Evaluation-time record of every name read during one execution pass.
///
/// The first read of a name in a pass subscribes the owning listener to the
/// resolved canonical name (which may differ from the requested name under
/// inheritance fallback) and marks it seen; [`DependencyContext::end_pass`]
/// unsubscribes everything not seen, leaving the minimal current set.
pub struct DependencyContext {
    repository: Weak<Repository>,
    prefix: String,
    listener_name: String,
    listener: Mutex<Option<Arc<dyn DataListener>>>,
    // name -> seen this pass; shared with concurrent passes for the same
    // listener identity
    subscriptions: Mutex<HashMap<String, bool, SubscriptionHasher>>,
}

impl DependencyContext {
    pub fn new(repository: Weak<Repository>, prefix: &str, listener_name: &str) -> Self {
        Self {
            repository,
            prefix: prefix.to_owned(),
            listener_name: listener_name.to_owned(),
            listener: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::default()),
        }
    }

    /// Wires up the listener identity subscriptions are registered under.
    /// Kept out of the constructor because the listener usually owns this
    /// context; [`DependencyContext::dispose`] clears it again.
    pub fn set_listener(&self, listener: Arc<dyn DataListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn listener_name(&self) -> &str {
        &self.listener_name
    }

    /// Resolves `name` against the prefix, subscribes on the first touch of
    /// a pass, and returns the current value.
    pub fn touch(&self, name: &str) -> Value {
        let repository = match self.repository.upgrade() {
            Some(repository) => repository,
            None => return Value::Undefined,
        };
        let resolved = resolve_name(&self.prefix, name);
        {
            let mut tracked = self.subscriptions.lock().unwrap();
            if let Some(seen) = tracked.get_mut(&resolved) {
                *seen = true;
                drop(tracked);
                return repository.get_simple_value(&resolved);
            }
        }
        let subscriber = match self.listener.lock().unwrap().clone() {
            Some(listener) => listener,
            None => return Value::Undefined,
        };
        let canonical =
            repository.add_active_data_listener(&resolved, subscriber, &self.listener_name, true);
        self.subscriptions
            .lock()
            .unwrap()
            .insert(canonical.clone(), true);
        repository.get_simple_value(&canonical)
    }

    /// Clears the seen marks ahead of an evaluation pass.
    pub fn begin_pass(&self) {
        for seen in self.subscriptions.lock().unwrap().values_mut() {
            *seen = false;
        }
    }

    /// Unsubscribes every tracked name not re-touched this pass and readies
    /// the marks for the next one.
    pub fn end_pass(&self) {
        let repository = self.repository.upgrade();
        let listener = self.listener.lock().unwrap().clone();
        let stale: Vec<String> = {
            let mut tracked = self.subscriptions.lock().unwrap();
            let stale = tracked
                .iter()
                .filter(|(_, seen)| !**seen)
                .map(|(name, _)| name.clone())
                .collect();
            tracked.retain(|_, seen| *seen);
            for seen in tracked.values_mut() {
                *seen = false;
            }
            stale
        };
        if let (Some(repository), Some(listener)) = (repository, listener) {
            for name in stale {
                repository.remove_data_listener(&name, &listener);
            }
        }
    }

    /// Releases every subscription and drops the listener reference.
    pub fn dispose(&self) {
        let repository = self.repository.upgrade();
        let listener = self.listener.lock().unwrap().take();
        let tracked: Vec<String> = self
            .subscriptions
            .lock()
            .unwrap()
            .drain()
            .map(|(name, _)| name)
            .collect();
        if let (Some(repository), Some(listener)) = (repository, listener) {
            for name in tracked {
                repository.remove_data_listener(&name, &listener);
            }
        }
    }
}

impl NameResolver for DependencyContext {
    fn get(&self, name: &str) -> Value {
        self.touch(name)
    }
}

// ------------- ActiveExpression -------------
#[derive(Debug, Clone)]
enum ExprState {
    Uncalculated,
    Calculated { value: Value, alias: Option<String> },
}

pub struct ActiveExpression {
    name: String,
    script: Mutex<Option<Arc<dyn Script>>>,
    // lock nesting order: evaluation stack first, dependency context second
    eval_stack: Mutex<EvalStack>,
    state: Mutex<ExprState>,
    // thread currently evaluating; same-thread re-entry is a cyclic
    // dependency, another thread just waits on the stack lock
    calculating: Mutex<Option<ThreadId>>,
    context: Arc<DependencyContext>,
    repository: Weak<Repository>,
    log_failures: bool,
}

impl ActiveExpression {
    pub fn build(
        repository: Weak<Repository>,
        name: &str,
        script: Arc<dyn Script>,
        log_failures: bool,
    ) -> Arc<ActiveExpression> {
        let prefix = prefix_of(name);
        let context = Arc::new(DependencyContext::new(repository.clone(), &prefix, name));
        let expression = Arc::new(Self {
            name: name.to_owned(),
            script: Mutex::new(Some(script)),
            eval_stack: Mutex::new(EvalStack::new()),
            state: Mutex::new(ExprState::Uncalculated),
            calculating: Mutex::new(None),
            context: Arc::clone(&context),
            repository,
            log_failures,
        });
        context.set_listener(expression.clone() as Arc<dyn DataListener>);
        expression
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        self.context.prefix()
    }

    fn ensure_calculated(&self) {
        let uncalculated = matches!(*self.state.lock().unwrap(), ExprState::Uncalculated);
        if uncalculated {
            self.recalc();
        }
    }

    /// The memoized value, calculating it first if this is the first read.
    pub fn get_simple_value(&self) -> Value {
        self.ensure_calculated();
        match &*self.state.lock().unwrap() {
            ExprState::Calculated { value, .. } => value.clone(),
            ExprState::Uncalculated => Value::Undefined,
        }
    }

    /// The alias target when the script's result is an alias descriptor
    /// rather than a plain value.
    pub fn get_aliased_data_name(&self) -> Option<String> {
        self.ensure_calculated();
        match &*self.state.lock().unwrap() {
            ExprState::Calculated { alias, .. } => alias.clone(),
            ExprState::Uncalculated => None,
        }
    }

    /// The stored form of the result. Freshly computed plain values are
    /// demoted to read-only; alias results skip the demotion.
    pub fn datum(&self) -> Datum {
        self.ensure_calculated();
        match &*self.state.lock().unwrap() {
            ExprState::Calculated { value, alias } => {
                if alias.is_some() {
                    Datum::new(value.clone())
                } else {
                    Datum::read_only(value.clone())
                }
            }
            ExprState::Uncalculated => Datum::read_only(Value::Undefined),
        }
    }

    /// Recomputes the cell. A pass that transitively depends back on itself
    /// is aborted immediately: the previous memoized value stays, nothing
    /// throws, nothing loops. Script failure is logged and leaves the cell
    /// with no value until the next triggering change.
    pub fn recalc(&self) {
        let current = thread::current().id();
        {
            let calculating = self.calculating.lock().unwrap();
            if *calculating == Some(current) {
                warn!(
                    name = %self.name,
                    "expression transitively depends on itself; keeping its previous value"
                );
                return;
            }
        }
        let mut stack = self.eval_stack.lock().unwrap();
        *self.calculating.lock().unwrap() = Some(current);
        let was_calculated = matches!(*self.state.lock().unwrap(), ExprState::Calculated { .. });
        stack.clear();
        self.context.begin_pass();
        let script = self.script.lock().unwrap().clone();
        let computed = match script {
            Some(script) => match script.run(&mut stack, self.context.as_ref()) {
                Ok(()) => match stack.take_result() {
                    Ok((value, alias)) => Some((value, alias)),
                    Err(error) => {
                        if self.log_failures {
                            warn!(
                                name = %self.name,
                                %error,
                                "script left no result; element currently has no value"
                            );
                        }
                        Some((Value::Undefined, None))
                    }
                },
                Err(error) => {
                    if self.log_failures {
                        warn!(
                            name = %self.name,
                            %error,
                            "script execution failed; element currently has no value"
                        );
                    }
                    Some((Value::Undefined, None))
                }
            },
            // disposed under us
            None => None,
        };
        let committed = computed.is_some();
        if let Some((value, alias)) = computed {
            *self.state.lock().unwrap() = ExprState::Calculated { value, alias };
        }
        self.context.end_pass();
        // the notification runs while this thread is still marked as
        // calculating: a cell subscribed to its own name re-enters recalc
        // through the synchronous delivery and must hit the guard
        if was_calculated && committed {
            if let Some(repository) = self.repository.upgrade() {
                repository.value_recalculated(&self.name);
            }
        }
        *self.calculating.lock().unwrap() = None;
        drop(stack);
    }

    /// Clears the script, result, and dependency context. Dropping the
    /// context's listener reference breaks the cell's ownership cycle and
    /// releases every subscription.
    pub fn dispose(&self) {
        *self.script.lock().unwrap() = None;
        *self.state.lock().unwrap() = ExprState::Uncalculated;
        self.eval_stack.lock().unwrap().clear();
        self.context.dispose();
    }
}

impl DataListener for ActiveExpression {
    fn value_changed(&self, _name: &str) -> Result<()> {
        self.recalc();
        Ok(())
    }
}
