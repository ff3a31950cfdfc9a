//! Incrementally maintained, sorted sets of tagged hierarchy prefixes.
//!
//! A [`DynamicSearchSet`] watches a starting prefix for elements whose final
//! segment carries a configured tag suffix. Each match contributes its
//! prefix to the result set, optionally gated by a boolean condition script
//! that is compiled once per matched prefix and registered in the repository
//! scoped to it. The set registers as a hierarchy listener for its whole
//! life and keeps itself current as tagged elements appear, disappear, or
//! change truthiness.

use core::hash::BuildHasherDefault;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use bimap::BiMap;
use seahash::SeaHasher;
use tracing::debug;

use crate::error::Result;
use crate::dispatch::RepositoryListener;
use crate::namespace::SEPARATOR;
use crate::repository::{DataListener, Repository};
use crate::script::Script;

type WatchHasher = BuildHasherDefault<SeaHasher>;

/// Hierarchy order: segment-wise path comparison, ancestors before their
/// descendants.
fn hierarchy_cmp(left: &str, right: &str) -> Ordering {
    let lhs = left.split(SEPARATOR).filter(|segment| !segment.is_empty());
    let rhs = right.split(SEPARATOR).filter(|segment| !segment.is_empty());
    lhs.cmp(rhs)
}

struct SearchState {
    members: Vec<String>,
    // lazily built read-only view; any mutation nulls it
    snapshot: Option<Arc<[String]>>,
}

pub struct DynamicSearchSet {
    weak_self: Weak<DynamicSearchSet>,
    repository: Weak<Repository>,
    /// Data name of the search definition; used as the display name on
    /// subscriptions.
    name: String,
    start_prefix: String,
    tag_suffix: String,
    condition: Option<Arc<dyn Script>>,
    inner: Mutex<SearchState>,
    // prefix <-> synthesized condition name; hierarchy events and
    // value-changed events arrive on different threads
    conditions: Mutex<BiMap<String, String>>,
    // tagged element name -> prefix, for unconditioned value tracking
    watched: Mutex<HashMap<String, String, WatchHasher>>,
}

impl DynamicSearchSet {
    /// Creates the set, registers it as a hierarchy listener under
    /// `start_prefix`, and primes it with the matching elements already
    /// present.
    pub fn build(
        repository: &Arc<Repository>,
        name: &str,
        start_prefix: &str,
        tag_suffix: &str,
        condition: Option<Arc<dyn Script>>,
    ) -> Arc<DynamicSearchSet> {
        let set = Arc::new_cyclic(|weak| Self {
            weak_self: weak.clone(),
            repository: Arc::downgrade(repository),
            name: name.to_owned(),
            start_prefix: start_prefix.to_owned(),
            tag_suffix: tag_suffix.to_owned(),
            condition,
            inner: Mutex::new(SearchState {
                members: Vec::new(),
                snapshot: None,
            }),
            conditions: Mutex::new(BiMap::new()),
            watched: Mutex::new(HashMap::default()),
        });
        repository
            .add_repository_listener(set.clone() as Arc<dyn RepositoryListener>, start_prefix);
        for key in repository.keys_under(start_prefix, None) {
            let _ = set.element_added(&key);
        }
        set
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_prefix(&self) -> &str {
        &self.start_prefix
    }

    /// The externally visible result: a cached read-only snapshot, rebuilt
    /// lazily after internal mutation.
    pub fn value(&self) -> Arc<[String]> {
        let mut inner = self.inner.lock().unwrap();
        if inner.snapshot.is_none() {
            let built: Arc<[String]> = Arc::from(inner.members.clone().into_boxed_slice());
            inner.snapshot = Some(built);
        }
        inner.snapshot.as_ref().unwrap().clone()
    }

    /// Unregisters the hierarchy listener, every tracked subscription, and
    /// every synthesized condition.
    pub fn dispose(&self) {
        let strong = match self.weak_self.upgrade() {
            Some(strong) => strong,
            None => return,
        };
        if let Some(repository) = self.repository.upgrade() {
            let hierarchy_listener = Arc::clone(&strong) as Arc<dyn RepositoryListener>;
            repository.remove_repository_listener(&hierarchy_listener);
            let listener = Arc::clone(&strong) as Arc<dyn DataListener>;
            let conditions: Vec<(String, String)> = {
                let mut registry = self.conditions.lock().unwrap();
                let drained = registry
                    .iter()
                    .map(|(prefix, condition)| (prefix.clone(), condition.clone()))
                    .collect();
                *registry = BiMap::new();
                drained
            };
            for (_, condition_name) in conditions {
                repository.remove_data_listener(&condition_name, &listener);
                repository.remove_value(&condition_name);
            }
            let watched: Vec<String> = self
                .watched
                .lock()
                .unwrap()
                .drain()
                .map(|(name, _)| name)
                .collect();
            for name in watched {
                repository.remove_data_listener(&name, &listener);
            }
        }
        let mut inner = self.inner.lock().unwrap();
        inner.members.clear();
        inner.snapshot = None;
    }

    /// The prefix a tagged name contributes, when its final segment equals
    /// or ends with the tag suffix.
    fn match_tag(&self, name: &str) -> Option<String> {
        if self.tag_suffix.is_empty() || !name.ends_with(&self.tag_suffix) {
            return None;
        }
        let stripped = &name[..name.len() - self.tag_suffix.len()];
        let prefix = stripped.trim_end_matches(SEPARATOR);
        if prefix.is_empty() {
            return None;
        }
        Some(prefix.to_owned())
    }

    fn insert_member(&self, prefix: &str) {
        let mut inner = self.inner.lock().unwrap();
        match inner
            .members
            .binary_search_by(|kept| hierarchy_cmp(kept, prefix))
        {
            Ok(_) => (),
            Err(position) => {
                // a failed binary search can be transient disorder from a
                // concurrent hierarchy edit; double-check linearly before
                // concluding absence
                if inner.members.iter().any(|kept| kept == prefix) {
                    debug!(set = %self.name, "result list out of order; resorting");
                    inner.members.sort_by(|a, b| hierarchy_cmp(a, b));
                    inner.snapshot = None;
                    return;
                }
                inner.members.insert(position, prefix.to_owned());
                inner.snapshot = None;
            }
        }
    }

    fn remove_member(&self, prefix: &str) {
        let mut inner = self.inner.lock().unwrap();
        match inner
            .members
            .binary_search_by(|kept| hierarchy_cmp(kept, prefix))
        {
            Ok(position) => {
                inner.members.remove(position);
                inner.snapshot = None;
            }
            Err(_) => {
                if let Some(found) = inner.members.iter().position(|kept| kept == prefix) {
                    debug!(set = %self.name, "result list out of order; resorting");
                    inner.members.remove(found);
                    inner.members.sort_by(|a, b| hierarchy_cmp(a, b));
                    inner.snapshot = None;
                }
            }
        }
    }

    fn data_listener(&self) -> Option<Arc<dyn DataListener>> {
        self.weak_self
            .upgrade()
            .map(|strong| strong as Arc<dyn DataListener>)
    }
}

impl RepositoryListener for DynamicSearchSet {
    fn element_added(&self, name: &str) -> Result<()> {
        let prefix = match self.match_tag(name) {
            Some(prefix) => prefix,
            None => return Ok(()),
        };
        let repository = match self.repository.upgrade() {
            Some(repository) => repository,
            None => return Ok(()),
        };
        let listener = match self.data_listener() {
            Some(listener) => listener,
            None => return Ok(()),
        };
        match &self.condition {
            None => {
                // track the tagged element's own value, so the prefix can be
                // dropped when it becomes undefined
                let canonical =
                    repository.add_active_data_listener(name, listener, &self.name, false);
                self.watched
                    .lock()
                    .unwrap()
                    .insert(canonical.clone(), prefix.clone());
                if repository.get_simple_value(&canonical).is_defined() {
                    self.insert_member(&prefix);
                }
            }
            Some(script) => {
                let serial = repository.generate_serial();
                let condition_name = format!("{}/Search_Condition_{}", prefix, serial);
                repository.put_expression(&condition_name, Arc::clone(script));
                self.conditions
                    .lock()
                    .unwrap()
                    .insert(prefix.clone(), condition_name.clone());
                repository.add_active_data_listener(&condition_name, listener, &self.name, false);
                if repository.get_simple_value(&condition_name).is_truthy() {
                    self.insert_member(&prefix);
                }
            }
        }
        Ok(())
    }

    fn element_removed(&self, name: &str) -> Result<()> {
        let prefix = match self.match_tag(name) {
            Some(prefix) => prefix,
            None => return Ok(()),
        };
        let repository = match self.repository.upgrade() {
            Some(repository) => repository,
            None => return Ok(()),
        };
        let condition_name = self
            .conditions
            .lock()
            .unwrap()
            .remove_by_left(&prefix)
            .map(|(_, condition)| condition);
        if let Some(listener) = self.data_listener() {
            if let Some(condition_name) = &condition_name {
                repository.remove_data_listener(condition_name, &listener);
            }
            if self.watched.lock().unwrap().remove(name).is_some() {
                repository.remove_data_listener(name, &listener);
            }
        }
        if let Some(condition_name) = condition_name {
            repository.remove_value(&condition_name);
        }
        self.remove_member(&prefix);
        Ok(())
    }
}

impl DataListener for DynamicSearchSet {
    fn value_changed(&self, name: &str) -> Result<()> {
        let repository = match self.repository.upgrade() {
            Some(repository) => repository,
            None => return Ok(()),
        };
        let conditioned = self
            .conditions
            .lock()
            .unwrap()
            .get_by_right(name)
            .cloned()
            .map(|prefix| (prefix, true));
        let tracked = match conditioned {
            Some(found) => Some(found),
            None => self
                .watched
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .map(|prefix| (prefix, false)),
        };
        let (prefix, conditioned) = match tracked {
            Some(found) => found,
            None => return Ok(()),
        };
        let value = repository.get_simple_value(name);
        let include = if conditioned {
            value.is_truthy()
        } else {
            value.is_defined()
        };
        if include {
            self.insert_member(&prefix);
        } else {
            self.remove_member(&prefix);
        }
        Ok(())
    }
}
