//! Prefix-trie routing of hierarchy add/remove events.
//!
//! Listeners register under a name prefix; an event walks the trie along its
//! name and reaches exactly the listeners whose prefix matches, avoiding a
//! string comparison per registered listener. Among any node's children no
//! two keys share a first character, so at most one child can match during
//! dispatch.
//!
//! The tree has no internal locking. The caller owns serialization of
//! `add_listener` / `remove_listener` / `dispatch`; the repository facade
//! keeps structural access behind its own mutex and collects recipients via
//! [`ListenerDispatchTree::matching_listeners`] so callbacks run outside
//! that lock.

use std::sync::Arc;

use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Removed,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub name: String,
}

/// Receives hierarchy events. Failures are reported back to the dispatcher,
/// which logs them and keeps delivering.
pub trait RepositoryListener: Send + Sync {
    fn element_added(&self, name: &str) -> Result<()>;
    fn element_removed(&self, name: &str) -> Result<()>;
}

enum Overlap {
    /// No shared characters.
    None,
    /// The existing key is a literal prefix of the candidate (or equal).
    Descend,
    /// Partial overlap of this many bytes, or the candidate is a literal
    /// prefix of the existing key.
    Split(usize),
}

fn overlap(existing: &str, candidate: &str) -> Overlap {
    let mut shared = 0;
    for ((offset, kept), new) in existing.char_indices().zip(candidate.chars()) {
        if kept != new {
            break;
        }
        shared = offset + kept.len_utf8();
    }
    if shared == 0 {
        Overlap::None
    } else if shared == existing.len() {
        Overlap::Descend
    } else {
        Overlap::Split(shared)
    }
}

// ------------- ListenerDispatchTree -------------
#[derive(Default)]
pub struct ListenerDispatchTree {
    listeners: Vec<Arc<dyn RepositoryListener>>,
    children: Vec<(String, ListenerDispatchTree)>,
}

impl ListenerDispatchTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` under `prefix`. An empty prefix lands on this
    /// node's own list; otherwise the prefix descends into the child it
    /// shares a leading run with, splitting that child when the overlap is
    /// partial so the first-character invariant holds.
    pub fn add_listener(&mut self, listener: Arc<dyn RepositoryListener>, prefix: &str) {
        if prefix.is_empty() {
            self.listeners.push(listener);
            return;
        }
        for position in 0..self.children.len() {
            match overlap(&self.children[position].0, prefix) {
                Overlap::None => continue,
                Overlap::Descend => {
                    let consumed = self.children[position].0.len();
                    self.children[position]
                        .1
                        .add_listener(listener, &prefix[consumed..]);
                    return;
                }
                Overlap::Split(shared) => {
                    let (old_key, old_child) = self.children.swap_remove(position);
                    let mut intermediate = ListenerDispatchTree::new();
                    intermediate
                        .children
                        .push((old_key[shared..].to_owned(), old_child));
                    intermediate.add_listener(listener, &prefix[shared..]);
                    self.children.push((old_key[..shared].to_owned(), intermediate));
                    return;
                }
            }
        }
        let mut child = ListenerDispatchTree::new();
        child.listeners.push(listener);
        self.children.push((prefix.to_owned(), child));
    }

    /// Removes every registration of `listener`, at this node and below. A
    /// listener may appear at several nodes, so every child is visited.
    pub fn remove_listener(&mut self, listener: &Arc<dyn RepositoryListener>) {
        self.listeners.retain(|kept| !Arc::ptr_eq(kept, listener));
        for (_, child) in self.children.iter_mut() {
            child.remove_listener(listener);
        }
    }

    /// Collects, in delivery order, the listeners whose prefix matches
    /// `name`: this node's own list first, then the single matching child.
    pub fn matching_listeners(&self, name: &str) -> Vec<Arc<dyn RepositoryListener>> {
        let mut found = Vec::new();
        self.collect(name, &mut found);
        found
    }

    fn collect(&self, remaining: &str, into: &mut Vec<Arc<dyn RepositoryListener>>) {
        into.extend(self.listeners.iter().cloned());
        for (key, child) in &self.children {
            if remaining.starts_with(key.as_str()) {
                child.collect(&remaining[key.len()..], into);
                break;
            }
        }
    }

    /// Delivers `event` to every matching listener. A failing listener is
    /// logged and delivery continues.
    pub fn dispatch(&self, event: &Event) {
        for listener in self.matching_listeners(&event.name) {
            let outcome = match event.kind {
                EventKind::Added => listener.element_added(&event.name),
                EventKind::Removed => listener.element_removed(&event.name),
            };
            if let Err(error) = outcome {
                warn!(name = %event.name, %error, "listener failed; continuing delivery");
            }
        }
    }
}
