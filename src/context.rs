//! Subscribe-to-everything-you-read contexts for plain listeners.
//!
//! A [`SubscribingContext`] gives an ad hoc consumer (a report, an exporter,
//! a condition evaluator) the same dependency-tracking behavior expression
//! cells get for free: every name read through the context during a pass is
//! subscribed under one listener identity, and a pass-end sweep drops
//! whatever was not re-read. The context is cheaply cloneable and shares one
//! subscription set, because concurrent passes for the same listener
//! identity can interleave.

use std::sync::Arc;

use crate::datatype::Value;
use crate::expression::DependencyContext;
use crate::repository::{DataListener, Repository};
use crate::script::NameResolver;

/// Reserved pseudo-name resolving to the context's current prefix.
pub const PREFIX_PSEUDO_NAME: &str = "//Prefix";
/// Reserved pseudo-name resolving to the listener's display name.
pub const LISTENER_PSEUDO_NAME: &str = "//Listener_Name";

#[derive(Clone)]
pub struct SubscribingContext {
    inner: Arc<DependencyContext>,
}

impl SubscribingContext {
    pub fn new(
        repository: &Arc<Repository>,
        prefix: &str,
        listener: Arc<dyn DataListener>,
        listener_name: &str,
    ) -> Self {
        let inner = Arc::new(DependencyContext::new(
            Arc::downgrade(repository),
            prefix,
            listener_name,
        ));
        inner.set_listener(listener);
        Self { inner }
    }

    /// Reads a name through the context. The two reserved pseudo-names
    /// resolve to contextual metadata; every other name resolves relative to
    /// the prefix and is subscribed on its first read of the pass.
    pub fn get(&self, name: &str) -> Value {
        match name {
            PREFIX_PSEUDO_NAME => Value::Text(self.inner.prefix().to_owned()),
            LISTENER_PSEUDO_NAME => Value::Text(self.inner.listener_name().to_owned()),
            _ => self.inner.touch(name),
        }
    }

    /// Ends the current evaluation pass: every previously tracked name not
    /// read this pass is unsubscribed. Call once per pass.
    pub fn remove_old_subscriptions(&self) {
        self.inner.end_pass();
    }

    /// Releases every subscription and the listener reference.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl NameResolver for SubscribingContext {
    fn get(&self, name: &str) -> Value {
        SubscribingContext::get(self, name)
    }
}
