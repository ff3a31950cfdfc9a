//! Ripplekeep – a reactive hierarchical data repository.
//!
//! Ripplekeep keeps a namespace of slash-delimited names holding either
//! plain values or compiled-expression "cells" that automatically recompute
//! when any value they read changes, plus an event-routing layer that
//! delivers add/remove notifications only to listeners whose registered
//! prefix matches:
//! * A [`namespace::NamespaceTree`] stores values under hierarchical names,
//!   sharing prefix nodes and inheriting per-node attributes up the parent
//!   chain.
//! * A [`dispatch::ListenerDispatchTree`] routes hierarchy add/remove events
//!   through a prefix trie, so delivery cost does not grow with the number
//!   of registered listeners.
//! * An [`expression::ActiveExpression`] runs a compiled [`script::Script`]
//!   against the repository, memoizes the result, tracks exactly the names
//!   it read, and recomputes when any of them changes. Self-recursive
//!   evaluation is detected and aborted rather than looped.
//! * A [`context::SubscribingContext`] gives plain listeners the same
//!   subscribe-everything-you-read behavior for ad hoc evaluation passes.
//! * [`rename::perform_renames`] resolves declared rename rules (literal and
//!   regex-pattern) transitively when a data map is merged against an
//!   ancestor's rule source.
//! * A [`search::DynamicSearchSet`] maintains a live, sorted,
//!   condition-filtered set of tagged hierarchy prefixes.
//!
//! The [`repository::Repository`] facade wires these together: collaborators
//! store values through it, change events route through the dispatch trie,
//! and expression cells and search sets register as listeners so they
//! maintain themselves.
//!
//! ## Concurrency
//! Multiple preemptive threads read and write concurrently; there is no
//! async machinery in this crate. Each tree serializes its structural
//! operations on one mutex, each expression cell linearizes its own
//! recalculations, and cross-element consistency is eventual: a dependent
//! may be observed briefly after its dependency changed but before it
//! recomputed.
//!
//! ## Errors
//! Expression execution failure is not an error: it is logged and the cell
//! simply "currently has no value". Programming errors (empty keys, putting
//! a leaf where a context lives) fail fast. See [`error::RepositoryError`]
//! for the conditions that do surface.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use ripplekeep::repository::Repository;
//! use ripplekeep::datatype::Value;
//! use ripplekeep::script::SumScript;
//!
//! let repository = Repository::with_defaults();
//! repository.put_value("/Project/Design/Hours", Value::Number(10.0));
//! repository.put_value("/Project/Code/Hours", Value::Number(14.0));
//! repository.put_expression(
//!     "/Project/Total",
//!     Arc::new(SumScript::new(vec!["Design/Hours", "Code/Hours"])),
//! );
//! assert_eq!(
//!     repository.get_simple_value("/Project/Total"),
//!     Value::Number(24.0)
//! );
//! repository.put_value("/Project/Code/Hours", Value::Number(20.0));
//! assert_eq!(
//!     repository.get_simple_value("/Project/Total"),
//!     Value::Number(30.0)
//! );
//! ```

pub mod context;
pub mod datatype;
pub mod dispatch;
pub mod error;
pub mod expression;
pub mod namespace;
pub mod rename;
pub mod repository;
pub mod script;
pub mod search;
pub mod settings;
