use std::sync::{Arc, Mutex};

use ripplekeep::dispatch::{Event, EventKind, ListenerDispatchTree, RepositoryListener};
use ripplekeep::error::{RepositoryError, Result};

struct Recorder {
    added: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    failing: bool,
}

impl Recorder {
    fn new() -> Arc<Recorder> {
        Arc::new(Recorder {
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            failing: false,
        })
    }
    fn failing() -> Arc<Recorder> {
        Arc::new(Recorder {
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            failing: true,
        })
    }
    fn added(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }
    fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

impl RepositoryListener for Recorder {
    fn element_added(&self, name: &str) -> Result<()> {
        self.added.lock().unwrap().push(name.to_owned());
        if self.failing {
            return Err(RepositoryError::Notification("recorder told to fail".into()));
        }
        Ok(())
    }
    fn element_removed(&self, name: &str) -> Result<()> {
        self.removed.lock().unwrap().push(name.to_owned());
        Ok(())
    }
}

fn added(name: &str) -> Event {
    Event {
        kind: EventKind::Added,
        name: name.to_owned(),
    }
}

fn removed(name: &str) -> Event {
    Event {
        kind: EventKind::Removed,
        name: name.to_owned(),
    }
}

#[test]
fn matching_prefixes_receive_the_event_exactly_once() {
    let mut tree = ListenerDispatchTree::new();
    let on_a = Recorder::new();
    let on_ab = Recorder::new();
    let on_c = Recorder::new();
    tree.add_listener(on_a.clone(), "/a");
    tree.add_listener(on_ab.clone(), "/a/b");
    tree.add_listener(on_c.clone(), "/c");

    tree.dispatch(&added("/a/b/x"));

    assert_eq!(on_a.added(), vec!["/a/b/x"]);
    assert_eq!(on_ab.added(), vec!["/a/b/x"]);
    assert!(on_c.added().is_empty());
}

#[test]
fn non_matching_names_never_reach_a_listener() {
    let mut tree = ListenerDispatchTree::new();
    let on_ab = Recorder::new();
    tree.add_listener(on_ab.clone(), "/a/b");

    tree.dispatch(&added("/a/c/x"));
    tree.dispatch(&added("/a"));
    tree.dispatch(&removed("/b/a/b"));

    assert!(on_ab.added().is_empty());
    assert!(on_ab.removed().is_empty());
}

#[test]
fn partially_overlapping_prefixes_split_and_still_route() {
    let mut tree = ListenerDispatchTree::new();
    let apples = Recorder::new();
    let april = Recorder::new();
    let ap = Recorder::new();
    tree.add_listener(apples.clone(), "/apple");
    // forces a split at the shared "/ap" run
    tree.add_listener(april.clone(), "/april");
    // a literal prefix of an existing key lands on the intermediate node
    tree.add_listener(ap.clone(), "/ap");

    tree.dispatch(&added("/apple/pie"));
    tree.dispatch(&added("/april/rain"));

    assert_eq!(apples.added(), vec!["/apple/pie"]);
    assert_eq!(april.added(), vec!["/april/rain"]);
    assert_eq!(ap.added(), vec!["/apple/pie", "/april/rain"]);
}

#[test]
fn empty_prefix_sees_every_event_by_kind() {
    let mut tree = ListenerDispatchTree::new();
    let everything = Recorder::new();
    tree.add_listener(everything.clone(), "");

    tree.dispatch(&added("/a/x"));
    tree.dispatch(&removed("/b/y"));

    assert_eq!(everything.added(), vec!["/a/x"]);
    assert_eq!(everything.removed(), vec!["/b/y"]);
}

#[test]
fn remove_listener_reaches_every_registration() {
    let mut tree = ListenerDispatchTree::new();
    let recorder = Recorder::new();
    tree.add_listener(recorder.clone(), "/a");
    tree.add_listener(recorder.clone(), "/b/c");

    tree.remove_listener(&(recorder.clone() as Arc<dyn RepositoryListener>));
    tree.dispatch(&added("/a/x"));
    tree.dispatch(&added("/b/c/y"));

    assert!(recorder.added().is_empty());
}

#[test]
fn a_failing_listener_does_not_stop_delivery() {
    let mut tree = ListenerDispatchTree::new();
    let bad = Recorder::failing();
    let good = Recorder::new();
    tree.add_listener(bad.clone(), "/a");
    tree.add_listener(good.clone(), "/a");

    tree.dispatch(&added("/a/x"));

    assert_eq!(bad.added(), vec!["/a/x"]);
    assert_eq!(good.added(), vec!["/a/x"]);
}
