//! Hierarchical key/value store.
//!
//! Maps slash-delimited names to values while sharing prefix nodes, so a
//! repository with thousands of names under a handful of projects costs far
//! less than a flat map keyed by full names. Nodes live in a slab owned by
//! the tree and reference each other by index, so there are no owning
//! pointer cycles to break; the root is always slot zero.
//!
//! Every structural operation and snapshot-taking call locks the tree's one
//! mutex. Operations are O(depth), so the coarse lock is acceptable.

use core::hash::BuildHasherDefault;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use seahash::SeaHasher;

pub type NameHasher = BuildHasherDefault<SeaHasher>;

pub const SEPARATOR: char = '/';
pub const PARENT_SEGMENT: &str = "..";

/// Resolves `name` against `prefix`: absolute names stand alone, relative
/// names are joined, and `..` / empty segments are normalized away. The
/// result is always an absolute name.
pub fn resolve_name(prefix: &str, name: &str) -> String {
    let joined = if name.starts_with(SEPARATOR) {
        name.to_owned()
    } else if prefix.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", prefix.trim_end_matches(SEPARATOR), name)
    };
    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split(SEPARATOR) {
        match segment {
            "" => (),
            PARENT_SEGMENT => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// The prefix of an absolute name: everything up to the final segment.
pub fn prefix_of(name: &str) -> String {
    match name.trim_end_matches(SEPARATOR).rfind(SEPARATOR) {
        Some(0) | None => String::from("/"),
        Some(found) => name[..found].to_owned(),
    }
}

/// The final segment of a name.
pub fn final_segment(name: &str) -> &str {
    name.trim_end_matches(SEPARATOR)
        .rsplit(SEPARATOR)
        .next()
        .unwrap_or("")
}

// ------------- NodeId -------------
/// Index of a node in its tree's slab. Only meaningful for the tree that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

pub const ROOT: NodeId = NodeId(0);

// ------------- Node -------------
#[derive(Debug)]
enum Entry<V> {
    Leaf(V),
    Context(NodeId),
}

#[derive(Debug)]
struct Node<V> {
    // BTreeMap keeps the contents in hierarchy order for iteration
    contents: BTreeMap<String, Entry<V>>,
    attributes: Option<HashMap<String, String, NameHasher>>,
    parent: Option<NodeId>,
}

impl<V> Node<V> {
    fn new(parent: Option<NodeId>) -> Self {
        Self {
            contents: BTreeMap::new(),
            attributes: None,
            parent,
        }
    }
}

// ------------- Slab -------------
#[derive(Debug)]
struct Slab<V> {
    nodes: Vec<Option<Node<V>>>,
    free: Vec<usize>,
}

impl<V> Slab<V> {
    fn new() -> Self {
        Self {
            nodes: vec![Some(Node::new(None))],
            free: Vec::new(),
        }
    }
    fn node(&self, id: NodeId) -> &Node<V> {
        self.nodes[id.0].as_ref().expect("stale node id")
    }
    fn node_mut(&mut self, id: NodeId) -> &mut Node<V> {
        self.nodes[id.0].as_mut().expect("stale node id")
    }
    fn allocate(&mut self, parent: NodeId) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(Node::new(Some(parent)));
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(Node::new(Some(parent))));
                NodeId(self.nodes.len() - 1)
            }
        }
    }
    fn take(&mut self, id: NodeId) -> Node<V> {
        let node = self.nodes[id.0].take().expect("stale node id");
        self.free.push(id.0);
        node
    }
}

enum Found<'s, V> {
    Leaf(&'s V),
    Context(NodeId),
}

/// Walks `key` from `at`: a leading separator restarts from the root, `..`
/// resolves to the parent, and empty segments are skipped. Returns `None`
/// for any missing path.
fn walk<'s, V>(slab: &'s Slab<V>, mut at: NodeId, key: &str) -> Option<Found<'s, V>> {
    let mut rest = key;
    if let Some(stripped) = rest.strip_prefix(SEPARATOR) {
        at = ROOT;
        rest = stripped;
    }
    loop {
        if rest.is_empty() {
            return Some(Found::Context(at));
        }
        let (segment, tail) = match rest.split_once(SEPARATOR) {
            Some((segment, tail)) => (segment, tail),
            None => (rest, ""),
        };
        rest = tail;
        if segment.is_empty() {
            continue;
        }
        if segment == PARENT_SEGMENT {
            at = slab.node(at).parent?;
            continue;
        }
        match slab.node(at).contents.get(segment)? {
            Entry::Leaf(value) => {
                return if rest.split(SEPARATOR).all(str::is_empty) {
                    Some(Found::Leaf(value))
                } else {
                    None
                };
            }
            Entry::Context(child) => {
                at = *child;
            }
        }
    }
}

fn split_leaf(key: &str) -> (&str, &str) {
    match key.rfind(SEPARATOR) {
        Some(0) => ("/", &key[1..]),
        Some(found) => (&key[..found], &key[found + 1..]),
        None => ("", key),
    }
}

fn ensure_path<V>(slab: &mut Slab<V>, mut at: NodeId, path: &str) -> NodeId {
    let mut rest = path;
    if let Some(stripped) = rest.strip_prefix(SEPARATOR) {
        at = ROOT;
        rest = stripped;
    }
    for segment in rest.split(SEPARATOR) {
        if segment.is_empty() {
            continue;
        }
        if segment == PARENT_SEGMENT {
            at = slab.node(at).parent.expect("no parent above the root");
            continue;
        }
        let existing = match slab.node(at).contents.get(segment) {
            Some(Entry::Context(child)) => Some(*child),
            Some(Entry::Leaf(_)) => {
                panic!("'{}' holds a plain value and cannot become a context", segment)
            }
            None => None,
        };
        at = match existing {
            Some(child) => child,
            None => {
                let child = slab.allocate(at);
                slab.node_mut(at)
                    .contents
                    .insert(segment.to_owned(), Entry::Context(child));
                child
            }
        };
    }
    at
}

fn release_subtree<V>(slab: &mut Slab<V>, id: NodeId) {
    let node = slab.take(id);
    for entry in node.contents.into_values() {
        if let Entry::Context(child) = entry {
            release_subtree(slab, child);
        }
    }
}

fn path_of<V>(slab: &Slab<V>, node: NodeId) -> String {
    let mut segments = Vec::new();
    let mut at = node;
    while let Some(parent) = slab.node(at).parent {
        let segment = slab
            .node(parent)
            .contents
            .iter()
            .find_map(|(name, entry)| match entry {
                Entry::Context(child) if *child == at => Some(name.clone()),
                _ => None,
            })
            .expect("node detached from its parent");
        segments.push(segment);
        at = parent;
    }
    segments.reverse();
    format!("/{}", segments.join("/"))
}

// ------------- NamespaceTree -------------
#[derive(Debug)]
pub struct NamespaceTree<V> {
    slab: Mutex<Slab<V>>,
}

impl<V> Default for NamespaceTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> NamespaceTree<V> {
    pub fn new() -> Self {
        Self {
            slab: Mutex::new(Slab::new()),
        }
    }

    pub fn root(&self) -> NodeId {
        ROOT
    }

    /// Looks up a leaf value. Absolute keys resolve from the root, relative
    /// keys from `from`; a missing path is `None`, not an error.
    pub fn get(&self, from: NodeId, key: &str) -> Option<V>
    where
        V: Clone,
    {
        let slab = self.slab.lock().unwrap();
        match walk(&slab, from, key)? {
            Found::Leaf(value) => Some(value.clone()),
            Found::Context(_) => None,
        }
    }

    /// Resolves a key naming a context node.
    pub fn get_context(&self, from: NodeId, key: &str) -> Option<NodeId> {
        let slab = self.slab.lock().unwrap();
        match walk(&slab, from, key)? {
            Found::Context(id) => Some(id),
            Found::Leaf(_) => None,
        }
    }

    /// Stores a leaf value, creating intermediate contexts on demand, and
    /// returns the displaced leaf if one was there. A key ending in the
    /// separator names a context and cannot carry a leaf; that and an empty
    /// key are programming errors and fail fast.
    pub fn put(&self, from: NodeId, key: &str, value: V) -> Option<V> {
        assert!(!key.is_empty(), "put: empty key");
        assert!(
            !key.ends_with(SEPARATOR),
            "put: key '{}' names a context and cannot carry a leaf value",
            key
        );
        let mut slab = self.slab.lock().unwrap();
        let (directory, leaf) = split_leaf(key);
        assert!(
            !leaf.is_empty() && leaf != PARENT_SEGMENT,
            "put: key '{}' has no leaf segment",
            key
        );
        let at = ensure_path(&mut slab, from, directory);
        if let Some(Entry::Context(_)) = slab.node(at).contents.get(leaf) {
            panic!("put: '{}' already names a context", key);
        }
        match slab
            .node_mut(at)
            .contents
            .insert(leaf.to_owned(), Entry::Leaf(value))
        {
            Some(Entry::Leaf(displaced)) => Some(displaced),
            _ => None,
        }
    }

    /// Creates (or finds) the context named by `key` and returns its id.
    pub fn put_context(&self, from: NodeId, key: &str) -> NodeId {
        let mut slab = self.slab.lock().unwrap();
        ensure_path(&mut slab, from, key)
    }

    /// Removes a leaf and returns its value. Removing a context detaches the
    /// whole subtree and frees its slots. Missing paths are a no-op.
    pub fn remove(&self, from: NodeId, key: &str) -> Option<V> {
        assert!(!key.is_empty(), "remove: empty key");
        let mut slab = self.slab.lock().unwrap();
        let trimmed = key.trim_end_matches(SEPARATOR);
        let (directory, leaf) = split_leaf(trimmed);
        let at = match walk(&slab, from, directory) {
            Some(Found::Context(id)) => id,
            _ => return None,
        };
        match slab.node_mut(at).contents.remove(leaf)? {
            Entry::Leaf(value) => Some(value),
            Entry::Context(child) => {
                release_subtree(&mut slab, child);
                None
            }
        }
    }

    // ------------- Attributes -------------
    pub fn set_attribute(&self, node: NodeId, key: &str, value: &str) {
        assert!(!key.is_empty(), "set_attribute: empty key");
        let mut slab = self.slab.lock().unwrap();
        slab.node_mut(node)
            .attributes
            .get_or_insert_with(HashMap::default)
            .insert(key.to_owned(), value.to_owned());
    }

    /// Looks up an attribute; when `inherit` is set a local miss walks the
    /// parent chain, so the closest override wins.
    pub fn attribute(&self, node: NodeId, key: &str, inherit: bool) -> Option<String> {
        let slab = self.slab.lock().unwrap();
        let mut at = Some(node);
        while let Some(id) = at {
            if let Some(table) = &slab.node(id).attributes {
                if let Some(value) = table.get(key) {
                    return Some(value.clone());
                }
            }
            if !inherit {
                return None;
            }
            at = slab.node(id).parent;
        }
        None
    }

    // ------------- Iteration -------------
    /// Takes a structural snapshot under the lock and returns a lazy,
    /// depth-first, restartable iterator over the fully-qualified leaf keys
    /// beneath `node`, optionally filtered to keys whose final segment
    /// equals `name_filter`. Concurrent mutation after the call does not
    /// disturb the walk.
    pub fn keys_under(&self, node: NodeId, name_filter: Option<&str>) -> KeyIterator {
        let slab = self.slab.lock().unwrap();
        let base = path_of(&slab, node);
        let mut entries = Vec::new();
        snapshot(&slab, node, &base, &mut entries);
        KeyIterator {
            entries,
            filter: name_filter.map(str::to_owned),
            position: 0,
        }
    }
}

fn snapshot<V>(slab: &Slab<V>, at: NodeId, qualified: &str, into: &mut Vec<(String, bool)>) {
    for (segment, entry) in &slab.node(at).contents {
        let name = if qualified.ends_with(SEPARATOR) {
            format!("{}{}", qualified, segment)
        } else {
            format!("{}/{}", qualified, segment)
        };
        match entry {
            Entry::Leaf(_) => into.push((name, true)),
            Entry::Context(child) => {
                into.push((name.clone(), false));
                snapshot(slab, *child, &name, into);
            }
        }
    }
}

/// Iterator over a boolean-marked structural snapshot: each entry is a
/// fully-qualified name marked leaf or context; only leaves are yielded.
#[derive(Debug)]
pub struct KeyIterator {
    entries: Vec<(String, bool)>,
    filter: Option<String>,
    position: usize,
}

impl KeyIterator {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            filter: None,
            position: 0,
        }
    }
    /// Rewinds to the beginning of the snapshot.
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl Iterator for KeyIterator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while self.position < self.entries.len() {
            let (name, is_leaf) = &self.entries[self.position];
            self.position += 1;
            if !*is_leaf {
                continue;
            }
            match &self.filter {
                Some(wanted) if final_segment(name) != wanted => continue,
                _ => return Some(name.clone()),
            }
        }
        None
    }
}
