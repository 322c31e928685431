//! Directed dependency graph
//!
//! Nodes wrap arbitrary data keyed by a caller-supplied hash function; an
//! edge `from -> to` means "from depends on to". Nodes without outgoing edges
//! are roots: they can be built now. A non-empty graph without roots contains
//! a cycle.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Graph node
#[derive(Debug, Clone)]
pub struct Node<T> {
    key: String,
    data: T,
    incoming: BTreeSet<String>,
    outgoing: BTreeSet<String>,
}

impl<T> Node<T> {
    /// Hash key
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wrapped data
    #[inline]
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Keys of the nodes depending on this one
    #[inline]
    pub fn incoming(&self) -> impl Iterator<Item = &str> {
        self.incoming.iter().map(String::as_str)
    }

    /// Keys of the nodes this one depends on
    #[inline]
    pub fn outgoing(&self) -> impl Iterator<Item = &str> {
        self.outgoing.iter().map(String::as_str)
    }
}

type HashFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

struct CycleSearch<'a, 'd> {
    path: Vec<&'a str>,
    on_path: BTreeSet<&'a str>,
    done: &'d mut BTreeSet<&'a str>,
}

/// Directed graph keyed by `hash(data)`
pub struct Graph<T> {
    nodes: BTreeMap<String, Node<T>>,
    hash: HashFn<T>,
}

impl<T> Graph<T> {
    /// Create an empty graph
    pub fn new<H>(hash: H) -> Self
    where
        H: Fn(&T) -> String + Send + Sync + 'static,
    {
        Self {
            nodes: BTreeMap::new(),
            hash: Box::new(hash),
        }
    }

    /// Nodes that depend on nothing
    pub fn roots(&self) -> Vec<&Node<T>> {
        self.nodes
            .values()
            .filter(|node| node.outgoing.is_empty())
            .collect()
    }

    /// Add `from -> to`, inserting either node as needed
    pub fn insert_edge(&mut self, from: T, to: T) {
        let from_key = self.lookup_or_insert_node(from).key.clone();
        let to_key = self.lookup_or_insert_node(to).key.clone();

        if let Some(node) = self.nodes.get_mut(&from_key) {
            node.outgoing.insert(to_key.clone());
        }
        if let Some(node) = self.nodes.get_mut(&to_key) {
            node.incoming.insert(from_key);
        }
    }

    /// Remove the node and every edge touching it
    pub fn remove_node(&mut self, data: &T) {
        let key = (self.hash)(data);
        if self.nodes.remove(&key).is_none() {
            return;
        }
        for node in self.nodes.values_mut() {
            node.outgoing.remove(&key);
            node.incoming.remove(&key);
        }
    }

    /// Get the node for `data`, inserting it if absent
    pub fn lookup_or_insert_node(&mut self, data: T) -> &Node<T> {
        let key = (self.hash)(&data);
        self.nodes.entry(key.clone()).or_insert_with(|| Node {
            key,
            data,
            incoming: BTreeSet::new(),
            outgoing: BTreeSet::new(),
        })
    }

    /// Get the node for `data`
    #[inline]
    pub fn lookup(&self, data: &T) -> Option<&Node<T>> {
        self.nodes.get(&(self.hash)(data))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Find a cycle by exhaustive search, rendered as `a -> b -> a`.
    ///
    /// Slow; only meant for error reporting.
    pub fn find_cycle_slow(&self) -> Option<String> {
        let mut done = BTreeSet::new();
        for (key, node) in &self.nodes {
            if done.contains(key.as_str()) {
                continue;
            }
            let mut search = CycleSearch {
                path: vec![key.as_str()],
                on_path: BTreeSet::from([key.as_str()]),
                done: &mut done,
            };
            if let Some(cycle) = self.find_cycle(node, &mut search) {
                return Some(cycle);
            }
            done.insert(key.as_str());
        }
        None
    }

    fn find_cycle<'a>(&'a self, node: &'a Node<T>, search: &mut CycleSearch<'a, '_>) -> Option<String> {
        for key in &node.outgoing {
            if search.on_path.contains(key.as_str()) {
                let mut cycle = search.path.clone();
                cycle.push(key);
                return Some(cycle.join(" -> "));
            }
            // fully explored without reaching a cycle
            if search.done.contains(key.as_str()) {
                continue;
            }
            let Some(next) = self.nodes.get(key) else {
                continue;
            };
            search.path.push(key);
            search.on_path.insert(key);
            if let Some(cycle) = self.find_cycle(next, search) {
                return Some(cycle);
            }
            search.on_path.remove(key.as_str());
            search.path.pop();
            search.done.insert(key);
        }
        None
    }
}

impl<T> fmt::Display for Graph<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, node) in &self.nodes {
            if !first {
                f.write_str("\n")?;
            }
            first = false;
            let incoming: Vec<&str> = node.incoming().collect();
            let outgoing: Vec<&str> = node.outgoing().collect();
            writeln!(
                f,
                "{key}\n\t(-> incoming)[{}]\n\t(outgoing ->)[{}]",
                incoming.join(", "),
                outgoing.join(",")
            )?;
        }
        Ok(())
    }
}

impl<T> fmt::Debug for Graph<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}
