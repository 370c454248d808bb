//! Immutable hierarchy index with transitive closure queries
//!
//! Built once per snapshot by [`HierarchyGraphBuilder`](super::HierarchyGraphBuilder)
//! and never mutated afterwards; a refresh builds a new index. Per-node
//! closures are memoised in a `DashMap` so concurrent readers share work
//! without taking a lock on the graph itself.

use crate::types::Name;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Traversal direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards parents
    Ascendants,
    /// Towards children
    Descendants,
}

/// Statistics about closure cache performance
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: usize,
    /// Number of cache misses
    pub misses: usize,
    /// Total number of entries in cache
    pub entries: usize,
}

impl CacheStats {
    /// Calculates the cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Read-only role / org-unit hierarchy
#[derive(Debug)]
pub struct HierarchyIndex {
    label: &'static str,

    /// Arena of node names, index = node id
    names: Vec<Name>,

    ids: HashMap<Name, usize>,

    parents: Vec<Vec<usize>>,

    children: Vec<Vec<usize>>,

    /// Memoised closures, `None` when caching is disabled
    closures: Option<DashMap<(Direction, usize), Arc<[usize]>>>,

    stats: DashMap<&'static str, usize>,
}

impl HierarchyIndex {
    pub(super) fn from_parts(
        label: &'static str,
        names: Vec<Name>,
        ids: HashMap<Name, usize>,
        parents: Vec<Vec<usize>>,
        children: Vec<Vec<usize>>,
    ) -> Self {
        Self {
            label,
            names,
            ids,
            parents,
            children,
            closures: Some(DashMap::new()),
            stats: DashMap::new(),
        }
    }

    /// Empty index
    pub fn empty(label: &'static str) -> Self {
        Self::from_parts(label, Vec::new(), HashMap::new(), Vec::new(), Vec::new())
    }

    /// Enable or disable closure memoisation
    pub fn with_closure_cache(mut self, enabled: bool) -> Self {
        self.closures = enabled.then(DashMap::new);
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.ids.contains_key(name)
    }

    /// Direct parents of a node
    pub fn parents_of(&self, name: &Name) -> Vec<Name> {
        self.neighbours(name, Direction::Ascendants)
    }

    /// Direct children of a node
    pub fn children_of(&self, name: &Name) -> Vec<Name> {
        self.neighbours(name, Direction::Descendants)
    }

    fn neighbours(&self, name: &Name, direction: Direction) -> Vec<Name> {
        self.ids
            .get(name)
            .map(|&id| {
                self.edges(direction)[id]
                    .iter()
                    .map(|&n| self.names[n].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Transitive closure over "parent of" edges, including the inputs
    pub fn ascendants<'a, I>(&self, names: I) -> HashSet<Name>
    where
        I: IntoIterator<Item = &'a Name>,
    {
        self.closure(names, Direction::Ascendants)
    }

    /// Transitive closure over "child of" edges, including the inputs
    pub fn descendants<'a, I>(&self, names: I) -> HashSet<Name>
    where
        I: IntoIterator<Item = &'a Name>,
    {
        self.closure(names, Direction::Descendants)
    }

    /// Closure of a single node
    pub fn ascendants_of(&self, name: &Name) -> HashSet<Name> {
        self.ascendants(std::iter::once(name))
    }

    /// Closure of a single node
    pub fn descendants_of(&self, name: &Name) -> HashSet<Name> {
        self.descendants(std::iter::once(name))
    }

    /// Whether `ancestor` is `name` or one of its ascendants
    pub fn is_ascendant(&self, ancestor: &Name, name: &Name) -> bool {
        if ancestor == name {
            return true;
        }
        match (self.ids.get(ancestor), self.ids.get(name)) {
            (Some(&a), Some(&n)) => self.node_closure(n, Direction::Ascendants).contains(&a),
            _ => false,
        }
    }

    /// Closure over a set of inputs; unknown inputs are returned as themselves
    pub fn closure<'a, I>(&self, names: I, direction: Direction) -> HashSet<Name>
    where
        I: IntoIterator<Item = &'a Name>,
    {
        let mut result = HashSet::new();
        for name in names {
            match self.ids.get(name) {
                Some(&id) => {
                    for &member in self.node_closure(id, direction).iter() {
                        result.insert(self.names[member].clone());
                    }
                }
                None => {
                    result.insert(name.clone());
                }
            }
        }
        result
    }

    fn edges(&self, direction: Direction) -> &[Vec<usize>] {
        match direction {
            Direction::Ascendants => &self.parents,
            Direction::Descendants => &self.children,
        }
    }

    fn node_closure(&self, id: usize, direction: Direction) -> Arc<[usize]> {
        let Some(cache) = &self.closures else {
            return self.traverse(id, direction);
        };

        if let Some(entry) = cache.get(&(direction, id)) {
            self.increment_stat("hits");
            return Arc::clone(entry.value());
        }

        self.increment_stat("misses");
        let closure = self.traverse(id, direction);
        cache.insert((direction, id), Arc::clone(&closure));
        closure
    }

    /// Breadth-first walk with a visited set
    ///
    /// Depth is bounded when the graph is built, so the closure is always
    /// complete.
    fn traverse(&self, start: usize, direction: Direction) -> Arc<[usize]> {
        let edges = self.edges(direction);
        let mut visited = vec![false; self.names.len()];
        let mut order = Vec::new();
        let mut queue = VecDeque::new();

        visited[start] = true;
        queue.push_back(start);

        while let Some(node) = queue.pop_front() {
            order.push(node);

            for &next in &edges[node] {
                if !visited[next] {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }

        order.into()
    }

    fn increment_stat(&self, key: &'static str) {
        self.stats
            .entry(key)
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &'static str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }

    /// Closure cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            entries: self.closures.as_ref().map(DashMap::len).unwrap_or(0),
        }
    }
}
