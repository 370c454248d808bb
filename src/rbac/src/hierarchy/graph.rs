//! Hierarchy graph construction with cycle detection
//!
//! Nodes are stored in an arena keyed by [`Name`]; edges are parent ids.
//! The builder accepts both "parent of" and "child of" declarations (role
//! records carry both sets) and refuses to build a graph containing a cycle.

use super::index::HierarchyIndex;
use crate::types::{AdminRole, Name, OrgUnit, Role};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, warn};

/// Default bound on the longest parent chain a hierarchy may contain
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Graph-related errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// Circular dependency detected in the graph
    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    /// Node declared twice
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    /// Invalid node definition
    #[error("Invalid node: {0}")]
    InvalidNode(String),
}

/// Anything that can be placed in a hierarchy: roles, admin roles, org units
pub trait HierarchyNode {
    fn node_name(&self) -> &Name;
    fn node_parents(&self) -> &BTreeSet<Name>;
    fn node_children(&self) -> &BTreeSet<Name>;
}

impl HierarchyNode for Role {
    fn node_name(&self) -> &Name {
        &self.name
    }
    fn node_parents(&self) -> &BTreeSet<Name> {
        &self.parents
    }
    fn node_children(&self) -> &BTreeSet<Name> {
        &self.children
    }
}

impl HierarchyNode for AdminRole {
    fn node_name(&self) -> &Name {
        &self.name
    }
    fn node_parents(&self) -> &BTreeSet<Name> {
        &self.parents
    }
    fn node_children(&self) -> &BTreeSet<Name> {
        &self.children
    }
}

impl HierarchyNode for OrgUnit {
    fn node_name(&self) -> &Name {
        &self.name
    }
    fn node_parents(&self) -> &BTreeSet<Name> {
        &self.parents
    }
    fn node_children(&self) -> &BTreeSet<Name> {
        &self.children
    }
}

/// DFS colouring for cycle detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    White,
    Gray,
    Black,
}

/// Builder for a [`HierarchyIndex`]
///
/// # Example
///
/// ```
/// use cretoai_rbac::hierarchy::HierarchyGraphBuilder;
/// use cretoai_rbac::Name;
///
/// let mut builder = HierarchyGraphBuilder::new("role");
/// builder.add_edge(&Name::new("Teller"), &Name::new("Branch")).unwrap();
/// let index = builder.build().unwrap();
///
/// assert!(index.ascendants([&Name::new("Teller")]).contains(&Name::new("Branch")));
/// ```
#[derive(Debug, Clone)]
pub struct HierarchyGraphBuilder {
    /// Namespace label used in log lines and errors ("role", "admin role", ...)
    label: &'static str,

    /// Arena of node names, index = node id
    names: Vec<Name>,

    /// Name -> node id
    ids: HashMap<Name, usize>,

    /// Direct parent ids per node
    parents: Vec<BTreeSet<usize>>,

    /// Nodes declared explicitly (as opposed to referenced by an edge)
    declared: HashSet<usize>,

    /// Longest allowed parent chain, in edges
    max_depth: usize,
}

impl HierarchyGraphBuilder {
    /// Create an empty builder
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            names: Vec::new(),
            ids: HashMap::new(),
            parents: Vec::new(),
            declared: HashSet::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Reject hierarchies whose longest parent chain exceeds `max_depth` edges
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Build a graph from records carrying their own parent/child sets
    pub fn from_nodes<'a, T, I>(label: &'static str, nodes: I) -> Result<Self, GraphError>
    where
        T: HierarchyNode + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let nodes: Vec<&T> = nodes.into_iter().collect();
        let mut builder = Self::new(label);

        for node in &nodes {
            builder.add_node(node.node_name())?;
        }

        for node in &nodes {
            for parent in node.node_parents() {
                builder.add_edge(node.node_name(), parent)?;
            }
            for child in node.node_children() {
                builder.add_edge(child, node.node_name())?;
            }
        }

        Ok(builder)
    }

    fn intern(&mut self, name: &Name) -> usize {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len();
        self.names.push(name.clone());
        self.ids.insert(name.clone(), id);
        self.parents.push(BTreeSet::new());
        id
    }

    /// Declare a node
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or already declared.
    pub fn add_node(&mut self, name: &Name) -> Result<(), GraphError> {
        if name.is_blank() {
            return Err(GraphError::InvalidNode(format!("{} name cannot be empty", self.label)));
        }
        let id = self.intern(name);
        if !self.declared.insert(id) {
            return Err(GraphError::DuplicateNode(name.to_string()));
        }
        Ok(())
    }

    /// Add a "child inherits from parent" edge
    ///
    /// Nodes referenced only through edges are created implicitly.
    pub fn add_edge(&mut self, child: &Name, parent: &Name) -> Result<(), GraphError> {
        if child.is_blank() || parent.is_blank() {
            return Err(GraphError::InvalidNode(format!(
                "{} edge has an empty endpoint",
                self.label
            )));
        }
        if child == parent {
            return Err(GraphError::CircularDependency(format!("{} -> {}", child, parent)));
        }
        let child_id = self.intern(child);
        let parent_id = self.intern(parent);
        self.parents[child_id].insert(parent_id);
        Ok(())
    }

    /// Finish the graph, rejecting cycles and chains deeper than the bound
    pub fn build(self) -> Result<HierarchyIndex, GraphError> {
        let implicit = self.names.len() - self.declared.len();
        if implicit > 0 {
            warn!(
                "{} hierarchy references {} undeclared node(s); treating them as leaves",
                self.label, implicit
            );
        }

        self.detect_cycles()?;

        let parents: Vec<Vec<usize>> = self
            .parents
            .iter()
            .map(|set| set.iter().copied().collect())
            .collect();

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); self.names.len()];
        for (child, ps) in parents.iter().enumerate() {
            for &parent in ps {
                children[parent].push(child);
            }
        }

        let depth = self.longest_chain(&parents, &children)?;

        debug!(
            "Built {} hierarchy with {} node(s), depth {}",
            self.label,
            self.names.len(),
            depth
        );

        Ok(HierarchyIndex::from_parts(self.label, self.names, self.ids, parents, children))
    }

    /// Longest parent chain in edges, computed roots-first over the acyclic graph
    fn longest_chain(&self, parents: &[Vec<usize>], children: &[Vec<usize>]) -> Result<usize, GraphError> {
        let mut pending: Vec<usize> = parents.iter().map(Vec::len).collect();
        let mut height = vec![0usize; self.names.len()];
        let mut queue: VecDeque<usize> = (0..self.names.len()).filter(|&id| pending[id] == 0).collect();
        let mut deepest = 0;

        while let Some(node) = queue.pop_front() {
            if height[node] > self.max_depth {
                let msg = format!(
                    "{} hierarchy: '{}' is {} levels deep, limit is {}",
                    self.label, self.names[node], height[node], self.max_depth
                );
                warn!("Rejected {}", msg);
                return Err(GraphError::InvalidNode(msg));
            }
            deepest = deepest.max(height[node]);

            for &child in &children[node] {
                height[child] = height[child].max(height[node] + 1);
                pending[child] -= 1;
                if pending[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        Ok(deepest)
    }

    /// DFS over parent edges; a gray node reached again closes a cycle
    fn detect_cycles(&self) -> Result<(), GraphError> {
        let mut state = vec![Visit::White; self.names.len()];
        let mut path = Vec::new();

        for start in 0..self.names.len() {
            if state[start] == Visit::White {
                self.dfs_cycle_detect(start, &mut state, &mut path)?;
            }
        }
        Ok(())
    }

    fn dfs_cycle_detect(
        &self,
        node: usize,
        state: &mut [Visit],
        path: &mut Vec<usize>,
    ) -> Result<(), GraphError> {
        match state[node] {
            Visit::Gray => {
                let start = path.iter().position(|&n| n == node).unwrap_or(0);
                let cycle: Vec<&str> = path[start..]
                    .iter()
                    .chain(std::iter::once(&node))
                    .map(|&id| self.names[id].as_str())
                    .collect();
                let msg = format!("{} hierarchy: {}", self.label, cycle.join(" -> "));
                warn!("Cycle detected in {}", msg);
                return Err(GraphError::CircularDependency(msg));
            }
            Visit::Black => return Ok(()),
            Visit::White => {}
        }

        state[node] = Visit::Gray;
        path.push(node);

        for &parent in &self.parents[node] {
            self.dfs_cycle_detect(parent, state, path)?;
        }

        state[node] = Visit::Black;
        path.pop();
        Ok(())
    }
}
