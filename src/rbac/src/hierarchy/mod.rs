//! Role and org-unit hierarchies
//!
//! Arena-backed DAGs keyed by [`Name`](crate::Name) with transitive
//! ascendant/descendant queries. The same index type serves four
//! independently keyed namespaces: roles, admin roles, user org units and
//! permission org units.
//!
//! # Features
//!
//! - **Cycle Detection**: DFS-based detection with complete path reporting at build time
//! - **Depth bound**: graphs whose longest parent chain exceeds the limit are rejected at build time
//! - **Visited-set traversal**: closures are always complete and terminate
//! - **Thread-Safe Caching**: per-node closures memoised in a `DashMap`
//!
//! # Example
//!
//! ```rust
//! use cretoai_rbac::hierarchy::HierarchyGraphBuilder;
//! use cretoai_rbac::{Name, Role};
//!
//! let roles = vec![
//!     Role::new("Branch"),
//!     Role::new("Teller").with_parent("Branch"),
//! ];
//! let index = HierarchyGraphBuilder::from_nodes("role", &roles)?.build()?;
//!
//! let up = index.ascendants_of(&Name::new("teller"));
//! assert!(up.contains(&Name::new("Branch")));
//! # Ok::<(), cretoai_rbac::hierarchy::GraphError>(())
//! ```

pub mod graph;
pub mod index;


pub use graph::{GraphError, HierarchyGraphBuilder, HierarchyNode, DEFAULT_MAX_DEPTH};
pub use index::{CacheStats, Direction, HierarchyIndex};
