//! Merkle Search Tree implementation

pub mod node;
pub mod tree;
pub mod util;

pub use node::{NodeData, TreeEntry};
pub use tree::{Lookup, Mst, NodeId, PathStep};
pub use util::{layer_for_key, validate_key};
