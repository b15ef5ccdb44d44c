mod node;
mod tree;

pub use node::{InternalNode, LeafNode, Node, Tuple};
pub use tree::{BTree, NodeProvider};
