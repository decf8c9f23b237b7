//! Decrypted model of the remote filesystem and the operations on it.

pub mod contact;
pub(crate) mod node;
pub(crate) mod operations;
pub(crate) mod path;
pub mod tree;

pub use contact::{AccessLevel, Contact, ContactState};
pub use node::{Node, NodeType, Quota};
pub use tree::FileSystemTree;
