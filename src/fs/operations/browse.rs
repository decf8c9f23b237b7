//! Path lookups against the current snapshot.

use crate::error::{MegaError, Result};
use crate::fs::contact::Contact;
use crate::fs::path::normalize_path;
use crate::fs::Node;
use crate::session::Session;

impl Session {
    /// Node at `path`, or `NotFound`.
    pub(crate) fn node_at(&self, path: &str) -> Result<Node> {
        self.tree
            .stat(path)
            .ok_or_else(|| MegaError::not_found(normalize_path(path)))
    }

    /// Folder-like node at `path`, or `NotFound` if it is missing or a file.
    pub(crate) fn folder_at(&self, path: &str) -> Result<Node> {
        self.tree
            .stat(path)
            .filter(Node::is_folder)
            .ok_or_else(|| MegaError::not_found(normalize_path(path)))
    }

    pub(crate) fn list_contacts(&self) -> Vec<Contact> {
        self.contacts.clone()
    }
}
