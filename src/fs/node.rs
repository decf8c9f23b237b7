//! Filesystem node types.

use serde::{Deserialize, Serialize};

use crate::base64::base64url_encode;

/// Node type enumeration matching MEGA's internal types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeType {
    /// Regular file
    File = 0,
    /// Folder/directory
    Folder = 1,
    /// Root folder (Cloud Drive)
    Root = 2,
    /// Inbox folder
    Inbox = 3,
    /// Trash folder
    Trash = 4,
}

impl NodeType {
    /// Create from the wire `t` value. Contact and network pseudo-nodes have no counterpart.
    pub fn from_i64(t: i64) -> Option<Self> {
        match t {
            0 => Some(NodeType::File),
            1 => Some(NodeType::Folder),
            2 => Some(NodeType::Root),
            3 => Some(NodeType::Inbox),
            4 => Some(NodeType::Trash),
            _ => None,
        }
    }

    /// Check if this node type is a container (can have children).
    pub fn is_container(&self) -> bool {
        !matches!(self, NodeType::File)
    }

    /// Root categories carry fixed names and no key.
    pub fn is_root_category(&self) -> bool {
        matches!(self, NodeType::Root | NodeType::Inbox | NodeType::Trash)
    }

    pub(crate) fn fixed_name(&self) -> Option<&'static str> {
        match self {
            NodeType::Root => Some("Root"),
            NodeType::Inbox => Some("Inbox"),
            NodeType::Trash => Some("Trash"),
            _ => None,
        }
    }
}

/// A node in the MEGA filesystem, as seen in one tree snapshot.
///
/// Values are detached copies: later refreshes never change a `Node` already
/// handed out. Use [`crate::SessionHandle::is_stale`] to find out whether the
/// tree has moved on since.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node handle (unique identifier)
    pub handle: String,
    /// Parent node handle; `None` for root categories.
    pub parent_handle: Option<String>,
    pub node_type: NodeType,
    /// Decrypted name, `None` when the node key could not be unwrapped.
    pub name: Option<String>,
    /// File size in bytes (0 for folders)
    pub size: u64,
    /// Timestamp (Unix epoch)
    pub timestamp: i64,
    /// Decrypted node key (16 bytes for folders, 32 for files)
    pub(crate) key: Vec<u8>,
    /// Thumbnail/preview reference (fa)
    pub file_attr: Option<String>,
    /// Public handle assigned by export
    pub(crate) public_handle: Option<String>,
    /// Share key of a shared or exported folder.
    pub(crate) share_key: Option<[u8; 16]>,
    /// Version of the snapshot this value was read from.
    pub tree_version: u64,
}

impl Node {
    pub fn is_file(&self) -> bool {
        self.node_type == NodeType::File
    }

    /// Check if this node is a folder (any container type).
    pub fn is_folder(&self) -> bool {
        self.node_type.is_container()
    }

    /// The key could not be unwrapped; name and content are unavailable.
    pub fn is_degraded(&self) -> bool {
        self.name.is_none()
    }

    /// Name for display; degraded nodes show their handle.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.handle)
    }

    /// Get the base64-encoded node key for public links.
    pub fn get_key(&self) -> Option<String> {
        if self.key.is_empty() {
            None
        } else {
            Some(base64url_encode(&self.key))
        }
    }

    pub fn public_handle(&self) -> Option<&str> {
        self.public_handle.as_deref()
    }

    /// Check if this node has been exported (has a public link).
    pub fn is_exported(&self) -> bool {
        self.public_handle.is_some()
    }

    /// Public URL for an exported node.
    pub fn get_link(&self) -> Option<String> {
        crate::link::PublicLink::for_node(self).map(|link| link.encode())
    }

    pub(crate) fn key_bytes(&self) -> &[u8] {
        &self.key
    }
}

/// User storage quota information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Total storage in bytes; 0 means unlimited or unknown.
    pub total: u64,
    /// Used storage in bytes
    pub used: u64,
}

impl Quota {
    /// Get free storage in bytes.
    pub fn free(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }

    /// Get usage percentage.
    pub fn usage_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.used as f64 / self.total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(node_type: NodeType, name: Option<&str>) -> Node {
        Node {
            handle: "h1".to_string(),
            parent_handle: None,
            node_type,
            name: name.map(str::to_string),
            size: 0,
            timestamp: 0,
            key: vec![],
            file_attr: None,
            public_handle: None,
            share_key: None,
            tree_version: 1,
        }
    }

    #[test]
    fn test_node_type_conversion() {
        assert_eq!(NodeType::from_i64(0), Some(NodeType::File));
        assert_eq!(NodeType::from_i64(1), Some(NodeType::Folder));
        assert_eq!(NodeType::from_i64(2), Some(NodeType::Root));
        assert_eq!(NodeType::from_i64(3), Some(NodeType::Inbox));
        assert_eq!(NodeType::from_i64(4), Some(NodeType::Trash));
        assert_eq!(NodeType::from_i64(8), None);
        assert_eq!(NodeType::from_i64(99), None);
    }

    #[test]
    fn test_node_helper_methods() {
        let file = node(NodeType::File, Some("test.txt"));
        assert!(file.is_file());
        assert!(!file.is_folder());
        assert!(!file.is_degraded());
        assert!(file.get_key().is_none());

        let degraded = node(NodeType::Folder, None);
        assert!(degraded.is_folder());
        assert!(degraded.is_degraded());
        assert_eq!(degraded.display_name(), "h1");

        assert!(NodeType::Trash.is_root_category());
        assert_eq!(NodeType::Inbox.fixed_name(), Some("Inbox"));
    }

    #[test]
    fn test_quota_calculations() {
        let quota = Quota {
            total: 1000,
            used: 250,
        };

        assert_eq!(quota.free(), 750);
        assert_eq!(quota.usage_percent(), 25.0);

        let empty_quota = Quota { total: 0, used: 0 };
        assert_eq!(empty_quota.usage_percent(), 0.0);
        assert_eq!(empty_quota.free(), 0);
    }
}
