//! Public link encoding and decoding.
//!
//! A link carries the public handle in the URL path and the node key in the
//! fragment, which browsers never send to the server:
//!
//! - `https://mega.nz/file/HANDLE#KEY` (32-byte file key)
//! - `https://mega.nz/folder/HANDLE#KEY` (16-byte share key)
//!
//! The legacy `#!HANDLE!KEY` and `#F!HANDLE!KEY` forms are accepted when decoding.

use crate::base64::{base64url_decode, base64url_encode};
use crate::error::{LinkError, Result};
use crate::fs::{Node, NodeType};

const LINK_BASE: &str = "https://mega.nz";
const HANDLE_LEN: usize = 8;

/// What a public link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    File,
    Folder,
}

impl LinkKind {
    fn path_segment(&self) -> &'static str {
        match self {
            LinkKind::File => "file",
            LinkKind::Folder => "folder",
        }
    }

    /// Expected key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            LinkKind::File => 32,
            LinkKind::Folder => 16,
        }
    }
}

/// A decoded public link: everything needed to reach a node without a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicLink {
    pub kind: LinkKind,
    /// Public handle assigned at export.
    pub handle: String,
    /// Node key for files, share key for folders.
    pub key: Vec<u8>,
}

impl PublicLink {
    pub fn new(kind: LinkKind, handle: impl Into<String>, key: Vec<u8>) -> Result<Self> {
        let link = Self {
            kind,
            handle: handle.into(),
            key,
        };
        link.validate()?;
        Ok(link)
    }

    /// Link for an exported node; `None` while the node has no public handle.
    /// Folder links carry the folder's share key.
    pub fn for_node(node: &Node) -> Option<Self> {
        let (kind, key) = match node.node_type {
            NodeType::File => (LinkKind::File, node.key_bytes().to_vec()),
            NodeType::Folder => (LinkKind::Folder, node.share_key?.to_vec()),
            _ => return None,
        };
        let handle = node.public_handle()?.to_string();
        (key.len() == kind.key_len()).then_some(Self { kind, handle, key })
    }

    /// Canonical URL form.
    pub fn encode(&self) -> String {
        format!(
            "{}/{}/{}#{}",
            LINK_BASE,
            self.kind.path_segment(),
            self.handle,
            base64url_encode(&self.key)
        )
    }

    /// Parse any supported link form.
    pub fn decode(url: &str) -> Result<Self> {
        let url = url.trim();
        let (kind, handle, key) = split_link(url).ok_or_else(|| malformed(url))?;
        let key = base64url_decode(key)
            .map_err(|_| LinkError::Malformed(format!("key is not base64: {}", url)))?;
        Self::new(kind, handle, key)
    }

    fn validate(&self) -> Result<()> {
        let handle_ok = self.handle.len() == HANDLE_LEN
            && self
                .handle
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !handle_ok {
            return Err(LinkError::Malformed(format!("invalid handle {:?}", self.handle)).into());
        }
        if self.key.len() != self.kind.key_len() {
            return Err(LinkError::Malformed(format!(
                "{} key must be {} bytes, got {}",
                self.kind.path_segment(),
                self.kind.key_len(),
                self.key.len()
            ))
            .into());
        }
        Ok(())
    }
}

impl std::fmt::Display for PublicLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl std::str::FromStr for PublicLink {
    type Err = crate::error::MegaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

fn split_link(url: &str) -> Option<(LinkKind, &str, &str)> {
    for (marker, kind) in [("/file/", LinkKind::File), ("/folder/", LinkKind::Folder)] {
        if let Some(pos) = url.find(marker) {
            let rest = &url[pos + marker.len()..];
            let (handle, key) = rest.split_once('#')?;
            // Folder links may point into a subfolder: `#KEY/folder/SUB`.
            let key = key.split('/').next()?;
            return Some((kind, handle, key));
        }
    }
    for (marker, kind) in [("#F!", LinkKind::Folder), ("#!", LinkKind::File)] {
        if let Some(pos) = url.find(marker) {
            let rest = &url[pos + marker.len()..];
            let (handle, key) = rest.split_once('!')?;
            let key = key.split('!').next()?;
            return Some((kind, handle, key));
        }
    }
    None
}

fn malformed(url: &str) -> crate::error::MegaError {
    LinkError::Malformed(format!("unrecognized link format: {}", url)).into()
}
