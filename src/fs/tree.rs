//! Snapshot of the decrypted node forest.
//!
//! A [`FileSystemTree`] is immutable once built. Refreshes and mutations
//! produce a new snapshot with a higher version; entries whose raw record is
//! unchanged are shared between snapshots together with their decryption
//! cache.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::base64::base64url_decode;
use crate::crypto::{attribute_key, decrypt_attributes, unwrap_key};
use crate::error::{MegaError, Result};
use crate::fs::node::{Node, NodeType};
use crate::fs::path::{normalize_path, segments};

/// Node record as the service sends it in `f` responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RawNode {
    #[serde(rename = "h")]
    pub handle: String,
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(rename = "t")]
    pub kind: i64,
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<String>,
    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "s", default)]
    pub size: u64,
    #[serde(rename = "ts", default)]
    pub timestamp: i64,
    #[serde(rename = "fa", default, skip_serializing_if = "Option::is_none")]
    pub file_attr: Option<String>,
    /// Public handle; delivered separately (`ph` array) and merged in.
    #[serde(rename = "ph", default, skip_serializing_if = "Option::is_none")]
    pub public_handle: Option<String>,
}

/// Keys able to unwrap node keys in one tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Keychain {
    pub user_handle: String,
    pub master_key: [u8; 16],
    /// Share handle to share key.
    pub share_keys: HashMap<String, [u8; 16]>,
}

impl Keychain {
    pub fn new(user_handle: impl Into<String>, master_key: [u8; 16]) -> Self {
        Self {
            user_handle: user_handle.into(),
            master_key,
            share_keys: HashMap::new(),
        }
    }

    /// Keychain for an anonymous folder link: the folder key is the share key of its root.
    pub fn for_public_folder(root_handle: &str, folder_key: [u8; 16]) -> Self {
        let mut keychain = Self::default();
        keychain
            .share_keys
            .insert(root_handle.to_string(), folder_key);
        keychain
    }

    /// Unwrap a `handle:key/handle:key` node key string with the first usable entry.
    pub fn unwrap_node_key(&self, k: &str) -> Option<Vec<u8>> {
        k.split('/').find_map(|part| {
            let (owner, wrapped) = part.split_once(':')?;
            let wrapping = if !self.user_handle.is_empty() && owner == self.user_handle {
                &self.master_key
            } else {
                self.share_keys.get(owner)?
            };
            let wrapped = base64url_decode(wrapped).ok()?;
            unwrap_key(&wrapped, wrapping).ok()
        })
    }
}

#[derive(Debug, Default)]
struct Decoded {
    key: Option<Vec<u8>>,
    name: Option<String>,
}

impl Decoded {
    fn compute(raw: &RawNode, node_type: NodeType, keychain: &Keychain) -> Self {
        if let Some(fixed) = node_type.fixed_name() {
            return Decoded {
                key: None,
                name: Some(fixed.to_string()),
            };
        }
        let expected_len = if node_type == NodeType::File { 32 } else { 16 };
        let key = raw
            .key
            .as_deref()
            .and_then(|k| keychain.unwrap_node_key(k))
            .filter(|k| k.len() == expected_len);
        let name = key
            .as_deref()
            .and_then(attribute_key)
            .and_then(|ak| decrypt_attributes(raw.attrs.as_deref()?, &ak))
            .map(|attrs| attrs.name);
        match name {
            Some(name) => Decoded {
                key,
                name: Some(name),
            },
            None => Decoded::default(),
        }
    }
}

#[derive(Debug)]
struct NodeEntry {
    raw: RawNode,
    node_type: NodeType,
    decoded: OnceLock<Decoded>,
    /// Tree version in which this record last changed.
    modified_at: u64,
}

impl NodeEntry {
    fn new(raw: RawNode, node_type: NodeType, version: u64) -> Self {
        Self {
            raw,
            node_type,
            decoded: OnceLock::new(),
            modified_at: version,
        }
    }

    fn decoded(&self, keychain: &Keychain) -> &Decoded {
        self.decoded
            .get_or_init(|| Decoded::compute(&self.raw, self.node_type, keychain))
    }
}

#[derive(Debug, Default)]
struct ChildSet {
    /// Child handles sorted by handle.
    handles: Vec<String>,
    by_name: OnceLock<HashMap<String, String>>,
    ordered: OnceLock<Vec<String>>,
}

impl ChildSet {
    fn new(handles: Vec<String>) -> Self {
        Self {
            handles,
            ..Self::default()
        }
    }
}

/// One change applied on top of a snapshot.
#[derive(Debug, Clone)]
pub(crate) enum TreeChange {
    Insert(RawNode),
    RemoveSubtree(String),
    SetAttributes { handle: String, attrs: String },
    Move { handle: String, parent: String },
    SetPublicHandle {
        handle: String,
        public_handle: Option<String>,
    },
}

/// Immutable, versioned view of the remote filesystem.
#[derive(Debug, Clone)]
pub struct FileSystemTree {
    entries: HashMap<String, Arc<NodeEntry>>,
    children: HashMap<String, Arc<ChildSet>>,
    roots: Vec<String>,
    version: u64,
    keychain: Arc<Keychain>,
}

impl Default for FileSystemTree {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            children: HashMap::new(),
            roots: Vec::new(),
            version: 0,
            keychain: Arc::new(Keychain::default()),
        }
    }
}

impl FileSystemTree {
    /// Build the successor of `previous` from a complete node listing.
    pub(crate) fn build(
        raws: Vec<RawNode>,
        keychain: Keychain,
        previous: Option<&FileSystemTree>,
    ) -> Self {
        let version = previous.map_or(1, |p| p.version + 1);
        let same_keys = previous.is_some_and(|p| *p.keychain == keychain);
        let keychain = match previous {
            Some(p) if same_keys => p.keychain.clone(),
            _ => Arc::new(keychain),
        };

        let mut entries = HashMap::with_capacity(raws.len());
        for raw in raws {
            let Some(node_type) = NodeType::from_i64(raw.kind) else {
                continue;
            };
            let old = previous
                .and_then(|p| p.entries.get(&raw.handle))
                .filter(|e| e.raw == raw)
                .cloned();
            let entry = match old {
                Some(old) if same_keys => old,
                // New keys: decode again, but only a node that was unreadable counts as changed.
                Some(old) => {
                    let modified_at = match old.decoded.get() {
                        Some(d) if d.name.is_none() => version,
                        _ => old.modified_at,
                    };
                    Arc::new(NodeEntry::new(raw, node_type, modified_at))
                }
                None => Arc::new(NodeEntry::new(raw, node_type, version)),
            };
            entries.insert(entry.raw.handle.clone(), entry);
        }
        Self::assemble(entries, keychain, version, previous)
    }

    /// Rebuild a persisted snapshot at its recorded version.
    pub(crate) fn restore(raws: Vec<RawNode>, keychain: Keychain, version: u64) -> Self {
        let mut entries = HashMap::with_capacity(raws.len());
        for raw in raws {
            if let Some(node_type) = NodeType::from_i64(raw.kind) {
                entries.insert(
                    raw.handle.clone(),
                    Arc::new(NodeEntry::new(raw, node_type, version)),
                );
            }
        }
        Self::assemble(entries, Arc::new(keychain), version, None)
    }

    fn assemble(
        entries: HashMap<String, Arc<NodeEntry>>,
        keychain: Arc<Keychain>,
        version: u64,
        previous: Option<&FileSystemTree>,
    ) -> Self {
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        let mut roots = Vec::new();
        for (handle, entry) in &entries {
            match entry.raw.parent.as_ref().filter(|p| entries.contains_key(*p)) {
                Some(parent) if !entry.node_type.is_root_category() => {
                    grouped.entry(parent.clone()).or_default().push(handle.clone())
                }
                _ => roots.push(handle.clone()),
            }
        }
        // Account trees expose only the root categories; detached nodes wait for a refresh.
        if roots.iter().any(|h| entries[h].node_type.is_root_category()) {
            roots.retain(|h| entries[h].node_type.is_root_category());
        }

        // A child set keeps its name index while its members are the very same entries.
        let reusable = previous.filter(|p| Arc::ptr_eq(&p.keychain, &keychain));
        let children = grouped
            .into_iter()
            .map(|(parent, mut handles)| {
                handles.sort_unstable();
                let same = reusable
                    .and_then(|p| Some((p, p.children.get(&parent)?)))
                    .filter(|(p, set)| {
                        set.handles == handles
                            && handles.iter().all(|h| {
                                p.entries
                                    .get(h)
                                    .is_some_and(|old| Arc::ptr_eq(old, &entries[h]))
                            })
                    })
                    .map(|(_, set)| set.clone());
                let set = same.unwrap_or_else(|| Arc::new(ChildSet::new(handles)));
                (parent, set)
            })
            .collect();

        let mut tree = Self {
            entries,
            children,
            roots,
            version,
            keychain,
        };
        let mut roots = std::mem::take(&mut tree.roots);
        roots.sort_by_cached_key(|h| tree.root_sort_key(h));
        tree.roots = roots;
        tree
    }

    /// Apply a batch of changes, producing the next snapshot.
    pub(crate) fn apply(&self, changes: impl IntoIterator<Item = TreeChange>) -> Self {
        let version = self.version + 1;
        let mut entries = self.entries.clone();

        for change in changes {
            match change {
                TreeChange::Insert(raw) => {
                    if let Some(node_type) = NodeType::from_i64(raw.kind) {
                        entries.insert(
                            raw.handle.clone(),
                            Arc::new(NodeEntry::new(raw, node_type, version)),
                        );
                    }
                }
                TreeChange::RemoveSubtree(handle) => {
                    for h in subtree_of(&entries, &handle) {
                        entries.remove(&h);
                    }
                }
                TreeChange::SetAttributes { handle, attrs } => {
                    replace_raw(&mut entries, &handle, version, |raw| raw.attrs = Some(attrs));
                }
                TreeChange::Move { handle, parent } => {
                    replace_raw(&mut entries, &handle, version, |raw| raw.parent = Some(parent));
                }
                TreeChange::SetPublicHandle {
                    handle,
                    public_handle,
                } => {
                    replace_raw(&mut entries, &handle, version, |raw| {
                        raw.public_handle = public_handle
                    });
                }
            }
        }
        Self::assemble(entries, self.keychain.clone(), version, Some(self))
    }

    /// Monotonic snapshot version.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` if `node` was read from an older snapshot and has since changed or vanished.
    pub fn is_stale(&self, node: &Node) -> bool {
        self.entries
            .get(&node.handle)
            .map_or(true, |e| e.modified_at > node.tree_version)
    }

    /// Look up a node by handle.
    pub fn get(&self, handle: &str) -> Option<Node> {
        self.entries.get(handle).map(|e| self.to_node(e))
    }

    /// Resolve a path to a node; `None` if any component is missing.
    pub fn stat(&self, path: &str) -> Option<Node> {
        self.resolve(path).and_then(|h| self.get(&h))
    }

    /// List a folder. `/` lists the root categories.
    ///
    /// Folders come first, then files, each sorted by name; nodes whose name
    /// could not be decrypted follow, sorted by handle. Recursive listings are
    /// depth-first pre-order with the same sibling order.
    pub fn list(&self, path: &str, recursive: bool) -> Result<Vec<Node>> {
        let top: Vec<String> = if normalize_path(path) == "/" {
            self.roots.clone()
        } else {
            let handle = self
                .resolve(path)
                .filter(|h| self.entries[h].node_type.is_container())
                .ok_or_else(|| MegaError::not_found(path))?;
            self.ordered_children(&handle).to_vec()
        };

        if !recursive {
            return Ok(top.iter().filter_map(|h| self.get(h)).collect());
        }
        let mut out = Vec::new();
        let mut stack: Vec<String> = top.into_iter().rev().collect();
        while let Some(handle) = stack.pop() {
            if let Some(entry) = self.entries.get(&handle) {
                out.push(self.to_node(entry));
                stack.extend(self.ordered_children(&handle).iter().rev().cloned());
            }
        }
        Ok(out)
    }

    /// Absolute path of a node, if every ancestor has a readable name.
    pub fn path_of(&self, handle: &str) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = self.entries.get(handle)?;
        loop {
            parts.push(current.decoded(&self.keychain).name.clone()?);
            if self.roots.contains(&current.raw.handle) {
                break;
            }
            current = self.entries.get(current.raw.parent.as_ref()?)?;
        }
        parts.reverse();
        Some(format!("/{}", parts.join("/")))
    }

    pub(crate) fn resolve(&self, path: &str) -> Option<String> {
        let mut parts = segments(path).into_iter();
        let first = parts.next()?;
        let mut current = self
            .roots
            .iter()
            .find(|h| self.entries[*h].decoded(&self.keychain).name.as_deref() == Some(first))?
            .clone();
        for part in parts {
            current = self.child_named(&current, part)?;
        }
        Some(current)
    }

    /// Case-sensitive child lookup; among duplicates the smallest handle wins.
    pub(crate) fn child_named(&self, parent: &str, name: &str) -> Option<String> {
        let set = self.children.get(parent)?;
        let index = set.by_name.get_or_init(|| {
            let mut index = HashMap::with_capacity(set.handles.len());
            for handle in &set.handles {
                if let Some(name) = &self.entries[handle].decoded(&self.keychain).name {
                    index.entry(name.clone()).or_insert_with(|| handle.clone());
                }
            }
            index
        });
        index.get(name).cloned()
    }

    /// Handles of `handle` and all its descendants, parents before children.
    pub(crate) fn subtree(&self, handle: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![handle.to_string()];
        while let Some(h) = stack.pop() {
            if let Some(set) = self.children.get(&h) {
                stack.extend(set.handles.iter().cloned());
            }
            out.push(h);
        }
        out
    }

    pub(crate) fn raw(&self, handle: &str) -> Option<&RawNode> {
        self.entries.get(handle).map(|e| &e.raw)
    }

    pub(crate) fn raw_nodes(&self) -> Vec<RawNode> {
        let mut raws: Vec<RawNode> = self.entries.values().map(|e| e.raw.clone()).collect();
        raws.sort_by(|a, b| a.handle.cmp(&b.handle));
        raws
    }

    fn ordered_children(&self, parent: &str) -> &[String] {
        match self.children.get(parent) {
            Some(set) => set.ordered.get_or_init(|| {
                let mut handles = set.handles.clone();
                handles.sort_by_cached_key(|h| self.sibling_sort_key(h));
                handles
            }),
            None => &[],
        }
    }

    fn sibling_sort_key(&self, handle: &str) -> (u8, Vec<u8>, String) {
        let entry = &self.entries[handle];
        match &entry.decoded(&self.keychain).name {
            Some(name) => {
                let group = if entry.node_type.is_container() { 0 } else { 1 };
                (group, name.as_bytes().to_vec(), handle.to_string())
            }
            None => (2, Vec::new(), handle.to_string()),
        }
    }

    fn root_sort_key(&self, handle: &str) -> (u8, Vec<u8>, String) {
        let entry = &self.entries[handle];
        let name = entry
            .decoded(&self.keychain)
            .name
            .as_deref()
            .unwrap_or_default();
        (entry.node_type as u8, name.as_bytes().to_vec(), handle.to_string())
    }

    fn to_node(&self, entry: &NodeEntry) -> Node {
        let decoded = entry.decoded(&self.keychain);
        let raw = &entry.raw;
        Node {
            handle: raw.handle.clone(),
            parent_handle: raw.parent.clone(),
            node_type: entry.node_type,
            name: decoded.name.clone(),
            size: if entry.node_type == NodeType::File {
                raw.size
            } else {
                0
            },
            timestamp: raw.timestamp,
            key: decoded.key.clone().unwrap_or_default(),
            file_attr: raw.file_attr.clone(),
            public_handle: raw.public_handle.clone(),
            share_key: match entry.node_type {
                NodeType::Folder => self.keychain.share_keys.get(&raw.handle).copied(),
                _ => None,
            },
            tree_version: self.version,
        }
    }
}

fn replace_raw(
    entries: &mut HashMap<String, Arc<NodeEntry>>,
    handle: &str,
    version: u64,
    edit: impl FnOnce(&mut RawNode),
) {
    if let Some(old) = entries.get(handle) {
        let mut raw = old.raw.clone();
        edit(&mut raw);
        let entry = NodeEntry::new(raw, old.node_type, version);
        entries.insert(handle.to_string(), Arc::new(entry));
    }
}

fn subtree_of(entries: &HashMap<String, Arc<NodeEntry>>, root: &str) -> Vec<String> {
    let mut by_parent: HashMap<&str, Vec<&str>> = HashMap::new();
    for (handle, entry) in entries {
        if let Some(parent) = entry.raw.parent.as_deref() {
            by_parent.entry(parent).or_default().push(handle);
        }
    }
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(h) = stack.pop() {
        if !entries.contains_key(h) {
            continue;
        }
        if let Some(kids) = by_parent.get(h) {
            stack.extend(kids.iter().copied());
        }
        out.push(h.to_string());
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::base64::base64url_encode;
    use crate::crypto::{encrypt_attributes, wrap_key, NodeAttributes};

    pub(crate) const MASTER: [u8; 16] = [7u8; 16];
    pub(crate) const USER: &str = "USERHNDL";

    pub(crate) fn keychain() -> Keychain {
        Keychain::new(USER, MASTER)
    }

    pub(crate) fn root(handle: &str, kind: i64) -> RawNode {
        RawNode {
            handle: handle.to_string(),
            parent: None,
            kind,
            attrs: None,
            key: None,
            size: 0,
            timestamp: 0,
            file_attr: None,
            public_handle: None,
        }
    }

    pub(crate) fn named(handle: &str, parent: &str, kind: i64, name: &str) -> RawNode {
        let key: Vec<u8> = if kind == 0 {
            (0..32u8).map(|i| i.wrapping_add(handle.len() as u8)).collect()
        } else {
            vec![handle.len() as u8; 16]
        };
        let ak = attribute_key(&key).unwrap();
        let wrapped = wrap_key(&key, &MASTER).unwrap();
        RawNode {
            handle: handle.to_string(),
            parent: Some(parent.to_string()),
            kind,
            attrs: Some(encrypt_attributes(&NodeAttributes::named(name), &ak).unwrap()),
            key: Some(format!("{}:{}", USER, base64url_encode(&wrapped))),
            size: if kind == 0 { 10 } else { 0 },
            timestamp: 1_700_000_000,
            file_attr: None,
            public_handle: None,
        }
    }

    fn sample() -> Vec<RawNode> {
        vec![
            root("ROOT", 2),
            root("INBOX", 3),
            root("TRASH", 4),
            named("F1", "ROOT", 1, "docs"),
            named("F2", "ROOT", 1, "Apps"),
            named("X1", "ROOT", 0, "b.txt"),
            named("X2", "ROOT", 0, "a.txt"),
            named("X3", "F1", 0, "inner.txt"),
        ]
    }

    #[test]
    fn test_path_resolution() {
        let tree = FileSystemTree::build(sample(), keychain(), None);
        assert_eq!(tree.stat("/Root/docs/inner.txt").unwrap().handle, "X3");
        assert_eq!(tree.stat("/Root/docs/").unwrap().handle, "F1");
        assert!(tree.stat("/Root/Docs").is_none());
        assert!(tree.stat("/Root/missing/inner.txt").is_none());
        assert_eq!(tree.path_of("X3").as_deref(), Some("/Root/docs/inner.txt"));
    }

    #[test]
    fn test_list_order() {
        let tree = FileSystemTree::build(sample(), keychain(), None);
        let names: Vec<_> = tree
            .list("/Root", false)
            .unwrap()
            .into_iter()
            .map(|n| n.name.unwrap())
            .collect();
        assert_eq!(names, vec!["Apps", "docs", "a.txt", "b.txt"]);

        let recursive: Vec<_> = tree
            .list("/Root", true)
            .unwrap()
            .into_iter()
            .map(|n| n.handle)
            .collect();
        assert_eq!(recursive, vec!["F2", "F1", "X3", "X2", "X1"]);

        let roots: Vec<_> = tree.list("/", false).unwrap().into_iter().map(|n| n.handle).collect();
        assert_eq!(roots, vec!["ROOT", "INBOX", "TRASH"]);
    }

    #[test]
    fn test_list_requires_folder() {
        let tree = FileSystemTree::build(sample(), keychain(), None);
        assert!(matches!(
            tree.list("/Root/a.txt", false),
            Err(MegaError::NotFound { .. })
        ));
        assert!(matches!(
            tree.list("/Nowhere", false),
            Err(MegaError::NotFound { .. })
        ));
    }

    #[test]
    fn test_degraded_node_is_listed_not_resolvable() {
        let mut raws = sample();
        let mut broken = named("BAD", "ROOT", 0, "secret.txt");
        broken.key = Some("SOMEONE:AAAAAAAAAAAAAAAAAAAAAA".to_string());
        raws.push(broken);
        let tree = FileSystemTree::build(raws, keychain(), None);

        let listed = tree.list("/Root", false).unwrap();
        let last = listed.last().unwrap();
        assert_eq!(last.handle, "BAD");
        assert!(last.is_degraded());
        assert!(last.key_bytes().is_empty());
        assert!(tree.stat("/Root/secret.txt").is_none());
    }

    #[test]
    fn test_refresh_reuses_unchanged_entries() {
        let first = FileSystemTree::build(sample(), keychain(), None);
        let before = first.stat("/Root/docs/inner.txt").unwrap();

        let second = FileSystemTree::build(sample(), keychain(), Some(&first));
        assert_eq!(second.version(), first.version() + 1);
        assert!(!second.is_stale(&before));
        assert_eq!(
            first.list("/", true).unwrap().iter().map(|n| (&n.handle, &n.name)).collect::<Vec<_>>(),
            second.list("/", true).unwrap().iter().map(|n| (&n.handle, &n.name)).collect::<Vec<_>>()
        );

        let mut changed = sample();
        changed.retain(|r| r.handle != "X3");
        let third = FileSystemTree::build(changed, keychain(), Some(&second));
        assert!(third.is_stale(&before));
        assert!(third.stat("/Root/docs/inner.txt").is_none());
    }

    #[test]
    fn test_mutations_produce_new_snapshot() {
        let tree = FileSystemTree::build(sample(), keychain(), None);
        let docs = tree.stat("/Root/docs").unwrap();
        let renamed_attrs = named("F1", "ROOT", 1, "papers").attrs.unwrap();

        let next = tree.apply([
            TreeChange::SetAttributes {
                handle: "F1".to_string(),
                attrs: renamed_attrs,
            },
            TreeChange::Move {
                handle: "X1".to_string(),
                parent: "F1".to_string(),
            },
        ]);
        assert_eq!(next.version(), tree.version() + 1);
        assert!(next.is_stale(&docs));
        assert!(next.stat("/Root/docs").is_none());
        assert_eq!(next.stat("/Root/papers/b.txt").unwrap().handle, "X1");
        // the old snapshot is untouched
        assert_eq!(tree.stat("/Root/docs").unwrap().handle, "F1");

        let removed = next.apply([TreeChange::RemoveSubtree("F1".to_string())]);
        assert!(removed.stat("/Root/papers/inner.txt").is_none());
        assert!(removed.get("X3").is_none());
        assert!(removed.get("X1").is_none());
        assert_eq!(removed.len(), tree.len() - 3);
    }

    #[test]
    fn test_public_folder_tree() {
        let folder_key = [9u8; 16];
        let ak = attribute_key(&folder_key).unwrap();
        let root = RawNode {
            handle: "PUB".to_string(),
            parent: Some("ELSEWHERE".to_string()),
            kind: 1,
            attrs: Some(encrypt_attributes(&NodeAttributes::named("shared"), &ak).unwrap()),
            key: Some(format!(
                "PUB:{}",
                base64url_encode(&wrap_key(&folder_key, &folder_key).unwrap())
            )),
            size: 0,
            timestamp: 0,
            file_attr: None,
            public_handle: None,
        };
        let tree = FileSystemTree::build(
            vec![root],
            Keychain::for_public_folder("PUB", folder_key),
            None,
        );
        assert_eq!(tree.stat("/shared").unwrap().handle, "PUB");
        assert!(tree.list("/shared", false).unwrap().is_empty());
    }

    #[test]
    fn test_raw_node_parses_wire_json() {
        let raw: RawNode = serde_json::from_value(serde_json::json!({
            "h": "abc", "p": "ROOT", "t": 0, "a": "xx", "k": "U:K", "s": 5, "ts": 1, "u": "U"
        }))
        .unwrap();
        assert_eq!(raw.size, 5);
        assert!(raw.public_handle.is_none());
    }
}
