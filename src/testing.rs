//! In-memory stand-in for the MEGA service.
//!
//! Speaks just enough of the command protocol for the session, transfer and
//! link code to run end to end: one account, a node store, upload buffers
//! that hand out completion tokens, downloads by handle or public handle and
//! anonymous folder access through the `n=` query parameter. Content and
//! attributes are stored exactly as the client encrypted them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

use crate::api::Transport;
use crate::base64::{base64url_decode, base64url_encode};
use crate::crypto::{
    aes128_ecb_encrypt_block, derive_key_v2, make_password_key, make_random_key,
    make_username_hash, wrap_key, MegaRsaKey,
};
use crate::error::{MegaError, Result};
use crate::session::SessionHandle;
use crate::transfer::{RetryPolicy, TransferConfig};

pub(crate) const TEST_EMAIL: &str = "alice@example.com";
pub(crate) const TEST_PASSWORD: &str = "correct horse battery";

const ROOT: &str = "ROOTHNDL";
const INBOX: &str = "INBXHNDL";
const TRASH: &str = "TRSHHNDL";

const EARGS: i64 = -2;
const ENOENT: i64 = -9;
const EEXPIRED: i64 = -13;
const EBLOCKED: i64 = -15;

#[derive(Debug, Default)]
struct PendingUpload {
    size: u64,
    data: Vec<u8>,
    received: BTreeMap<u64, usize>,
}

impl PendingUpload {
    fn is_complete(&self) -> bool {
        self.received.values().map(|n| *n as u64).sum::<u64>() >= self.size
    }
}

#[derive(Debug)]
struct State {
    email: String,
    password_key: [u8; 16],
    user_hash: String,
    variant: i64,
    salt: Vec<u8>,
    /// Master key as wrapped by the last password change.
    wrapped_master: Option<String>,
    master_key: [u8; 16],
    user_handle: String,
    name: Option<String>,
    blocked: bool,
    offline: bool,
    sessions: HashSet<String>,
    nodes: BTreeMap<String, Value>,
    owned_shares: Vec<Value>,
    public: BTreeMap<String, String>,
    uploads: HashMap<String, PendingUpload>,
    completed: HashMap<String, Vec<u8>>,
    contents: HashMap<String, Vec<u8>>,
    contacts: Vec<Value>,
    public_keys: HashMap<String, String>,
    /// `(node, user entry)` for every share granted through `s2`.
    grants: Vec<(String, Value)>,
    quota_total: u64,
    commands: usize,
    attribute_uploads: usize,
    corrupt_at: Option<u64>,
    failing_chunks: usize,
    upload_offsets: Vec<u64>,
    download_offsets: Vec<u64>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn new_handle(&mut self, prefix: char) -> String {
        format!("{}{:07}", prefix, self.next_id())
    }

    fn subtree(&self, handle: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![handle.to_string()];
        while let Some(h) = stack.pop() {
            if !self.nodes.contains_key(&h) {
                continue;
            }
            stack.extend(
                self.nodes
                    .iter()
                    .filter(|(_, n)| n["p"].as_str() == Some(h.as_str()))
                    .map(|(k, _)| k.clone()),
            );
            out.push(h);
        }
        out
    }

    fn is_container(&self, handle: &str) -> bool {
        self.nodes
            .get(handle)
            .and_then(|n| n["t"].as_i64())
            .is_some_and(|t| t >= 1)
    }

    /// Append share-wrapped keys from a `cr` block; `names` maps request
    /// handles (placeholders, tokens) to stored ones.
    fn apply_crypto_request(&mut self, cr: &Value, names: &HashMap<String, String>) {
        let (Some(shares), Some(handles), Some(keys)) =
            (cr[0].as_array(), cr[1].as_array(), cr[2].as_array())
        else {
            return;
        };
        for triple in keys.chunks(3) {
            let [share, node, wrapped] = triple else { continue };
            let (Some(share), Some(node), Some(wrapped)) = (
                share.as_u64().and_then(|i| shares.get(i as usize)?.as_str()),
                node.as_u64().and_then(|i| handles.get(i as usize)?.as_str()),
                wrapped.as_str(),
            ) else {
                continue;
            };
            let stored = names.get(node).map(String::as_str).unwrap_or(node);
            if let Some(entry) = self.nodes.get_mut(stored) {
                let k = entry["k"].as_str().unwrap_or_default().to_string();
                entry["k"] = json!(format!("{}/{}:{}", k, share, wrapped));
            }
        }
    }

    fn command(&mut self, cmd: &Value, sid: Option<&str>, folder: Option<&str>) -> Value {
        let action = cmd["a"].as_str().unwrap_or_default();
        match action {
            "us0" => {
                let mut reply = json!({"v": self.variant});
                if self.variant == 2 {
                    reply["s"] = json!(base64url_encode(&self.salt));
                }
                return reply;
            }
            "us" => return self.login(cmd),
            _ => {}
        }

        if let Some(ph) = folder {
            return self.folder_command(action, cmd, ph);
        }
        if !sid.is_some_and(|s| self.sessions.contains(s)) {
            return json!(EEXPIRED);
        }

        match action {
            "ug" => json!({"u": self.user_handle, "email": self.email, "name": self.name}),
            "sml" => {
                if let Some(sid) = sid {
                    self.sessions.remove(sid);
                }
                json!(0)
            }
            "f" => {
                let ph: Vec<Value> = self
                    .public
                    .iter()
                    .map(|(h, ph)| json!({"h": h, "ph": ph}))
                    .collect();
                let mut users = vec![json!({"u": self.user_handle, "m": self.email, "c": 2})];
                users.extend(self.contacts.iter().cloned());
                json!({
                    "f": self.nodes.values().cloned().collect::<Vec<_>>(),
                    "ok": self.owned_shares,
                    "ph": ph,
                    "u": users,
                })
            }
            "uq" => {
                let used: u64 = self.contents.values().map(|c| c.len() as u64).sum();
                json!({"mstrg": self.quota_total, "cstrg": used})
            }
            "p" => self.put_nodes(cmd),
            "a" => match self.nodes.get_mut(cmd["n"].as_str().unwrap_or_default()) {
                Some(node) => {
                    node["a"] = cmd["at"].clone();
                    json!(0)
                }
                None => json!(ENOENT),
            },
            "m" => {
                let (n, t) = (
                    cmd["n"].as_str().unwrap_or_default(),
                    cmd["t"].as_str().unwrap_or_default(),
                );
                if !self.is_container(t) {
                    return json!(ENOENT);
                }
                match self.nodes.get_mut(n) {
                    Some(node) => {
                        node["p"] = json!(t);
                        json!(0)
                    }
                    None => json!(ENOENT),
                }
            }
            "d" => {
                let n = cmd["n"].as_str().unwrap_or_default();
                if !self.nodes.contains_key(n) {
                    return json!(ENOENT);
                }
                for h in self.subtree(n) {
                    self.nodes.remove(&h);
                    self.contents.remove(&h);
                    self.public.remove(&h);
                }
                json!(0)
            }
            "l" => {
                let n = cmd["n"].as_str().unwrap_or_default().to_string();
                if !self.nodes.contains_key(&n) {
                    return json!(ENOENT);
                }
                if let Some(ph) = self.public.get(&n) {
                    return json!(ph);
                }
                let ph = self.new_handle('P');
                self.public.insert(n, ph.clone());
                json!(ph)
            }
            "s2" => {
                let n = cmd["n"].as_str().unwrap_or_default().to_string();
                if !self.is_container(&n) {
                    return json!(ENOENT);
                }
                if !self.owned_shares.iter().any(|s| s["h"] == json!(n)) {
                    self.owned_shares.push(json!({"h": n, "k": cmd["ok"]}));
                    self.apply_crypto_request(&cmd["cr"], &HashMap::new());
                }
                for user in cmd["s"].as_array().into_iter().flatten() {
                    self.grants.push((n.clone(), user.clone()));
                }
                json!(0)
            }
            "uk" => match self.public_keys.get(cmd["u"].as_str().unwrap_or_default()) {
                Some(pubk) => json!({"pubk": pubk}),
                None => json!(ENOENT),
            },
            "up" => {
                let (Some(k), Some(uh), Some(salt)) = (
                    cmd["k"].as_str(),
                    cmd["uh"].as_str(),
                    cmd["s"].as_str().and_then(|s| base64url_decode(s).ok()),
                ) else {
                    return json!(EARGS);
                };
                self.wrapped_master = Some(k.to_string());
                self.user_hash = uh.to_string();
                self.salt = salt;
                self.variant = 2;
                json!(0)
            }
            "u" => {
                let size = cmd["s"].as_u64().unwrap_or(0);
                let url = format!("fake://up/{}", self.next_id());
                self.uploads.insert(
                    url.clone(),
                    PendingUpload {
                        size,
                        data: vec![0; size as usize],
                        ..PendingUpload::default()
                    },
                );
                json!({"p": url})
            }
            "ufa" => json!({"p": format!("fake://fa/{}", self.next_id())}),
            "g" => {
                if let Some(n) = cmd["n"].as_str() {
                    self.grant(n, false)
                } else {
                    let ph = cmd["p"].as_str().unwrap_or_default();
                    match self.public.iter().find(|(_, p)| *p == ph) {
                        Some((h, _)) => {
                            let h = h.clone();
                            self.grant(&h, true)
                        }
                        None => json!(ENOENT),
                    }
                }
            }
            _ => json!(EARGS),
        }
    }

    fn login(&mut self, cmd: &Value) -> Value {
        if cmd["user"].as_str() != Some(self.email.as_str()) {
            return json!(ENOENT);
        }
        if self.blocked {
            return json!(EBLOCKED);
        }
        if cmd["uh"].as_str() != Some(self.user_hash.as_str()) {
            return json!(ENOENT);
        }
        let challenge = make_random_key();
        let mut sid = challenge.to_vec();
        let mut middle = self.user_handle.as_bytes().to_vec();
        middle.resize(11, 0);
        sid.extend_from_slice(&middle);
        sid.extend_from_slice(&aes128_ecb_encrypt_block(&challenge, &self.master_key));
        let tsid = base64url_encode(&sid);
        self.sessions.insert(tsid.clone());
        let k = match &self.wrapped_master {
            Some(k) => k.clone(),
            None => base64url_encode(
                &wrap_key(&self.master_key, &self.password_key).unwrap_or_default(),
            ),
        };
        json!({"k": k, "tsid": tsid})
    }

    fn put_nodes(&mut self, cmd: &Value) -> Value {
        let parent = cmd["t"].as_str().unwrap_or_default().to_string();
        if !self.is_container(&parent) {
            return json!(ENOENT);
        }
        let Some(entries) = cmd["n"].as_array() else {
            return json!(EARGS);
        };
        let mut created = Vec::new();
        let mut names = HashMap::new();
        for entry in entries {
            let kind = entry["t"].as_i64().unwrap_or(0);
            let requested = entry["h"].as_str().unwrap_or_default().to_string();
            let content = if kind == 0 {
                match self.completed.remove(&requested) {
                    Some(content) => Some(content),
                    None => return json!(ENOENT),
                }
            } else {
                None
            };
            let handle = self.new_handle('H');
            let mut node = json!({
                "h": handle,
                "p": parent,
                "t": kind,
                "a": entry["a"],
                "k": format!("{}:{}", self.user_handle, entry["k"].as_str().unwrap_or_default()),
                "s": content.as_ref().map_or(0, Vec::len),
                "ts": 1_700_000_000 + self.next_id as i64,
                "u": self.user_handle,
            });
            if let Some(fa) = entry.get("fa") {
                node["fa"] = fa.clone();
            }
            if let Some(content) = content {
                self.contents.insert(handle.clone(), content);
            }
            names.insert(requested, handle.clone());
            self.nodes.insert(handle, node.clone());
            created.push(node);
        }
        if let Some(cr) = cmd.get("cr") {
            self.apply_crypto_request(cr, &names);
            for node in &mut created {
                if let Some(stored) = node["h"].as_str().and_then(|h| self.nodes.get(h)) {
                    *node = stored.clone();
                }
            }
        }
        json!({"f": created})
    }

    fn grant(&self, handle: &str, with_attrs: bool) -> Value {
        let (Some(node), Some(content)) = (self.nodes.get(handle), self.contents.get(handle)) else {
            return json!(ENOENT);
        };
        let mut reply = json!({"s": content.len(), "g": format!("fake://dl/{}", handle)});
        if with_attrs {
            reply["at"] = node["a"].clone();
        }
        reply
    }

    fn folder_command(&mut self, action: &str, cmd: &Value, ph: &str) -> Value {
        let Some(root) = self
            .public
            .iter()
            .find(|(h, p)| *p == ph && self.is_container(h))
            .map(|(h, _)| h.clone())
        else {
            return json!(ENOENT);
        };
        let visible = self.subtree(&root);
        match action {
            "f" => json!({
                "f": visible.iter().filter_map(|h| self.nodes.get(h)).cloned().collect::<Vec<_>>(),
            }),
            "g" => match cmd["n"].as_str() {
                Some(n) if visible.iter().any(|h| h == n) => self.grant(n, false),
                _ => json!(ENOENT),
            },
            _ => json!(EARGS),
        }
    }
}

/// Fake MEGA service implementing [`Transport`].
#[derive(Debug)]
pub(crate) struct FakeService {
    state: Mutex<State>,
}

impl FakeService {
    /// One account with an empty cloud drive, logging in with the v1 scheme.
    pub fn new() -> Arc<Self> {
        let password_key = make_password_key(TEST_PASSWORD);
        let user_hash = base64url_encode(&make_username_hash(TEST_EMAIL, &password_key));
        let mut nodes = BTreeMap::new();
        for (handle, kind) in [(ROOT, 2), (INBOX, 3), (TRASH, 4)] {
            nodes.insert(
                handle.to_string(),
                json!({"h": handle, "t": kind, "ts": 1_700_000_000}),
            );
        }
        Arc::new(FakeService {
            state: Mutex::new(State {
                email: TEST_EMAIL.to_string(),
                password_key,
                user_hash,
                variant: 1,
                salt: Vec::new(),
                wrapped_master: None,
                master_key: [0x5a; 16],
                user_handle: "ALICE001".to_string(),
                name: Some("Alice".to_string()),
                blocked: false,
                offline: false,
                sessions: HashSet::new(),
                nodes,
                owned_shares: Vec::new(),
                public: BTreeMap::new(),
                uploads: HashMap::new(),
                completed: HashMap::new(),
                contents: HashMap::new(),
                contacts: Vec::new(),
                public_keys: HashMap::new(),
                grants: Vec::new(),
                quota_total: 0,
                commands: 0,
                attribute_uploads: 0,
                corrupt_at: None,
                failing_chunks: 0,
                upload_offsets: Vec::new(),
                download_offsets: Vec::new(),
                next_id: 0,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Switch the account to PBKDF2 (v2) login.
    pub fn use_v2_login(&self) {
        let salt = vec![0x11; 16];
        let derived = derive_key_v2(TEST_PASSWORD, &salt).unwrap_or([0; 32]);
        let mut state = self.state();
        state.password_key.copy_from_slice(&derived[..16]);
        state.user_hash = base64url_encode(&derived[16..]);
        state.salt = salt;
        state.variant = 2;
    }

    pub fn block_account(&self) {
        self.state().blocked = true;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn set_quota_total(&self, total: u64) {
        self.state().quota_total = total;
    }

    pub fn add_contact(&self, handle: &str, email: &str, visibility: i64) {
        self.state()
            .contacts
            .push(json!({"u": handle, "m": email, "c": visibility}));
    }

    /// Register a user that folders can be shared with, owning [`contact_key`].
    pub fn add_share_recipient(&self, handle: &str, email: &str) {
        let pubk = base64url_encode(&contact_key().public_key().to_mpis());
        let mut state = self.state();
        state.public_keys.insert(email.to_string(), pubk);
        state
            .contacts
            .push(json!({"u": handle, "m": email, "c": 1}));
    }

    /// User entries of the shares granted on `handle`.
    pub fn grants_on(&self, handle: &str) -> Vec<Value> {
        self.state()
            .grants
            .iter()
            .filter(|(h, _)| h == handle)
            .map(|(_, user)| user.clone())
            .collect()
    }

    /// Command posts received so far.
    pub fn commands_seen(&self) -> usize {
        self.state().commands
    }

    /// Flip one bit of the stored ciphertext at `offset` in every download.
    pub fn corrupt_downloads_at(&self, offset: u64) {
        self.state().corrupt_at = Some(offset);
    }

    /// Fail the next `n` chunk requests with a network error.
    pub fn fail_next_chunks(&self, n: usize) {
        self.state().failing_chunks = n;
    }

    pub fn upload_offsets(&self) -> Vec<u64> {
        self.state().upload_offsets.clone()
    }

    pub fn clear_upload_offsets(&self) {
        self.state().upload_offsets.clear();
    }

    pub fn attribute_uploads(&self) -> usize {
        self.state().attribute_uploads
    }

    pub fn fa_of(&self, handle: &str) -> Option<String> {
        self.state().nodes.get(handle)?["fa"].as_str().map(str::to_string)
    }

    /// Start offsets of the chunk downloads served so far.
    pub fn download_offsets(&self) -> Vec<u64> {
        self.state().download_offsets.clone()
    }

    pub fn clear_download_offsets(&self) {
        self.state().download_offsets.clear();
    }

    /// Make the next `l` on `handle` answer with `public_handle`.
    pub fn preset_public_handle(&self, handle: &str, public_handle: &str) {
        self.state()
            .public
            .insert(handle.to_string(), public_handle.to_string());
    }

    /// Simulate another client editing a node.
    pub fn touch_node(&self, handle: &str) {
        let mut state = self.state();
        let id = state.next_id() as i64;
        if let Some(node) = state.nodes.get_mut(handle) {
            node["ts"] = json!(1_800_000_000 + id);
        }
    }

    /// Simulate another client removing a node and its subtree.
    pub fn remove_remote(&self, handle: &str) {
        let mut state = self.state();
        for h in state.subtree(handle) {
            state.nodes.remove(&h);
            state.contents.remove(&h);
        }
    }
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

#[async_trait]
impl Transport for FakeService {
    async fn post_command(&self, query: &str, body: String) -> Result<String> {
        let mut state = self.state();
        if state.offline {
            return Err(MegaError::Network("connection refused".to_string()));
        }
        state.commands += 1;
        let commands: Vec<Value> = serde_json::from_str(&body)?;
        let sid = query_param(query, "sid");
        let folder = query_param(query, "n");
        let replies: Vec<Value> = commands
            .iter()
            .map(|cmd| state.command(cmd, sid, folder))
            .collect();
        Ok(serde_json::to_string(&replies)?)
    }

    async fn upload_chunk(&self, upload_url: &str, offset: u64, data: Bytes) -> Result<String> {
        let mut state = self.state();
        if state.failing_chunks > 0 {
            state.failing_chunks -= 1;
            return Err(MegaError::Network("injected chunk failure".to_string()));
        }
        state.upload_offsets.push(offset);
        let Some(upload) = state.uploads.get_mut(upload_url) else {
            return Ok(ENOENT.to_string());
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > upload.data.len() {
            return Ok(EARGS.to_string());
        }
        upload.data[start..end].copy_from_slice(&data);
        upload.received.insert(offset, data.len());
        if !upload.is_complete() {
            return Ok(String::new());
        }
        let data = upload.data.clone();
        let token = format!("TOKEN{:03}", state.next_id());
        state.completed.insert(token.clone(), data);
        Ok(token)
    }

    async fn download_range(&self, download_url: &str, start: u64, end: u64) -> Result<Bytes> {
        let mut state = self.state();
        if state.failing_chunks > 0 {
            state.failing_chunks -= 1;
            return Err(MegaError::Network("injected chunk failure".to_string()));
        }
        let handle = download_url
            .strip_prefix("fake://dl/")
            .ok_or(MegaError::Http(404))?;
        if !state.contents.contains_key(handle) {
            return Err(MegaError::Http(404));
        }
        state.download_offsets.push(start);
        let content = state.contents.get(handle).ok_or(MegaError::Http(404))?;
        let end = (end as usize).min(content.len());
        let start = (start as usize).min(end);
        let mut slice = content[start..end].to_vec();
        if let Some(at) = state.corrupt_at.map(|a| a as usize) {
            if (start..end).contains(&at) {
                slice[at - start] ^= 0x01;
            }
        }
        Ok(Bytes::from(slice))
    }

    async fn upload_file_attribute(&self, _upload_url: &str, data: Bytes) -> Result<Bytes> {
        let mut state = self.state();
        if data.len() % 16 != 0 {
            return Err(MegaError::Http(400));
        }
        state.attribute_uploads += 1;
        let id = state.next_id();
        Ok(Bytes::from(id.to_be_bytes().to_vec()))
    }
}

/// RSA key of the share recipient; 512 bits keeps the tests fast.
pub(crate) fn contact_key() -> MegaRsaKey {
    let prime = |digits: &[u8]| num_bigint::BigUint::parse_bytes(digits, 10).expect("prime");
    MegaRsaKey::from_primes(
        prime(b"74441553408445604394915005022183240531070701355763043770003756007748740124193"),
        prime(b"93701133909962698993439296777424832149198772354257376224376652534059727575521"),
    )
    .expect("contact key")
}

/// Test configuration: resume checkpoints in `dir`, fast retries.
pub(crate) fn test_config(dir: &std::path::Path) -> TransferConfig {
    TransferConfig {
        resume_dir: Some(dir.to_path_buf()),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: std::time::Duration::from_millis(1),
            max_backoff: std::time::Duration::from_millis(4),
        },
        ..TransferConfig::default()
    }
}

/// Fake service plus a logged-in, refreshed session using `dir` for transfer state.
pub(crate) async fn logged_in(dir: &std::path::Path) -> (Arc<FakeService>, SessionHandle) {
    let service = FakeService::new();
    let session = SessionHandle::login_with_transport(TEST_EMAIL, TEST_PASSWORD, service.clone())
        .await
        .expect("login");
    session.configure(test_config(dir)).await.expect("configure");
    session.refresh().await.expect("refresh");
    (service, session)
}
