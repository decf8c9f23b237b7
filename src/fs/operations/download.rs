//! Download preparation.

use std::path::Path;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ApiClient;
use crate::base64::base64url_encode;
use crate::crypto::FileKey;
use crate::error::{MegaError, Result};
use crate::fs::Node;
use crate::session::Session;
use crate::transfer::download::{staging_path, DownloadTask};
use crate::transfer::resume::{CheckpointKey, TransferLease};
use crate::transfer::TransferContext;

/// Download location handed out by `g`.
#[derive(Debug, Clone)]
pub(crate) struct DownloadGrant {
    pub url: String,
    pub size: u64,
    /// Encrypted attributes; only present for `p` (public handle) requests.
    pub attrs: Option<String>,
}

/// Ask the service where the content of a node can be fetched.
///
/// `request` selects the node by `n` (private handle) or `p` (public handle).
pub(crate) async fn request_download(api: &ApiClient, mut request: Value) -> Result<DownloadGrant> {
    request["a"] = json!("g");
    request["g"] = json!(1);
    let response = api.request(request).await?;
    if let Some(code) = response.get("e").and_then(Value::as_i64) {
        return Err(crate::api::ApiErrorCode::from(code).into_error(code));
    }
    let url = response
        .get("g")
        .and_then(Value::as_str)
        .ok_or(MegaError::InvalidResponse)?
        .to_string();
    let size = response
        .get("s")
        .and_then(Value::as_u64)
        .ok_or(MegaError::InvalidResponse)?;
    let attrs = response.get("at").and_then(Value::as_str).map(str::to_string);
    Ok(DownloadGrant { url, size, attrs })
}

/// Build a download task for a file node. Staging happens in `staging_dir`.
pub(crate) fn download_task(
    node: &Node,
    grant: DownloadGrant,
    staging_dir: &Path,
    local: &str,
) -> Result<DownloadTask> {
    let key = FileKey::unpack(node.key_bytes())?;
    let checkpoint = CheckpointKey::new(&node.handle, local);
    Ok(DownloadTask {
        handle: node.handle.clone(),
        name: node.display_name().to_string(),
        size: grant.size,
        key,
        identity: base64url_encode(node.key_bytes()),
        url: grant.url,
        staging: staging_path(staging_dir, &checkpoint),
        checkpoint,
    })
}

/// A download ready to run outside the session.
#[derive(Debug)]
pub(crate) struct PreparedDownload {
    pub task: DownloadTask,
    pub ctx: TransferContext,
    /// Held until delivery; `None` when the task was isolated.
    pub _lease: Option<TransferLease>,
}

impl Session {
    /// Resolve `remote_path` to a file and obtain its download URL.
    ///
    /// Staging goes next to `local_target` when there is one so that delivery
    /// is a rename; streamed downloads stage in the transfer directory.
    pub(crate) async fn prepare_download(
        &self,
        remote_path: &str,
        local_target: Option<&Path>,
        cancel: CancellationToken,
    ) -> Result<PreparedDownload> {
        let node = self.node_at(remote_path)?;
        if !node.is_file() {
            return Err(MegaError::InvalidArgument(format!(
                "{} is not a file",
                node.display_name()
            )));
        }
        if node.is_degraded() {
            return Err(MegaError::Crypto(format!(
                "no usable key for {}",
                node.display_name()
            )));
        }
        let grant = request_download(&self.api, json!({"n": node.handle}))
            .await
            .map_err(|e| e.with_path(remote_path))?;

        let (staging_dir, local) = match local_target {
            Some(target) => (
                target
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| Path::new(".").to_path_buf()),
                target.display().to_string(),
            ),
            None => (self.config.staging_dir(), format!("stream:{}", remote_path)),
        };
        let mut task = download_task(&node, grant, &staging_dir, &local)?;
        let (ctx, lease) = self.transfer_context(&task.checkpoint, cancel);
        if lease.is_none() {
            debug!(path = remote_path, "same download already running, staging separately");
            task.isolate();
        }
        Ok(PreparedDownload {
            task,
            ctx,
            _lease: lease,
        })
    }
}
