//! Access to exported nodes without an account.
//!
//! A file link is enough to fetch and decrypt one file. A folder link opens a
//! read-only view of the exported subtree: its nodes are listed through the
//! `n=` query parameter and their keys unwrap under the folder's share key.

use std::path::Path;
use std::sync::Arc;

use futures::io::AsyncWrite;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, HttpTransport, Transport};
use crate::base64::base64url_encode;
use crate::crypto::{attribute_key, decrypt_attributes, FileKey};
use crate::error::{LinkError, MegaError, Result};
use crate::fs::operations::download::{download_task, request_download};
use crate::fs::tree::{FileSystemTree, Keychain, RawNode};
use crate::fs::Node;
use crate::link::{LinkKind, PublicLink};
use crate::progress::ProgressSink;
use crate::transfer::download::{self, deliver_to_file, deliver_to_writer, staging_path, DownloadTask};
use crate::transfer::pool::WorkerPool;
use crate::transfer::resume::CheckpointKey;
use crate::transfer::{TransferConfig, TransferContext};

/// A file reached through a public link.
#[derive(Debug, Clone)]
pub struct PublicFile {
    pub name: String,
    pub size: u64,
    /// Public handle from the link.
    pub handle: String,
    link: PublicLink,
    url: String,
}

impl PublicFile {
    /// The link this file was opened from, in canonical form.
    pub fn link(&self) -> String {
        self.link.encode()
    }
}

fn transport() -> Result<Arc<dyn Transport>> {
    Ok(Arc::new(HttpTransport::new()?))
}

/// Context for an anonymous transfer: default pool and retries, no checkpoints.
fn anonymous_context(transport: Arc<dyn Transport>) -> TransferContext {
    let config = TransferConfig::default();
    TransferContext {
        transport,
        pool: WorkerPool::new(config.workers),
        retry: config.retry,
        progress: ProgressSink::default(),
        resume: None,
        cancel: CancellationToken::new(),
    }
}

fn expect_kind(link: &PublicLink, kind: LinkKind) -> Result<()> {
    if link.kind != kind {
        return Err(LinkError::Malformed(format!("expected a {:?} link", kind)).into());
    }
    Ok(())
}

/// Name, size and download location of a public file.
pub async fn public_file_info(url: &str) -> Result<PublicFile> {
    public_file_info_with_transport(url, transport()?).await
}

pub async fn public_file_info_with_transport(
    url: &str,
    transport: Arc<dyn Transport>,
) -> Result<PublicFile> {
    let link = PublicLink::decode(url)?;
    expect_kind(&link, LinkKind::File)?;
    let api = ApiClient::new(transport);
    let grant = request_download(&api, json!({"p": link.handle}))
        .await
        .map_err(MegaError::into_link_error)?;

    let name = grant
        .attrs
        .as_deref()
        .zip(attribute_key(&link.key))
        .and_then(|(at, ak)| decrypt_attributes(at, &ak))
        .map(|attrs| attrs.name)
        .ok_or_else(|| MegaError::Crypto("link key does not decrypt the file attributes".into()))?;
    debug!(handle = %link.handle, size = grant.size, "public file resolved");

    Ok(PublicFile {
        name,
        size: grant.size,
        handle: link.handle.clone(),
        link,
        url: grant.url,
    })
}

/// Download a public file into `sink`; returns what was downloaded.
pub async fn download_public_file<W>(url: &str, sink: &mut W) -> Result<PublicFile>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    download_public_file_with_transport(url, sink, transport()?).await
}

pub async fn download_public_file_with_transport<W>(
    url: &str,
    sink: &mut W,
    transport: Arc<dyn Transport>,
) -> Result<PublicFile>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let file = public_file_info_with_transport(url, transport.clone()).await?;
    let staging_dir = TransferConfig::default().staging_dir();
    let checkpoint = CheckpointKey::new(&file.handle, format!("public:{}", file.handle));
    let mut task = DownloadTask {
        handle: file.handle.clone(),
        name: file.name.clone(),
        size: file.size,
        key: FileKey::unpack(&file.link.key)?,
        identity: base64url_encode(&file.link.key),
        url: file.url.clone(),
        staging: staging_path(&staging_dir, &checkpoint),
        checkpoint,
    };
    // Anonymous transfers never resume.
    task.isolate();
    download::run(&anonymous_context(transport), &task).await?;
    deliver_to_writer(&task.staging, sink).await?;
    info!(name = %file.name, size = file.size, "public file downloaded");
    Ok(file)
}

/// Read-only view of an exported folder.
#[derive(Debug)]
pub struct PublicFolder {
    api: ApiClient,
    link: PublicLink,
    tree: FileSystemTree,
    root: String,
}

impl PublicFolder {
    pub async fn open(url: &str) -> Result<Self> {
        Self::open_with_transport(url, transport()?).await
    }

    pub async fn open_with_transport(url: &str, transport: Arc<dyn Transport>) -> Result<Self> {
        let link = PublicLink::decode(url)?;
        expect_kind(&link, LinkKind::Folder)?;
        let folder_key: [u8; 16] = link
            .key
            .as_slice()
            .try_into()
            .map_err(|_| LinkError::Malformed("folder key must be 16 bytes".into()))?;

        let mut api = ApiClient::new(transport);
        api.set_folder_handle(link.handle.clone());
        let response = api
            .request(json!({"a": "f", "c": 1, "r": 1}))
            .await
            .map_err(MegaError::into_link_error)?;
        let raws: Vec<RawNode> = response
            .get("f")
            .and_then(Value::as_array)
            .ok_or(MegaError::InvalidResponse)?
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect();

        // The exported folder is the one node whose parent is outside the listing.
        let root = raws
            .iter()
            .find(|r| {
                r.parent
                    .as_ref()
                    .map_or(true, |p| !raws.iter().any(|o| &o.handle == p))
            })
            .map(|r| r.handle.clone())
            .ok_or(MegaError::InvalidResponse)?;

        let tree = FileSystemTree::build(raws, Keychain::for_public_folder(&root, folder_key), None);
        let root_path = tree.path_of(&root).ok_or_else(|| {
            MegaError::Crypto("link key does not decrypt the folder".into())
        })?;
        info!(root = %root_path, nodes = tree.len(), "public folder opened");
        Ok(Self {
            api,
            link,
            tree,
            root: root_path,
        })
    }

    /// Path of the exported folder itself, e.g. `/Photos`.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn link(&self) -> String {
        self.link.encode()
    }

    /// Children of `path` in listing order.
    pub fn list(&self, path: &str, recursive: bool) -> Result<Vec<Node>> {
        self.tree.list(path, recursive)
    }

    pub fn stat(&self, path: &str) -> Option<Node> {
        self.tree.stat(path)
    }

    async fn fetch(&self, path: &str, local: &str, staging_dir: &Path) -> Result<DownloadTask> {
        let node = self
            .tree
            .stat(path)
            .ok_or_else(|| MegaError::not_found(path))?;
        if !node.is_file() {
            return Err(MegaError::InvalidArgument(format!("{} is not a file", path)));
        }
        let grant = request_download(&self.api, json!({"n": node.handle}))
            .await
            .map_err(|e| e.into_link_error().with_path(path))?;
        let mut task = download_task(&node, grant, staging_dir, local)?;
        task.isolate();
        let ctx = anonymous_context(self.api.transport().clone());
        if let Err(e) = download::run(&ctx, &task).await {
            warn!(path, error = %e, "public folder download failed");
            return Err(e);
        }
        Ok(task)
    }

    /// Download the file at `path` into `sink`.
    pub async fn download<W>(&self, path: &str, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let staging_dir = TransferConfig::default().staging_dir();
        let task = self
            .fetch(path, &format!("public-stream:{}", path), &staging_dir)
            .await?;
        deliver_to_writer(&task.staging, sink).await
    }

    /// Download the file at `path` to `local`.
    pub async fn download_to_file(&self, path: &str, local: impl AsRef<Path>) -> Result<()> {
        let local = local.as_ref();
        let staging_dir = local
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let task = self
            .fetch(path, &local.display().to_string(), staging_dir)
            .await?;
        deliver_to_file(&task.staging, local).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::logged_in;

    fn content(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_file_link_downloads_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let (service, session) = logged_in(dir.path()).await;
        let data = content(300_000);
        session.upload_bytes(data.clone(), "report.pdf", "/Root").await.unwrap();
        let url = session.export("/Root/report.pdf").await.unwrap();

        let info = public_file_info_with_transport(&url, service.clone()).await.unwrap();
        assert_eq!(info.name, "report.pdf");
        assert_eq!(info.size, data.len() as u64);

        let mut sink = Vec::new();
        let file = download_public_file_with_transport(&url, &mut sink, service.clone())
            .await
            .unwrap();
        assert_eq!(file.link(), PublicLink::decode(&url).unwrap().encode());
        assert_eq!(sink, data);
    }

    #[tokio::test]
    async fn test_revoked_link() {
        let dir = tempfile::tempdir().unwrap();
        let (service, session) = logged_in(dir.path()).await;
        session.upload_bytes(b"gone soon".to_vec(), "tmp.txt", "/Root").await.unwrap();
        let url = session.export("/Root/tmp.txt").await.unwrap();
        session.rm("/Root/tmp.txt").await.unwrap();

        let err = public_file_info_with_transport(&url, service).await.unwrap_err();
        assert!(matches!(err, MegaError::Link(LinkError::Revoked)));
    }

    #[tokio::test]
    async fn test_folder_link_kind_mismatch() {
        let url = "https://mega.nz/file/AbCdEfGh#AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
        let err = PublicFolder::open_with_transport(url, crate::testing::FakeService::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MegaError::Link(LinkError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_folder_link_lists_and_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let (service, session) = logged_in(dir.path()).await;
        session.mkdir("/Root/photos").await.unwrap();
        session.mkdir("/Root/photos/2024").await.unwrap();
        let data = content(70_000);
        session
            .upload_bytes(data.clone(), "beach.jpg", "/Root/photos/2024")
            .await
            .unwrap();
        let url = session.export("/Root/photos").await.unwrap();
        assert!(url.contains("/folder/"));

        let folder = PublicFolder::open_with_transport(&url, service.clone()).await.unwrap();
        assert_eq!(folder.root(), "/photos");
        let names: Vec<String> = folder
            .list("/photos", true)
            .unwrap()
            .iter()
            .map(|n| n.display_name().to_string())
            .collect();
        assert_eq!(names, vec!["2024", "beach.jpg"]);

        let mut sink = Vec::new();
        folder.download("/photos/2024/beach.jpg", &mut sink).await.unwrap();
        assert_eq!(sink, data);

        let target = dir.path().join("beach.jpg");
        folder
            .download_to_file("/photos/2024/beach.jpg", &target)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), data);
    }
}
