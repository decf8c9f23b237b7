//! Actor owning the session state.
//!
//! Every mutation of the tree goes through one task, one command at a time.
//! After each command the current snapshot is published on a watch channel,
//! so `list`/`stat` never wait behind a queued mutation. Transfers borrow a
//! transfer context from the actor, move their chunks outside it and come
//! back only to register the result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, Cursor};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{HttpTransport, Transport};
use crate::error::{MegaError, Result};
use crate::fs::contact::{AccessLevel, Contact};
use crate::fs::operations::download::PreparedDownload;
use crate::fs::operations::upload::{PreparedUpload, UploadRequest};
use crate::fs::tree::FileSystemTree;
use crate::fs::{Node, Quota};
use crate::preview::{thumbnail_for, MAX_PREVIEW_SOURCE};
use crate::progress::ProgressCallback;
use crate::transfer::download::{self, deliver_to_file, deliver_to_writer};
use crate::transfer::resume::CheckpointKey;
use crate::transfer::upload::{self, acknowledged_prefix_matches, fingerprint, UploadOutcome};
use crate::transfer::TransferConfig;

use super::core::{AccountInfo, Session};

const COMMAND_QUEUE: usize = 64;

type Reply<T> = oneshot::Sender<Result<T>>;

enum SessionCommand {
    Refresh {
        reply: Reply<()>,
    },
    Quota {
        reply: Reply<Quota>,
    },
    Mkdir {
        path: String,
        reply: Reply<Node>,
    },
    Rename {
        path: String,
        new_name: String,
        reply: Reply<()>,
    },
    Mv {
        source: String,
        dest: String,
        reply: Reply<()>,
    },
    Rm {
        path: String,
        reply: Reply<()>,
    },
    Export {
        path: String,
        reply: Reply<String>,
    },
    ExportMany {
        paths: Vec<String>,
        reply: Reply<Vec<(String, String)>>,
    },
    ShareFolder {
        path: String,
        email: String,
        level: AccessLevel,
        reply: Reply<()>,
    },
    ChangePassword {
        new_password: String,
        reply: Reply<()>,
    },
    ListContacts {
        reply: Reply<Vec<Contact>>,
    },
    AccountInfo {
        reply: Reply<AccountInfo>,
    },
    SetWorkers {
        workers: usize,
        reply: Reply<()>,
    },
    SetResume {
        enabled: bool,
        reply: Reply<()>,
    },
    EnablePreviews {
        enabled: bool,
        reply: Reply<()>,
    },
    Configure {
        config: TransferConfig,
        reply: Reply<()>,
    },
    WatchStatus {
        callback: ProgressCallback,
        reply: Reply<()>,
    },
    ClearStatus {
        reply: Reply<()>,
    },
    PrepareUpload {
        request: UploadRequest,
        fresh: bool,
        cancel: CancellationToken,
        reply: Reply<PreparedUpload>,
    },
    FinalizeUpload {
        parent: String,
        name: String,
        outcome: UploadOutcome,
        thumbnail: Option<Vec<u8>>,
        checkpoint: Option<CheckpointKey>,
        reply: Reply<Node>,
    },
    PrepareDownload {
        remote_path: String,
        local: Option<PathBuf>,
        cancel: CancellationToken,
        reply: Reply<PreparedDownload>,
    },
    Save {
        local_key: Option<[u8; 16]>,
        reply: Reply<Vec<u8>>,
    },
    Logout {
        reply: Reply<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cheap, cloneable handle to a logged-in session.
///
/// Reads (`list`, `stat`, ...) use the latest published snapshot directly;
/// everything else is queued to the session actor.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<Arc<FileSystemTree>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("tree_version", &self.tree_version())
            .finish()
    }
}

fn default_transport(proxy: Option<&str>) -> Result<Arc<dyn Transport>> {
    let transport = match proxy {
        Some(proxy) => HttpTransport::with_proxy(proxy)?,
        None => HttpTransport::new()?,
    };
    Ok(Arc::new(transport))
}

impl SessionHandle {
    /// Log in with email and password, optionally through an HTTP/SOCKS proxy.
    ///
    /// # Example
    /// ```no_run
    /// # async fn example() -> megacore::Result<()> {
    /// let session = megacore::SessionHandle::login("user@example.com", "password", None).await?;
    /// session.refresh().await?;
    /// for node in session.list("/Root", false)? {
    ///     println!("{} ({} bytes)", node.display_name(), node.size);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn login(email: &str, password: &str, proxy: Option<&str>) -> Result<Self> {
        Self::login_with_transport(email, password, default_transport(proxy)?).await
    }

    /// Log in over a caller-supplied transport.
    pub async fn login_with_transport(
        email: &str,
        password: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let session = Session::login(email, password, transport).await?;
        Ok(SessionActor::spawn(session))
    }

    /// Restore a session saved with [`SessionHandle::save`]. No request is
    /// made; the cached tree is available immediately.
    pub async fn load(blob: &[u8]) -> Result<Self> {
        Self::load_with_transport(blob, None, default_transport(None)?).await
    }

    /// Restore a session saved with [`SessionHandle::save_encrypted`].
    pub async fn load_encrypted(blob: &[u8], local_key: &[u8; 16]) -> Result<Self> {
        Self::load_with_transport(blob, Some(local_key), default_transport(None)?).await
    }

    pub async fn load_with_transport(
        blob: &[u8],
        local_key: Option<&[u8; 16]>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let session = Session::from_blob(blob, local_key, transport)?;
        Ok(SessionActor::spawn(session))
    }

    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let blob = tokio::fs::read(path).await?;
        Self::load(&blob).await
    }

    async fn request<R>(&self, build: impl FnOnce(Reply<R>) -> SessionCommand) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build(tx))
            .await
            .map_err(|_| MegaError::SessionClosed)?;
        rx.await.map_err(|_| MegaError::SessionClosed)?
    }

    /// The latest committed snapshot.
    pub fn snapshot(&self) -> Arc<FileSystemTree> {
        self.snapshot.borrow().clone()
    }

    pub fn list(&self, path: &str, recursive: bool) -> Result<Vec<Node>> {
        self.snapshot.borrow().list(path, recursive)
    }

    pub fn stat(&self, path: &str) -> Option<Node> {
        self.snapshot.borrow().stat(path)
    }

    pub fn get_node_by_handle(&self, handle: &str) -> Option<Node> {
        self.snapshot.borrow().get(handle)
    }

    pub fn tree_version(&self) -> u64 {
        self.snapshot.borrow().version()
    }

    /// Whether `node` has changed or disappeared since it was read.
    pub fn is_stale(&self, node: &Node) -> bool {
        self.snapshot.borrow().is_stale(node)
    }

    /// Fetch the remote tree and publish it as the new snapshot.
    pub async fn refresh(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Refresh { reply }).await
    }

    pub async fn quota(&self) -> Result<Quota> {
        self.request(|reply| SessionCommand::Quota { reply }).await
    }

    pub async fn mkdir(&self, path: &str) -> Result<Node> {
        self.request(|reply| SessionCommand::Mkdir {
            path: path.to_string(),
            reply,
        })
        .await
    }

    pub async fn rename(&self, path: &str, new_name: &str) -> Result<()> {
        self.request(|reply| SessionCommand::Rename {
            path: path.to_string(),
            new_name: new_name.to_string(),
            reply,
        })
        .await
    }

    /// Move `source` into the folder `dest`.
    pub async fn mv(&self, source: &str, dest: &str) -> Result<()> {
        self.request(|reply| SessionCommand::Mv {
            source: source.to_string(),
            dest: dest.to_string(),
            reply,
        })
        .await
    }

    /// Remove a node; folders are removed with everything below them.
    pub async fn rm(&self, path: &str) -> Result<()> {
        self.request(|reply| SessionCommand::Rm {
            path: path.to_string(),
            reply,
        })
        .await
    }

    /// Create a public link for a file or folder.
    pub async fn export(&self, path: &str) -> Result<String> {
        self.request(|reply| SessionCommand::Export {
            path: path.to_string(),
            reply,
        })
        .await
    }

    /// Create public links for several files in one request.
    pub async fn export_many(&self, paths: &[&str]) -> Result<Vec<(String, String)>> {
        self.request(|reply| SessionCommand::ExportMany {
            paths: paths.iter().map(|p| p.to_string()).collect(),
            reply,
        })
        .await
    }

    /// Share a folder with another MEGA user.
    pub async fn share_folder(&self, path: &str, email: &str, level: AccessLevel) -> Result<()> {
        self.request(|reply| SessionCommand::ShareFolder {
            path: path.to_string(),
            email: email.to_string(),
            level,
            reply,
        })
        .await
    }

    /// Change the account password. The session stays logged in.
    pub async fn change_password(&self, new_password: &str) -> Result<()> {
        self.request(|reply| SessionCommand::ChangePassword {
            new_password: new_password.to_string(),
            reply,
        })
        .await
    }

    /// Contacts as of the last refresh.
    pub async fn list_contacts(&self) -> Result<Vec<Contact>> {
        self.request(|reply| SessionCommand::ListContacts { reply })
            .await
    }

    pub async fn account_info(&self) -> Result<AccountInfo> {
        self.request(|reply| SessionCommand::AccountInfo { reply })
            .await
    }

    /// Number of concurrent chunk operations (clamped to 1..=16).
    pub async fn set_workers(&self, workers: usize) -> Result<()> {
        self.request(|reply| SessionCommand::SetWorkers { workers, reply })
            .await
    }

    pub async fn set_resume(&self, enabled: bool) -> Result<()> {
        self.request(|reply| SessionCommand::SetResume { enabled, reply })
            .await
    }

    pub async fn enable_previews(&self, enabled: bool) -> Result<()> {
        self.request(|reply| SessionCommand::EnablePreviews { enabled, reply })
            .await
    }

    /// Replace the whole transfer configuration.
    pub async fn configure(&self, config: TransferConfig) -> Result<()> {
        self.request(|reply| SessionCommand::Configure { config, reply })
            .await
    }

    /// Receive progress for transfers started after this call.
    pub async fn watch_status(&self, callback: ProgressCallback) -> Result<()> {
        self.request(|reply| SessionCommand::WatchStatus { callback, reply })
            .await
    }

    pub async fn clear_status(&self) -> Result<()> {
        self.request(|reply| SessionCommand::ClearStatus { reply })
            .await
    }

    /// Upload `size` bytes from `source` as `name` into `remote_folder`.
    pub async fn upload<R>(&self, source: R, name: &str, size: u64, remote_folder: &str) -> Result<Node>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        self.upload_with_cancel(source, name, size, remote_folder, CancellationToken::new())
            .await
    }

    pub async fn upload_with_cancel<R>(
        &self,
        source: R,
        name: &str,
        size: u64,
        remote_folder: &str,
        cancel: CancellationToken,
    ) -> Result<Node>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let local = format!("stream:{}", name);
        self.upload_source(source, name, size, remote_folder, local, cancel)
            .await
    }

    /// Upload a local file under its own name.
    pub async fn upload_file(&self, path: impl AsRef<Path>, remote_folder: &str) -> Result<Node> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                MegaError::InvalidArgument(format!("{} has no usable file name", path.display()))
            })?
            .to_string();
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let local = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string();
        self.upload_source(file.compat(), &name, size, remote_folder, local, CancellationToken::new())
            .await
    }

    pub async fn upload_bytes(&self, data: Vec<u8>, name: &str, remote_folder: &str) -> Result<Node> {
        let size = data.len() as u64;
        self.upload_source(
            Cursor::new(data),
            name,
            size,
            remote_folder,
            format!("bytes:{}", name),
            CancellationToken::new(),
        )
        .await
    }

    async fn upload_source<R>(
        &self,
        mut source: R,
        name: &str,
        size: u64,
        remote_folder: &str,
        local: String,
        cancel: CancellationToken,
    ) -> Result<Node>
    where
        R: AsyncRead + AsyncSeek + Unpin + Send,
    {
        let request = UploadRequest {
            remote_folder: remote_folder.to_string(),
            name: name.to_string(),
            size,
            local,
            identity: fingerprint(&mut source, size).await?,
        };
        let mut prepared = self.prepare_upload(&request, false, cancel.clone()).await?;
        if !acknowledged_prefix_matches(&mut source, &prepared.task.state).await? {
            warn!(name, "source changed since the upload checkpoint, starting over");
            drop(prepared);
            prepared = self.prepare_upload(&request, true, cancel).await?;
        }

        let thumbnail = if prepared.previews {
            preview_of(&mut source, name, size).await
        } else {
            None
        };
        let PreparedUpload {
            task,
            ctx,
            parent,
            lease,
            ..
        } = prepared;
        let checkpoint = lease.as_ref().map(|_| task.key.clone());
        let outcome = upload::run(&ctx, task, source).await?;

        let node = self
            .request(|reply| SessionCommand::FinalizeUpload {
                parent,
                name: name.to_string(),
                outcome,
                thumbnail,
                checkpoint,
                reply,
            })
            .await;
        drop(lease);
        node
    }

    async fn prepare_upload(
        &self,
        request: &UploadRequest,
        fresh: bool,
        cancel: CancellationToken,
    ) -> Result<PreparedUpload> {
        self.request(|reply| SessionCommand::PrepareUpload {
            request: request.clone(),
            fresh,
            cancel,
            reply,
        })
        .await
    }

    /// Download a file into `sink`. Nothing is written unless the content
    /// verifies.
    pub async fn download<W>(&self, remote_path: &str, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.download_with_cancel(remote_path, sink, CancellationToken::new())
            .await
    }

    pub async fn download_with_cancel<W>(
        &self,
        remote_path: &str,
        sink: &mut W,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let prepared = self
            .request(|reply| SessionCommand::PrepareDownload {
                remote_path: remote_path.to_string(),
                local: None,
                cancel,
                reply,
            })
            .await?;
        download::run(&prepared.ctx, &prepared.task).await?;
        deliver_to_writer(&prepared.task.staging, sink).await
    }

    /// Download a file to `local`; the file appears only once verified.
    pub async fn download_to_file(&self, remote_path: &str, local: impl AsRef<Path>) -> Result<()> {
        self.download_to_file_with_cancel(remote_path, local, CancellationToken::new())
            .await
    }

    pub async fn download_to_file_with_cancel(
        &self,
        remote_path: &str,
        local: impl AsRef<Path>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let local = local.as_ref().to_path_buf();
        let prepared = self
            .request(|reply| SessionCommand::PrepareDownload {
                remote_path: remote_path.to_string(),
                local: Some(local.clone()),
                cancel,
                reply,
            })
            .await?;
        download::run(&prepared.ctx, &prepared.task).await?;
        deliver_to_file(&prepared.task.staging, &local).await
    }

    /// Serialize the session; see [`crate::session::SESSION_FORMAT_VERSION`].
    pub async fn save(&self) -> Result<Vec<u8>> {
        self.request(|reply| SessionCommand::Save {
            local_key: None,
            reply,
        })
        .await
    }

    /// Serialize the session with the master key wrapped under `local_key`.
    pub async fn save_encrypted(&self, local_key: &[u8; 16]) -> Result<Vec<u8>> {
        self.request(|reply| SessionCommand::Save {
            local_key: Some(*local_key),
            reply,
        })
        .await
    }

    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let blob = self.save().await?;
        tokio::fs::write(path, blob).await?;
        Ok(())
    }

    /// End the session on the service and stop the actor.
    pub async fn logout(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Logout { reply }).await
    }

    /// Stop the actor without contacting the service.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(SessionCommand::Shutdown { reply: tx }).await;
        let _ = rx.await;
    }
}

/// Read the whole source for a thumbnail if `name` looks like an image of
/// at most [`MAX_PREVIEW_SOURCE`] bytes.
async fn preview_of<R>(source: &mut R, name: &str, size: u64) -> Option<Vec<u8>>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    if !crate::preview::is_image_name(name) {
        return None;
    }
    if size > MAX_PREVIEW_SOURCE {
        debug!(name, size, "image too large for a thumbnail");
        return None;
    }
    let mut data = Vec::new();
    let read = source.read_to_end(&mut data).await;
    let rewound = source.seek(std::io::SeekFrom::Start(0)).await;
    if let Err(e) = read.and(rewound) {
        warn!(name, error = %e, "cannot read source for thumbnail");
        return None;
    }
    match thumbnail_for(name, data).await? {
        Ok(thumbnail) => Some(thumbnail),
        Err(e) => {
            warn!(name, error = %e, "thumbnail generation failed");
            None
        }
    }
}

struct SessionActor {
    session: Session,
    rx: mpsc::Receiver<SessionCommand>,
    snapshot: watch::Sender<Arc<FileSystemTree>>,
}

impl SessionActor {
    fn spawn(session: Session) -> SessionHandle {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let (snapshot, snapshot_rx) = watch::channel(session.tree.clone());
        let actor = SessionActor {
            session,
            rx,
            snapshot,
        };
        tokio::spawn(actor.run());
        SessionHandle {
            tx,
            snapshot: snapshot_rx,
        }
    }

    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            if self.handle_command(cmd).await {
                break;
            }
        }
        debug!("session actor stopped");
    }

    /// Publish the current snapshot, then answer: a caller that sees the
    /// reply also sees the change.
    fn reply<T>(&self, reply: Reply<T>, res: Result<T>) {
        self.publish();
        let _ = reply.send(res);
    }

    fn publish(&self) {
        let current = &self.session.tree;
        self.snapshot.send_if_modified(|published| {
            if Arc::ptr_eq(published, current) {
                false
            } else {
                *published = current.clone();
                true
            }
        });
    }

    async fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Refresh { reply } => {
                let res = self.session.refresh().await;
                self.reply(reply, res);
            }
            SessionCommand::Quota { reply } => {
                let _ = reply.send(self.session.quota().await);
            }
            SessionCommand::Mkdir { path, reply } => {
                let res = self.session.mkdir(&path).await;
                self.reply(reply, res);
            }
            SessionCommand::Rename {
                path,
                new_name,
                reply,
            } => {
                let res = self.session.rename(&path, &new_name).await;
                self.reply(reply, res);
            }
            SessionCommand::Mv {
                source,
                dest,
                reply,
            } => {
                let res = self.session.mv(&source, &dest).await;
                self.reply(reply, res);
            }
            SessionCommand::Rm { path, reply } => {
                let res = self.session.rm(&path).await;
                self.reply(reply, res);
            }
            SessionCommand::Export { path, reply } => {
                let res = self.session.export(&path).await;
                self.reply(reply, res);
            }
            SessionCommand::ExportMany { paths, reply } => {
                let res = self.session.export_many(&paths).await;
                self.reply(reply, res);
            }
            SessionCommand::ShareFolder {
                path,
                email,
                level,
                reply,
            } => {
                let res = self.session.share_folder(&path, &email, level).await;
                self.reply(reply, res);
            }
            SessionCommand::ChangePassword {
                new_password,
                reply,
            } => {
                let _ = reply.send(self.session.change_password(&new_password).await);
            }
            SessionCommand::ListContacts { reply } => {
                let _ = reply.send(Ok(self.session.list_contacts()));
            }
            SessionCommand::AccountInfo { reply } => {
                let _ = reply.send(Ok(self.session.account_info()));
            }
            SessionCommand::SetWorkers { workers, reply } => {
                self.session.set_workers(workers);
                let _ = reply.send(Ok(()));
            }
            SessionCommand::SetResume { enabled, reply } => {
                self.session.set_resume(enabled);
                let _ = reply.send(Ok(()));
            }
            SessionCommand::EnablePreviews { enabled, reply } => {
                self.session.enable_previews(enabled);
                let _ = reply.send(Ok(()));
            }
            SessionCommand::Configure { config, reply } => {
                self.session.apply_config(config);
                let _ = reply.send(Ok(()));
            }
            SessionCommand::WatchStatus { callback, reply } => {
                self.session.watch_status(callback);
                let _ = reply.send(Ok(()));
            }
            SessionCommand::ClearStatus { reply } => {
                self.session.clear_status();
                let _ = reply.send(Ok(()));
            }
            SessionCommand::PrepareUpload {
                request,
                fresh,
                cancel,
                reply,
            } => {
                let res = self.session.prepare_upload(&request, fresh, cancel).await;
                let _ = reply.send(res);
            }
            SessionCommand::FinalizeUpload {
                parent,
                name,
                outcome,
                thumbnail,
                checkpoint,
                reply,
            } => {
                let res = self
                    .session
                    .finalize_upload(&parent, &name, outcome, thumbnail, checkpoint.as_ref())
                    .await;
                self.reply(reply, res);
            }
            SessionCommand::PrepareDownload {
                remote_path,
                local,
                cancel,
                reply,
            } => {
                let res = self
                    .session
                    .prepare_download(&remote_path, local.as_deref(), cancel)
                    .await;
                let _ = reply.send(res);
            }
            SessionCommand::Save { local_key, reply } => {
                let _ = reply.send(self.session.to_blob(local_key.as_ref()));
            }
            SessionCommand::Logout { reply } => {
                let res = self.session.logout().await;
                let stop = res.is_ok();
                let _ = reply.send(res);
                return stop;
            }
            SessionCommand::Shutdown { reply } => {
                let _ = reply.send(());
                return true;
            }
        }
        false
    }
}
