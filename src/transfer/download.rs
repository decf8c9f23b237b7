//! Download pipeline.
//!
//! Chunks are fetched by pool workers and handed back in index order. Each
//! one is decrypted, MAC'd and appended to a staging file; the sink only
//! sees the content after the file MAC checks out.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use futures::future;
use futures::io::{AsyncWrite, AsyncWriteExt as _};
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::chunk::plan_chunks;
use super::mac::MacAccumulator;
use super::resume::{CheckpointKey, ResumeState};
use super::TransferContext;
use crate::crypto::{aes128_ctr_apply, chunk_mac, condense_mac, make_random_nonce, FileKey};
use crate::error::{MegaError, Result, TransferError};
use crate::progress::TransferProgress;

const COPY_BUFFER: usize = 1024 * 1024;

/// One download into a staging file.
#[derive(Debug, Clone)]
pub(crate) struct DownloadTask {
    pub handle: String,
    pub name: String,
    pub size: u64,
    pub key: FileKey,
    /// Node key as stored remotely; a changed key invalidates checkpoints.
    pub identity: String,
    pub url: String,
    pub staging: PathBuf,
    pub checkpoint: CheckpointKey,
}

/// Staging file of the transfer identified by `key`.
pub(crate) fn staging_path(dir: &Path, key: &CheckpointKey) -> PathBuf {
    dir.join(format!(".megatmp.{}", key.digest()))
}

impl DownloadTask {
    /// Stage in a file of its own, for a download that cannot own its
    /// checkpoint. Run it without a resume store.
    pub fn isolate(&mut self) {
        let name = format!(
            ".megatmp.{}.{}",
            self.checkpoint.digest(),
            hex::encode(make_random_nonce())
        );
        self.staging.set_file_name(name);
    }
}

type ChunkFailure = (usize, MegaError);

/// Download and verify `task` into its staging file.
pub(crate) async fn run(ctx: &TransferContext, task: &DownloadTask) -> Result<()> {
    let chunks = plan_chunks(task.size);
    let total = chunks.len();
    let fail = |index: Option<usize>, done: u64, e: MegaError| -> MegaError {
        TransferError::new(&task.handle, index, done, e).into()
    };

    let mut state = match &ctx.resume {
        Some(store) => store
            .load(&task.checkpoint)
            .await
            .filter(|s| s.is_valid_for(task.size, &task.identity)),
        None => None,
    }
    .unwrap_or_else(|| ResumeState::new(&task.checkpoint, task.size, &task.identity));
    state.acknowledged.truncate(total);

    if let Some(parent) = task.staging.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| fail(None, 0, e.into()))?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&task.staging)
        .await
        .map_err(|e| fail(None, 0, e.into()))?;

    let mut start = state.acknowledged.len();
    let mut prefix_bytes: u64 = chunks[..start].iter().map(|c| c.len).sum();
    let staged = file.metadata().await.map_err(|e| fail(None, 0, e.into()))?.len();
    if staged < prefix_bytes {
        // Staging file does not hold what the checkpoint claims.
        start = 0;
        prefix_bytes = 0;
        state.acknowledged.clear();
    }
    if start > 0 {
        info!(handle = %task.handle, start, total, "resuming download");
    }
    file.set_len(prefix_bytes)
        .await
        .map_err(|e| fail(None, prefix_bytes, e.into()))?;
    file.seek(SeekFrom::Start(prefix_bytes))
        .await
        .map_err(|e| fail(None, prefix_bytes, e.into()))?;

    let mut acc = MacAccumulator::with_prefix(total, &state.acknowledged);
    let mut bytes_done = prefix_bytes;
    let mut failure: Option<ChunkFailure> = None;
    let mut writable = true;
    let cancel = ctx.cancel.child_token();
    let aes_key = task.key.aes_key;
    let nonce = task.key.nonce;
    let url = task.url.as_str();

    let issue_cancel = cancel.clone();
    let fetches = stream::iter(chunks[start..].to_vec())
        .take_while(move |_| future::ready(!issue_cancel.is_cancelled()))
        .map(|chunk| {
            let cancel = cancel.clone();
            async move {
                let _permit = ctx
                    .pool
                    .acquire(&cancel)
                    .await
                    .map_err(|e| (chunk.index, e))?;
                let data = ctx
                    .retry
                    .run("download chunk", &cancel, move || {
                        ctx.transport.download_range(url, chunk.offset, chunk.end())
                    })
                    .await
                    .map_err(|e| (chunk.index, e))?;
                if data.len() as u64 != chunk.len {
                    return Err((
                        chunk.index,
                        MegaError::Integrity {
                            handle: task.handle.clone(),
                            chunk_index: Some(chunk.index),
                        },
                    ));
                }
                let mut plain = data.to_vec();
                aes128_ctr_apply(&mut plain, &aes_key, &nonce, chunk.offset);
                let mac = chunk_mac(&plain, &aes_key, &nonce);
                Ok::<_, ChunkFailure>((chunk, plain, mac))
            }
        })
        .buffered(ctx.pool.size());
    futures::pin_mut!(fetches);

    while let Some(result) = fetches.next().await {
        match result {
            Ok((chunk, plain, mac)) if writable => {
                if let Err(e) = file.write_all(&plain).await {
                    failure.get_or_insert((chunk.index, e.into()));
                    writable = false;
                    cancel.cancel();
                    continue;
                }
                if let Err(e) = acc.insert(chunk.index, mac) {
                    failure.get_or_insert((chunk.index, e));
                    writable = false;
                    cancel.cancel();
                    continue;
                }
                bytes_done += chunk.len;
                if let Some(store) = &ctx.resume {
                    state.acknowledged = acc.prefix();
                    let saved = match file.flush().await {
                        Ok(()) => store.save(&state).await,
                        Err(e) => Err(e.into()),
                    };
                    if let Err(e) = saved {
                        warn!(error = %e, "cannot save download checkpoint");
                    }
                }
                let progress = TransferProgress::new(bytes_done, task.size, &task.name);
                if !ctx.progress.report(&progress) {
                    debug!(handle = %task.handle, "download cancelled by progress callback");
                    cancel.cancel();
                }
            }
            Ok(_) => {}
            Err((_, MegaError::Cancelled)) => writable = false,
            Err((index, e)) => {
                warn!(handle = %task.handle, chunk = index, error = %e, "chunk download failed");
                failure.get_or_insert((index, e));
                writable = false;
                cancel.cancel();
            }
        }
    }
    file.flush().await.map_err(|e| fail(None, bytes_done, e.into()))?;
    drop(file);

    if let Some((index, e)) = failure {
        if e.is_integrity() || ctx.resume.is_none() {
            discard(ctx, task).await;
        }
        return Err(fail(Some(index), bytes_done, e));
    }
    if !acc.is_complete() {
        if ctx.resume.is_none() {
            discard(ctx, task).await;
        }
        return Err(MegaError::Cancelled);
    }

    let meta_mac = acc
        .finalize(&aes_key)
        .map_err(|e| fail(None, bytes_done, e))?;
    if condense_mac(&meta_mac) != task.key.mac {
        warn!(handle = %task.handle, "file MAC mismatch, discarding download");
        discard(ctx, task).await;
        return Err(fail(
            None,
            bytes_done,
            MegaError::Integrity {
                handle: task.handle.clone(),
                chunk_index: None,
            },
        ));
    }
    if let Some(store) = &ctx.resume {
        store.remove(&task.checkpoint).await;
    }
    Ok(())
}

async fn discard(ctx: &TransferContext, task: &DownloadTask) {
    remove_quietly(&task.staging).await;
    if let Some(store) = &ctx.resume {
        store.remove(&task.checkpoint).await;
    }
}

pub(crate) async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "cannot remove staging file");
        }
    }
}

/// Move verified content into place.
pub(crate) async fn deliver_to_file(staging: &Path, target: &Path) -> Result<()> {
    if tokio::fs::rename(staging, target).await.is_ok() {
        return Ok(());
    }
    // Different filesystems: copy, then drop the staging file.
    tokio::fs::copy(staging, target).await?;
    remove_quietly(staging).await;
    Ok(())
}

/// Stream verified content into `sink`, then drop the staging file.
pub(crate) async fn deliver_to_writer<W>(staging: &Path, sink: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut file = tokio::fs::File::open(staging).await?;
    let mut buf = vec![0u8; COPY_BUFFER];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).await?;
    }
    sink.flush().await?;
    drop(file);
    remove_quietly(staging).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_path_follows_checkpoint() {
        let key = CheckpointKey::new("AbC123", "/tmp/x/a.bin");
        let path = staging_path(Path::new("/tmp/x"), &key);
        assert_eq!(path, Path::new("/tmp/x").join(format!(".megatmp.{}", key.digest())));
        let other = CheckpointKey::new("AbC123", "/tmp/x/b.bin");
        assert_ne!(path, staging_path(Path::new("/tmp/x"), &other));
    }

    #[test]
    fn test_isolated_staging_stays_in_place() {
        let key = CheckpointKey::new("AbC123", "stream:/Root/a.bin");
        let mut task = DownloadTask {
            handle: "AbC123".into(),
            name: "a.bin".into(),
            size: 1,
            key: FileKey {
                aes_key: [0; 16],
                nonce: [0; 8],
                mac: [0; 8],
            },
            identity: String::new(),
            url: String::new(),
            staging: staging_path(Path::new("/tmp/x"), &key),
            checkpoint: key,
        };
        let shared = task.staging.clone();
        task.isolate();
        assert_ne!(task.staging, shared);
        assert_eq!(task.staging.parent(), Some(Path::new("/tmp/x")));
    }

    #[tokio::test]
    async fn test_deliver_to_writer_copies_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join(".megatmp.h");
        tokio::fs::write(&staging, b"verified bytes").await.unwrap();

        let mut sink = futures::io::Cursor::new(Vec::new());
        deliver_to_writer(&staging, &mut sink).await.unwrap();
        assert_eq!(sink.into_inner(), b"verified bytes");
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn test_deliver_to_file_renames() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join(".megatmp.h");
        let target = dir.path().join("out.bin");
        tokio::fs::write(&staging, b"abc").await.unwrap();
        deliver_to_file(&staging, &target).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"abc");
        assert!(!staging.exists());
    }
}
