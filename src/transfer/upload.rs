//! Upload pipeline.
//!
//! The source is read sequentially, one chunk at a time. Each chunk is
//! MAC'd, encrypted and posted by a worker holding a pool slot; completions
//! arrive in any order and are folded by a [`MacAccumulator`]. The
//! acknowledged prefix is checkpointed as it grows.

use std::io::SeekFrom;

use bytes::Bytes;
use futures::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::chunk::{plan_chunks, Chunk};
use super::mac::MacAccumulator;
use super::resume::{CheckpointKey, ResumeState};
use super::TransferContext;
use crate::api::ApiErrorCode;
use crate::crypto::{aes128_ctr_apply, chunk_mac};
use crate::error::{MegaError, Result, TransferError};
use crate::progress::TransferProgress;

const FINGERPRINT_HEAD: usize = 1024 * 1024;

/// One upload, positioned at its checkpoint (fresh uploads start empty).
#[derive(Debug, Clone)]
pub(crate) struct UploadTask {
    pub name: String,
    pub size: u64,
    pub key: CheckpointKey,
    pub state: ResumeState,
}

/// Result of a fully acknowledged upload, ready to be registered as a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UploadOutcome {
    pub token: String,
    pub file_key: [u8; 16],
    pub nonce: [u8; 8],
    pub meta_mac: [u8; 16],
}

type ChunkFailure = (usize, MegaError);

/// Content identity of a source: its size and a hash of its first MiB.
/// Leaves the source positioned at the start.
pub(crate) async fn fingerprint<R>(source: &mut R, size: u64) -> Result<String>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    source.seek(SeekFrom::Start(0)).await?;
    let mut head = Vec::with_capacity(FINGERPRINT_HEAD.min(size as usize));
    (&mut *source)
        .take(FINGERPRINT_HEAD as u64)
        .read_to_end(&mut head)
        .await?;
    source.seek(SeekFrom::Start(0)).await?;

    let mut hasher = Sha256::new();
    hasher.update(size.to_le_bytes());
    hasher.update(&head);
    Ok(hex::encode(hasher.finalize()))
}

/// Whether the source still holds the chunks acknowledged in `state`.
///
/// The fingerprint only covers the head of the source, so before resuming
/// every acknowledged chunk is read again and its MAC compared with the one
/// recorded. Leaves the source positioned at the start.
pub(crate) async fn acknowledged_prefix_matches<R>(
    source: &mut R,
    state: &ResumeState,
) -> Result<bool>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let Some(upload) = &state.upload else {
        return Ok(state.acknowledged.is_empty());
    };
    source.seek(SeekFrom::Start(0)).await?;
    let mut matches = true;
    for (chunk, recorded) in plan_chunks(state.size).iter().zip(&state.acknowledged) {
        let mut buf = vec![0u8; chunk.len as usize];
        if source.read_exact(&mut buf).await.is_err()
            || chunk_mac(&buf, &upload.file_key, &upload.nonce) != *recorded
        {
            debug!(chunk = chunk.index, "acknowledged chunk differs from the source");
            matches = false;
            break;
        }
    }
    source.seek(SeekFrom::Start(0)).await?;
    Ok(matches)
}

/// The storage server answers an empty body for intermediate chunks, the
/// completion token for the final one, or a negative error code.
fn parse_upload_reply(reply: &str) -> Result<Option<String>> {
    let reply = reply.trim();
    if reply.is_empty() {
        return Ok(None);
    }
    if reply.starts_with('-') {
        let code: i64 = reply.parse().map_err(|_| MegaError::InvalidResponse)?;
        return Err(ApiErrorCode::from(code).into_error(code));
    }
    Ok(Some(reply.to_string()))
}

/// Upload `source` according to `task`.
pub(crate) async fn run<R>(
    ctx: &TransferContext,
    mut task: UploadTask,
    mut source: R,
) -> Result<UploadOutcome>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    let upload = task.state.upload.clone().ok_or_else(|| {
        MegaError::InvalidArgument("upload task has no upload URL".to_string())
    })?;
    let (file_key, nonce) = (upload.file_key, upload.nonce);
    let chunks = plan_chunks(task.size);
    let total = chunks.len();
    let mut token = upload.token.clone();

    let mut start = task.state.acknowledged.len().min(total);
    if start == total && token.is_none() {
        // Completion token lost: resending the last chunk produces it again.
        start = total - 1;
    }
    task.state.acknowledged.truncate(start);
    let mut acc = MacAccumulator::with_prefix(total, &task.state.acknowledged);
    let mut bytes_done: u64 = chunks[..start].iter().map(|c| c.len).sum();
    if start > 0 {
        info!(name = %task.name, start, total, "resuming upload");
    }

    let cancel = ctx.cancel.child_token();
    let mut failure: Option<ChunkFailure> = None;

    if start < total {
        source
            .seek(SeekFrom::Start(chunks[start].offset))
            .await
            .map_err(|e| TransferError::new(&task.name, Some(start), bytes_done, e.into()))?;

        let read_cancel = cancel.clone();
        let reads = stream::unfold(
            (source, chunks[start..].to_vec().into_iter(), false),
            move |(mut source, mut pending, failed)| {
                let cancel = read_cancel.clone();
                async move {
                    if failed || cancel.is_cancelled() {
                        return None;
                    }
                    let chunk = pending.next()?;
                    let mut buf = vec![0u8; chunk.len as usize];
                    match source.read_exact(&mut buf).await {
                        Ok(()) => Some((Ok((chunk, buf)), (source, pending, false))),
                        Err(e) => Some((Err((chunk.index, MegaError::Io(e))), (source, pending, true))),
                    }
                }
            },
        );

        let url = upload.upload_url.as_str();
        let completions = reads
            .map(|read: std::result::Result<(Chunk, Vec<u8>), ChunkFailure>| {
                let cancel = cancel.clone();
                async move {
                    let (chunk, mut data) = read?;
                    let _permit = ctx
                        .pool
                        .acquire(&cancel)
                        .await
                        .map_err(|e| (chunk.index, e))?;
                    let mac = chunk_mac(&data, &file_key, &nonce);
                    aes128_ctr_apply(&mut data, &file_key, &nonce, chunk.offset);
                    let data = Bytes::from(data);
                    let reply = ctx
                        .retry
                        .run("upload chunk", &cancel, move || {
                            let data = data.clone();
                            async move {
                                let reply = ctx
                                    .transport
                                    .upload_chunk(url, chunk.offset, data)
                                    .await?;
                                parse_upload_reply(&reply)
                            }
                        })
                        .await
                        .map_err(|e| (chunk.index, e))?;
                    Ok::<_, ChunkFailure>((chunk, mac, reply))
                }
            })
            .buffer_unordered(ctx.pool.size());
        futures::pin_mut!(completions);

        while let Some(result) = completions.next().await {
            match result {
                Ok((chunk, mac, reply)) => {
                    if let Err(e) = acc.insert(chunk.index, mac) {
                        failure.get_or_insert((chunk.index, e));
                        cancel.cancel();
                        continue;
                    }
                    bytes_done += chunk.len;
                    let new_token = reply.is_some();
                    if new_token {
                        token = reply;
                    }
                    if acc.high_water_mark() > task.state.acknowledged.len() || new_token {
                        task.state.acknowledged = acc.prefix();
                        if let Some(u) = task.state.upload.as_mut() {
                            u.token = token.clone();
                        }
                        save_checkpoint(ctx, &task.state).await;
                    }
                    let progress = TransferProgress::new(bytes_done, task.size, &task.name);
                    if !ctx.progress.report(&progress) {
                        debug!(name = %task.name, "upload cancelled by progress callback");
                        cancel.cancel();
                    }
                }
                Err((_, MegaError::Cancelled)) => {}
                Err((index, e)) => {
                    warn!(name = %task.name, chunk = index, error = %e, "chunk upload failed");
                    failure.get_or_insert((index, e));
                    cancel.cancel();
                }
            }
        }
    }

    if let Some((index, e)) = failure {
        return Err(TransferError::new(&task.name, Some(index), bytes_done, e).into());
    }
    if !acc.is_complete() {
        return Err(MegaError::Cancelled);
    }
    let meta_mac = acc
        .finalize(&file_key)
        .map_err(|e| TransferError::new(&task.name, None, bytes_done, e))?;
    let token = token.ok_or_else(|| {
        TransferError::new(&task.name, None, bytes_done, MegaError::InvalidResponse)
    })?;

    Ok(UploadOutcome {
        token,
        file_key,
        nonce,
        meta_mac,
    })
}

async fn save_checkpoint(ctx: &TransferContext, state: &ResumeState) {
    if let Some(store) = &ctx.resume {
        if let Err(e) = store.save(state).await {
            warn!(error = %e, "cannot save upload checkpoint");
        }
    }
}
