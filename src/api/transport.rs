//! Boundary between the client core and the remote service.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Raw request/response channel to the MEGA service.
///
/// Implementations report connectivity problems and timeouts as
/// [`crate::MegaError::Network`], throttling as
/// [`crate::MegaError::RateLimited`] and other HTTP failures as
/// [`crate::MegaError::Http`]. API-level error codes inside a successful
/// response body are interpreted by [`super::ApiClient`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON command batch. `query` is the URL query string
    /// (`id=...&sid=...`); the response body is returned verbatim.
    async fn post_command(&self, query: &str, body: String) -> Result<String>;

    /// POST one encrypted chunk to `{upload_url}/{offset}`. The response body
    /// is empty, a negative error code, or the completion token once the
    /// service holds the whole file.
    async fn upload_chunk(&self, upload_url: &str, offset: u64, data: Bytes) -> Result<String>;

    /// GET bytes `[start, end)` of an encrypted file.
    async fn download_range(&self, download_url: &str, start: u64, end: u64) -> Result<Bytes>;

    /// POST an encrypted file attribute (thumbnail) and return the raw
    /// attribute handle the storage server answers with.
    async fn upload_file_attribute(&self, upload_url: &str, data: Bytes) -> Result<Bytes>;
}
