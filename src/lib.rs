//! # megacore
//!
//! Client library for MEGA cloud storage.
//!
//! ## Features
//!
//! - **Authentication**: email/password login (v1 and v2 key derivation),
//!   optional HTTP/SOCKS proxy, logout.
//! - **Sessions**: save a session to a versioned blob and resume it later
//!   without logging in again; the master key can be wrapped under a local key.
//! - **Filesystem**: path-based `list`, `stat`, `mkdir`, `rename`, `mv` and
//!   `rm` over an immutable, versioned snapshot of the node tree.
//! - **Transfers**: chunked uploads and downloads with per-chunk integrity
//!   checks, a shared worker pool, retries, progress callbacks, cancellation
//!   and checkpoints that survive a restart.
//! - **Links**: export files and folders, and read them back without an
//!   account through [`public`].
//!
//! All mutations go through a single task owned by [`SessionHandle`]. Reads
//! work on the latest published snapshot and never wait behind a transfer.
//! Call [`SessionHandle::refresh`] after login and whenever other clients may
//! have changed the account.
//!
//! ## Example
//!
//! ```no_run
//! use megacore::SessionHandle;
//!
//! # async fn example() -> megacore::Result<()> {
//! let session = SessionHandle::login("user@example.com", "password", None).await?;
//! session.refresh().await?;
//!
//! for node in session.list("/Root", false)? {
//!     println!("{} ({} bytes)", node.display_name(), node.size);
//! }
//!
//! session.upload_file("notes.txt", "/Root").await?;
//! session.download_to_file("/Root/notes.txt", "notes-copy.txt").await?;
//! let link = session.export("/Root/notes.txt").await?;
//! println!("{}", link);
//!
//! std::fs::write("session.bin", session.save().await?)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Example: public links
//!
//! ```no_run
//! # async fn example() -> megacore::Result<()> {
//! let mut data = Vec::new();
//! let file = megacore::public::download_public_file(
//!     "https://mega.nz/file/AbCdEfGh#key",
//!     &mut data,
//! )
//! .await?;
//! println!("{}: {} bytes", file.name, data.len());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod base64;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod link;
pub mod preview;
pub mod progress;
pub mod public;
pub mod session;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{HttpTransport, Transport};
pub use error::{AuthError, LinkError, MegaError, PersistenceError, Result, TransferError};
pub use fs::{AccessLevel, Contact, ContactState, FileSystemTree, Node, NodeType, Quota};
pub use link::{LinkKind, PublicLink};
pub use progress::{ProgressCallback, TransferProgress};
pub use public::{PublicFile, PublicFolder};
pub use session::{AccountInfo, SessionHandle, SESSION_FORMAT_VERSION};
pub use transfer::{RetryPolicy, TransferConfig};
