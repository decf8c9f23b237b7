//! MEGA API client and types.

pub mod client;
pub mod error;
pub mod http;
pub mod transport;

pub use client::{ApiClient, ApiConfig};
pub use error::ApiErrorCode;
pub use http::HttpTransport;
pub use transport::Transport;
