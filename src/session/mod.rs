//! Session lifecycle: login, persistence and the actor that owns the state.

mod actor;
mod auth;
pub(crate) mod core;
mod persistence;

pub use actor::SessionHandle;
pub use core::AccountInfo;
pub(crate) use core::Session;
pub use persistence::SESSION_FORMAT_VERSION;
