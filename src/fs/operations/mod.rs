//! Session operations on the remote filesystem, one concern per module.

mod browse;
mod dir_ops;
pub(crate) mod download;
mod export;
mod quota;
mod share;
mod tree;
pub(crate) mod upload;
