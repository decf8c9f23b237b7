//! Cryptographic operations for the MEGA protocol.

pub mod aes;
pub mod attributes;
pub mod auth;
pub mod keys;
pub mod mac;
pub mod random;
pub mod rsa;

pub use aes::*;
pub use attributes::{decrypt_attributes, encrypt_attributes, NodeAttributes};
pub use auth::*;
pub use keys::*;
pub use mac::*;
pub use random::*;
pub use rsa::{MegaRsaKey, RsaPublicKey};
