//! S3-compatible object storage
//!
//! Requests are signed with AWS Signature Version 4, implemented in-tree on top
//! of `hmac` and `sha2`.

pub mod client;
pub mod provider;
pub mod signer;

pub use client::Client;
pub use provider::S3Storage;
pub use signer::{Credentials, Signer};
