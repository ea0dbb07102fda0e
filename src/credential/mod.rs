//! Credential service client
//!
//! Thin typed layer over the external granting service: acquire, access
//! (redeem), release and error description.

pub mod client;
pub mod codes;

pub use client::{CredentialClient, CredentialHandle, CredentialService, ServiceResult};
pub use codes::{describe_error, Credential, CredentialFlags, ErrorKind};
