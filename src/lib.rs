//! # credsync
//!
//! Coordinates a group of ranks in acquiring, distributing and redeeming a
//! single credential from an external granting service:
//! - The root rank acquires the credential
//! - Its id is broadcast to every rank
//! - Every rank redeems it with bounded fixed-interval polling
//! - Every rank releases its claim
//! - The root gathers how many attempts each rank needed
//!
//! ## Architecture
//!
//! ```text
//!  rank 0 (root)            rank 1 .. n-1
//!  ─────────────            ─────────────
//!  acquire ──┐
//!            ▼
//!  ═══════ broadcast(credential) ═══════
//!  poll access               poll access
//!  release                   release
//!  ═══════ gather(attempts) ════════════
//!  histogram
//! ```
//!
//! Any fatal condition (failed acquire, exhausted or rejected redemption)
//! aborts the whole group with status `-1`.
//!
//! ## Usage
//!
//! ```bash
//! # Four ranks, rank 1 sees the credential three polls late
//! credsync simulate --ranks 4 --delays 0,3,0,0 --poll-interval 10ms
//!
//! # Label for a service return code
//! credsync describe -- -6
//! ```

pub mod common;
pub mod coordinator;
pub mod credential;
pub mod sim;
pub mod transport;

// Re-export commonly used types
pub use common::{Config, Error, Result, RetryPolicy};
pub use coordinator::{Coordinator, Histogram};
pub use credential::{describe_error, Credential, CredentialFlags, ErrorKind};
pub use transport::GroupTransport;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
