//! Bounded fixed-interval redemption polling
//!
//! A freshly acquired credential takes a while to become visible to every
//! rank, so `access` is retried while the service answers "not found". The
//! attempt cap bounds how long a rank can wait on a stuck service.

use crate::common::{Result, RetryPolicy};
use crate::credential::{
    Credential, CredentialClient, CredentialFlags, CredentialHandle, CredentialService, ErrorKind,
};
use serde::{Deserialize, Serialize};

/// Failed attempts a rank needed before redeeming the credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptRecord(u32);

impl AttemptRecord {
    pub const fn new(attempts: u32) -> Self {
        Self(attempts)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Poller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling { attempts: u32 },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
    /// The service rejected the credential outright
    Rejected { attempts: u32 },
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Idle | PollState::Polling { .. })
    }
}

impl std::fmt::Display for PollState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollState::Idle => write!(f, "idle"),
            PollState::Polling { attempts } => write!(f, "polling ({} failed)", attempts),
            PollState::Succeeded { attempts } => write!(f, "succeeded after {}", attempts),
            PollState::Exhausted { attempts } => write!(f, "exhausted after {}", attempts),
            PollState::Rejected { attempts } => write!(f, "rejected after {}", attempts),
        }
    }
}

/// Terminal result of a polling run
#[derive(Debug)]
pub enum PollOutcome {
    Succeeded {
        handle: CredentialHandle,
        attempts: AttemptRecord,
    },
    Exhausted {
        attempts: u32,
        last: ErrorKind,
    },
}

/// Drives redemption of one credential for one rank.
pub struct RetryPoller<'a, S> {
    client: &'a CredentialClient<S>,
    policy: RetryPolicy,
    state: PollState,
}

impl<'a, S: CredentialService> RetryPoller<'a, S> {
    pub fn new(client: &'a CredentialClient<S>, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            state: PollState::Idle,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Sleep, then try to redeem, until the credential is redeemed or the
    /// policy's attempt cap is reached.
    ///
    /// Returns `Err` for any failure other than "credential not found"; those
    /// are never retried.
    pub async fn poll(&mut self, credential: Credential) -> Result<PollOutcome> {
        let interval = self.policy.poll_interval();
        let mut attempts = 0u32;
        self.state = PollState::Polling { attempts };

        loop {
            tokio::time::sleep(interval).await;

            match self.client.access(credential, CredentialFlags::NONE) {
                Ok(handle) => {
                    self.state = PollState::Succeeded { attempts };
                    return Ok(PollOutcome::Succeeded {
                        handle,
                        attempts: AttemptRecord::new(attempts),
                    });
                }
                Err(e) if e.is_retryable() => {
                    attempts += 1;
                    let last = e.kind().unwrap_or(ErrorKind::CredentialNotFound);
                    tracing::debug!(%credential, attempts, "access not yet possible: {}", e);
                    if attempts >= self.policy.max_attempts {
                        self.state = PollState::Exhausted { attempts };
                        return Ok(PollOutcome::Exhausted { attempts, last });
                    }
                    self.state = PollState::Polling { attempts };
                }
                Err(e) => {
                    self.state = PollState::Rejected { attempts };
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::ServiceResult;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Answers "not found" `lag` times, then `then`.
    struct LaggingService {
        lag: u32,
        then: ServiceResult<u64>,
        calls: AtomicU32,
    }

    impl LaggingService {
        fn new(lag: u32, then: ServiceResult<u64>) -> Self {
            Self {
                lag,
                then,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl CredentialService for LaggingService {
        fn acquire(&self, _flags: CredentialFlags) -> ServiceResult<u32> {
            Ok(1)
        }

        fn access(&self, _credential: u32, _flags: CredentialFlags) -> ServiceResult<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.lag {
                Err(-6)
            } else {
                self.then
            }
        }

        fn release(&self, _credential: u32, _flags: CredentialFlags) -> ServiceResult<()> {
            Ok(())
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_secs(1)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_records_zero() {
        let client = CredentialClient::new(LaggingService::new(0, Ok(5)));
        let mut poller = RetryPoller::new(&client, policy(120));
        assert_eq!(poller.state(), PollState::Idle);

        let start = tokio::time::Instant::now();
        let outcome = poller.poll(Credential::new(42)).await.unwrap();
        match outcome {
            PollOutcome::Succeeded { handle, attempts } => {
                assert_eq!(attempts, AttemptRecord::new(0));
                assert_eq!(handle.credential(), Credential::new(42));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        // One interval is always slept before the first access.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
        assert_eq!(poller.state(), PollState::Succeeded { attempts: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_lag_counts_failed_attempts() {
        let client = CredentialClient::new(LaggingService::new(3, Ok(5)));
        let mut poller = RetryPoller::new(&client, policy(120));

        let outcome = poller.poll(Credential::new(7)).await.unwrap();
        assert!(matches!(
            outcome,
            PollOutcome::Succeeded { attempts, .. } if attempts.get() == 3
        ));
        assert!(poller.state().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_at_cap() {
        let service = LaggingService::new(u32::MAX, Ok(0));
        let client = CredentialClient::new(service);
        let mut poller = RetryPoller::new(&client, policy(120));

        let start = tokio::time::Instant::now();
        let outcome = poller.poll(Credential::new(7)).await.unwrap();
        assert!(matches!(
            outcome,
            PollOutcome::Exhausted {
                attempts: 120,
                last: ErrorKind::CredentialNotFound
            }
        ));
        assert_eq!(poller.state(), PollState::Exhausted { attempts: 120 });
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(120) && elapsed < Duration::from_secs(121));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_last_allowed_attempt() {
        let client = CredentialClient::new(LaggingService::new(2, Ok(1)));
        let mut poller = RetryPoller::new(&client, policy(3));

        let outcome = poller.poll(Credential::new(7)).await.unwrap();
        assert!(matches!(
            outcome,
            PollOutcome::Succeeded { attempts, .. } if attempts.get() == 2
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_definitive_rejection_is_not_retried() {
        let client = CredentialClient::new(LaggingService::new(1, Err(-9)));
        let mut poller = RetryPoller::new(&client, policy(120));

        let err = poller.poll(Credential::new(7)).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::BadOrExpiredToken));
        assert_eq!(poller.state(), PollState::Rejected { attempts: 1 });
    }
}
