//! Group-wide credential protocol
//!
//! Every rank runs the same sequence so the collectives line up:
//! acquire (root only), broadcast, poll-redeem, release, gather, and on the
//! root, aggregate. Any fatal condition aborts the whole group.

use super::histogram::Histogram;
use super::poll::{AttemptRecord, PollOutcome, RetryPoller};
use crate::common::{Config, Error, Result, RetryPolicy};
use crate::credential::{
    describe_error, Credential, CredentialClient, CredentialFlags, CredentialService,
};
use crate::transport::{GroupTransport, ABORT_CODE, ROOT_RANK};
use serde::Serialize;
use tracing::Instrument;

/// Root-only summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub credential: Credential,
    pub group_size: usize,
    pub histogram: Histogram,
}

/// What one rank observed in a completed run
#[derive(Debug, Clone)]
pub struct RankSummary {
    pub rank: usize,
    pub credential: Credential,
    pub attempts: AttemptRecord,
    /// Present on the root only
    pub report: Option<RunReport>,
}

/// Runs the protocol for one rank.
pub struct Coordinator<S, T> {
    client: CredentialClient<S>,
    transport: T,
    policy: RetryPolicy,
    acquire_flags: CredentialFlags,
}

impl<S: CredentialService, T: GroupTransport> Coordinator<S, T> {
    pub fn new(service: S, transport: T, config: &Config) -> Self {
        Self {
            client: CredentialClient::new(service),
            transport,
            policy: config.retry,
            acquire_flags: config.acquire_flags,
        }
    }

    /// Run to completion. Every error returned is a group abort: a local
    /// failure aborts the group before being returned.
    pub async fn run(&self) -> Result<RankSummary> {
        let rank = self.transport.rank();
        let span = tracing::info_span!("rank", rank);

        match self.execute(rank).instrument(span.clone()).await {
            Err(e) if !e.is_abort() => Err(span.in_scope(|| self.abort(e))),
            other => other,
        }
    }

    async fn execute(&self, rank: usize) -> Result<RankSummary> {
        let size = self.transport.size();

        let mut wire = [0u8; Credential::WIRE_SIZE];
        if rank == ROOT_RANK {
            let credential = self.client.acquire(self.acquire_flags).inspect_err(|e| {
                tracing::error!("could not acquire credential: {}", self.explain(e));
            })?;
            tracing::info!(%credential, "acquired credential id {}", credential);
            wire = credential.to_wire();
        }

        self.transport.broadcast(&mut wire, ROOT_RANK).await?;
        let credential = Credential::from_wire(wire);

        let mut poller = RetryPoller::new(&self.client, self.policy);
        let (handle, attempts) = match poller.poll(credential).await {
            Ok(PollOutcome::Succeeded { handle, attempts }) => (handle, attempts),
            Ok(PollOutcome::Exhausted { attempts, last }) => {
                let e = Error::RetryExhausted {
                    credential,
                    attempts,
                    last,
                };
                tracing::error!(%credential, "access failed: {}", self.explain(&e));
                return Err(e);
            }
            Err(e) => {
                tracing::error!(%credential, "access failed: {}", self.explain(&e));
                return Err(e);
            }
        };
        tracing::info!(%credential, %attempts, "redeemed credential");

        if let Err(e) = self.client.release(handle, CredentialFlags::NONE) {
            tracing::warn!(%credential, "release failed: {}", self.explain(&e));
        }

        let gathered = self.transport.gather(attempts.get(), ROOT_RANK).await?;
        let report = match gathered {
            Some(values) => {
                let records: Vec<AttemptRecord> =
                    values.into_iter().map(AttemptRecord::new).collect();
                let histogram = Histogram::aggregate(&records, self.policy.max_attempts, size)?;
                Some(RunReport {
                    credential,
                    group_size: size,
                    histogram,
                })
            }
            None => None,
        };

        Ok(RankSummary {
            rank,
            credential,
            attempts,
            report,
        })
    }

    fn abort(&self, cause: Error) -> Error {
        self.transport.abort(ABORT_CODE);
        Error::Aborted {
            code: ABORT_CODE,
            reason: cause.to_string(),
        }
    }

    fn explain(&self, e: &Error) -> String {
        match e {
            Error::Service { code, .. } => {
                format!("{} : {}", code, self.client.describe_error(*code))
            }
            Error::RetryExhausted { last, .. } => match last.code() {
                Some(code) => format!("{} ({})", e, describe_error(code)),
                None => e.to_string(),
            },
            _ => e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::ServiceResult;
    use crate::transport::LocalGroup;
    use std::time::Duration;

    struct FixedService {
        acquire: ServiceResult<u32>,
        access: ServiceResult<u64>,
        release: ServiceResult<()>,
    }

    impl CredentialService for FixedService {
        fn acquire(&self, _flags: CredentialFlags) -> ServiceResult<u32> {
            self.acquire
        }

        fn access(&self, _credential: u32, _flags: CredentialFlags) -> ServiceResult<u64> {
            self.access
        }

        fn release(&self, _credential: u32, _flags: CredentialFlags) -> ServiceResult<()> {
            self.release
        }
    }

    fn config() -> Config {
        Config {
            group_size: 1,
            retry: RetryPolicy::new(5, Duration::from_millis(10)).unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_rank_run() {
        let group = LocalGroup::new(1).unwrap();
        let service = FixedService {
            acquire: Ok(42),
            access: Ok(1),
            release: Err(-8),
        };
        let coordinator = Coordinator::new(service, group.endpoint(0).unwrap(), &config());

        let summary = coordinator.run().await.unwrap();
        assert_eq!(summary.credential, Credential::new(42));
        assert_eq!(summary.attempts, AttemptRecord::new(0));
        let report = summary.report.unwrap();
        assert_eq!(report.histogram.nonzero().collect::<Vec<_>>(), vec![(0, 1)]);
        assert_eq!(group.abort_code(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_aborts_group() {
        let group = LocalGroup::new(1).unwrap();
        let service = FixedService {
            acquire: Ok(42),
            access: Err(-2),
            release: Ok(()),
        };
        let coordinator = Coordinator::new(service, group.endpoint(0).unwrap(), &config());

        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, Error::Aborted { code: -1, .. }));
        assert_eq!(group.abort_code(), Some(-1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_aborts_group() {
        let group = LocalGroup::new(1).unwrap();
        let service = FixedService {
            acquire: Ok(42),
            access: Err(-6),
            release: Ok(()),
        };
        let coordinator = Coordinator::new(service, group.endpoint(0).unwrap(), &config());

        let err = coordinator.run().await.unwrap_err();
        match err {
            Error::Aborted { code, reason } => {
                assert_eq!(code, -1);
                assert!(reason.contains("after 5 attempts"), "{}", reason);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
