//! Runs the protocol over an in-process group
//!
//! One tokio task per rank. A group abort terminates every rank, including
//! ones still sleeping between access attempts.

use crate::common::{Config, Error, Result};
use crate::coordinator::{Coordinator, RankSummary, RunReport};
use crate::credential::CredentialService;
use crate::transport::{LocalGroup, ROOT_RANK};

/// How a rank finished
#[derive(Debug, Clone)]
pub enum RankExit {
    Completed(RankSummary),
    Aborted(i32),
}

impl RankExit {
    pub fn summary(&self) -> Option<&RankSummary> {
        match self {
            RankExit::Completed(summary) => Some(summary),
            RankExit::Aborted(_) => None,
        }
    }
}

/// Result of running the whole group
#[derive(Debug)]
pub struct GroupOutcome {
    /// 0 on success, otherwise the abort code
    pub exit_code: i32,
    /// Root's report, present only when every rank completed
    pub report: Option<RunReport>,
    /// Per-rank exits, indexed by rank
    pub ranks: Vec<RankExit>,
}

impl GroupOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run the protocol with `config.group_size` ranks, each talking to the
/// service returned by `service_for(rank)`.
pub async fn run_group<S, F>(config: &Config, service_for: F) -> Result<GroupOutcome>
where
    S: CredentialService + 'static,
    F: Fn(usize) -> S,
{
    config.validate()?;
    let group = LocalGroup::new(config.group_size)?;
    tracing::info!(
        ranks = config.group_size,
        max_attempts = config.retry.max_attempts,
        poll_interval_ms = config.retry.poll_interval_ms,
        "starting group"
    );

    let mut handles = Vec::with_capacity(config.group_size);
    for rank in 0..config.group_size {
        let coordinator = Coordinator::new(service_for(rank), group.endpoint(rank)?, config);
        let group = group.clone();
        handles.push(tokio::spawn(async move {
            tokio::select! {
                biased;
                result = coordinator.run() => match result {
                    Ok(summary) => RankExit::Completed(summary),
                    Err(Error::Aborted { code, .. }) => RankExit::Aborted(code),
                    Err(e) => {
                        tracing::error!(rank, "rank failed outside the protocol: {}", e);
                        RankExit::Aborted(crate::transport::ABORT_CODE)
                    }
                },
                code = group.aborted() => RankExit::Aborted(code),
            }
        }));
    }

    let mut ranks = Vec::with_capacity(handles.len());
    for handle in handles {
        let exit = handle
            .await
            .map_err(|e| Error::Internal(format!("rank task failed: {}", e)))?;
        ranks.push(exit);
    }

    // A rank may finish its side of the gather before another rank aborts;
    // once the group is aborted no rank counts as completed.
    if let Some(code) = group.abort_code() {
        for exit in ranks.iter_mut() {
            if let RankExit::Completed(summary) = exit {
                tracing::debug!(
                    rank = summary.rank,
                    code,
                    "rank completed before the group aborted"
                );
                *exit = RankExit::Aborted(code);
            }
        }
    }

    let exit_code = group
        .abort_code()
        .or_else(|| {
            ranks.iter().find_map(|exit| match exit {
                RankExit::Aborted(code) => Some(*code),
                RankExit::Completed(_) => None,
            })
        })
        .unwrap_or(0);
    let report = if exit_code == 0 {
        ranks
            .get(ROOT_RANK)
            .and_then(RankExit::summary)
            .and_then(|summary| summary.report.clone())
    } else {
        None
    };

    if exit_code == 0 {
        tracing::info!("group completed");
    } else {
        tracing::error!(exit_code, "group aborted");
    }

    Ok(GroupOutcome {
        exit_code,
        report,
        ranks,
    })
}
