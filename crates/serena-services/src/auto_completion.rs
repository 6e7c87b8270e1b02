//! Auto-completion scheduler
//!
//! Therapists forget to confirm sessions. A periodic sweep finds sessions
//! still `confirmed` whose scheduled end passed the grace window and drives
//! them through the same completion path as a manual confirmation, flagged
//! as system-initiated for audit.
//!
//! One session's failure (say, a transient gateway error during capture)
//! never aborts the rest of the batch: failures are collected per session
//! and reported, not thrown.

use chrono::{DateTime, Duration, Utc};
use serena_core::{
    config::SettlementConfig,
    traits::{PaymentRepository, ProcessedEventRepository, SessionRepository},
    AppResult,
};
use serena_gateway::PaymentGateway;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::settlement::{CompletionActor, CompletionOutcome, SettlementProcessor};

/// One session the sweep could not complete
#[derive(Debug, Clone)]
pub struct SweepFailure {
    pub session_id: Uuid,
    pub error: String,
}

/// Outcome of one sweep tick
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Eligible sessions examined
    pub processed: usize,
    /// Sessions actually completed
    pub completed: usize,
    /// Per-session failures; the batch continued past each of them
    pub errors: Vec<SweepFailure>,
}

/// Auto-completion scheduler
pub struct AutoCompletionScheduler<G, S, P, E> {
    settlement: Arc<SettlementProcessor<G, S, P, E>>,
    sessions: Arc<S>,
    grace: Duration,
    interval_secs: u64,
    batch_size: i64,
}

impl<G, S, P, E> AutoCompletionScheduler<G, S, P, E>
where
    G: PaymentGateway,
    S: SessionRepository,
    P: PaymentRepository,
    E: ProcessedEventRepository,
{
    /// Create a new scheduler
    pub fn new(
        settlement: Arc<SettlementProcessor<G, S, P, E>>,
        sessions: Arc<S>,
        config: &SettlementConfig,
    ) -> Self {
        Self {
            settlement,
            sessions,
            grace: Duration::hours(config.auto_complete_grace_hours),
            interval_secs: config.sweep_interval_secs,
            batch_size: config.sweep_batch_size,
        }
    }

    /// Eligibility cutoff for a sweep at instant `now`
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.grace
    }

    /// Run one sweep over sessions eligible at instant `now`.
    ///
    /// Failures are isolated per session; the returned report carries them
    /// all for operational follow-up.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> AppResult<SweepReport> {
        let cutoff = self.cutoff(now);
        let eligible = self
            .sessions
            .find_auto_completable(cutoff, self.batch_size)
            .await?;

        let mut report = SweepReport::default();

        for session in eligible {
            report.processed += 1;

            match self
                .settlement
                .complete_session(session.id, CompletionActor::System)
                .await
            {
                Ok(CompletionOutcome::Completed { payout_cents }) => {
                    report.completed += 1;
                    info!(
                        "Auto-completed session {} (payout {} cents)",
                        session.id, payout_cents
                    );
                }
                Ok(CompletionOutcome::Denied(denial)) => {
                    // Raced by a manual completion or a webhook; nothing to do.
                    debug!(
                        "Auto-completion of session {} denied: {}",
                        session.id,
                        denial.reason()
                    );
                }
                Err(e) => {
                    warn!("Auto-completion of session {} failed: {}", session.id, e);
                    report.errors.push(SweepFailure {
                        session_id: session.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if !report.errors.is_empty() {
            warn!(
                "Sweep finished with {} failures out of {} sessions",
                report.errors.len(),
                report.processed
            );
        }

        Ok(report)
    }

    /// Loop forever, sweeping on the configured interval.
    ///
    /// Spawned as a background task from the server entry point.
    pub async fn run(self: Arc<Self>) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            "Auto-completion scheduler running every {}s (grace {}h)",
            self.interval_secs,
            self.grace.num_hours()
        );

        loop {
            ticker.tick().await;

            match self.sweep(Utc::now()).await {
                Ok(report) => {
                    if report.processed > 0 {
                        info!(
                            "Sweep processed {} sessions, completed {}, {} errors",
                            report.processed,
                            report.completed,
                            report.errors.len()
                        );
                    }
                }
                Err(e) => {
                    // Eligibility query failed; next tick retries.
                    error!("Sweep aborted: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff_is_grace_behind_now() {
        // The cutoff math mirrors the eligibility query: end_time <= cutoff.
        let now = Utc::now();
        let grace = Duration::hours(24);
        let cutoff = now - grace;

        // Ended 24h + 1s ago: end_time <= cutoff holds
        assert!(now - grace - Duration::seconds(1) <= cutoff);
        // Ended 23h ago: not eligible
        assert!(!(now - Duration::hours(23) <= cutoff));
        // Exactly at the boundary: eligible
        assert!(now - grace <= cutoff);
    }

    #[test]
    fn test_sweep_report_default_is_empty() {
        let report = SweepReport::default();
        assert_eq!(report.processed, 0);
        assert_eq!(report.completed, 0);
        assert!(report.errors.is_empty());
    }
}
