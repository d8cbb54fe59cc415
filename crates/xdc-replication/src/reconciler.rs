//! Rate-limited application of diff results through the consensus log.
//!
//! Every commit after the first waits for the next tick of an interval of
//! `1s / apply_limit`, racing cancellation. A cancelled run reports
//! [`ReconcileOutcome::Aborted`] instead of an error so a leadership loss is
//! never logged as a replication failure.

use crate::cancel::CancellationToken;
use crate::collaborators::CommitLog;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use xdc_core::{ApplyErrors, CommitRequest};

/// How a reconcile run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Every item was committed
    Completed {
        /// Commits issued
        applied: usize,
    },
    /// Cancellation was observed before every item was committed
    Aborted {
        /// Commits issued before stopping
        applied: usize,
    },
}

impl ReconcileOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self, ReconcileOutcome::Aborted { .. })
    }
}

/// Throttled committer shared by every replication routine of a term.
#[derive(Clone)]
pub struct Reconciler {
    commit: Arc<dyn CommitLog>,
    apply_interval: Duration,
}

impl Reconciler {
    pub fn new(commit: Arc<dyn CommitLog>, apply_interval: Duration) -> Self {
        Self {
            commit,
            // tokio intervals reject a zero period
            apply_interval: apply_interval.max(Duration::from_nanos(1)),
        }
    }

    /// Commit one request per record.
    pub async fn reconcile<T, F>(
        &self,
        cancel: &CancellationToken,
        records: Vec<T>,
        to_request: F,
    ) -> Result<ReconcileOutcome, ApplyErrors>
    where
        F: FnMut(T) -> CommitRequest,
    {
        self.apply_batches(cancel, records, to_request).await
    }

    /// Commit one request per batch, with the same throttling as
    /// [`Reconciler::reconcile`].
    ///
    /// Failed commits are collected and the remaining batches still go out.
    pub async fn apply_batches<B, F>(
        &self,
        cancel: &CancellationToken,
        batches: Vec<B>,
        mut to_request: F,
    ) -> Result<ReconcileOutcome, ApplyErrors>
    where
        F: FnMut(B) -> CommitRequest,
    {
        let total = batches.len();
        let mut ticker = interval(self.apply_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        let mut errors = ApplyErrors::new();
        let mut applied = 0;

        for (i, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(ReconcileOutcome::Aborted { applied });
            }

            let request = to_request(batch);
            let request_type = request.request_type();
            match self.commit.apply(request).await {
                Ok(index) => {
                    tracing::trace!(request_type, index, "replication commit applied");
                }
                Err(e) => {
                    tracing::debug!(request_type, error = %e, "replication commit failed");
                    errors.push(e);
                }
            }
            applied += 1;

            if i + 1 < total {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(ReconcileOutcome::Aborted { applied }),
                    _ = ticker.tick() => {}
                }
            }
        }

        errors.into_result()?;
        Ok(ReconcileOutcome::Completed { applied })
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("apply_interval", &self.apply_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationSource;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use xdc_core::CommitError;

    #[derive(Default)]
    struct RecordingLog {
        applied: Mutex<Vec<(tokio::time::Instant, CommitRequest)>>,
        reject_type: Option<&'static str>,
    }

    #[async_trait]
    impl CommitLog for RecordingLog {
        async fn apply(&self, request: CommitRequest) -> Result<u64, CommitError> {
            if self.reject_type == Some(request.request_type()) {
                return Err(CommitError::rejected(request.request_type(), "rejected"));
            }
            let mut applied = self.applied.lock();
            applied.push((tokio::time::Instant::now(), request));
            Ok(applied.len() as u64)
        }
    }

    fn delete(id: &str) -> CommitRequest {
        CommitRequest::AclPolicyDelete(vec![id.to_string()])
    }

    #[tokio::test(start_paused = true)]
    async fn commits_are_spaced_by_apply_interval() {
        let log = Arc::new(RecordingLog::default());
        let reconciler = Reconciler::new(log.clone(), Duration::from_millis(100));

        let outcome = reconciler
            .reconcile(&CancellationToken::never(), vec!["a", "b", "c"], delete)
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Completed { applied: 3 });
        let applied = log.applied.lock();
        for pair in applied.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_is_aborted_not_failed() {
        let log = Arc::new(RecordingLog::default());
        let reconciler = Reconciler::new(log.clone(), Duration::from_secs(10));
        let source = CancellationSource::new();
        let token = source.token();

        let handle = tokio::spawn({
            let reconciler = reconciler.clone();
            async move { reconciler.reconcile(&token, vec!["a", "b", "c"], delete).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        source.cancel();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, ReconcileOutcome::Aborted { applied: 1 });
        assert_eq!(log.applied.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_collected() {
        let log = Arc::new(RecordingLog {
            reject_type: Some("ACLPolicyDelete"),
            ..Default::default()
        });
        let reconciler = Reconciler::new(log, Duration::from_millis(1));

        let errors = reconciler
            .reconcile(&CancellationToken::never(), vec!["a", "b"], delete)
            .await
            .unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
