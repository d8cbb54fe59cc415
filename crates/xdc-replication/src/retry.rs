//! Long-running retry loop used by the intention migration routines.

use crate::cancel::CancellationToken;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use xdc_core::RetryPolicy;

/// What a successful iteration asks of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    /// Run another iteration after the pacing interval
    Continue,
    /// Leave the loop
    Done,
}

/// Run `work` until it returns [`LoopControl::Done`] or `cancel` fires.
///
/// Iterations are spaced at least `pace` apart. Each error is handed to
/// `on_error` and followed by a backoff from `policy`; the consecutive failure
/// count resets after any success. Every wait races cancellation.
pub async fn retry_loop_backoff<W, Fut, E, H>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    pace: Duration,
    mut work: W,
    mut on_error: H,
) where
    W: FnMut() -> Fut,
    Fut: Future<Output = Result<LoopControl, E>>,
    H: FnMut(&E),
{
    let mut pacer = interval(pace.max(Duration::from_nanos(1)));
    pacer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = pacer.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = work() => result,
        };

        match result {
            Ok(LoopControl::Done) => return,
            Ok(LoopControl::Continue) => failures = 0,
            Err(e) => {
                failures = failures.saturating_add(1);
                on_error(&e);
                if !cancel.sleep(policy.delay_for_failures(failures)).await {
                    return;
                }
            }
        }
    }
}
