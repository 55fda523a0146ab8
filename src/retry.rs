//! Retry Queue: bounded-attempt exponential-backoff dispatch for failed
//! intents. Grounded on the teacher's WS reconnect backoff shape in
//! `ingestor.rs` (doubling-with-cap) and `orchestrator.py`'s
//! `_dispatch_intent` variant routing.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::error::ExchangeError;
use crate::executor::{ExecutionOutcome, IntentExecutor};
use crate::intents::Intent;

const BASE_BACKOFF_MS: u64 = 500;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_elapsed: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, max_elapsed: Duration::from_secs(30), max_backoff: Duration::from_secs(16) }
    }
}

/// An entry re-queued after a failed dispatch, carrying the prior error
/// so the queue can decide whether it's worth retrying at all.
pub struct RetryEntry {
    pub intent: Intent,
    pub attempt: u32,
    pub prior_error: Option<ExchangeError>,
}

fn backoff_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    let exp = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(20));
    let capped = exp.min(policy.max_backoff.as_millis() as u64);
    let jitter: u64 = rand::thread_rng().gen_range(0..=250);
    Duration::from_millis(capped + jitter)
}

/// Variant-aware dispatch: matching on `Intent`'s enum variants makes a
/// missing arm a compile error, which is the structural way §4.5's
/// "mis-routing cancel to place is a bug class to prevent" requirement
/// is enforced, no `isinstance`-style runtime check can be skipped.
async fn dispatch(executor: &IntentExecutor, intent: &Intent) -> ExecutionOutcome {
    match intent {
        Intent::Cancel(c) => executor.execute_cancel(c).await,
        Intent::PlaceLimit(p) => executor.execute_place(p).await,
    }
}

/// Bounded-attempt exponential-backoff queue. Runs as a spawned task
/// draining a channel; a shutdown signal stops new dispatches while
/// letting the in-flight attempt finish (§4.5/§5 cancellation policy).
pub struct RetryQueue {
    tx: mpsc::Sender<RetryEntry>,
}

impl RetryQueue {
    /// Spawns the drain task and returns the handle used to enqueue
    /// failed intents. `on_exhausted` is called with an intent that ran
    /// out of attempts or elapsed budget, for the runner to surface via
    /// the notifier.
    pub fn spawn(
        executor: std::sync::Arc<IntentExecutor>,
        policy: RetryPolicy,
        mut shutdown: watch::Receiver<bool>,
        on_exhausted: impl Fn(Intent, ExchangeError) + Send + 'static,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<RetryEntry>(256);
        let requeue_tx = tx.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    entry = rx.recv() => {
                        let Some(entry) = entry else { break };
                        if *shutdown.borrow() {
                            break;
                        }
                        if entry.attempt >= policy.max_attempts || start.elapsed() >= policy.max_elapsed {
                            let err = entry.prior_error.unwrap_or(ExchangeError::AuthoritativeRefusal("retry budget exhausted".into()));
                            on_exhausted(entry.intent, err);
                            continue;
                        }
                        tokio::time::sleep(backoff_delay(entry.attempt, &policy)).await;
                        if *shutdown.borrow() {
                            break;
                        }
                        match dispatch(&executor, &entry.intent).await {
                            ExecutionOutcome::Placed { .. }
                            | ExecutionOutcome::Cancelled { .. }
                            | ExecutionOutcome::BenignCancelRace { .. }
                            | ExecutionOutcome::AlreadyPlaced { .. } => {}
                            ExecutionOutcome::Failed(e) if e.is_retryable() => {
                                let next = RetryEntry { intent: entry.intent, attempt: entry.attempt + 1, prior_error: Some(e) };
                                let _ = requeue_tx.send(next).await;
                            }
                            ExecutionOutcome::Failed(e) => on_exhausted(entry.intent, e),
                        }
                    }
                }
            }
        });
        Self { tx }
    }

    pub async fn enqueue(&self, intent: Intent, prior_error: Option<ExchangeError>) {
        let _ = self.tx.send(RetryEntry { intent, attempt: 1, prior_error }).await;
    }
}
