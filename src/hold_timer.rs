//! Staged exit scheduler
//!
//! A hold timer walks three steps. When a step expires it asks the session
//! to sell one tranche and waits for that sell to finish before arming the
//! next step, so tranches never overlap. Each later step runs for half the
//! nominal duration of the one before it.
//!
//! While a step is pending its deadline can be moved by a signed delta; the
//! change applies to the current step only. At most one timer exists per
//! token: starting another replaces it.

use crate::metrics::metrics;
use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const STEPS: usize = 3;

/// Portion of the remaining position sold when a step expires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tranche {
    /// One third of what remains
    Third,
    /// Half of what remains
    Half,
    /// Everything
    All,
}

impl Tranche {
    pub fn for_step(step: usize) -> Self {
        match step {
            0 => Self::Third,
            1 => Self::Half,
            _ => Self::All,
        }
    }

    pub fn amount(&self, remaining: u64) -> u64 {
        match self {
            Self::Third => remaining / 3,
            Self::Half => remaining / 2,
            Self::All => remaining,
        }
    }
}

/// Sent to the session when a step expires; dropping `done` also counts as done
#[derive(Debug)]
pub struct TrancheRequest {
    pub token: Pubkey,
    pub step: usize,
    pub tranche: Tranche,
    pub done: oneshot::Sender<()>,
}

struct TimerEntry {
    id: u64,
    extend_tx: mpsc::UnboundedSender<i64>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct HoldTimers {
    timers: DashMap<Pubkey, TimerEntry>,
    next_id: AtomicU64,
}

impl HoldTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the staged exit for `token`, replacing any live timer for it
    pub fn start(
        self: &Arc<Self>,
        token: Pubkey,
        first_step: Duration,
        sink: mpsc::Sender<TrancheRequest>,
        parent: &CancellationToken,
    ) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = parent.child_token();
        let (extend_tx, extend_rx) = mpsc::unbounded_channel();

        if let Some(previous) = self.timers.insert(
            token,
            TimerEntry {
                id,
                extend_tx,
                cancel: cancel.clone(),
            },
        ) {
            debug!(token = %token, "Replacing live hold timer");
            previous.cancel.cancel();
        }
        metrics().active_hold_timers.set(self.timers.len() as i64);
        info!(token = %token, first_step_ms = first_step.as_millis() as u64, "Hold timer started");

        let timers = Arc::clone(self);
        tokio::spawn(async move {
            run_steps(token, first_step, sink, extend_rx, cancel).await;
            timers.timers.remove_if(&token, |_, entry| entry.id == id);
            metrics().active_hold_timers.set(timers.timers.len() as i64);
        });
    }

    /// Move the current step's deadline by `delta_ms`; false when no timer is live
    pub fn extend(&self, token: &Pubkey, delta_ms: i64) -> bool {
        self.timers
            .get(token)
            .map(|entry| entry.extend_tx.send(delta_ms).is_ok())
            .unwrap_or(false)
    }

    /// Cancel every pending step for `token`
    pub fn stop(&self, token: &Pubkey) -> bool {
        match self.timers.remove(token) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                metrics().active_hold_timers.set(self.timers.len() as i64);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, token: &Pubkey) -> bool {
        self.timers.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

fn shift(deadline: Instant, delta_ms: i64) -> Instant {
    let delta = Duration::from_millis(delta_ms.unsigned_abs());
    let moved = if delta_ms >= 0 {
        deadline.checked_add(delta).unwrap_or(deadline)
    } else {
        deadline.checked_sub(delta).unwrap_or(deadline)
    };
    moved.max(Instant::now())
}

async fn run_steps(
    token: Pubkey,
    first_step: Duration,
    sink: mpsc::Sender<TrancheRequest>,
    mut extend_rx: mpsc::UnboundedReceiver<i64>,
    cancel: CancellationToken,
) {
    let mut nominal = first_step;
    let mut deadline = Instant::now() + nominal;

    for step in 0..STEPS {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(token = %token, step, "Hold timer stopped");
                    return;
                }
                Some(delta_ms) = extend_rx.recv() => {
                    deadline = shift(deadline, delta_ms);
                    debug!(token = %token, step, delta_ms, "Hold step adjusted");
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        let tranche = Tranche::for_step(step);
        let (done, done_rx) = oneshot::channel();
        let request = TrancheRequest {
            token,
            step,
            tranche,
            done,
        };
        info!(token = %token, step = step + 1, ?tranche, "Hold step expired");
        if sink.send(request).await.is_err() {
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = done_rx => {}
        }
        // extensions aimed at a step that already fired are dropped
        while extend_rx.try_recv().is_ok() {}

        nominal /= 2;
        deadline = Instant::now() + nominal;
    }
    info!(token = %token, "Hold timer finished all steps");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (
        Arc<HoldTimers>,
        mpsc::Sender<TrancheRequest>,
        mpsc::Receiver<TrancheRequest>,
        CancellationToken,
    ) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(HoldTimers::new()), tx, rx, CancellationToken::new())
    }

    #[test]
    fn test_tranche_amounts() {
        assert_eq!(Tranche::for_step(0).amount(900), 300);
        assert_eq!(Tranche::for_step(1).amount(600), 300);
        assert_eq!(Tranche::for_step(2).amount(300), 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_fire_sequentially_with_halving() {
        let (timers, tx, mut rx, root) = setup();
        let token = Pubkey::new_unique();
        let started = Instant::now();
        timers.start(token, Duration::from_millis(800), tx, &root);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.tranche, Tranche::Third);
        assert_eq!(started.elapsed(), Duration::from_millis(800));
        first.done.send(()).unwrap();

        let second = rx.recv().await.unwrap();
        assert_eq!(second.tranche, Tranche::Half);
        assert_eq!(started.elapsed(), Duration::from_millis(1200));
        drop(second.done);

        let third = rx.recv().await.unwrap();
        assert_eq!(third.tranche, Tranche::All);
        assert_eq!(started.elapsed(), Duration::from_millis(1400));
        third.done.send(()).unwrap();

        assert!(rx.recv().await.is_none());
        assert!(!timers.is_active(&token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_step_waits_for_tranche_completion() {
        let (timers, tx, mut rx, root) = setup();
        let token = Pubkey::new_unique();
        let started = Instant::now();
        timers.start(token, Duration::from_millis(100), tx, &root);

        let first = rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        first.done.send(()).unwrap();
        let second = rx.recv().await.unwrap();
        // 100ms step, 1s sell, then a 50ms step
        assert_eq!(started.elapsed(), Duration::from_millis(1_150));
        assert_eq!(second.step, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_before_first_tick() {
        let (timers, tx, mut rx, root) = setup();
        let token = Pubkey::new_unique();
        let started = Instant::now();
        timers.start(token, Duration::from_millis(1_000), tx, &root);
        assert!(timers.extend(&token, 500));

        let first = rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1_500));
        assert_eq!(first.step, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_delta_never_before_now() {
        let (timers, tx, mut rx, root) = setup();
        let token = Pubkey::new_unique();
        let started = Instant::now();
        timers.start(token, Duration::from_millis(1_000), tx, &root);
        assert!(timers.extend(&token, -400));
        rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(600));

        let (timers, tx, mut rx, root) = setup();
        let started = Instant::now();
        timers.start(token, Duration::from_millis(100), tx, &root);
        timers.extend(&token, -10_000);
        rx.recv().await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_steps() {
        let (timers, tx, mut rx, root) = setup();
        let token = Pubkey::new_unique();
        timers.start(token, Duration::from_millis(500), tx, &root);
        assert!(timers.stop(&token));
        assert!(!timers.is_active(&token));
        assert!(rx.recv().await.is_none());
        assert!(!timers.extend(&token, 10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_existing_timer() {
        let (timers, first_tx, mut first_rx, root) = setup();
        let (second_tx, mut second_rx) = mpsc::channel(8);
        let token = Pubkey::new_unique();
        timers.start(token, Duration::from_millis(500), first_tx, &root);
        timers.start(token, Duration::from_millis(50), second_tx, &root);
        assert_eq!(timers.len(), 1);

        assert!(first_rx.recv().await.is_none());
        let request = second_rx.recv().await.unwrap();
        assert_eq!(request.step, 0);
        assert!(timers.is_active(&token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_reaches_timer() {
        let (timers, tx, mut rx, root) = setup();
        timers.start(Pubkey::new_unique(), Duration::from_secs(5), tx, &root);
        root.cancel();
        assert!(rx.recv().await.is_none());
    }
}
