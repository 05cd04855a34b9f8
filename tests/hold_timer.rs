//! Hold timer driven from outside the crate, in paused time

use curve_sniper::hold_timer::{HoldTimers, Tranche, TrancheRequest};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn timers() -> (Arc<HoldTimers>, mpsc::Sender<TrancheRequest>, mpsc::Receiver<TrancheRequest>) {
    let (tx, rx) = mpsc::channel(4);
    (Arc::new(HoldTimers::new()), tx, rx)
}

#[tokio::test(start_paused = true)]
async fn test_extend_before_first_tick_delays_first_tranche() {
    let (timers, tx, mut rx) = timers();
    let token = Pubkey::new_unique();
    let started = Instant::now();
    timers.start(token, Duration::from_millis(2_000), tx, &CancellationToken::new());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(timers.extend(&token, 750));
    assert!(timers.extend(&token, 250));

    let first = rx.recv().await.unwrap();
    assert_eq!(first.step, 0);
    assert_eq!(first.tranche, Tranche::Third);
    assert!(started.elapsed() >= Duration::from_millis(3_000));
    first.done.send(()).unwrap();

    // the extension applied to the first step only
    let second = rx.recv().await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_millis(4_000));
    assert_eq!(second.tranche, Tranche::Half);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_pending_steps() {
    let (timers, tx, mut rx) = timers();
    let token = Pubkey::new_unique();
    timers.start(token, Duration::from_secs(1), tx, &CancellationToken::new());
    assert!(timers.is_active(&token));

    assert!(timers.stop(&token));
    assert!(!timers.is_active(&token));
    assert!(!timers.extend(&token, 100));
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_restart_replaces_live_timer() {
    let (timers, tx, mut rx) = timers();
    let token = Pubkey::new_unique();
    let root = CancellationToken::new();
    let started = Instant::now();
    timers.start(token, Duration::from_secs(10), tx.clone(), &root);
    timers.start(token, Duration::from_secs(1), tx, &root);
    assert_eq!(timers.len(), 1);

    let first = rx.recv().await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    assert_eq!(first.step, 0);
}

#[tokio::test(start_paused = true)]
async fn test_parent_cancel_stops_every_timer() {
    let (timers, tx, mut rx) = timers();
    let root = CancellationToken::new();
    timers.start(Pubkey::new_unique(), Duration::from_secs(1), tx.clone(), &root);
    timers.start(Pubkey::new_unique(), Duration::from_secs(2), tx, &root);
    assert_eq!(timers.len(), 2);

    root.cancel();
    assert!(rx.recv().await.is_none());
    tokio::task::yield_now().await;
    assert!(timers.is_empty());
}
