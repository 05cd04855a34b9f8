//! Profit feedback
//!
//! Closed positions are published on a broadcast bus. Two subscribers sit on
//! it: the CSV writer and the `ProfitController`, which adjusts the global
//! position-size multiplier from the realized profit rate.

use crate::config::PolicyConfig;
use crate::metrics::metrics;
use crate::types::AtomicF64;
use chrono::{DateTime, Local};
use solana_sdk::{native_token::LAMPORTS_PER_SOL, pubkey::Pubkey};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Minimum idle time before the multiplier starts decaying
const DECAY_AFTER: Duration = Duration::from_secs(60);
/// Idle minutes for a full return to 1.0
const DECAY_FULL_MINUTES: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub closed_at: DateTime<Local>,
    pub token: Pubkey,
    /// Lamports paid for the buy
    pub cost_lamports: u64,
    /// Sell proceeds minus cost
    pub profit_lamports: i64,
}

impl ClosedPosition {
    pub fn buy_sol(&self) -> f64 {
        self.cost_lamports as f64 / LAMPORTS_PER_SOL as f64
    }

    pub fn profit_sol(&self) -> f64 {
        self.profit_lamports as f64 / LAMPORTS_PER_SOL as f64
    }

    /// Profit as a percentage of cost; `None` without a cost basis
    pub fn profit_rate_pct(&self) -> Option<f64> {
        (self.cost_lamports > 0).then(|| self.profit_lamports as f64 / self.cost_lamports as f64 * 100.0)
    }
}

/// `time,token,buy_sol,profit_sol`
impl fmt::Display for ClosedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.closed_at.format("%Y-%m-%d %H:%M:%S"),
            self.token,
            self.buy_sol(),
            self.profit_sol()
        )
    }
}

#[derive(Clone)]
pub struct ProfitBus {
    tx: broadcast::Sender<ClosedPosition>,
}

impl ProfitBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns how many subscribers saw the record
    pub fn publish(&self, record: ClosedPosition) -> usize {
        self.tx.send(record).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClosedPosition> {
        self.tx.subscribe()
    }
}

/// Append every record to `path` until cancelled
pub fn spawn_csv_writer(
    path: PathBuf,
    mut rx: broadcast::Receiver<ClosedPosition>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(path = %path.display(), "Profit writer started");
        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => break,
                record = rx.recv() => match record {
                    Ok(record) => record,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Profit writer lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            if let Err(e) = append_line(&path, &record.to_string()).await {
                warn!(error = %e, path = %path.display(), "Failed to append profit record");
            }
        }
        debug!("Profit writer stopped");
    })
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{line}\n").as_bytes()).await?;
    file.flush().await
}

/// Global buy-size multiplier plus the last amount actually invested
#[derive(Debug)]
pub struct PositionSizing {
    multiplier: AtomicF64,
    last_investment: AtomicF64,
    floor: f64,
    cap: f64,
}

impl PositionSizing {
    pub fn new(floor: f64, cap: f64) -> Self {
        Self {
            multiplier: AtomicF64::new(floor),
            last_investment: AtomicF64::default(),
            floor,
            cap,
        }
    }

    pub fn from_policy(policy: &PolicyConfig) -> Self {
        Self::new(policy.multiplier_floor, policy.multiplier_cap)
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier.load()
    }

    /// Store `value` clamped to `[floor, cap]`, returns what was stored
    pub fn set_multiplier(&self, value: f64) -> f64 {
        let value = if value.is_nan() { self.floor } else { value.clamp(self.floor, self.cap) };
        self.multiplier.store(value);
        metrics().size_multiplier.set(value);
        value
    }

    pub fn last_investment(&self) -> f64 {
        self.last_investment.load()
    }

    /// Apply the multiplier and the minimum; the result becomes the last investment
    pub fn scale(&self, base_sol: f64, min_sol: f64) -> f64 {
        let amount = (base_sol * self.multiplier()).max(min_sol);
        self.last_investment.store(amount);
        amount
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Window not yet full
    Pending,
    Reset,
    Increase(f64),
    BlockedByBigWin,
    BlockedNoInvestment,
    Hold,
}

pub struct ProfitController {
    sizing: Arc<PositionSizing>,
    window: VecDeque<f64>,
    window_size: usize,
    loss_threshold_pct: f64,
    big_win_pct: f64,
    big_win_grace: Duration,
    last_update: Instant,
    last_big_win: Option<Instant>,
}

impl ProfitController {
    pub fn new(sizing: Arc<PositionSizing>, policy: &PolicyConfig) -> Self {
        Self {
            sizing,
            window: VecDeque::with_capacity(policy.profit_window),
            window_size: policy.profit_window.max(1),
            loss_threshold_pct: policy.loss_threshold_pct,
            big_win_pct: policy.big_win_pct,
            big_win_grace: Duration::from_secs(policy.big_win_grace_secs),
            last_update: Instant::now(),
            last_big_win: None,
        }
    }

    pub fn on_closed(&mut self, record: &ClosedPosition) -> Option<Decision> {
        self.on_closed_at(record, Instant::now())
    }

    pub fn on_closed_at(&mut self, record: &ClosedPosition, now: Instant) -> Option<Decision> {
        let rate = record.profit_rate_pct()?;
        info!(token = %record.token, rate_pct = rate, "Position closed");
        if rate >= self.big_win_pct {
            self.last_big_win = Some(now);
        }

        self.window.push_back(rate);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }
        if self.window.len() < self.window_size {
            return Some(Decision::Pending);
        }

        self.decay(now);
        let decision = self.evaluate(rate, now);
        debug!(?decision, multiplier = self.sizing.multiplier(), "Profit feedback");
        Some(decision)
    }

    fn decay(&mut self, now: Instant) {
        let idle = now.saturating_duration_since(self.last_update);
        if idle <= DECAY_AFTER {
            return;
        }
        let m = self.sizing.multiplier();
        let step = (idle.as_secs_f64() / 60.0 / DECAY_FULL_MINUTES).min(1.0);
        self.sizing.set_multiplier(m + (1.0 - m) * step);
        self.last_update = now;
    }

    fn evaluate(&mut self, rate: f64, now: Instant) -> Decision {
        let m = self.sizing.multiplier();
        if rate >= 0.0 && m > 1.0 {
            self.sizing.set_multiplier(1.0);
            self.last_update = now;
            return Decision::Reset;
        }
        if rate < self.loss_threshold_pct {
            if self
                .last_big_win
                .is_some_and(|at| now.saturating_duration_since(at) < self.big_win_grace)
            {
                return Decision::BlockedByBigWin;
            }
            if self.sizing.last_investment() <= 0.0 {
                return Decision::BlockedNoInvestment;
            }
            let stored = self.sizing.set_multiplier(m * (1.0 - rate / 100.0));
            self.last_update = now;
            info!(loss_pct = -rate, multiplier = stored, "Raising position size");
            return Decision::Increase(stored);
        }
        Decision::Hold
    }

    pub async fn run(mut self, mut rx: broadcast::Receiver<ClosedPosition>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                record = rx.recv() => match record {
                    Ok(record) => {
                        self.on_closed(&record);
                    }
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Profit controller lagged"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }
}
