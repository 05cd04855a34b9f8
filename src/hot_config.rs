//! Hot-reloaded strategy files
//!
//! Four YAML files are read into one immutable `HotSnapshot`. Readers load
//! the current snapshot through `ArcSwap` and never block; the reloader
//! swaps in a new snapshot when any file's modification time changes. A
//! file that fails to parse leaves the previous snapshot in place.

use crate::config::{ConfigError, HotConfigPaths};
use arc_swap::ArcSwap;
use chrono::Timelike;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-hour strategy knobs. Amounts are SOL, durations milliseconds,
/// slippage percent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    pub max_buy_amount: f64,
    pub min_buy_amount: f64,
    pub max_hold_millisecond: u64,
    pub min_hold_millisecond: u64,
    pub buy_slippage: f64,
    pub sell_slippage: f64,
    pub delay_millisecond: u64,
    pub mint_start: bool,
    pub smart_start: bool,
}

impl StrategyParams {
    /// Overlay `hourly` on top of `self`: non-zero numbers win, flags only
    /// ever switch on
    fn merged_with(&self, hourly: &StrategyParams) -> StrategyParams {
        fn pick<T: PartialEq + Default + Copy>(base: T, over: T) -> T {
            if over != T::default() {
                over
            } else {
                base
            }
        }
        StrategyParams {
            max_buy_amount: pick(self.max_buy_amount, hourly.max_buy_amount),
            min_buy_amount: pick(self.min_buy_amount, hourly.min_buy_amount),
            max_hold_millisecond: pick(self.max_hold_millisecond, hourly.max_hold_millisecond),
            min_hold_millisecond: pick(self.min_hold_millisecond, hourly.min_hold_millisecond),
            buy_slippage: pick(self.buy_slippage, hourly.buy_slippage),
            sell_slippage: pick(self.sell_slippage, hourly.sell_slippage),
            delay_millisecond: pick(self.delay_millisecond, hourly.delay_millisecond),
            mint_start: self.mint_start || hourly.mint_start,
            smart_start: self.smart_start || hourly.smart_start,
        }
    }

    pub fn min_hold(&self) -> Duration {
        Duration::from_millis(self.min_hold_millisecond)
    }

    pub fn max_hold(&self) -> Duration {
        Duration::from_millis(self.max_hold_millisecond)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_millisecond)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub default: StrategyParams,
    /// Keyed "0".."23"
    pub hourly: HashMap<String, StrategyParams>,
}

impl StrategyConfig {
    pub fn params_for_hour(&self, hour: u32) -> StrategyParams {
        match self.hourly.get(&hour.to_string()) {
            Some(over) => self.default.merged_with(over),
            None => self.default.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BlacklistFile {
    blacklist: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RobotFile {
    robot: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SmartFile {
    addresses: HashMap<String, String>,
}

/// One consistent view of every hot file
#[derive(Debug, Clone, Default)]
pub struct HotSnapshot {
    pub strategy: StrategyConfig,
    /// Wallets whose trades never open a session
    pub blacklist: HashSet<Pubkey>,
    /// Known bot wallets; a robot buy stops a mint session
    pub robots: HashSet<Pubkey>,
    /// Smart wallet -> label
    pub smart: HashMap<Pubkey, String>,
}

impl HotSnapshot {
    pub fn is_blacklisted(&self, wallet: &Pubkey) -> bool {
        self.blacklist.contains(wallet)
    }

    pub fn is_robot(&self, wallet: &Pubkey) -> bool {
        self.robots.contains(wallet)
    }

    pub fn smart_label(&self, wallet: &Pubkey) -> Option<&str> {
        self.smart.get(wallet).map(String::as_str)
    }
}

pub struct HotConfig {
    paths: HotConfigPaths,
    current: ArcSwap<HotSnapshot>,
    mtimes: Mutex<HashMap<PathBuf, SystemTime>>,
}

impl HotConfig {
    /// Read every file once. Missing files load as empty.
    pub fn load(paths: HotConfigPaths) -> Result<Self, ConfigError> {
        let snapshot = read_snapshot(&paths)?;
        let hot = Self {
            current: ArcSwap::from_pointee(snapshot),
            mtimes: Mutex::new(current_mtimes(&paths)),
            paths,
        };
        let snap = hot.snapshot();
        info!(
            blacklist = snap.blacklist.len(),
            robots = snap.robots.len(),
            smart = snap.smart.len(),
            hourly = snap.strategy.hourly.len(),
            "Hot config loaded"
        );
        Ok(hot)
    }

    /// Fixed snapshot, never reloaded
    pub fn from_snapshot(snapshot: HotSnapshot) -> Self {
        Self {
            paths: HotConfigPaths::default(),
            current: ArcSwap::from_pointee(snapshot),
            mtimes: Mutex::new(HashMap::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<HotSnapshot> {
        self.current.load_full()
    }

    pub fn store(&self, snapshot: HotSnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Strategy params for the current local hour
    pub fn params_now(&self) -> StrategyParams {
        let hour = chrono::Local::now().hour();
        self.current.load().strategy.params_for_hour(hour)
    }

    /// Re-read the files when any modification time moved. Returns whether a
    /// new snapshot was installed.
    pub fn reload_if_changed(&self) -> Result<bool, ConfigError> {
        let latest = current_mtimes(&self.paths);
        {
            let mut seen = self.mtimes.lock();
            if *seen == latest {
                return Ok(false);
            }
            *seen = latest;
        }
        let snapshot = read_snapshot(&self.paths)?;
        self.store(snapshot);
        Ok(true)
    }

    pub fn spawn_reloader(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => match self.reload_if_changed() {
                        Ok(true) => info!("Hot config reloaded"),
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "Hot config reload failed, keeping previous"),
                    },
                }
            }
            debug!("Hot config reloader stopped");
        })
    }
}

fn current_mtimes(paths: &HotConfigPaths) -> HashMap<PathBuf, SystemTime> {
    [&paths.strategy, &paths.blacklist, &paths.robots, &paths.smart]
        .into_iter()
        .filter_map(|p| {
            let modified = std::fs::metadata(p).and_then(|m| m.modified()).ok()?;
            Some((p.clone(), modified))
        })
        .collect()
}

fn read_yaml<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Hot config file missing, using empty");
            return Ok(T::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn parse_wallets<'a>(file: &Path, values: impl Iterator<Item = &'a String>) -> HashSet<Pubkey> {
    values
        .filter_map(|v| match Pubkey::from_str(v.trim()) {
            Ok(key) => Some(key),
            Err(_) => {
                warn!(path = %file.display(), value = %v, "Skipping invalid address");
                None
            }
        })
        .collect()
}

fn read_snapshot(paths: &HotConfigPaths) -> Result<HotSnapshot, ConfigError> {
    let strategy: StrategyConfig = read_yaml(&paths.strategy)?;
    let blacklist: BlacklistFile = read_yaml(&paths.blacklist)?;
    let robots: RobotFile = read_yaml(&paths.robots)?;
    let smart: SmartFile = read_yaml(&paths.smart)?;

    let smart = smart
        .addresses
        .into_iter()
        .filter_map(|(addr, label)| match Pubkey::from_str(addr.trim()) {
            Ok(key) => Some((key, label)),
            Err(_) => {
                warn!(path = %paths.smart.display(), value = %addr, "Skipping invalid address");
                None
            }
        })
        .collect();

    Ok(HotSnapshot {
        strategy,
        blacklist: parse_wallets(&paths.blacklist, blacklist.blacklist.iter()),
        robots: parse_wallets(&paths.robots, robots.robot.iter()),
        smart,
    })
}
