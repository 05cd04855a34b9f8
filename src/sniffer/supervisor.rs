//! Lifecycle supervisor for async worker management
//!
//! Manages:
//! - Registration of every long-lived worker (feeds, ingest, routers, refreshers)
//! - Coordinated pause/resume/stop
//! - Detection of workers that exit early
//! - Unified state tracking (Running, Paused, Stopped, Error)
//!
//! Workers observe shutdown through the root `CancellationToken`; sessions
//! derive child tokens from it so a stop reaches every one of them.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    /// Not started, or fully stopped
    Stopped = 0,
    /// Workers are being spawned
    Starting = 1,
    /// Ingesting and triggering
    Running = 2,
    /// Ingesting, but triggers are dropped; live sessions keep running
    Paused = 3,
    /// Draining workers
    Stopping = 4,
    /// A critical worker exited
    Error = 5,
}

impl From<u8> for EngineState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Stopped,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Stopping,
            _ => Self::Error,
        }
    }
}

/// Supervisor command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorCommand {
    Start,
    Pause,
    Resume,
    Stop,
}

/// Worker registration information
pub struct WorkerHandle {
    pub name: String,
    pub handle: JoinHandle<()>,
    /// If true, an early exit puts the engine in the error state
    pub critical: bool,
}

impl WorkerHandle {
    pub fn new(name: impl Into<String>, handle: JoinHandle<()>, critical: bool) -> Self {
        Self {
            name: name.into(),
            handle,
            critical,
        }
    }
}

/// Lifecycle supervisor for coordinating all async workers
pub struct Supervisor {
    state: Arc<AtomicU8>,
    command_tx: broadcast::Sender<SupervisorCommand>,
    /// tokio mutex: held across awaits in `stop`
    workers: Arc<tokio::sync::Mutex<Vec<WorkerHandle>>>,
    error_count: Arc<AtomicU32>,
    root: CancellationToken,
}

impl Supervisor {
    pub fn new() -> Self {
        let (command_tx, _) = broadcast::channel(16);

        Self {
            state: Arc::new(AtomicU8::new(EngineState::Stopped as u8)),
            command_tx,
            workers: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            error_count: Arc::new(AtomicU32::new(0)),
            root: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        EngineState::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, new_state: EngineState) {
        self.state.store(new_state as u8, Ordering::Release);
        debug!("Supervisor state changed to {:?}", new_state);
    }

    /// Root cancellation scope; children are cancelled by `stop`
    pub fn cancel_token(&self) -> CancellationToken {
        self.root.clone()
    }

    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    pub async fn register_worker(&self, worker: WorkerHandle) {
        info!("Registering worker: {} (critical: {})", worker.name, worker.critical);
        self.workers.lock().await.push(worker);
    }

    /// Spawn `fut` and track it
    pub async fn spawn<F>(&self, name: impl Into<String>, critical: bool, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.register_worker(WorkerHandle::new(name, handle, critical))
            .await;
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub fn start(&self) -> anyhow::Result<()> {
        if self.state() != EngineState::Stopped {
            return Err(anyhow::anyhow!(
                "Cannot start: current state is {:?}",
                self.state()
            ));
        }
        if self.root.is_cancelled() {
            return Err(anyhow::anyhow!("Cannot restart a stopped supervisor"));
        }

        self.set_state(EngineState::Starting);
        let _ = self.command_tx.send(SupervisorCommand::Start);
        self.set_state(EngineState::Running);
        info!("Supervisor started");
        Ok(())
    }

    pub fn pause(&self) {
        if self.state() != EngineState::Running {
            return;
        }
        info!("Supervisor pausing triggers");
        self.set_state(EngineState::Paused);
        let _ = self.command_tx.send(SupervisorCommand::Pause);
    }

    pub fn resume(&self) {
        if self.state() != EngineState::Paused {
            return;
        }
        info!("Supervisor resuming triggers");
        self.set_state(EngineState::Running);
        let _ = self.command_tx.send(SupervisorCommand::Resume);
    }

    /// Cancel every worker and wait for them, up to `timeout` in total
    pub async fn stop(&self, timeout: Duration) -> anyhow::Result<()> {
        if self.state() == EngineState::Stopped && self.root.is_cancelled() {
            return Ok(());
        }

        info!("Supervisor stopping all workers (timeout: {:?})", timeout);
        self.set_state(EngineState::Stopping);
        let _ = self.command_tx.send(SupervisorCommand::Stop);
        self.root.cancel();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut workers = self.workers.lock().await;
        let mut stragglers = 0usize;

        for worker in workers.drain(..) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let abort = worker.handle.abort_handle();
            match tokio::time::timeout(remaining, worker.handle).await {
                Ok(Ok(())) => debug!("Worker '{}' stopped", worker.name),
                Ok(Err(e)) if e.is_panic() => {
                    if worker.critical {
                        error!("Critical worker '{}' panicked: {:?}", worker.name, e);
                    } else {
                        warn!("Worker '{}' panicked: {:?}", worker.name, e);
                    }
                }
                Ok(Err(_)) => debug!("Worker '{}' was aborted", worker.name),
                Err(_) => {
                    warn!("Worker '{}' did not stop within timeout, aborting", worker.name);
                    abort.abort();
                    stragglers += 1;
                }
            }
        }

        self.set_state(EngineState::Stopped);
        info!(stragglers, "Supervisor stopped all workers");
        Ok(())
    }

    /// Watch for workers that exit while the engine is live
    pub async fn monitor_workers(&self, check_every: Duration) {
        let mut check_interval = tokio::time::interval(check_every);

        loop {
            tokio::select! {
                _ = self.root.cancelled() => break,
                _ = check_interval.tick() => {}
            }

            let mut workers = self.workers.lock().await;
            let mut finished = Vec::new();
            for (idx, worker) in workers.iter().enumerate() {
                if worker.handle.is_finished() {
                    finished.push(idx);
                }
            }

            for idx in finished.into_iter().rev() {
                let worker = workers.remove(idx);
                if worker.critical {
                    error!("Critical worker '{}' exited - entering error state", worker.name);
                    self.set_state(EngineState::Error);
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                } else {
                    debug!("Worker '{}' finished", worker.name);
                }
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorCommand> {
        self.command_tx.subscribe()
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.state(), EngineState::Running | EngineState::Paused)
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_supervisor_state_transitions() {
        let supervisor = Supervisor::new();
        assert_eq!(supervisor.state(), EngineState::Stopped);

        supervisor.start().unwrap();
        assert_eq!(supervisor.state(), EngineState::Running);
        assert!(supervisor.start().is_err());

        supervisor.pause();
        assert_eq!(supervisor.state(), EngineState::Paused);

        supervisor.resume();
        assert_eq!(supervisor.state(), EngineState::Running);

        supervisor.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(supervisor.state(), EngineState::Stopped);
        assert!(supervisor.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_stop_cancels_child_scopes() {
        let supervisor = Supervisor::new();
        supervisor.start().unwrap();
        let child = supervisor.child_token();
        supervisor
            .spawn("waits", true, {
                let child = child.clone();
                async move { child.cancelled().await }
            })
            .await;
        assert_eq!(supervisor.worker_count().await, 1);

        supervisor.stop(Duration::from_secs(1)).await.unwrap();
        assert!(child.is_cancelled());
        assert_eq!(supervisor.worker_count().await, 0);
    }

    #[tokio::test]
    async fn test_stop_aborts_stuck_worker() {
        let supervisor = Supervisor::new();
        supervisor.start().unwrap();
        supervisor
            .spawn("stuck", false, async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            })
            .await;
        let started = std::time::Instant::now();
        supervisor.stop(Duration::from_millis(50)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(supervisor.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_monitor_flags_critical_exit() {
        let supervisor = Arc::new(Supervisor::new());
        supervisor.start().unwrap();
        supervisor.spawn("feed", true, async {}).await;

        let monitor = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.monitor_workers(Duration::from_millis(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(supervisor.state(), EngineState::Error);
        assert_eq!(supervisor.error_count(), 1);

        supervisor.stop(Duration::from_secs(1)).await.unwrap();
        monitor.await.unwrap();
    }

    #[test]
    fn test_engine_state_conversion() {
        assert_eq!(EngineState::from(0), EngineState::Stopped);
        assert_eq!(EngineState::from(2), EngineState::Running);
        assert_eq!(EngineState::from(3), EngineState::Paused);
        assert_eq!(EngineState::from(9), EngineState::Error);
    }

    #[tokio::test]
    async fn test_supervisor_concurrent_worker_registration() {
        let supervisor = Arc::new(Supervisor::new());

        let mut handles = vec![];
        for i in 0..10 {
            let sup = supervisor.clone();
            handles.push(tokio::spawn(async move {
                let task = tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                });
                sup.register_worker(WorkerHandle::new(format!("worker_{i}"), task, false))
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(supervisor.worker_count().await, 10);

        supervisor.stop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(supervisor.state(), EngineState::Stopped);
    }
}
