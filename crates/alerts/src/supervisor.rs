//! Restartable ownership of the polling task.

use crate::monitor::PriceMonitor;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Builds a fresh monitor for every (re)start.
pub type MonitorFactory = Box<dyn Fn() -> PriceMonitor + Send + Sync>;

/// Time allowed for a cancelled monitor to finish before it is aborted.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(10);

struct RunningMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps at most one polling task alive.
///
/// `restart` stops the running task before spawning the next one, so two
/// loops never evaluate the same symbols at once.
pub struct MonitorSupervisor {
    factory: MonitorFactory,
    shutdown: CancellationToken,
    running: Mutex<Option<RunningMonitor>>,
}

impl MonitorSupervisor {
    /// `shutdown` cancels whatever monitor is running when the process stops.
    pub fn new(factory: MonitorFactory, shutdown: CancellationToken) -> Self {
        Self {
            factory,
            shutdown,
            running: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        self.restart().await;
    }

    /// Stop the current monitor, if any, and spawn a new one.
    pub async fn restart(&self) {
        let mut running = self.running.lock().await;
        let restarted = running.is_some();
        if let Some(current) = running.take() {
            Self::shutdown_monitor(current).await;
        }
        if self.shutdown.is_cancelled() {
            return;
        }

        let cancel = self.shutdown.child_token();
        let monitor = (self.factory)();
        let handle = tokio::spawn(monitor.run(cancel.clone()));
        *running = Some(RunningMonitor { cancel, handle });

        if restarted {
            info!("Price monitor restarted");
        }
    }

    /// Stop the current monitor without starting another.
    pub async fn stop(&self) {
        if let Some(current) = self.running.lock().await.take() {
            Self::shutdown_monitor(current).await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    async fn shutdown_monitor(mut current: RunningMonitor) {
        current.cancel.cancel();
        if tokio::time::timeout(STOP_TIMEOUT, &mut current.handle)
            .await
            .is_err()
        {
            warn!("Price monitor did not stop in time, aborting");
            current.handle.abort();
        }
    }
}
