//! Signal-driven teardown of a handle pool.
//!
//! [`ShutdownCoordinator::spawn`] installs a background task that waits for
//! SIGINT or SIGTERM, drains the pool on a blocking thread (see
//! [`HandlePool::drain`] for the wait-then-clean policy) and exits the
//! process with status 0. [`ShutdownCoordinator::run_until`] is the same
//! sequence driven by any future, without the exit.

use crate::pool::{DrainReport, HandlePool};
use crate::runtime::ForeignRuntime;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Which signal ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

/// Resolve on the first SIGINT or SIGTERM (Ctrl-C only off Unix).
pub async fn wait_for_signal() -> ShutdownSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    Ok(()) = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
                    Some(()) = term.recv() => ShutdownSignal::Terminate,
                    else => std::future::pending::<ShutdownSignal>().await,
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable, listening for Ctrl-C only: {}", e);
                ctrl_c().await
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

async fn ctrl_c() -> ShutdownSignal {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
    ShutdownSignal::Interrupt
}

/// Drains a [`HandlePool`] when told to stop.
pub struct ShutdownCoordinator<R: ForeignRuntime> {
    pool: Arc<HandlePool<R>>,
    grace: Duration,
}

impl<R: ForeignRuntime> ShutdownCoordinator<R> {
    /// Coordinator using the pool's configured grace period.
    pub fn new(pool: Arc<HandlePool<R>>) -> Self {
        let grace = pool.config().shutdown_grace();
        Self { pool, grace }
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Wait for `trigger`, then drain the pool.
    pub async fn run_until<F>(self, trigger: F) -> DrainReport
    where
        F: Future<Output = ()>,
    {
        trigger.await;
        self.drain().await
    }

    /// Drain now, off the async worker threads.
    pub async fn drain(self) -> DrainReport {
        let Self { pool, grace } = self;
        match tokio::task::spawn_blocking(move || pool.drain(grace)).await {
            Ok(report) => report,
            Err(e) => {
                warn!("Drain task failed: {}", e);
                DrainReport::default()
            }
        }
    }

    /// Listen for SIGINT/SIGTERM in the background; drain and `exit(0)` on
    /// the first one.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let report = self
                .run_until(async {
                    let signal = wait_for_signal().await;
                    info!("Received {:?}; draining runtime handles", signal);
                })
                .await;
            info!(
                "Shutdown complete: {} handle(s) cleaned, {} still in flight",
                report.cleaned, report.in_flight
            );
            std::process::exit(0);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConverterConfig;
    use crate::runtime::fake::FakeRuntime;

    fn pool(rt: &Arc<FakeRuntime>) -> Arc<HandlePool<FakeRuntime>> {
        Arc::new(HandlePool::new(Arc::clone(rt), ConverterConfig::default()))
    }

    #[tokio::test]
    async fn trigger_drains_the_pool() {
        let rt = Arc::new(FakeRuntime::new());
        let pool = pool(&rt);
        pool.prewarm(2).unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(ShutdownCoordinator::new(Arc::clone(&pool)).run_until(async {
            let _ = rx.await;
        }));

        assert!(!pool.is_closed());
        tx.send(()).unwrap();
        let report = task.await.unwrap();

        assert!(report.first_drain);
        assert_eq!(report.cleaned, 2);
        assert!(pool.is_closed());
        assert_eq!(rt.live_objects(), 0);
        assert!(rt.is_torn_down());
    }

    #[tokio::test]
    async fn second_drain_is_a_no_op() {
        let rt = Arc::new(FakeRuntime::new());
        let pool = pool(&rt);
        let first = ShutdownCoordinator::new(Arc::clone(&pool)).drain().await;
        let second = ShutdownCoordinator::new(Arc::clone(&pool))
            .grace_period(Duration::ZERO)
            .drain()
            .await;
        assert!(first.first_drain);
        assert!(!second.first_drain);
        assert_eq!(rt.teardowns(), 1);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sigterm_is_reported_as_terminate() {
        let listener = tokio::spawn(wait_for_signal());
        // Let the listener install its handlers before the signal lands.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let signal = tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .expect("signal not observed")
            .unwrap();
        assert_eq!(signal, ShutdownSignal::Terminate);
    }
}
