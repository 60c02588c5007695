use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

pub type StepFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

type Step = Box<dyn FnOnce() -> StepFuture + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub steps: Vec<(String, StepOutcome)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.steps
            .iter()
            .all(|(_, outcome)| *outcome == StepOutcome::Completed)
    }
}

/// Ordered, best-effort teardown.
///
/// Steps run in the order they were added. Each is bounded by the grace
/// period; a step that fails or overruns is logged and the next one runs
/// anyway.
pub struct ShutdownCoordinator {
    steps: Vec<(String, Step)>,
    step_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            steps: Vec::new(),
            step_timeout,
        }
    }

    pub fn add_step<F, Fut>(&mut self, name: &str, step: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let step: Step = Box::new(move || Box::pin(step()) as StepFuture);
        self.steps.push((name.to_string(), step));
    }

    pub async fn run(self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        for (name, step) in self.steps {
            info!("Shutdown: {}", name);
            let outcome = match tokio::time::timeout(self.step_timeout, step()).await {
                Ok(Ok(())) => StepOutcome::Completed,
                Ok(Err(e)) => {
                    error!("Shutdown step '{}' failed: {:#}", name, e);
                    StepOutcome::Failed(e.to_string())
                }
                Err(_) => {
                    warn!(
                        "Shutdown step '{}' did not finish within {:?}, moving on",
                        name, self.step_timeout
                    );
                    StepOutcome::TimedOut
                }
            };
            report.steps.push((name, outcome));
        }

        report
    }
}

/// A task handle that aborts the task when dropped.
///
/// Awaiting it inside a shutdown step means an overrun step takes the task
/// down with it instead of leaving it running against closed resources.
pub struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    pub fn new(handle: JoinHandle<T>) -> Self {
        Self(handle)
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
pub async fn wait_for_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Received interrupt signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let log = recorder();
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        for name in ["transport", "storage", "listener"] {
            let log = log.clone();
            coordinator.add_step(name, move || async move {
                log.lock().unwrap().push(name);
                anyhow::Ok(())
            });
        }

        let report = coordinator.run().await;

        assert!(report.is_clean());
        assert_eq!(*log.lock().unwrap(), vec!["transport", "storage", "listener"]);
    }

    #[tokio::test]
    async fn test_failing_step_does_not_abort_shutdown() {
        let log = recorder();
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.add_step("transport", || async {
            Err::<(), _>(anyhow::anyhow!("dispatcher was idle"))
        });
        let tail = log.clone();
        coordinator.add_step("storage", move || async move {
            tail.lock().unwrap().push("storage");
            anyhow::Ok(())
        });

        let report = coordinator.run().await;

        assert!(!report.is_clean());
        assert_eq!(
            report.steps[0].1,
            StepOutcome::Failed("dispatcher was idle".to_string())
        );
        assert_eq!(report.steps[1].1, StepOutcome::Completed);
        assert_eq!(*log.lock().unwrap(), vec!["storage"]);
    }

    #[tokio::test]
    async fn test_hanging_step_is_bounded() {
        let mut coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        coordinator.add_step("transport", || async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            anyhow::Ok(())
        });
        coordinator.add_step("listener", || async { anyhow::Ok(()) });

        let report = coordinator.run().await;

        assert_eq!(report.steps[0].1, StepOutcome::TimedOut);
        assert_eq!(report.steps[1].1, StepOutcome::Completed);
    }

    #[tokio::test]
    async fn test_overrun_step_aborts_its_task() {
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });

        let mut coordinator = ShutdownCoordinator::new(Duration::from_millis(50));
        let guarded = AbortOnDrop::new(task);
        coordinator.add_step("stop worker", move || async move {
            guarded.await?;
            anyhow::Ok(())
        });

        let report = coordinator.run().await;

        assert_eq!(report.steps[0].1, StepOutcome::TimedOut);
        // The sender is dropped only once the aborted task is torn down.
        assert!(alive_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_finished_task_result_is_returned() {
        let task = AbortOnDrop::new(tokio::spawn(async { 7 }));
        assert_eq!(task.await.unwrap(), 7);
    }
}
