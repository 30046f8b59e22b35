use super::shutdown::ShutdownCoordinator;
use crate::error::{CapitanError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Termination signal listener feeding a shutdown coordinator.
///
/// Handlers are registered on construction so no signal is missed between
/// creating the listener and spawning `listen`.
pub struct SignalListener {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
}

impl SignalListener {
    #[cfg(unix)]
    pub fn new() -> Result<Self> {
        let register = |kind: SignalKind, name: &str| {
            signal(kind).map_err(|e| {
                CapitanError::system(format!("Failed to register {} handler: {}", name, e))
            })
        };

        Ok(Self {
            interrupt: register(SignalKind::interrupt(), "SIGINT")?,
            terminate: register(SignalKind::terminate(), "SIGTERM")?,
        })
    }

    #[cfg(not(unix))]
    pub fn new() -> Result<Self> {
        Ok(Self {})
    }

    /// Forward every SIGINT and SIGTERM to `coordinator` until cancelled
    #[cfg(unix)]
    pub async fn listen(mut self, coordinator: ShutdownCoordinator, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(()) = self.interrupt.recv() => {
                    info!("Received SIGINT signal (Ctrl+C)");
                    coordinator.notify_signal();
                }
                Some(()) = self.terminate.recv() => {
                    info!("Received SIGTERM signal");
                    coordinator.notify_signal();
                }
            }
        }
        debug!("Signal listener stopped");
    }

    #[cfg(not(unix))]
    pub async fn listen(self, coordinator: ShutdownCoordinator, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::error!("Failed to listen for Ctrl+C: {}", e);
                        break;
                    }
                    info!("Received SIGINT signal (Ctrl+C)");
                    coordinator.notify_signal();
                }
            }
        }
        debug!("Signal listener stopped");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::app::shutdown::Escalation;
    use crate::app::state::EscalationState;
    use crate::app::types::ShutdownOutcome;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct NoopEscalation;

    #[async_trait]
    impl Escalation for NoopEscalation {
        async fn graceful_stop(&self) -> Result<()> {
            Ok(())
        }

        async fn forceful_kill(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_listener() {
        let coordinator = ShutdownCoordinator::new(Arc::new(NoopEscalation));
        let cancel = CancellationToken::new();
        let listener = SignalListener::new().unwrap();
        let task = tokio::spawn(listener.listen(coordinator.clone(), cancel.clone()));

        cancel.cancel();
        assert!(tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .is_ok());
        assert_eq!(coordinator.state(), EscalationState::Idle);
    }

    #[tokio::test]
    async fn test_sigterm_reaches_coordinator() {
        let coordinator = ShutdownCoordinator::new(Arc::new(NoopEscalation));
        let cancel = CancellationToken::new();
        let listener = SignalListener::new().unwrap();
        let task = tokio::spawn(listener.listen(coordinator.clone(), cancel.clone()));

        let status = tokio::process::Command::new("kill")
            .arg("-TERM")
            .arg(std::process::id().to_string())
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let outcome = tokio::time::timeout(Duration::from_secs(2), async {
            while !coordinator.is_requested() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            coordinator.completion().wait().await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(outcome, ShutdownOutcome::Stopped);

        cancel.cancel();
        task.await.unwrap();
    }
}
