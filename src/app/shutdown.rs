use super::state::EscalationState;
use super::types::ShutdownOutcome;
use crate::container::ContainerSpecList;
use crate::error::{CapitanError, Result};
use crate::runtime::RuntimeAdapter;
use crate::sequencer::LifecycleSequencer;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// The two ways a coordinator can bring containers down
#[async_trait]
pub trait Escalation: Send + Sync {
    async fn graceful_stop(&self) -> Result<()>;
    async fn forceful_kill(&self) -> Result<()>;
}

/// Stops or kills a fixed container list through the lifecycle sequencer
pub struct SequencedTeardown {
    sequencer: LifecycleSequencer,
    containers: ContainerSpecList,
}

impl SequencedTeardown {
    pub fn new(runtime: Arc<dyn RuntimeAdapter>, containers: ContainerSpecList) -> Self {
        Self {
            sequencer: LifecycleSequencer::new(runtime, false),
            containers,
        }
    }
}

#[async_trait]
impl Escalation for SequencedTeardown {
    async fn graceful_stop(&self) -> Result<()> {
        self.sequencer.stop(&self.containers, &[]).await
    }

    async fn forceful_kill(&self) -> Result<()> {
        self.sequencer.kill(&self.containers, &[]).await
    }
}

/// One-shot, single-slot rendezvous fired when shutdown has fully resolved
pub struct CompletionSignal {
    sender: Mutex<Option<oneshot::Sender<ShutdownOutcome>>>,
    receiver: Mutex<Option<oneshot::Receiver<ShutdownOutcome>>>,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Fire the signal; returns false if it had already fired
    pub fn fire(&self, outcome: ShutdownOutcome) -> bool {
        match self.sender.lock().take() {
            Some(sender) => {
                // Receiver may be gone if nobody waits for the outcome
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Wait for the outcome. Only the first caller receives it.
    pub async fn wait(&self) -> Result<ShutdownOutcome> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| CapitanError::system("Completion signal already consumed"))?;

        receiver
            .await
            .map_err(|_| CapitanError::system("Completion signal dropped before firing"))
    }
}

struct CoordinatorInner {
    state: Mutex<EscalationState>,
    /// Set under the state lock before a kill is spawned
    killing: AtomicBool,
    completion: CompletionSignal,
    escalation: Arc<dyn Escalation>,
}

/// Turns termination requests into a graceful stop, escalating to a
/// forceful kill on a second request.
///
/// Exactly one of the two completion paths fires the completion signal:
/// a stop that finishes after a kill was requested stays silent. A failed
/// stop fires nothing and leaves the next request free to kill.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl ShutdownCoordinator {
    pub fn new(escalation: Arc<dyn Escalation>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                state: Mutex::new(EscalationState::Idle),
                killing: AtomicBool::new(false),
                completion: CompletionSignal::new(),
                escalation,
            }),
        }
    }

    pub fn state(&self) -> EscalationState {
        *self.inner.state.lock()
    }

    pub fn is_requested(&self) -> bool {
        self.state().is_requested()
    }

    /// Handle one termination request
    pub fn notify_signal(&self) {
        let mut state = self.inner.state.lock();
        match *state {
            EscalationState::Idle => {
                *state = EscalationState::StopRequested;
                drop(state);
                info!("Stopping containers, interrupt again to kill them");
                self.spawn_stop();
            }
            EscalationState::StopRequested => {
                *state = EscalationState::KillRequested;
                self.inner.killing.store(true, Ordering::SeqCst);
                drop(state);
                warn!("Killing containers");
                self.spawn_kill();
            }
            EscalationState::KillRequested | EscalationState::Done => {
                info!("Shutdown already in progress, ignoring signal");
            }
        }
    }

    /// Start a graceful stop unless shutdown has already begun
    pub fn request_stop(&self) -> bool {
        let mut state = self.inner.state.lock();
        if *state != EscalationState::Idle {
            return false;
        }
        *state = EscalationState::StopRequested;
        drop(state);
        info!("Stop requested");
        self.spawn_stop();
        true
    }

    pub fn completion(&self) -> &CompletionSignal {
        &self.inner.completion
    }

    fn spawn_stop(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let stopped = inner.escalation.graceful_stop().await;

            let mut state = inner.state.lock();
            if inner.killing.load(Ordering::SeqCst) {
                debug!("Stop finished after kill was requested");
                return;
            }
            if let Err(e) = stopped {
                // Stay in StopRequested so the next request escalates to kill
                error!("Error stopping containers, interrupt again to kill them: {}", e);
                return;
            }
            *state = EscalationState::Done;
            inner.completion.fire(ShutdownOutcome::Stopped);
        });
    }

    fn spawn_kill(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = inner.escalation.forceful_kill().await {
                error!("Error killing containers: {}", e);
            }

            *inner.state.lock() = EscalationState::Done;
            inner.completion.fire(ShutdownOutcome::Killed);
        });
    }
}
