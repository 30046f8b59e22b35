mod commands;
mod orchestrator;
mod runtime;
mod shutdown;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use orchestrator::CapitanApp;
pub use runtime::SignalListener;
pub use shutdown::{CompletionSignal, Escalation, SequencedTeardown, ShutdownCoordinator};
pub use state::EscalationState;
pub use types::{CommandKind, ShutdownOutcome};
