/// Escalation progress of one shutdown coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    Idle,
    StopRequested,
    KillRequested,
    Done,
}

impl EscalationState {
    /// Whether a termination request has been received
    pub fn is_requested(&self) -> bool {
        !matches!(self, EscalationState::Idle)
    }
}
