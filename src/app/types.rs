use std::fmt;

/// Top-level command a run executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Up { attach: bool },
    Create,
    Start { attach: bool },
    Scale { service: String },
    Restart { args: Vec<String> },
    Stop { args: Vec<String> },
    Kill { args: Vec<String> },
    Rm { args: Vec<String> },
    Ps { args: Vec<String> },
    Ip,
    Build,
    Pull,
    Logs,
    Stats,
    Show,
}

impl CommandKind {
    /// Name used in logs and in `before.<name>`/`after.<name>` hook keys
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Up { .. } => "up",
            CommandKind::Create => "create",
            CommandKind::Start { .. } => "start",
            CommandKind::Scale { .. } => "scale",
            CommandKind::Restart { .. } => "restart",
            CommandKind::Stop { .. } => "stop",
            CommandKind::Kill { .. } => "kill",
            CommandKind::Rm { .. } => "rm",
            CommandKind::Ps { .. } => "ps",
            CommandKind::Ip => "ip",
            CommandKind::Build => "build",
            CommandKind::Pull => "pull",
            CommandKind::Logs => "logs",
            CommandKind::Stats => "stats",
            CommandKind::Show => "show",
        }
    }

    pub fn has_hooks(&self) -> bool {
        matches!(
            self,
            CommandKind::Up { .. }
                | CommandKind::Create
                | CommandKind::Start { .. }
                | CommandKind::Scale { .. }
                | CommandKind::Restart { .. }
                | CommandKind::Stop { .. }
                | CommandKind::Kill { .. }
                | CommandKind::Rm { .. }
                | CommandKind::Build
        )
    }

    /// Whether surplus instances are removed before the main pass
    pub fn pre_cleans(&self) -> bool {
        matches!(
            self,
            CommandKind::Up { .. }
                | CommandKind::Create
                | CommandKind::Start { .. }
                | CommandKind::Scale { .. }
                | CommandKind::Restart { .. }
        )
    }
}

/// How an interrupted attached run was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Stopped,
    Killed,
}

impl fmt::Display for ShutdownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownOutcome::Stopped => write!(f, "containers stopped"),
            ShutdownOutcome::Killed => write!(f, "containers killed"),
        }
    }
}
