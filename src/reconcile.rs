//! Decides what a single container needs to match its declared spec.
//!
//! `decide` is pure: it only looks at the container spec, the freshly queried engine
//! state and the locally resolved image id. Each container is decided on
//! its own; nothing is compared across containers.

use crate::container::ContainerSpec;
use crate::runtime::ObservedState;
use std::fmt;
use std::path::PathBuf;

/// What the caller is trying to achieve for the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Create, recreate or start as needed (`up`)
    Up { attach: bool },
    /// Make sure the container exists without running it (`create`)
    Create,
    /// Start an existing container (`start`)
    Start { attach: bool },
}

/// Image preparation that must happen before the container action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureImage {
    Build(PathBuf),
    Pull(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateReason {
    ImageChanged,
    ArgsChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Container is missing
    Create { start: bool },
    /// Stopped and up to date
    Start,
    /// Drifted from its spec; remove, create and start
    RecreateAndStart { reason: RecreateReason },
    /// Drifted from its spec; remove and create without starting
    Recreate { reason: RecreateReason },
    /// Running and attach was requested
    AttachOnly,
    /// Running, nothing to change
    AlreadyRunning,
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub ensure_image: Option<EnsureImage>,
    pub action: Action,
}

pub fn decide(
    spec: &ContainerSpec,
    observed: &ObservedState,
    local_image_id: Option<&str>,
    intent: Intent,
) -> Decision {
    if let Intent::Start { attach } = intent {
        return Decision {
            ensure_image: None,
            action: start_action(observed, attach),
        };
    }

    let ensure_image = match local_image_id {
        Some(_) => None,
        None => Some(match &spec.build {
            Some(context) => EnsureImage::Build(context.clone()),
            None => EnsureImage::Pull(spec.image.clone()),
        }),
    };

    let running_wanted = matches!(intent, Intent::Up { .. });
    let action = if !observed.exists {
        Action::Create {
            start: running_wanted,
        }
    } else if let Some(reason) = drift(spec, observed, local_image_id) {
        if running_wanted {
            Action::RecreateAndStart { reason }
        } else {
            Action::Recreate { reason }
        }
    } else {
        match intent {
            Intent::Up { attach } => start_action(observed, attach),
            _ => Action::Noop,
        }
    };

    Decision {
        ensure_image,
        action,
    }
}

/// Image drift wins over argument drift so a container is recreated once
fn drift(
    spec: &ContainerSpec,
    observed: &ObservedState,
    local_image_id: Option<&str>,
) -> Option<RecreateReason> {
    if let (Some(current), Some(target)) = (observed.image_id.as_deref(), local_image_id) {
        if current != target {
            return Some(RecreateReason::ImageChanged);
        }
    }

    if observed.run_signature.as_deref() != Some(spec.run_signature().as_str()) {
        return Some(RecreateReason::ArgsChanged);
    }

    None
}

fn start_action(observed: &ObservedState, attach: bool) -> Action {
    if !observed.exists {
        Action::Noop
    } else if !observed.running {
        Action::Start
    } else if attach {
        Action::AttachOnly
    } else {
        Action::AlreadyRunning
    }
}

impl Decision {
    /// Whether the action could differ once the missing image is fetched.
    /// A missing container is created either way.
    pub fn is_provisional(&self) -> bool {
        self.ensure_image.is_some() && !matches!(self.action, Action::Create { .. })
    }
}

impl Action {
    /// Whether the action leaves a running container to attach to
    pub fn runs(&self) -> bool {
        matches!(
            self,
            Action::Create { start: true }
                | Action::Start
                | Action::RecreateAndStart { .. }
                | Action::AttachOnly
                | Action::AlreadyRunning
        )
    }
}

impl fmt::Display for RecreateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecreateReason::ImageChanged => write!(f, "different image available"),
            RecreateReason::ArgsChanged => write!(f, "run arguments changed"),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create { start: true } => write!(f, "create and start"),
            Action::Create { start: false } => write!(f, "create"),
            Action::Start => write!(f, "start"),
            Action::RecreateAndStart { reason } => write!(f, "recreate and start ({})", reason),
            Action::Recreate { reason } => write!(f, "recreate ({})", reason),
            Action::AttachOnly => write!(f, "attach"),
            Action::AlreadyRunning => write!(f, "already running"),
            Action::Noop => write!(f, "nothing to do"),
        }
    }
}
