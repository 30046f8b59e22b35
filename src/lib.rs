pub mod app;
pub mod config;
pub mod container;
pub mod error;
pub mod hooks;
pub mod project;
pub mod reconcile;
pub mod runtime;
pub mod sequencer;

pub use app::{CapitanApp, CommandKind, ShutdownCoordinator, ShutdownOutcome};
pub use config::{CapitanSettings, ParticipatingSet};
pub use container::{ContainerSpec, ContainerSpecList, Direction, RunArgs};
pub use error::{CapitanError, Result};
pub use hooks::{HookPoint, HookRunner};
pub use project::{ProjectConfig, ProjectDefinition};
pub use reconcile::{decide, Action, Decision, Intent};
pub use runtime::{DockerRuntime, MockRuntime, ObservedState, RuntimeAdapter};
pub use sequencer::LifecycleSequencer;
