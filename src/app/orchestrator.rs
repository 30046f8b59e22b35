use crate::config::{CapitanSettings, ParticipatingSet};
use crate::container::ContainerSpecList;
use crate::hooks::HookRunner;
use crate::project::ProjectConfig;
use crate::runtime::RuntimeAdapter;
use crate::sequencer::LifecycleSequencer;
use std::sync::Arc;
use tracing::debug;

/// Drives one top-level command against a loaded project
pub struct CapitanApp {
    pub(super) settings: CapitanSettings,
    pub(super) project: ProjectConfig,
    pub(super) runtime: Arc<dyn RuntimeAdapter>,
    pub(super) sequencer: LifecycleSequencer,
    pub(super) hooks: HookRunner,
    pub(super) dry_run: bool,
}

impl CapitanApp {
    pub fn new(
        settings: CapitanSettings,
        project: ProjectConfig,
        runtime: Arc<dyn RuntimeAdapter>,
        dry_run: bool,
    ) -> Self {
        debug!(
            "Project {}: {} declared, {} cleanup container(s)",
            project.project_name,
            project.declared.len(),
            project.cleanup.len()
        );

        Self {
            sequencer: LifecycleSequencer::new(Arc::clone(&runtime), dry_run),
            hooks: HookRunner::new(settings.hooks.shell.clone(), dry_run),
            settings,
            project,
            runtime,
            dry_run,
        }
    }

    pub fn project(&self) -> &ProjectConfig {
        &self.project
    }

    /// Containers taking part in a pass under the given policy
    pub fn participating(&self, set: ParticipatingSet) -> ContainerSpecList {
        match set {
            ParticipatingSet::Declared => self.project.declared.clone(),
            ParticipatingSet::Cleanup => self.project.cleanup.clone(),
            ParticipatingSet::Combined => self.project.declared.combined(&self.project.cleanup),
        }
    }
}
