use super::orchestrator::CapitanApp;
use super::runtime::SignalListener;
use super::shutdown::{SequencedTeardown, ShutdownCoordinator};
use super::types::CommandKind;
use crate::container::ContainerSpecList;
use crate::error::Result;
use crate::hooks::HookPoint;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

impl CapitanApp {
    /// Run a command: before hooks, pre-clean, the main pass, after hooks.
    ///
    /// A failing before hook aborts before any container is touched. A
    /// failing after hook fails the command without undoing its actions.
    pub async fn run(&self, command: &CommandKind) -> Result<()> {
        info!("Running {}", command.name());
        let containers = self.containers_for(command);

        if command.has_hooks() {
            self.hooks
                .run_point(HookPoint::Before, command.name(), &containers)
                .await?;
        }

        if command.pre_cleans() {
            self.pre_clean(command).await;
        }

        self.execute(command, &containers).await?;

        if command.has_hooks() {
            self.hooks
                .run_point(HookPoint::After, command.name(), &containers)
                .await?;
        }
        Ok(())
    }

    /// Containers a command operates on
    pub fn containers_for(&self, command: &CommandKind) -> ContainerSpecList {
        let teardown = &self.settings.teardown;
        match command {
            CommandKind::Scale { service } => self.project.service(service).declared,
            CommandKind::Stop { .. } => self.participating(teardown.stop),
            CommandKind::Kill { .. } => self.participating(teardown.kill),
            CommandKind::Rm { .. } => self.participating(teardown.rm),
            CommandKind::Logs => self.participating(teardown.logs),
            CommandKind::Stats => self.participating(teardown.stats),
            CommandKind::Show => self.project.declared.combined(&self.project.cleanup),
            _ => self.project.declared.clone(),
        }
    }

    /// Remove instances above each service's scale. Failures only warn.
    async fn pre_clean(&self, command: &CommandKind) {
        let cleanup = match command {
            CommandKind::Scale { service } => self.project.service(service).cleanup,
            _ => self.project.cleanup.clone(),
        };
        if cleanup.is_empty() {
            return;
        }

        if let Err(e) = self.sequencer.remove(&cleanup, &["-f".to_string()]).await {
            warn!("Failed to remove surplus containers: {}", e);
        }
    }

    async fn execute(&self, command: &CommandKind, containers: &ContainerSpecList) -> Result<()> {
        match command {
            CommandKind::Up { attach } => {
                let run = self.sequencer.up(containers, *attach);
                self.with_coordinator(*attach, run).await
            }
            CommandKind::Create => self.sequencer.create(containers).await,
            CommandKind::Start { attach } => {
                let run = self.sequencer.start(containers, *attach);
                self.with_coordinator(*attach, run).await
            }
            CommandKind::Scale { .. } => self.sequencer.up(containers, false).await,
            CommandKind::Restart { args } => self.sequencer.restart(containers, args).await,
            CommandKind::Stop { args } => self.sequencer.stop(containers, args).await,
            CommandKind::Kill { args } => self.sequencer.kill(containers, args).await,
            CommandKind::Rm { args } => self.sequencer.remove(containers, args).await,
            CommandKind::Ps { args } => {
                let listing = self.sequencer.ps(containers, args).await?;
                println!("{}", listing.trim_end());
                Ok(())
            }
            CommandKind::Ip => {
                for (name, address) in self.sequencer.ip(containers).await? {
                    println!("{}: {}", name, address);
                }
                Ok(())
            }
            CommandKind::Build => self.sequencer.build(containers).await,
            CommandKind::Pull => self.sequencer.pull(containers).await,
            CommandKind::Logs => self.sequencer.logs(containers).await,
            CommandKind::Stats => self.sequencer.stats(containers).await,
            CommandKind::Show => {
                print!("{}", toml::to_string_pretty(&self.project)?);
                Ok(())
            }
        }
    }

    /// Run an attached pass with a shutdown coordinator listening for signals
    async fn with_coordinator<F>(&self, attach: bool, run: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        if !attach || self.dry_run {
            return run.await;
        }

        let teardown = SequencedTeardown::new(
            Arc::clone(&self.runtime),
            self.participating(self.settings.teardown.signal),
        );
        let coordinator = ShutdownCoordinator::new(Arc::new(teardown));

        let cancel = CancellationToken::new();
        let listener = SignalListener::new()?;
        let listening = tokio::spawn(listener.listen(coordinator.clone(), cancel.clone()));

        let result = self.attached(&coordinator, run).await;

        cancel.cancel();
        if let Err(e) = listening.await {
            warn!("Signal listener ended abnormally: {}", e);
        }
        result
    }

    /// Wait for the attached pass, then for shutdown if one was requested.
    ///
    /// Shutdown completing first ends the run even while the pass is still
    /// starting containers; dropping the pass cancels its streams.
    pub(super) async fn attached<F>(&self, coordinator: &ShutdownCoordinator, run: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let completion = coordinator.completion().wait();
        tokio::pin!(run);
        tokio::pin!(completion);

        tokio::select! {
            result = &mut run => {
                result?;
                if coordinator.is_requested() {
                    let outcome = completion.await?;
                    info!("Shutdown complete: {}", outcome);
                }
            }
            outcome = &mut completion => {
                info!("Shutdown complete: {}", outcome?);
            }
        }
        Ok(())
    }
}
