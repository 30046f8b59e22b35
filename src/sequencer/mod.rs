mod streams;

pub use streams::StreamSet;

use crate::container::{ContainerSpec, ContainerSpecList, Direction};
use crate::error::Result;
use crate::reconcile::{decide, Action, Decision, EnsureImage, Intent};
use crate::runtime::RuntimeAdapter;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Teardown operations share one traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Stop,
    Kill,
    Remove,
}

/// Applies per-container actions across a container list in placement order.
///
/// Every decision re-queries the engine right before it is made. Any failed
/// engine call aborts the rest of the pass, except a container that is
/// already gone during teardown.
pub struct LifecycleSequencer {
    runtime: Arc<dyn RuntimeAdapter>,
    dry_run: bool,
}

impl LifecycleSequencer {
    pub fn new(runtime: Arc<dyn RuntimeAdapter>, dry_run: bool) -> Self {
        Self { runtime, dry_run }
    }

    /// Create, recreate or start every container, attaching when requested.
    ///
    /// Returns once every attach stream has ended.
    pub async fn up(&self, containers: &ContainerSpecList, attach: bool) -> Result<()> {
        self.reconcile(containers, Intent::Up { attach }, attach).await
    }

    /// Create missing containers and recreate drifted ones without starting them
    pub async fn create(&self, containers: &ContainerSpecList) -> Result<()> {
        self.reconcile(containers, Intent::Create, false).await
    }

    /// Start stopped containers, attaching when requested
    pub async fn start(&self, containers: &ContainerSpecList, attach: bool) -> Result<()> {
        self.reconcile(containers, Intent::Start { attach }, attach).await
    }

    /// Decisions for every container in startup order, without applying them
    #[cfg(test)]
    async fn plan(
        &self,
        containers: &ContainerSpecList,
        intent: Intent,
    ) -> Result<Vec<(String, Decision)>> {
        let mut plan = Vec::with_capacity(containers.len());
        for spec in containers.ordered(Direction::Startup) {
            plan.push((spec.name.clone(), self.observe_and_decide(spec, intent).await?));
        }
        Ok(plan)
    }

    async fn reconcile(
        &self,
        containers: &ContainerSpecList,
        intent: Intent,
        attach: bool,
    ) -> Result<()> {
        let mut streams = StreamSet::new();

        for spec in containers.ordered(Direction::Startup) {
            if let Err(e) = self.reconcile_one(spec, intent, attach, &mut streams).await {
                streams.cancel_all();
                return Err(e);
            }
        }

        if !streams.is_empty() {
            info!("Waiting for {} attached container(s)", streams.len());
            let failed = streams.wait_all().await;
            if failed > 0 {
                warn!("{} attach stream(s) ended with errors", failed);
            }
        }
        Ok(())
    }

    async fn reconcile_one(
        &self,
        spec: &ContainerSpec,
        intent: Intent,
        attach: bool,
        streams: &mut StreamSet,
    ) -> Result<()> {
        let mut decision = self.observe_and_decide(spec, intent).await?;
        let provisional = decision.is_provisional();

        if let Some(ensure) = decision.ensure_image.take() {
            self.ensure_image(spec, &ensure).await?;
            if !self.dry_run {
                // Compare against the image that was just fetched
                decision = self.observe_and_decide(spec, intent).await?;
            } else if provisional {
                info!(
                    "Decision for {} may change once {} is fetched",
                    spec.name, spec.image
                );
            }
        }

        debug!("Decision for {}: {}", spec.name, decision.action);
        self.apply(spec, &decision.action, intent).await?;

        if attach && decision.action.runs() {
            info!("Attaching to {}", spec.name);
            if !self.dry_run {
                streams.push(self.runtime.attach(spec).await?);
            }
        }
        Ok(())
    }

    async fn observe_and_decide(&self, spec: &ContainerSpec, intent: Intent) -> Result<Decision> {
        let observed = self.runtime.query(spec).await?;
        let local_image_id = match intent {
            Intent::Start { .. } => None,
            _ => self.runtime.local_image_id(&spec.image).await?,
        };
        Ok(decide(spec, &observed, local_image_id.as_deref(), intent))
    }

    async fn ensure_image(&self, spec: &ContainerSpec, ensure: &EnsureImage) -> Result<()> {
        warn!("Unable to find image {} locally", spec.image);
        match ensure {
            EnsureImage::Build(context) => {
                info!("Building image {} from {}", spec.image, context.display());
                if !self.dry_run {
                    self.runtime.build(spec).await?;
                }
            }
            EnsureImage::Pull(image) => {
                info!("Pulling image {}", image);
                if !self.dry_run {
                    self.runtime.pull(image).await?;
                }
            }
        }
        Ok(())
    }

    async fn apply(&self, spec: &ContainerSpec, action: &Action, intent: Intent) -> Result<()> {
        let name = &spec.name;
        match action {
            Action::Create { start } => {
                info!("Creating {}", name);
                if !self.dry_run {
                    self.runtime.create(spec).await?;
                }
                if *start {
                    self.start_container(spec).await?;
                }
            }
            Action::Start => self.start_container(spec).await?,
            Action::RecreateAndStart { reason } | Action::Recreate { reason } => {
                info!("Removing ({}): {}", reason, name);
                if !self.dry_run {
                    self.runtime.remove(spec, &["--force".to_string()]).await?;
                }
                info!("Creating {}", name);
                if !self.dry_run {
                    self.runtime.create(spec).await?;
                }
                if matches!(action, Action::RecreateAndStart { .. }) {
                    self.start_container(spec).await?;
                }
            }
            Action::AttachOnly | Action::AlreadyRunning => info!("Already running {}", name),
            Action::Noop => match intent {
                Intent::Start { .. } => warn!("{} has not been created, skipping", name),
                _ => info!("{} is up to date", name),
            },
        }
        Ok(())
    }

    async fn start_container(&self, spec: &ContainerSpec) -> Result<()> {
        info!("Starting {}", spec.name);
        if !self.dry_run {
            self.runtime.start(spec).await?;
        }
        Ok(())
    }

    /// Stop running containers in teardown order
    pub async fn stop(&self, containers: &ContainerSpecList, args: &[String]) -> Result<()> {
        self.teardown(containers, Teardown::Stop, args).await
    }

    /// Kill running containers in teardown order
    pub async fn kill(&self, containers: &ContainerSpecList, args: &[String]) -> Result<()> {
        self.teardown(containers, Teardown::Kill, args).await
    }

    /// Remove existing containers in teardown order
    pub async fn remove(&self, containers: &ContainerSpecList, args: &[String]) -> Result<()> {
        self.teardown(containers, Teardown::Remove, args).await
    }

    async fn teardown(
        &self,
        containers: &ContainerSpecList,
        operation: Teardown,
        args: &[String],
    ) -> Result<()> {
        for spec in containers.ordered(Direction::Teardown) {
            let observed = self.runtime.query(spec).await?;

            let result = match operation {
                Teardown::Stop | Teardown::Kill if !observed.running => {
                    info!("Already dead: {}", spec.name);
                    continue;
                }
                Teardown::Remove if !observed.exists => {
                    info!("Container doesn't exist: {}", spec.name);
                    continue;
                }
                Teardown::Stop => {
                    info!("Stopping {}", spec.name);
                    if self.dry_run {
                        continue;
                    }
                    self.runtime.stop(spec, args).await
                }
                Teardown::Kill => {
                    info!("Killing {}", spec.name);
                    if self.dry_run {
                        continue;
                    }
                    self.runtime.kill(spec, args).await
                }
                Teardown::Remove => {
                    info!("Removing {}", spec.name);
                    if self.dry_run {
                        continue;
                    }
                    self.runtime.remove(spec, args).await
                }
            };

            match result {
                Err(e) if e.is_already_absent() => {
                    info!("Container {} was removed concurrently", spec.name)
                }
                other => other?,
            }
        }
        Ok(())
    }

    /// Restart every container in startup order
    pub async fn restart(&self, containers: &ContainerSpecList, args: &[String]) -> Result<()> {
        for spec in containers.ordered(Direction::Startup) {
            info!("Restarting {}", spec.name);
            if !self.dry_run {
                self.runtime.restart(spec, args).await?;
            }
        }
        Ok(())
    }

    /// Build the image of every container with a build context, once per image
    pub async fn build(&self, containers: &ContainerSpecList) -> Result<()> {
        let mut built = HashSet::new();
        for spec in containers.ordered(Direction::Startup) {
            if spec.build.is_none() || !built.insert(spec.image.as_str()) {
                continue;
            }
            info!("Building {} for {}", spec.image, spec.service_type);
            if !self.dry_run {
                self.runtime.build(spec).await?;
            }
        }
        Ok(())
    }

    /// Pull the image of every container without a build context, once per image
    pub async fn pull(&self, containers: &ContainerSpecList) -> Result<()> {
        let mut pulled = HashSet::new();
        for spec in containers.ordered(Direction::Startup) {
            if spec.build.is_some() || spec.image.is_empty() || !pulled.insert(spec.image.as_str()) {
                continue;
            }
            info!("Pulling {} for {}", spec.image, spec.service_type);
            if !self.dry_run {
                self.runtime.pull(&spec.image).await?;
            }
        }
        Ok(())
    }

    /// Address of every container in startup order
    pub async fn ip(&self, containers: &ContainerSpecList) -> Result<Vec<(String, String)>> {
        let mut addresses = Vec::with_capacity(containers.len());
        for spec in containers.ordered(Direction::Startup) {
            let address = self.runtime.ip(spec).await?;
            addresses.push((spec.name.clone(), address));
        }
        Ok(addresses)
    }

    pub async fn ps(&self, containers: &ContainerSpecList, args: &[String]) -> Result<String> {
        let names: Vec<&str> = containers
            .ordered(Direction::Startup)
            .into_iter()
            .map(|spec| spec.name.as_str())
            .collect();
        self.runtime.ps(&names, args).await
    }

    /// Stream logs of every container until all streams end
    pub async fn logs(&self, containers: &ContainerSpecList) -> Result<()> {
        let mut streams = StreamSet::new();
        for spec in containers.ordered(Direction::Startup) {
            match self.runtime.logs(spec).await {
                Ok(stream) => streams.push(stream),
                Err(e) => error!("Error getting log for {}: {}", spec.name, e),
            }
        }
        streams.wait_all().await;
        Ok(())
    }

    /// Stream engine stats for all containers until the stream ends
    pub async fn stats(&self, containers: &ContainerSpecList) -> Result<()> {
        let names: Vec<&str> = containers
            .ordered(Direction::Startup)
            .into_iter()
            .map(|spec| spec.name.as_str())
            .collect();
        self.runtime.stats(&names).await?.wait().await
    }
}
