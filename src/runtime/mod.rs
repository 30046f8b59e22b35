mod docker;
mod mock;

pub use docker::DockerRuntime;
pub use mock::{MockCall, MockContainer, MockRuntime};

use crate::container::ContainerSpec;
use crate::error::{CapitanError, Result};
use async_trait::async_trait;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Point-in-time view of one container in the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedState {
    pub exists: bool,
    pub running: bool,
    pub image_id: Option<String>,
    pub run_signature: Option<String>,
}

impl ObservedState {
    pub fn absent() -> Self {
        Self::default()
    }
}

/// Primitive operations of the container engine.
///
/// Every method is a single engine call; ordering, dry-run and error
/// policy belong to the sequencer.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    async fn query(&self, spec: &ContainerSpec) -> Result<ObservedState>;

    /// Id of the locally available image, `None` when it has to be fetched
    async fn local_image_id(&self, image: &str) -> Result<Option<String>>;

    async fn create(&self, spec: &ContainerSpec) -> Result<()>;

    async fn start(&self, spec: &ContainerSpec) -> Result<()>;

    async fn stop(&self, spec: &ContainerSpec, args: &[String]) -> Result<()>;

    async fn kill(&self, spec: &ContainerSpec, args: &[String]) -> Result<()>;

    async fn remove(&self, spec: &ContainerSpec, args: &[String]) -> Result<()>;

    async fn restart(&self, spec: &ContainerSpec, args: &[String]) -> Result<()>;

    async fn build(&self, spec: &ContainerSpec) -> Result<()>;

    async fn pull(&self, image: &str) -> Result<()>;

    async fn ip(&self, spec: &ContainerSpec) -> Result<String>;

    /// Engine process listing restricted to `names`
    async fn ps(&self, names: &[&str], args: &[String]) -> Result<String>;

    /// Stream container output until it stops or the stream disconnects
    async fn attach(&self, spec: &ContainerSpec) -> Result<StreamHandle>;

    async fn logs(&self, spec: &ContainerSpec) -> Result<StreamHandle>;

    async fn stats(&self, names: &[&str]) -> Result<StreamHandle>;
}

/// Background stream task with a blocking wait
pub struct StreamHandle {
    name: String,
    task: JoinHandle<Result<()>>,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Run `stream` on the runtime until it finishes or the handle is cancelled
    pub fn spawn<S, F>(name: S, stream: F) -> Self
    where
        S: Into<String>,
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                result = stream => result,
                _ = token.cancelled() => Ok(()),
            }
        });

        Self {
            name: name.into(),
            task,
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the stream to end
    pub async fn wait(mut self) -> Result<()> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(CapitanError::system(format!(
                "Stream task for {} failed: {}",
                self.name, e
            ))),
        }
    }
}

/// A dropped handle stops its stream
impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
