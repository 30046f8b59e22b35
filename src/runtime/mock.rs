use super::{ObservedState, RuntimeAdapter, StreamHandle};
use crate::container::ContainerSpec;
use crate::error::{CapitanError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// One recorded adapter call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Query(String),
    LocalImageId(String),
    Create(String),
    Start(String),
    Stop(String),
    Kill(String),
    Remove(String),
    Restart(String),
    Build(String),
    Pull(String),
    Ip(String),
    Ps(Vec<String>),
    Attach(String),
    Logs(String),
    Stats(Vec<String>),
}

impl MockCall {
    pub fn operation(&self) -> &'static str {
        match self {
            MockCall::Query(_) => "query",
            MockCall::LocalImageId(_) => "image",
            MockCall::Create(_) => "create",
            MockCall::Start(_) => "start",
            MockCall::Stop(_) => "stop",
            MockCall::Kill(_) => "kill",
            MockCall::Remove(_) => "rm",
            MockCall::Restart(_) => "restart",
            MockCall::Build(_) => "build",
            MockCall::Pull(_) => "pull",
            MockCall::Ip(_) => "ip",
            MockCall::Ps(_) => "ps",
            MockCall::Attach(_) => "attach",
            MockCall::Logs(_) => "logs",
            MockCall::Stats(_) => "stats",
        }
    }

    pub fn target(&self) -> String {
        match self {
            MockCall::Ps(names) | MockCall::Stats(names) => names.join(","),
            MockCall::Query(target)
            | MockCall::LocalImageId(target)
            | MockCall::Create(target)
            | MockCall::Start(target)
            | MockCall::Stop(target)
            | MockCall::Kill(target)
            | MockCall::Remove(target)
            | MockCall::Restart(target)
            | MockCall::Build(target)
            | MockCall::Pull(target)
            | MockCall::Ip(target)
            | MockCall::Attach(target)
            | MockCall::Logs(target) => target.clone(),
        }
    }

    /// Whether the call changes engine state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            MockCall::Create(_)
                | MockCall::Start(_)
                | MockCall::Stop(_)
                | MockCall::Kill(_)
                | MockCall::Remove(_)
                | MockCall::Restart(_)
                | MockCall::Build(_)
                | MockCall::Pull(_)
        )
    }
}

/// State of one container held by the mock engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockContainer {
    pub running: bool,
    pub image_id: String,
    pub run_signature: String,
}

#[derive(Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    images: HashMap<String, String>,
    calls: Vec<MockCall>,
    failures: HashSet<(String, String)>,
    vanishing: HashSet<(String, String)>,
    delays: HashMap<String, Duration>,
    image_counter: u32,
}

/// In-memory container engine for exercising the sequencer without docker
pub struct MockRuntime {
    state: Mutex<MockState>,
    streams_released: watch::Sender<bool>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        let (streams_released, _) = watch::channel(false);
        Self {
            state: Mutex::new(MockState::default()),
            streams_released,
        }
    }

    /// Make an image available locally
    pub fn add_image(&self, image: &str, id: &str) {
        self.state
            .lock()
            .images
            .insert(image.to_string(), id.to_string());
    }

    pub fn add_container(&self, name: &str, container: MockContainer) {
        self.state
            .lock()
            .containers
            .insert(name.to_string(), container);
    }

    pub fn container(&self, name: &str) -> Option<MockContainer> {
        self.state.lock().containers.get(name).cloned()
    }

    /// Make `operation` on `target` fail with a runtime call error
    pub fn fail_on(&self, operation: &str, target: &str) {
        self.state
            .lock()
            .failures
            .insert((operation.to_string(), target.to_string()));
    }

    /// Remove `target` from the engine right before `operation` runs on it,
    /// as if another client deleted it after it was queried
    pub fn vanish_on(&self, operation: &str, target: &str) {
        self.state
            .lock()
            .vanishing
            .insert((operation.to_string(), target.to_string()));
    }

    /// Delay every `operation` call by `delay`
    pub fn set_delay(&self, operation: &str, delay: Duration) {
        self.state.lock().delays.insert(operation.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<MockCall> {
        self.calls()
            .into_iter()
            .filter(MockCall::is_mutating)
            .collect()
    }

    /// Calls of one operation, in order
    pub fn calls_of(&self, operation: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.operation() == operation)
            .map(|call| call.target())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// End every open and future attach, logs and stats stream
    pub fn release_streams(&self) {
        self.streams_released.send_replace(true);
    }

    async fn begin(&self, call: MockCall) -> Result<()> {
        let delay = {
            let mut state = self.state.lock();
            let key = (call.operation().to_string(), call.target());
            state.calls.push(call.clone());
            if state.failures.contains(&key) {
                return Err(CapitanError::runtime_call(
                    call.operation(),
                    call.target(),
                    "injected failure",
                ));
            }
            if state.vanishing.remove(&key) {
                state.containers.remove(&key.1);
            }
            state.delays.get(call.operation()).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn with_container<T, F>(&self, name: &str, update: F) -> Result<T>
    where
        F: FnOnce(&mut MockContainer) -> Result<T>,
    {
        let mut state = self.state.lock();
        match state.containers.get_mut(name) {
            Some(container) => update(container),
            None => Err(CapitanError::already_absent(name)),
        }
    }

    fn stream(&self, name: String) -> StreamHandle {
        let mut released = self.streams_released.subscribe();
        StreamHandle::spawn(name.clone(), async move {
            while !*released.borrow_and_update() {
                if released.changed().await.is_err() {
                    break;
                }
            }
            debug!("Mock stream for {} ended", name);
            Ok(())
        })
    }

    fn next_image_id(state: &mut MockState, prefix: &str) -> String {
        state.image_counter += 1;
        format!("sha256:{}-{}", prefix, state.image_counter)
    }
}

#[async_trait]
impl RuntimeAdapter for MockRuntime {
    async fn query(&self, spec: &ContainerSpec) -> Result<ObservedState> {
        self.begin(MockCall::Query(spec.name.clone())).await?;
        let state = self.state.lock();
        Ok(match state.containers.get(&spec.name) {
            Some(container) => ObservedState {
                exists: true,
                running: container.running,
                image_id: Some(container.image_id.clone()),
                run_signature: Some(container.run_signature.clone()),
            },
            None => ObservedState::absent(),
        })
    }

    async fn local_image_id(&self, image: &str) -> Result<Option<String>> {
        self.begin(MockCall::LocalImageId(image.to_string())).await?;
        Ok(self.state.lock().images.get(image).cloned())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        self.begin(MockCall::Create(spec.name.clone())).await?;
        let mut state = self.state.lock();
        if state.containers.contains_key(&spec.name) {
            return Err(CapitanError::runtime_call(
                "create",
                &spec.name,
                "name is already in use",
            ));
        }
        let image_id = state.images.get(&spec.image).cloned().ok_or_else(|| {
            CapitanError::runtime_call("create", &spec.name, "image not found locally")
        })?;
        state.containers.insert(
            spec.name.clone(),
            MockContainer {
                running: false,
                image_id,
                run_signature: spec.run_signature(),
            },
        );
        Ok(())
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<()> {
        self.begin(MockCall::Start(spec.name.clone())).await?;
        self.with_container(&spec.name, |container| {
            container.running = true;
            Ok(())
        })
    }

    async fn stop(&self, spec: &ContainerSpec, _args: &[String]) -> Result<()> {
        self.begin(MockCall::Stop(spec.name.clone())).await?;
        self.with_container(&spec.name, |container| {
            container.running = false;
            Ok(())
        })
    }

    async fn kill(&self, spec: &ContainerSpec, _args: &[String]) -> Result<()> {
        self.begin(MockCall::Kill(spec.name.clone())).await?;
        self.with_container(&spec.name, |container| {
            container.running = false;
            Ok(())
        })
    }

    async fn remove(&self, spec: &ContainerSpec, args: &[String]) -> Result<()> {
        self.begin(MockCall::Remove(spec.name.clone())).await?;
        let force = args.iter().any(|arg| arg == "-f" || arg == "--force");
        let mut state = self.state.lock();
        match state.containers.get(&spec.name) {
            None => Err(CapitanError::already_absent(&spec.name)),
            Some(container) if container.running && !force => Err(CapitanError::runtime_call(
                "rm",
                &spec.name,
                "cannot remove a running container",
            )),
            Some(_) => {
                state.containers.remove(&spec.name);
                Ok(())
            }
        }
    }

    async fn restart(&self, spec: &ContainerSpec, _args: &[String]) -> Result<()> {
        self.begin(MockCall::Restart(spec.name.clone())).await?;
        self.with_container(&spec.name, |container| {
            container.running = true;
            Ok(())
        })
    }

    async fn build(&self, spec: &ContainerSpec) -> Result<()> {
        self.begin(MockCall::Build(spec.image.clone())).await?;
        let mut state = self.state.lock();
        let id = Self::next_image_id(&mut state, "built");
        state.images.insert(spec.image.clone(), id);
        Ok(())
    }

    async fn pull(&self, image: &str) -> Result<()> {
        self.begin(MockCall::Pull(image.to_string())).await?;
        let mut state = self.state.lock();
        let id = Self::next_image_id(&mut state, "pulled");
        state.images.insert(image.to_string(), id);
        Ok(())
    }

    async fn ip(&self, spec: &ContainerSpec) -> Result<String> {
        self.begin(MockCall::Ip(spec.name.clone())).await?;
        self.with_container(&spec.name, |_| Ok(format!("10.0.0.{}", spec.instance_number)))
    }

    async fn ps(&self, names: &[&str], _args: &[String]) -> Result<String> {
        let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        self.begin(MockCall::Ps(names.clone())).await?;
        let state = self.state.lock();
        Ok(names
            .iter()
            .filter(|name| state.containers.contains_key(name.as_str()))
            .cloned()
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn attach(&self, spec: &ContainerSpec) -> Result<StreamHandle> {
        self.begin(MockCall::Attach(spec.name.clone())).await?;
        Ok(self.stream(spec.name.clone()))
    }

    async fn logs(&self, spec: &ContainerSpec) -> Result<StreamHandle> {
        self.begin(MockCall::Logs(spec.name.clone())).await?;
        Ok(self.stream(spec.name.clone()))
    }

    async fn stats(&self, names: &[&str]) -> Result<StreamHandle> {
        let names: Vec<String> = names.iter().map(|name| name.to_string()).collect();
        self.begin(MockCall::Stats(names.clone())).await?;
        Ok(self.stream(names.join(",")))
    }
}
