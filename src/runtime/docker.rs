use super::{ObservedState, RuntimeAdapter, StreamHandle};
use crate::container::{ContainerSpec, SIGNATURE_LABEL};
use crate::error::{CapitanError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runtime adapter driving the docker CLI (or a compatible binary)
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectContainer {
    image: String,
    state: InspectState,
    config: InspectConfig,
    #[serde(default)]
    network_settings: Option<InspectNetworkSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    running: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
    #[serde(default)]
    networks: Option<HashMap<String, InspectNetwork>>,
}

#[derive(Debug, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

fn is_missing(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no such container") || stderr.contains("no such object")
}

impl DockerRuntime {
    pub fn new<S: Into<String>>(binary: S) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self, spec: Option<&ContainerSpec>) -> Command {
        let mut command = Command::new(&self.binary);
        command.stdin(Stdio::null()).kill_on_drop(true);
        if let Some(spec) = spec {
            command.envs(spec.env());
        }
        command
    }

    /// Run one engine call and return its stdout
    async fn run(
        &self,
        operation: &str,
        target: &str,
        spec: Option<&ContainerSpec>,
        args: Vec<String>,
    ) -> Result<String> {
        debug!("{} {}", self.binary, args.join(" "));

        let output = self
            .command(spec)
            .args(&args)
            .output()
            .await
            .map_err(|e| CapitanError::runtime_call(operation, target, e.to_string()))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if spec.is_some() && is_missing(&stderr) {
            return Err(CapitanError::already_absent(target));
        }
        Err(CapitanError::runtime_call(operation, target, stderr))
    }

    /// Run an engine call with output going straight to the terminal
    async fn run_inherited(&self, operation: &str, target: &str, args: Vec<String>) -> Result<()> {
        debug!("{} {}", self.binary, args.join(" "));

        let status = self
            .command(None)
            .args(&args)
            .status()
            .await
            .map_err(|e| CapitanError::runtime_call(operation, target, e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(CapitanError::runtime_call(
                operation,
                target,
                format!("exited with {}", status),
            ))
        }
    }

    fn spawn_stream(
        &self,
        operation: &'static str,
        target: String,
        spec: Option<&ContainerSpec>,
        args: Vec<String>,
    ) -> Result<StreamHandle> {
        debug!("{} {}", self.binary, args.join(" "));

        let mut command = self.command(spec);
        command
            .args(&args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        // Keep terminal interrupts away from the stream so only capitan sees them
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| CapitanError::runtime_call(operation, target.clone(), e.to_string()))?;

        let name = target.clone();
        Ok(StreamHandle::spawn(name, async move {
            let status = child
                .wait()
                .await
                .map_err(|e| CapitanError::runtime_call(operation, target.clone(), e.to_string()))?;
            debug!("{} stream for {} ended with {}", operation, target, status);
            Ok(())
        }))
    }

    async fn inspect(&self, spec: &ContainerSpec) -> Result<Option<InspectContainer>> {
        let args = vec![
            "inspect".to_string(),
            "--type".to_string(),
            "container".to_string(),
            spec.name.clone(),
        ];
        match self.run("inspect", &spec.name, Some(spec), args).await {
            Ok(stdout) => {
                let mut containers: Vec<InspectContainer> = serde_json::from_str(&stdout)?;
                Ok(containers.pop())
            }
            Err(e) if e.is_already_absent() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn with_args(operation: &str, args: &[String], name: &str) -> Vec<String> {
        let mut all = Vec::with_capacity(args.len() + 2);
        all.push(operation.to_string());
        all.extend(args.iter().cloned());
        all.push(name.to_string());
        all
    }
}

#[async_trait]
impl RuntimeAdapter for DockerRuntime {
    async fn query(&self, spec: &ContainerSpec) -> Result<ObservedState> {
        let container = match self.inspect(spec).await? {
            Some(container) => container,
            None => return Ok(ObservedState::absent()),
        };

        let run_signature = container
            .config
            .labels
            .and_then(|mut labels| labels.remove(SIGNATURE_LABEL));

        Ok(ObservedState {
            exists: true,
            running: container.state.running,
            image_id: Some(container.image).filter(|id| !id.is_empty()),
            run_signature,
        })
    }

    async fn local_image_id(&self, image: &str) -> Result<Option<String>> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Id}}".to_string(),
            image.to_string(),
        ];
        // Any failure here means the image is not available locally
        match self.run("image inspect", image, None, args).await {
            Ok(stdout) => Ok(Some(stdout.trim().to_string()).filter(|id| !id.is_empty())),
            Err(CapitanError::RuntimeCall { message, .. }) => {
                debug!("Image {} not found locally: {}", image, message);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<()> {
        let mut args = vec!["create".to_string()];
        args.extend(spec.create_args());
        self.run("create", &spec.name, Some(spec), args).await?;
        Ok(())
    }

    async fn start(&self, spec: &ContainerSpec) -> Result<()> {
        let args = vec!["start".to_string(), spec.name.clone()];
        self.run("start", &spec.name, Some(spec), args).await?;
        Ok(())
    }

    async fn stop(&self, spec: &ContainerSpec, args: &[String]) -> Result<()> {
        let args = Self::with_args("stop", args, &spec.name);
        self.run("stop", &spec.name, Some(spec), args).await?;
        Ok(())
    }

    async fn kill(&self, spec: &ContainerSpec, args: &[String]) -> Result<()> {
        let args = Self::with_args("kill", args, &spec.name);
        self.run("kill", &spec.name, Some(spec), args).await?;
        Ok(())
    }

    async fn remove(&self, spec: &ContainerSpec, args: &[String]) -> Result<()> {
        let args = Self::with_args("rm", args, &spec.name);
        self.run("rm", &spec.name, Some(spec), args).await?;
        Ok(())
    }

    async fn restart(&self, spec: &ContainerSpec, args: &[String]) -> Result<()> {
        let args = Self::with_args("restart", args, &spec.name);
        self.run("restart", &spec.name, Some(spec), args).await?;
        Ok(())
    }

    async fn build(&self, spec: &ContainerSpec) -> Result<()> {
        let context = spec.build.as_ref().ok_or_else(|| {
            CapitanError::runtime_call("build", &spec.name, "no build context configured")
        })?;
        let args = vec![
            "build".to_string(),
            "--tag".to_string(),
            spec.image.clone(),
            context.to_string_lossy().into_owned(),
        ];
        self.run_inherited("build", &spec.image, args).await
    }

    async fn pull(&self, image: &str) -> Result<()> {
        let args = vec!["pull".to_string(), image.to_string()];
        self.run_inherited("pull", image, args).await
    }

    async fn ip(&self, spec: &ContainerSpec) -> Result<String> {
        let container = self
            .inspect(spec)
            .await?
            .ok_or_else(|| CapitanError::already_absent(&spec.name))?;

        let address = container
            .network_settings
            .map(|settings| {
                if !settings.ip_address.is_empty() {
                    return settings.ip_address;
                }
                settings
                    .networks
                    .unwrap_or_default()
                    .into_values()
                    .map(|network| network.ip_address)
                    .find(|ip| !ip.is_empty())
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        Ok(address)
    }

    async fn ps(&self, names: &[&str], args: &[String]) -> Result<String> {
        // Without a name filter docker would list every container on the host
        if names.is_empty() {
            return Ok(String::new());
        }
        let mut all = vec!["ps".to_string()];
        all.extend(args.iter().cloned());
        for name in names {
            all.push("--filter".to_string());
            all.push(format!("name=^{}$", name));
        }
        self.run("ps", "project", None, all).await
    }

    async fn attach(&self, spec: &ContainerSpec) -> Result<StreamHandle> {
        let args = vec![
            "attach".to_string(),
            "--no-stdin".to_string(),
            "--sig-proxy=false".to_string(),
            spec.name.clone(),
        ];
        self.spawn_stream("attach", spec.name.clone(), Some(spec), args)
    }

    async fn logs(&self, spec: &ContainerSpec) -> Result<StreamHandle> {
        let args = vec!["logs".to_string(), "--follow".to_string(), spec.name.clone()];
        self.spawn_stream("logs", spec.name.clone(), Some(spec), args)
    }

    async fn stats(&self, names: &[&str]) -> Result<StreamHandle> {
        if names.is_empty() {
            return Ok(StreamHandle::spawn("stats", async { Ok(()) }));
        }
        let mut args = vec!["stats".to_string()];
        args.extend(names.iter().map(|name| name.to_string()));
        self.spawn_stream("stats", "project".to_string(), None, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSPECT: &str = r#"[{
        "Id": "abc",
        "Image": "sha256:1111",
        "State": { "Running": true, "Status": "running" },
        "Config": { "Labels": { "capitan.signature": "deadbeef", "other": "x" } },
        "NetworkSettings": {
            "IPAddress": "",
            "Networks": { "shop": { "IPAddress": "172.18.0.4" } }
        }
    }]"#;

    #[test]
    fn test_inspect_parsing() {
        let mut containers: Vec<InspectContainer> = serde_json::from_str(INSPECT).unwrap();
        let container = containers.pop().unwrap();

        assert!(container.state.running);
        assert_eq!(container.image, "sha256:1111");
        assert_eq!(
            container.config.labels.unwrap().get(SIGNATURE_LABEL).map(String::as_str),
            Some("deadbeef")
        );
        let networks = container.network_settings.unwrap().networks.unwrap();
        assert_eq!(networks["shop"].ip_address, "172.18.0.4");
    }

    #[test]
    fn test_inspect_without_labels() {
        let json = r#"[{"Image": "sha256:2", "State": {"Running": false}, "Config": {"Labels": null}}]"#;
        let containers: Vec<InspectContainer> = serde_json::from_str(json).unwrap();
        assert!(containers[0].config.labels.is_none());
        assert!(containers[0].network_settings.is_none());
    }

    #[test]
    fn test_missing_container_detection() {
        assert!(is_missing("Error: No such container: shop_web_1"));
        assert!(is_missing("Error: No such object: shop_web_1"));
        assert!(!is_missing("permission denied"));
    }

    #[test]
    fn test_args_follow_operation() {
        let args = DockerRuntime::with_args("stop", &["-t".to_string(), "5".to_string()], "web");
        assert_eq!(args, vec!["stop", "-t", "5", "web"]);
    }

    #[tokio::test]
    async fn test_unknown_binary_is_runtime_call_error() {
        let runtime = DockerRuntime::new("/nonexistent/capitan-engine");
        let result = runtime.pull("nginx").await;
        assert!(matches!(result, Err(CapitanError::RuntimeCall { .. })));
    }

    #[tokio::test]
    async fn test_empty_selection_never_reaches_engine() {
        let runtime = DockerRuntime::new("/nonexistent/capitan-engine");

        let listing = runtime.ps(&[], &["-a".to_string()]).await.unwrap();
        assert!(listing.is_empty());

        let stream = runtime.stats(&[]).await.unwrap();
        assert!(stream.wait().await.is_ok());
    }
}
