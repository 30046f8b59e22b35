use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const PROJECT_LABEL: &str = "capitan.project";
pub const SERVICE_LABEL: &str = "capitan.service";
pub const INSTANCE_LABEL: &str = "capitan.instance";
pub const SIGNATURE_LABEL: &str = "capitan.signature";

/// Declared state of one container instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub service_type: String,
    pub instance_number: u32,
    pub project_name: String,
    /// Ordering key, lower values start first
    pub placement: i64,
    pub image: String,
    /// Build context; when set a missing image is built instead of pulled
    pub build: Option<PathBuf>,
    #[serde(default)]
    pub run: RunArgs,
    #[serde(default)]
    pub hooks: BTreeMap<String, String>,
}

/// Arguments the container is created with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunArgs {
    pub env: BTreeMap<String, String>,
    pub ports: Vec<String>,
    pub volumes: Vec<String>,
    pub links: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub network: Option<String>,
    pub hostname: Option<String>,
    pub restart: Option<String>,
    /// Passed through verbatim, order preserved
    pub extra: Vec<String>,
    pub command: Vec<String>,
}

/// Order-normalised view of `RunArgs` used for drift detection.
///
/// Maps are already sorted; ports, volumes and links are compared as
/// multisets. `extra` and `command` keep their order since it changes
/// meaning.
#[derive(Serialize)]
struct CanonicalRunArgs<'a> {
    env: &'a BTreeMap<String, String>,
    ports: Vec<&'a str>,
    volumes: Vec<&'a str>,
    links: Vec<&'a str>,
    labels: &'a BTreeMap<String, String>,
    network: Option<&'a str>,
    hostname: Option<&'a str>,
    restart: Option<&'a str>,
    extra: &'a [String],
    command: &'a [String],
}

fn sorted(values: &[String]) -> Vec<&str> {
    let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
    values.sort_unstable();
    values
}

impl RunArgs {
    /// Hex SHA-256 of the canonical form of these arguments
    pub fn signature(&self) -> String {
        let canonical = CanonicalRunArgs {
            env: &self.env,
            ports: sorted(&self.ports),
            volumes: sorted(&self.volumes),
            links: sorted(&self.links),
            labels: &self.labels,
            network: self.network.as_deref(),
            hostname: self.hostname.as_deref(),
            restart: self.restart.as_deref(),
            extra: &self.extra,
            command: &self.command,
        };

        // Serializing borrowed strings and maps into a Vec cannot fail
        let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }
}

impl ContainerSpec {
    /// Environment exposed to hooks and engine invocations for this container
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("CAPITAN_PROJECT_NAME".to_string(), self.project_name.clone()),
            ("CAPITAN_CONTAINER_NAME".to_string(), self.name.clone()),
            (
                "CAPITAN_CONTAINER_SERVICE_TYPE".to_string(),
                self.service_type.clone(),
            ),
            (
                "CAPITAN_CONTAINER_INSTANCE_NUMBER".to_string(),
                self.instance_number.to_string(),
            ),
        ]
    }

    pub fn run_signature(&self) -> String {
        self.run.signature()
    }

    /// Arguments following `create` on the engine command line
    pub fn create_args(&self) -> Vec<String> {
        let mut args = vec!["--name".to_string(), self.name.clone()];

        let mut label = |key: &str, value: &str| {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        };
        label(PROJECT_LABEL, &self.project_name);
        label(SERVICE_LABEL, &self.service_type);
        label(INSTANCE_LABEL, &self.instance_number.to_string());
        label(SIGNATURE_LABEL, &self.run_signature());
        for (key, value) in &self.run.labels {
            label(key, value);
        }

        for (key, value) in &self.run.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        for port in &self.run.ports {
            args.push("--publish".to_string());
            args.push(port.clone());
        }
        for volume in &self.run.volumes {
            args.push("--volume".to_string());
            args.push(volume.clone());
        }
        for link in &self.run.links {
            args.push("--link".to_string());
            args.push(link.clone());
        }
        if let Some(network) = &self.run.network {
            args.push(format!("--network={}", network));
        }
        if let Some(hostname) = &self.run.hostname {
            args.push(format!("--hostname={}", hostname));
        }
        if let Some(restart) = &self.run.restart {
            args.push(format!("--restart={}", restart));
        }
        args.extend(self.run.extra.iter().cloned());
        args.push(self.image.clone());
        args.extend(self.run.command.iter().cloned());
        args
    }

    pub fn hook(&self, name: &str) -> Option<&str> {
        self.hooks.get(name).map(String::as_str)
    }
}

/// Traversal direction over a container list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending placement, ties in declaration order
    Startup,
    /// Exact reverse of the startup order
    Teardown,
}

/// Ordered collection of container specs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpecList(Vec<ContainerSpec>);

impl ContainerSpecList {
    pub fn new(specs: Vec<ContainerSpec>) -> Self {
        Self(specs)
    }

    /// Containers in traversal order for the given direction.
    ///
    /// The startup order is a stable ascending sort on placement; teardown
    /// reverses that sequence rather than sorting descending, so ties come
    /// out in reverse declaration order.
    pub fn ordered(&self, direction: Direction) -> Vec<&ContainerSpec> {
        let mut specs: Vec<&ContainerSpec> = self.0.iter().collect();
        specs.sort_by_key(|spec| spec.placement);
        if direction == Direction::Teardown {
            specs.reverse();
        }
        specs
    }

    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&ContainerSpec) -> bool,
    {
        Self(self.0.iter().filter(|spec| predicate(spec)).cloned().collect())
    }

    /// This list followed by `other`
    pub fn combined(&self, other: &ContainerSpecList) -> Self {
        Self(self.0.iter().chain(other.0.iter()).cloned().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContainerSpec> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|spec| spec.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<ContainerSpec>> for ContainerSpecList {
    fn from(specs: Vec<ContainerSpec>) -> Self {
        Self(specs)
    }
}
