use crate::container::{ContainerSpec, ContainerSpecList, RunArgs};
use crate::error::{CapitanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Project definition as emitted by the config command
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProjectDefinition {
    pub project: String,

    /// Joins project, service and instance number into container names
    #[serde(default = "default_separator")]
    pub separator: String,

    #[serde(default, rename = "service")]
    pub services: Vec<ServiceDefinition>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServiceDefinition {
    pub name: String,

    /// Image reference; defaults to a project-local tag when `build` is set
    pub image: Option<String>,

    #[serde(default)]
    pub placement: i64,

    /// Number of instances to run
    #[serde(default = "default_scale")]
    pub scale: u32,

    pub build: Option<PathBuf>,

    #[serde(default)]
    pub run: RunArgs,

    #[serde(default)]
    pub hooks: BTreeMap<String, String>,
}

/// Containers a project expands to
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectConfig {
    pub project_name: String,
    /// Instances that should exist
    pub declared: ContainerSpecList,
    /// Instances above each service's scale, removed on scale-down
    pub cleanup: ContainerSpecList,
}

impl ProjectDefinition {
    pub fn parse(source: &str) -> Result<Self> {
        let definition: ProjectDefinition = toml::from_str(source)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Obtain the definition from `command`.
    ///
    /// A `.toml` path is read directly. Anything else is run through `shell`
    /// with `args` as positional parameters and its stdout is parsed.
    pub async fn load(command: &str, shell: &str, args: &[String]) -> Result<Self> {
        let source = if command.ends_with(".toml") {
            debug!("Reading project definition from: {}", command);
            tokio::fs::read_to_string(Path::new(command))
                .await
                .map_err(|e| {
                    CapitanError::project(format!("Failed to read {}: {}", command, e))
                })?
        } else {
            debug!("Running config command: {}", command);
            let output = Command::new(shell)
                .arg("-c")
                .arg(format!("{} \"$@\"", command))
                .arg("capitan")
                .args(args)
                .stdin(Stdio::null())
                .stderr(Stdio::inherit())
                .output()
                .await
                .map_err(|e| {
                    CapitanError::project(format!("Failed to run {}: {}", command, e))
                })?;

            if !output.status.success() {
                return Err(CapitanError::project(format!(
                    "Config command {} exited with {}",
                    command, output.status
                )));
            }

            String::from_utf8(output.stdout).map_err(|e| {
                CapitanError::project(format!("Config command output is not UTF-8: {}", e))
            })?
        };

        let definition = Self::parse(&source)?;
        info!(
            "Loaded project {} with {} service(s)",
            definition.project,
            definition.services.len()
        );
        Ok(definition)
    }

    pub fn validate(&self) -> Result<()> {
        if self.project.trim().is_empty() {
            return Err(CapitanError::project("Project name must not be empty"));
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(CapitanError::project("Service name must not be empty"));
            }
            if !seen.insert(service.name.as_str()) {
                return Err(CapitanError::project(format!(
                    "Service {} is declared more than once",
                    service.name
                )));
            }
            if service.image.is_none() && service.build.is_none() {
                return Err(CapitanError::project(format!(
                    "Service {} needs an image or a build context",
                    service.name
                )));
            }
        }

        Ok(())
    }

    pub fn container_name(&self, service: &str, instance: u32) -> String {
        format!(
            "{project}{sep}{service}{sep}{instance}",
            project = self.project,
            sep = self.separator,
            service = service,
            instance = instance
        )
    }

    /// Expand services into declared and cleanup instances.
    ///
    /// Declaration order is kept so that placement ties start in the order
    /// the services were written.
    pub fn expand(&self, cleanup_window: u32) -> ProjectConfig {
        let mut declared = Vec::new();
        let mut cleanup = Vec::new();

        for service in &self.services {
            for instance in 1..=service.scale {
                declared.push(self.instance(service, instance));
            }
            let first_extra = service.scale.saturating_add(1);
            for instance in first_extra..first_extra.saturating_add(cleanup_window) {
                cleanup.push(self.instance(service, instance));
            }
        }

        ProjectConfig {
            project_name: self.project.clone(),
            declared: declared.into(),
            cleanup: cleanup.into(),
        }
    }

    fn instance(&self, service: &ServiceDefinition, instance: u32) -> ContainerSpec {
        let image = service.image.clone().unwrap_or_else(|| {
            format!("{}{}{}", self.project, self.separator, service.name)
        });

        ContainerSpec {
            name: self.container_name(&service.name, instance),
            service_type: service.name.clone(),
            instance_number: instance,
            project_name: self.project.clone(),
            placement: service.placement,
            image,
            build: service.build.clone(),
            run: service.run.clone(),
            hooks: service.hooks.clone(),
        }
    }
}

impl ProjectConfig {
    /// Restrict both lists to a service type or container name
    pub fn filtered(&self, filter: &str) -> Self {
        let matches = |spec: &ContainerSpec| spec.service_type == filter || spec.name == filter;
        Self {
            project_name: self.project_name.clone(),
            declared: self.declared.filter(matches),
            cleanup: self.cleanup.filter(matches),
        }
    }

    /// Restrict both lists to one service type
    pub fn service(&self, service_type: &str) -> Self {
        let matches = |spec: &ContainerSpec| spec.service_type == service_type;
        Self {
            project_name: self.project_name.clone(),
            declared: self.declared.filter(matches),
            cleanup: self.cleanup.filter(matches),
        }
    }
}

fn default_separator() -> String {
    "_".to_string()
}

fn default_scale() -> u32 {
    1
}
