use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Tool-level settings, independent of any project definition
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CapitanSettings {
    pub runtime: RuntimeConfig,
    pub hooks: HooksConfig,
    pub scale: ScaleConfig,
    pub teardown: TeardownConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Container engine CLI binary
    #[serde(default = "default_runtime_binary")]
    pub binary: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HooksConfig {
    /// Shell used for hooks and the config command
    #[serde(default = "default_hook_shell")]
    pub shell: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ScaleConfig {
    /// Number of instances above a service's scale that are swept on scale-down
    #[serde(default = "default_scale_window")]
    pub window: u32,
}

/// Which container lists take part in each teardown-style pass
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TeardownConfig {
    #[serde(default = "default_participating_set")]
    pub stop: ParticipatingSet,
    #[serde(default = "default_participating_set")]
    pub kill: ParticipatingSet,
    #[serde(default = "default_participating_set")]
    pub rm: ParticipatingSet,
    #[serde(default = "default_participating_set")]
    pub logs: ParticipatingSet,
    #[serde(default = "default_participating_set")]
    pub stats: ParticipatingSet,
    /// Set stopped or killed by the shutdown coordinator on interrupt
    #[serde(default = "default_participating_set")]
    pub signal: ParticipatingSet,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipatingSet {
    /// Containers the project currently declares
    Declared,
    /// Instances above each service's scale
    Cleanup,
    /// Declared followed by cleanup
    Combined,
}

impl CapitanSettings {
    /// Load settings from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading settings from: {}", path_str);

        let participating = default_participating_set().as_str();
        let settings = Config::builder()
            .set_default("runtime.binary", default_runtime_binary())?
            .set_default("hooks.shell", default_hook_shell())?
            .set_default("scale.window", default_scale_window())?
            .set_default("teardown.stop", participating)?
            .set_default("teardown.kill", participating)?
            .set_default("teardown.rm", participating)?
            .set_default("teardown.logs", participating)?
            .set_default("teardown.stats", participating)?
            .set_default("teardown.signal", participating)?
            // Settings file is optional
            .add_source(File::with_name(&path_str).required(false))
            // CAPITAN_RUNTIME_BINARY, CAPITAN_TEARDOWN_STOP, ...
            .add_source(Environment::with_prefix("CAPITAN").separator("_"))
            .build()?;

        let settings: CapitanSettings = settings.try_deserialize()?;

        info!("Settings loaded successfully");
        debug!("Final settings: {:#?}", settings);

        Ok(settings)
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.binary.trim().is_empty() {
            return Err(ConfigError::Message(
                "Runtime binary must not be empty".to_string(),
            ));
        }

        if self.hooks.shell.trim().is_empty() {
            return Err(ConfigError::Message(
                "Hook shell must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl ParticipatingSet {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipatingSet::Declared => "declared",
            ParticipatingSet::Cleanup => "cleanup",
            ParticipatingSet::Combined => "combined",
        }
    }
}

impl Default for CapitanSettings {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig {
                binary: default_runtime_binary(),
            },
            hooks: HooksConfig {
                shell: default_hook_shell(),
            },
            scale: ScaleConfig {
                window: default_scale_window(),
            },
            teardown: TeardownConfig {
                stop: default_participating_set(),
                kill: default_participating_set(),
                rm: default_participating_set(),
                logs: default_participating_set(),
                stats: default_participating_set(),
                signal: default_participating_set(),
            },
        }
    }
}

// Default value functions
fn default_runtime_binary() -> String {
    "docker".to_string()
}
fn default_hook_shell() -> String {
    "/bin/sh".to_string()
}
fn default_scale_window() -> u32 {
    10
}
fn default_participating_set() -> ParticipatingSet {
    ParticipatingSet::Combined
}
