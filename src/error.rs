use thiserror::Error;

#[derive(Error, Debug)]
pub enum CapitanError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Project definition error: {message}")]
    Project { message: String },

    #[error("{operation} failed for {target}: {message}")]
    RuntimeCall {
        operation: String,
        target: String,
        message: String,
    },

    #[error("Container {name} does not exist")]
    AlreadyAbsent { name: String },

    #[error("Hook {hook} failed for {container}: {message}")]
    Hook {
        hook: String,
        container: String,
        message: String,
    },

    #[error("System error: {message}")]
    System { message: String },
}

impl CapitanError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn project<S: Into<String>>(message: S) -> Self {
        Self::Project {
            message: message.into(),
        }
    }

    pub fn runtime_call<O, T, M>(operation: O, target: T, message: M) -> Self
    where
        O: Into<String>,
        T: Into<String>,
        M: Into<String>,
    {
        Self::RuntimeCall {
            operation: operation.into(),
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn already_absent<S: Into<String>>(name: S) -> Self {
        Self::AlreadyAbsent { name: name.into() }
    }

    pub fn hook<H, C, M>(hook: H, container: C, message: M) -> Self
    where
        H: Into<String>,
        C: Into<String>,
        M: Into<String>,
    {
        Self::Hook {
            hook: hook.into(),
            container: container.into(),
            message: message.into(),
        }
    }

    /// Whether the engine reported the target container as missing
    pub fn is_already_absent(&self) -> bool {
        matches!(self, Self::AlreadyAbsent { .. })
    }
}

pub type Result<T> = std::result::Result<T, CapitanError>;
