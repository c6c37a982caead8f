use serde::Serialize;
use thiserror::Error;

/// Pipeline stage an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Auth,
    Fetch,
    Transform,
    Enrich,
    Load,
    Metrics,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Auth => "auth",
            Self::Fetch => "fetch",
            Self::Transform => "transform",
            Self::Enrich => "enrich",
            Self::Load => "load",
            Self::Metrics => "metrics",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Token exchange failed: {0}")]
    Auth(String),

    #[error("Change API request failed at offset {offset}: {message}")]
    Fetch { offset: usize, message: String },

    #[error("Record {position} could not be transformed: {message}")]
    Transform { position: usize, message: String },

    #[error("Service mapping error: {0}")]
    Mapping(String),

    #[error("Index write failed: {0}")]
    Load(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    /// The stage this error belongs to, if it is stage-specific.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Auth(_) => Some(Stage::Auth),
            Self::Fetch { .. } => Some(Stage::Fetch),
            Self::Transform { .. } => Some(Stage::Transform),
            Self::Mapping(_) | Self::Csv(_) => Some(Stage::Enrich),
            Self::Load(_) => Some(Stage::Load),
            Self::Config(_) | Self::Network(_) | Self::Json(_) | Self::Io(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
