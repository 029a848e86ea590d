// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised inside the remote gateways.
///
/// These never cross the public gateway contract: reads collapse them to an
/// empty result and writes to `false`. They exist so the failure is logged
/// with its actual cause.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Network error calling {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed response from {url}: {message}")]
    Malformed { url: String, message: String },

    #[error("Backend reported failure: {0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    pub fn malformed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Errors from the identity collaborator.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Login failed: {0}")]
    SignInFailed(String),

    #[error("No clientName found for this user.")]
    MissingClient,

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),

    #[error("Credential storage error: {0}")]
    Storage(#[from] PersistError),
}

/// Errors reading or writing local state files.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Data directory not found")]
    DataDirNotFound,

    #[error("IO error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {path}: {message}")]
    MalformedJson { path: PathBuf, message: String },
}

impl PersistError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
