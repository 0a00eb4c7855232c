//! Config Hook Error Hierarchy
//!
//! Errors are grouped by the collaborator that produced them. Only
//! construction-time failures are meant to reach the process boundary; the
//! watch loops and the dispatcher handlers log and recover from the rest.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration source or deserialization failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Semantically invalid configuration values
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Remote key/value store failures
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Service discovery backend failures
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Container runtime failures
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// Malformed hook declarations
    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Action for hook {hook} failed: {reason}")]
    ActionFailed { hook: String, reason: String },

    #[error("{0}")]
    SignalSenderClosed(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store location could not be parsed
    #[error("Invalid store location: {0}")]
    InvalidLocation(String),

    /// The location scheme does not name a supported backend
    #[error("Unsupported store scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    /// `list` was asked for a leaf node
    #[error("Path is not a directory: {0}")]
    NotADirectory(String),

    /// Error document returned by the store itself
    #[error("Store responded with error {code}: {message}")]
    Backend { code: u64, message: String },

    /// TLS material could not be loaded
    #[error("Failed to load TLS material {path}: {reason}")]
    Tls { path: String, reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Invalid discovery location: {0}")]
    InvalidLocation(String),

    #[error("Unsupported discovery scheme: {0}")]
    UnsupportedScheme(String),

    /// A service document is missing a required field or is not valid JSON
    #[error("Invalid service document: {0}")]
    InvalidDocument(String),

    /// Blocking query answered without an index header
    #[error("Discovery response did not carry a wait index")]
    MissingIndex,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The container disappeared between listing and inspection
    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Invalid container runtime socket: {0}")]
    InvalidSocket(String),

    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HookError {
    /// The name carries the hook prefix but does not follow the grammar
    #[error("Invalid config hook key: {0} does not match expectation")]
    InvalidKey(String),

    /// A declaration is missing a required element
    #[error("Hook {id} is incomplete: missing {missing}")]
    Incomplete { id: String, missing: &'static str },
}
