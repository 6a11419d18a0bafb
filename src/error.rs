//! Error types for edaflow

use thiserror::Error;

/// edaflow error types
#[derive(Error, Debug)]
pub enum EdaFlowError {
    /// JSON manifest errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML manifest errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Runner settings errors
    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Telemetry registry errors
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] prometheus::Error),

    /// Key path does not address a node in the parameter tree
    #[error("Invalid key path '{key}': {reason}")]
    InvalidKeyPath { key: String, reason: String },

    /// Value cannot be coerced to the declared leaf type
    #[error("Type mismatch for '{key}': {reason}")]
    TypeMismatch { key: String, reason: String },

    /// Configuration failed the validity check
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stage names an input stage that is not in the flow graph
    #[error("Stage '{stage}' depends on non-existent stage '{input}'")]
    MissingInput { stage: String, input: String },

    /// Flow graph has a cycle
    #[error("Cycle detected in flow graph: {0}")]
    CycleDetected(String),

    /// Tool binary could not be resolved on the search path
    #[error("Executable '{0}' not installed")]
    ExecutableNotFound(String),

    /// No driver registered for a tool
    #[error("No driver registered for tool '{0}'")]
    UnknownTool(String),

    /// Tool process exited non-zero
    #[error("Stage '{instance}' failed with exit code {code:?}, see {log}")]
    ToolFailed {
        instance: String,
        code: Option<i32>,
        log: String,
    },

    /// Post-process hook returned a non-zero status
    #[error("Post-processing for '{instance}' returned status {status}")]
    PostProcessFailed { instance: String, status: i32 },

    /// Instance observed the shared abort flag
    #[error("Run aborted before '{0}' could start")]
    Aborted(String),

    /// Dependency wait exceeded its bound
    #[error("Stage '{instance}' timed out after {secs} seconds waiting on inputs")]
    WaitTimeout { instance: String, secs: u64 },

    /// Target platform/flow loading errors
    #[error("Target error: {0}")]
    Target(String),

    /// Remote dispatch errors
    #[error("Remote dispatch error: {0}")]
    Remote(String),

    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias using EdaFlowError
pub type Result<T> = std::result::Result<T, EdaFlowError>;
