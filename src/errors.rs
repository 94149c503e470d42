use std::path::PathBuf;

use thiserror::Error;

use crate::types::EntityKind;

/// Errors that can occur while extracting or serving a context document.
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Ghidra path '{}' is not a valid directory", .0.display())]
    InvalidEnginePath(PathBuf),

    #[error("binary file '{}' does not exist", .0.display())]
    MissingBinary(PathBuf),

    #[error("failed to launch analyzeHeadless at '{}': {message}", .path.display())]
    EngineLaunch { path: PathBuf, message: String },

    #[error("Ghidra failed with {}:\n{diagnostics}", exit_label(.code))]
    EngineFailed {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("export script ran but no context was saved to '{}'", .0.display())]
    MissingOutput(PathBuf),

    #[error("context document error: {message} (path: {})", .path.display())]
    Document { message: String, path: PathBuf },

    #[error("context not ready; run setup_context first")]
    NotReady,

    #[error("{} '{name}' not found", .kind.as_str())]
    NotFound { kind: EntityKind, name: String },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("config error: {message}")]
    Config { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("return code {}", c),
        None => "no return code (terminated by signal)".to_string(),
    }
}

impl ContextError {
    /// Stable machine-readable code for this error, used in tool results.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEnginePath(_) => "invalid_engine_path",
            Self::MissingBinary(_) => "missing_binary",
            Self::EngineLaunch { .. } => "engine_launch",
            Self::EngineFailed { .. } => "engine_failed",
            Self::MissingOutput(_) => "missing_output",
            Self::Document { .. } => "document",
            Self::NotReady => "not_ready",
            Self::NotFound { .. } => "not_found",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::UnknownTool(_) => "unknown_tool",
            Self::Config { .. } => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }

    /// Returns `true` for errors caused by a malformed protocol request rather
    /// than by the operation itself.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. } | Self::UnknownTool(_))
    }
}

/// Convenience alias for results using `ContextError`.
pub type Result<T> = std::result::Result<T, ContextError>;
