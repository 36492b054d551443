//! Error types for the print pipeline.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Step of the print pipeline that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Authentication,
    JobCreation,
    Upload,
    PrintTrigger,
    StatusCheck,
    Cancel,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Authentication => "authentication",
            Stage::JobCreation => "job creation",
            Stage::Upload => "upload",
            Stage::PrintTrigger => "print trigger",
            Stage::StatusCheck => "status check",
            Stage::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// Top-level error type for print operations.
#[derive(Debug, Error)]
pub enum PrintError {
    #[error("{stage} failed: provider returned HTTP {status}: {body}")]
    Rejected {
        stage: Stage,
        status: u16,
        body: String,
    },

    /// `connected` is false when no connection was made, so the request never left.
    #[error("{stage} failed: {detail}")]
    Transport {
        stage: Stage,
        detail: String,
        connected: bool,
    },

    #[error("{stage} failed: unexpected response: {detail}")]
    InvalidResponse { stage: Stage, detail: String },

    #[error("no printer device configured")]
    NoDevice,

    #[error("invalid job id '{0}'")]
    InvalidId(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network trouble or a provider-side hiccup (5xx, 429).
    Transient,
    /// The provider rejected the request or the local setup is wrong.
    Permanent,
}

impl PrintError {
    /// Failure after a connection was made. The provider may have received the request.
    pub fn transport(stage: Stage, err: impl fmt::Display) -> Self {
        PrintError::Transport {
            stage,
            detail: err.to_string(),
            connected: true,
        }
    }

    /// The provider could not be reached at all.
    pub fn unreachable(stage: Stage, err: impl fmt::Display) -> Self {
        PrintError::Transport {
            stage,
            detail: err.to_string(),
            connected: false,
        }
    }

    pub fn invalid_response(stage: Stage, err: impl fmt::Display) -> Self {
        PrintError::InvalidResponse {
            stage,
            detail: err.to_string(),
        }
    }

    /// Pipeline stage this error belongs to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PrintError::Rejected { stage, .. }
            | PrintError::Transport { stage, .. }
            | PrintError::InvalidResponse { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// HTTP status returned by the provider, for rejections.
    pub fn status(&self) -> Option<u16> {
        match self {
            PrintError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            PrintError::Transport { .. } => ErrorClass::Transient,
            PrintError::Rejected { status, .. } if *status == 429 || *status >= 500 => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Permanent,
        }
    }

    /// True when the provider cannot have acted on the request, so resending it is safe
    /// even for calls that are not idempotent.
    pub fn never_delivered(&self) -> bool {
        matches!(
            self,
            PrintError::Transport {
                connected: false,
                ..
            } | PrintError::Rejected {
                status: 429 | 503,
                ..
            }
        )
    }

    /// True when the bearer token was refused and any cached copy is stale.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, PrintError::Rejected { status: 401, .. })
    }
}

/// Alias used throughout the pipeline.
pub type Result<T> = std::result::Result<T, PrintError>;
