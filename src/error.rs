use std::path::PathBuf;
use std::process::ExitCode;

/// Errors that cause rigbeads to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("{message}")]
    WithCode { code: u8, message: String },
}

impl ExitError {
    pub fn new(code: u8, message: String) -> Self {
        ExitError::WithCode { code, message }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExitError::Config(_) => ExitCode::from(2),
            ExitError::ToolNotFound { .. } => ExitCode::from(3),
            ExitError::Timeout { .. } => ExitCode::from(5),
            ExitError::WithCode { code, .. } => ExitCode::from(*code),
        }
    }
}

/// Failures of store, routing and agent bead operations.
///
/// Store-level failures are forwarded as-is. The one exception is
/// [`BeadsError::UnrecoverableIdentity`], which labels the marker record
/// the store leaves behind after a hard delete so callers can switch to the
/// close/reopen workaround instead of retrying.
#[derive(Debug, thiserror::Error)]
pub enum BeadsError {
    #[error("bead not found: {id}")]
    NotFound { id: String },

    #[error("bead already exists: {id}")]
    Conflict { id: String },

    #[error(
        "bead id {id} is held by a deleted-bead marker and cannot be reused; \
         close agent beads instead of deleting them"
    )]
    UnrecoverableIdentity { id: String },

    #[error("invalid location {}: {reason}", path.display())]
    InvalidLocation { path: PathBuf, reason: String },

    #[error("cannot create redirect in canonical beads location {} (mayor/rig)", path.display())]
    CanonicalLocation { path: PathBuf },

    #[error("fleet registry not found at {}", path.display())]
    ConfigMissing { path: PathBuf },

    #[error("invalid agent state transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error(transparent)]
    InvalidField(#[from] crate::fields::MultilineValue),

    #[error("bd {subcommand} failed: {message}")]
    Store {
        subcommand: &'static str,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BeadsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BeadsError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BeadsError::Conflict { .. })
    }

    /// The subprocess or config failure this error wraps, if any.
    pub fn exit_error(&self) -> Option<&ExitError> {
        match self {
            BeadsError::Other(e) => e.downcast_ref::<ExitError>(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BeadsError {
    fn from(e: std::io::Error) -> Self {
        BeadsError::Other(e.into())
    }
}
