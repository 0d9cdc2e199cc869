//! Application layer errors

use thiserror::Error;

use crate::application::piece::HookPhase;
use crate::domain::entities::CommandKind;

/// Boxed error returned by user hooks and loop bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Piece registration and lifecycle errors
#[derive(Error, Debug)]
pub enum PieceError {
    #[error("Piece `{0}` has not been loaded onto a host")]
    NotAttached(String),

    #[error("Loop `{0}` already has a before-loop guard")]
    DuplicateGuard(String),

    #[error("{0} does not belong to a piece")]
    NotOwned(String),

    #[error("{0} has no async handler")]
    NotAsync(String),

    #[error("Invalid {kind} command name: {name:?}")]
    InvalidName { kind: CommandKind, name: String },

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("{phase} hook failed: {source}")]
    Hook {
        phase: HookPhase,
        #[source]
        source: BoxError,
    },

    #[error("Loop `{0}` can only be started inside a tokio runtime")]
    NoRuntime(String),
}

/// Errors a host raises when rejecting a mutation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("{kind} command `{name}` is already registered")]
    DuplicateCommand { kind: CommandKind, name: String },

    #[error("Check `{0}` is already registered")]
    DuplicateCheck(String),

    #[error("Call-once checks are only supported for prefix commands")]
    UnsupportedScope,
}

/// Command execution errors
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command not found: {0}")]
    NotFound(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Check failed: {0}")]
    CheckFailed(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
