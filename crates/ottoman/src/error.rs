//! Error taxonomy shared by every dispatcher.
//!
//! Every command either produces a result or exactly one [`QueryError`].
//! The three variants map onto distinct wire effects: a fatal error is
//! reported and then ends the process, a recoverable error is reported and
//! the connection carries on, and a forbidden outcome is reported as an
//! access refusal alongside a warning.

use thiserror::Error;

/// Severity of a [`QueryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Report and terminate.
    Fatal,
    /// Report and continue.
    Error,
    /// Report an access refusal and continue.
    Forbidden,
}

/// Outcome of a failed command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Unrecoverable protocol or engine failure.
    #[error("fatal {kind}: {message}")]
    Fatal {
        /// Short machine-readable error identifier.
        kind: String,
        /// Human-readable description.
        message: String,
    },
    /// Recoverable failure of a single command.
    #[error("{kind}: {message}")]
    Error {
        /// Short machine-readable error identifier.
        kind: String,
        /// Human-readable description.
        message: String,
    },
    /// Access-control refusal raised by validation or filtering logic.
    #[error("forbidden: {reason}")]
    Forbidden {
        /// Reason reported to the host.
        reason: String,
    },
}

impl QueryError {
    /// Creates a fatal error.
    pub fn fatal(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fatal {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Creates a recoverable error.
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Creates an access refusal.
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// A function source failed to compile or evaluate.
    pub fn compilation(message: impl Into<String>) -> Self {
        Self::error("compilation_error", message)
    }

    /// A show, list or update function misbehaved.
    pub fn render(message: impl Into<String>) -> Self {
        Self::error("render_error", message)
    }

    /// Command arguments did not have the expected shape.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::error("invalid_arguments", message)
    }

    /// The host violated the line protocol.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::fatal("query_protocol_error", message)
    }

    /// Severity of this error.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::Fatal { .. } => Severity::Fatal,
            Self::Error { .. } => Severity::Error,
            Self::Forbidden { .. } => Severity::Forbidden,
        }
    }

    /// Machine-readable identifier; `forbidden` for refusals.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Fatal { kind, .. } | Self::Error { kind, .. } => kind,
            Self::Forbidden { .. } => "forbidden",
        }
    }

    /// Human-readable description or refusal reason.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Fatal { message, .. } | Self::Error { message, .. } => message,
            Self::Forbidden { reason } => reason,
        }
    }

    /// Whether this error ends the connection.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}
