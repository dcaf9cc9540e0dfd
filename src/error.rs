//! Error types for the control plane.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Syntactic defects found while parsing an OpenVPN configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// An inline `<section>` block was never closed, closed twice, or is not
    /// one of `ca`, `cert`, `key`.
    #[error("malformed inline block: {0}")]
    MalformedBlock(String),

    /// A directive argument that must be numeric was not.
    #[error("directive '{directive}' has invalid number '{value}'")]
    BadNumber { directive: String, value: String },

    /// A `remote` directive without a host argument.
    #[error("remote directive requires a host argument")]
    BadEndpoint,

    /// A `proto` value outside {udp, tcp, tcp-client}.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
}

/// Error taxonomy surfaced to the API adapter.
#[derive(Debug, Error)]
pub enum Error {
    /// Syntactic defect in an ingested config.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Semantic rejection: unreachable host, expired certificate, bad port,
    /// or an unvalidated profile where validation is required.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown profile or diagnostic key.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not legal in the current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A subprocess failed or produced unparsable output.
    #[error("{command}: {message}")]
    External { command: String, message: String },

    /// An external command exceeded its deadline.
    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The failover ring completed without a successful connection.
    #[error("all failover profiles exhausted")]
    Exhausted,

    /// Filesystem failure surfaced to the caller.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn external(command: impl Into<String>, message: impl ToString) -> Self {
        Error::External {
            command: command.into(),
            message: message.to_string(),
        }
    }
}
