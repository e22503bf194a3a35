//! Typed errors for configuration and remote invocation.
//!
//! Line parsing never fails and a response with the wrong shape is a
//! retryable value (see [`crate::validate::LineCountMismatch`]), so only two
//! families of errors abort work:
//!
//! - [`ConfigError`]: fatal, raised before any work starts, never retried.
//! - [`InvokeError`]: the remote model could not be reached after the
//!   invoker's own retries, or the request could not be built. The batch corrector counts it
//!   as one failed attempt.

use thiserror::Error;

/// Invalid or incomplete configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("batch size must be > 0 (got {0})")]
    InvalidBatchSize(usize),

    #[error("correction.max_attempts must be >= 1")]
    InvalidAttempts,

    #[error("unsupported provider '{0}': must be gpt or deepseek")]
    UnsupportedProvider(String),

    #[error("{env} environment variable not set (required by provider '{provider}')")]
    MissingApiKey { provider: String, env: String },

    #[error("invalid value for {key}: '{value}'")]
    InvalidEnvValue { key: String, value: String },
}

/// Failure of a remote chat-completion call.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// Transport or retryable API failure that persisted through every retry.
    #[error("{provider} call failed after {attempts} attempt(s): {message}")]
    Connectivity {
        provider: String,
        attempts: u32,
        message: String,
    },

    /// The request could not be built (e.g. a malformed endpoint URL), so
    /// retrying cannot help.
    #[error("{provider} request could not be built: {message}")]
    Rejected { provider: String, message: String },
}
