//! Server error types.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while running the HTTP listeners.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A listener could not be bound.
    #[error("failed to bind {addr}: {message}")]
    Bind {
        /// Address that failed to bind.
        addr: String,
        /// Underlying error.
        message: String,
    },

    /// I/O error while serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The decision point failed to start.
    #[error("policy decision point failed to start: {0}")]
    Pdp(#[from] arbiter_pdp::PdpError),
}

impl ServerError {
    /// Create a bind error.
    pub fn bind(addr: impl ToString, message: impl ToString) -> Self {
        Self::Bind {
            addr: addr.to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_display() {
        let err = ServerError::bind("0.0.0.0:8152", "address in use");
        assert_eq!(err.to_string(), "failed to bind 0.0.0.0:8152: address in use");
    }
}
