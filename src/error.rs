//! Error types for pooled FTP sessions
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::types::ReplyCode;

/// Result type for pool and session operations
pub type Result<T> = std::result::Result<T, FtpError>;

/// Errors raised while creating, borrowing or using pooled FTP sessions
#[derive(Error, Debug)]
pub enum FtpError {
    /// The server answered the connect handshake with a non-positive reply
    #[error("FTP server {host}:{port} refused connection (reply code {reply_code})")]
    ConnectionRefused {
        host: String,
        port: u16,
        reply_code: ReplyCode,
    },

    /// The server rejected the configured credentials
    #[error("login rejected for user '{username}' (reply code {reply_code})")]
    AuthFailure {
        username: String,
        reply_code: ReplyCode,
    },

    /// I/O failure during a protocol exchange
    #[error("transport error during {operation}: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// No session became available within the wait bound
    #[error("session pool exhausted: {max_total} sessions in use, waited {waited:?}")]
    PoolExhausted { max_total: usize, waited: Duration },

    /// A session failed its keepalive check
    #[error("session failed validation (reply code {reply_code})")]
    ValidationFailure { reply_code: ReplyCode },

    /// A borrowed session's last reply was not a positive completion
    #[error("session is not ready (last reply code {reply_code})")]
    NotReady { reply_code: ReplyCode },

    /// The pool has been shut down
    #[error("session pool is closed")]
    PoolClosed,

    /// Configuration is invalid or could not be loaded
    #[error("configuration error: {0}")]
    Config(String),
}

impl FtpError {
    /// Wrap an I/O error raised by `operation`.
    pub fn transport(operation: &'static str, source: io::Error) -> Self {
        Self::Transport { operation, source }
    }

    /// Build a configuration error from any displayable message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether waiting and retrying the operation could succeed.
    ///
    /// A refused connection counts only when the server's reply was
    /// transient (4xx), e.g. 421 while it is overloaded or restarting.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionRefused { reply_code, .. } => reply_code.is_negative_transient(),
            Self::PoolExhausted { .. } | Self::Transport { .. } | Self::ValidationFailure { .. } => {
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_message_names_endpoint() {
        let err = FtpError::ConnectionRefused {
            host: "ftp.example.com".to_string(),
            port: 21,
            reply_code: ReplyCode::SERVICE_NOT_AVAILABLE,
        };
        let msg = err.to_string();
        assert!(msg.contains("ftp.example.com:21"));
        assert!(msg.contains("421"));
        assert!(err.is_retryable());
    }

    #[test]
    fn permanent_refusal_is_not_retryable() {
        let err = FtpError::ConnectionRefused {
            host: "ftp.example.com".to_string(),
            port: 21,
            reply_code: ReplyCode::NOT_LOGGED_IN,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn transport_keeps_source() {
        let err = FtpError::transport("connect", io::Error::other("reset"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.is_retryable());
    }

    #[test]
    fn closed_pool_is_not_retryable() {
        assert!(!FtpError::PoolClosed.is_retryable());
        assert!(!FtpError::config("host is required").is_retryable());
    }
}
