use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur on the monitoring link
#[derive(Debug, Error)]
pub enum LinkError {
    // ===== Connection Errors =====
    /// Failed to establish connection to the mixing server
    #[error("connection failed to {address}: {message}")]
    ConnectionFailed {
        /// The server address
        address: String,
        /// Description of the failure
        message: String,
        /// The underlying source of the error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection was closed by the server or the network
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Why the connection was considered lost
        reason: String,
    },

    /// Connection timed out
    #[error("connection timeout after {duration:?}")]
    ConnectionTimeout {
        /// The duration of the timeout
        duration: Duration,
    },

    /// No inbound traffic within the liveness window
    #[error("heartbeat timeout: no traffic for {silence:?}")]
    HeartbeatTimeout {
        /// How long the link was silent
        silence: Duration,
    },

    /// Reconnection budget exhausted
    #[error("reconnect failed after {attempts} attempts: {reason}")]
    ReconnectExhausted {
        /// Number of attempts made
        attempts: u32,
        /// The last failure
        reason: String,
    },

    // ===== Protocol Errors =====
    /// Too many consecutive frames with a bad magic number
    #[error("protocol desync after {consecutive} bad frames")]
    ProtocolDesync {
        /// Number of consecutive bad headers
        consecutive: u32,
    },

    /// Handshake was rejected or never answered
    #[error("handshake failed: {message}")]
    HandshakeFailed {
        /// Description of the failure
        message: String,
    },

    /// Control message could not be parsed
    #[error("malformed control message: {message}")]
    MalformedControl {
        /// Description of the error
        message: String,
    },

    /// Audio payload could not be decoded
    #[error("audio decode failed: {message}")]
    DecodeFailed {
        /// Description of the error
        message: String,
    },

    // ===== Output Errors =====
    /// Audio output backend error
    #[error("audio output error: {0}")]
    Output(#[from] crate::audio::OutputError),

    // ===== Storage Errors =====
    /// Identity store error
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    // ===== I/O Errors =====
    /// Network I/O error
    #[error("network error: {0}")]
    NetworkError(#[from] io::Error),

    /// Operation timed out
    #[error("operation timed out")]
    Timeout,

    // ===== State Errors =====
    /// Operation not valid in current state
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the state is invalid
        message: String,
        /// The current state
        current_state: String,
    },

    /// Not connected to a server
    #[error("not connected")]
    NotConnected,

    /// Invalid parameter provided
    #[error("invalid parameter: {name} - {message}")]
    InvalidParameter {
        /// The name of the parameter
        name: String,
        /// Description of the error
        message: String,
    },
}

impl LinkError {
    /// Check if this error is recoverable by retrying
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ConnectionLost { .. }
                | Self::ConnectionTimeout { .. }
                | Self::HeartbeatTimeout { .. }
                | Self::ProtocolDesync { .. }
                | Self::DecodeFailed { .. }
                | Self::MalformedControl { .. }
                | Self::NetworkError(_)
                | Self::Timeout
        )
    }

    /// Check if this error indicates connection loss
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost { .. }
                | Self::ConnectionFailed { .. }
                | Self::ConnectionTimeout { .. }
                | Self::HeartbeatTimeout { .. }
                | Self::ProtocolDesync { .. }
                | Self::NetworkError(_)
        )
    }

    /// Check if this error ends automatic recovery
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ReconnectExhausted { .. })
    }
}

/// Result type alias for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LinkError::ConnectionLost {
            reason: "server closed".to_string(),
        };
        assert_eq!(err.to_string(), "connection lost: server closed");
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(LinkError::Timeout.is_recoverable());
        assert!(LinkError::ProtocolDesync { consecutive: 3 }.is_recoverable());

        let exhausted = LinkError::ReconnectExhausted {
            attempts: 20,
            reason: "refused".to_string(),
        };
        assert!(!exhausted.is_recoverable());
        assert!(exhausted.is_terminal());
    }

    #[test]
    fn test_error_is_connection_lost() {
        let err = LinkError::HeartbeatTimeout {
            silence: Duration::from_secs(15),
        };
        assert!(err.is_connection_lost());
        assert!(!LinkError::Timeout.is_connection_lost());
        assert!(
            !LinkError::DecodeFailed {
                message: "size mismatch".to_string()
            }
            .is_connection_lost()
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err: LinkError = io_err.into();

        assert!(matches!(err, LinkError::NetworkError(_)));
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LinkError>();
    }
}
