//! Errors from the protocol engine.

use osp_types::{AuthResult, TypesError};
use std::sync::Arc;
use thiserror::Error;

/// Coarse classification callers use to decide between retrying on a new
/// connection and giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Protocol,
    Auth,
    Cancelled,
    Closed,
}

/// Authentication failures. Fatal to the connection attempt they occur in.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("PAKE confirmation did not verify")]
    ProofInvalid,
    #[error("PAKE failed: {0}")]
    UnknownError(String),
    #[error("Authentication timed out")]
    Timeout,
    #[error("Secret unknown")]
    SecretUnknown,
    #[error("Remote agent reported {0}")]
    RemoteRejected(AuthResult),
    #[error("Already authenticating")]
    AlreadyAuthenticating,
    #[error("No PSK provided")]
    MissingPsk,
}

impl AuthError {
    /// Result code sent to the peer for a locally detected failure.
    pub fn result(&self) -> AuthResult {
        match self {
            AuthError::ProofInvalid => AuthResult::ProofInvalid,
            AuthError::Timeout => AuthResult::Timeout,
            AuthError::SecretUnknown => AuthResult::SecretUnknown,
            AuthError::RemoteRejected(result) => *result,
            _ => AuthResult::UnknownError,
        }
    }
}

/// Errors from the wire protocol layer.
#[derive(Debug, Clone, Error)]
pub enum WireError {
    #[error("Transport error: {0}")]
    Transport(Arc<std::io::Error>),
    #[error("Connection closed by peer")]
    ConnectionClosed,
    #[error("Codec error: {0}")]
    Codec(String),
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Deadline elapsed")]
    DeadlineElapsed,
    #[error("Connection closed")]
    Closed,
    #[error("Connection is not authenticated")]
    NotAuthenticated,
    #[error(transparent)]
    Types(#[from] TypesError),
}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        WireError::Transport(Arc::new(e))
    }
}

impl WireError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WireError::Transport(_) | WireError::ConnectionClosed => ErrorKind::Transport,
            WireError::Codec(_)
            | WireError::MessageTooLarge { .. }
            | WireError::Protocol(_)
            | WireError::NotAuthenticated
            | WireError::Types(_) => ErrorKind::Protocol,
            WireError::Auth(_) => ErrorKind::Auth,
            WireError::Cancelled | WireError::DeadlineElapsed => ErrorKind::Cancelled,
            WireError::Closed => ErrorKind::Closed,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }
}

/// Alias for Result with WireError.
pub type WireResult<T> = Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(WireError::from(io).kind(), ErrorKind::Transport);
        assert_eq!(WireError::Codec("x".into()).kind(), ErrorKind::Protocol);
        assert_eq!(WireError::from(AuthError::ProofInvalid).kind(), ErrorKind::Auth);
        assert!(WireError::DeadlineElapsed.is_cancelled());
        assert!(WireError::Cancelled.is_cancelled());
        assert_eq!(WireError::Closed.kind(), ErrorKind::Closed);
    }

    #[test]
    fn test_auth_error_result_codes() {
        assert_eq!(AuthError::ProofInvalid.result(), AuthResult::ProofInvalid);
        assert_eq!(AuthError::UnknownError("x".into()).result(), AuthResult::UnknownError);
        assert_eq!(
            AuthError::RemoteRejected(AuthResult::Timeout).result(),
            AuthResult::Timeout
        );
    }

    #[test]
    fn test_errors_clone_for_every_waiter() {
        let err = WireError::from(std::io::Error::other("reset"));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
