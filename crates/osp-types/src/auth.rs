//! Connection and authentication roles.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the transport a connection was established from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    /// The dialing side.
    Initiator,
    /// The listening side.
    Responder,
}

/// Asymmetric PAKE role negotiated from the peers' PSK configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationRole {
    /// Originates and displays the secret.
    Presenter,
    /// Inputs the secret shown by the presenter.
    Consumer,
}

impl fmt::Display for AuthenticationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationRole::Presenter => write!(f, "presenter"),
            AuthenticationRole::Consumer => write!(f, "consumer"),
        }
    }
}

/// Derive the local authentication role.
///
/// With equal ease-of-input the responder presents. Otherwise the agent with
/// the lower ease-of-input presents, whatever its connection role.
pub fn derive_role(
    local_ease: u8,
    remote_ease: u8,
    connection_role: ConnectionRole,
) -> AuthenticationRole {
    if local_ease == remote_ease {
        return match connection_role {
            ConnectionRole::Responder => AuthenticationRole::Presenter,
            ConnectionRole::Initiator => AuthenticationRole::Consumer,
        };
    }
    if local_ease < remote_ease {
        AuthenticationRole::Presenter
    } else {
        AuthenticationRole::Consumer
    }
}

/// Outcome reported in an auth-status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthResult {
    Authenticated,
    UnknownError,
    Timeout,
    SecretUnknown,
    ValidationTookTooLong,
    ProofInvalid,
}

impl AuthResult {
    /// Wire code of this result.
    pub fn code(self) -> u64 {
        match self {
            AuthResult::Authenticated => 0,
            AuthResult::UnknownError => 1,
            AuthResult::Timeout => 2,
            AuthResult::SecretUnknown => 3,
            AuthResult::ValidationTookTooLong => 4,
            AuthResult::ProofInvalid => 5,
        }
    }

    /// Map a wire code back to a result.
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => AuthResult::Authenticated,
            1 => AuthResult::UnknownError,
            2 => AuthResult::Timeout,
            3 => AuthResult::SecretUnknown,
            4 => AuthResult::ValidationTookTooLong,
            5 => AuthResult::ProofInvalid,
            _ => return None,
        })
    }
}

impl fmt::Display for AuthResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthResult::Authenticated => "authenticated",
            AuthResult::UnknownError => "unknown-error",
            AuthResult::Timeout => "timeout",
            AuthResult::SecretUnknown => "secret-unknown",
            AuthResult::ValidationTookTooLong => "validation-took-too-long",
            AuthResult::ProofInvalid => "proof-invalid",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROLES: [ConnectionRole; 2] = [ConnectionRole::Initiator, ConnectionRole::Responder];

    #[test]
    fn test_equal_ease_makes_responder_present() {
        for ease in [0u8, 17, 50, 100] {
            assert_eq!(
                derive_role(ease, ease, ConnectionRole::Responder),
                AuthenticationRole::Presenter
            );
            assert_eq!(
                derive_role(ease, ease, ConnectionRole::Initiator),
                AuthenticationRole::Consumer
            );
        }
    }

    #[test]
    fn test_lower_ease_presents_regardless_of_connection_role() {
        for role in ROLES {
            assert_eq!(derive_role(0, 50, role), AuthenticationRole::Presenter);
            assert_eq!(derive_role(50, 0, role), AuthenticationRole::Consumer);
        }
    }

    #[test]
    fn test_both_sides_always_disagree() {
        for a in (0u8..=100).step_by(5) {
            for b in (0u8..=100).step_by(5) {
                let local = derive_role(a, b, ConnectionRole::Initiator);
                let remote = derive_role(b, a, ConnectionRole::Responder);
                assert_ne!(local, remote, "ease {a} vs {b}");
            }
        }
    }

    #[test]
    fn test_auth_result_codes() {
        for code in 0..=5 {
            let result = AuthResult::from_code(code).unwrap();
            assert_eq!(result.code(), code);
        }
        assert_eq!(AuthResult::from_code(6), None);
        assert_eq!(AuthResult::ProofInvalid.to_string(), "proof-invalid");
    }
}
