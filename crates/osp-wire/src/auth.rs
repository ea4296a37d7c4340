//! SPAKE2 authentication sub-protocol.
//!
//! [`AuthState`] is a pure state machine: the engine feeds it the local PSK
//! and whatever the peer sent, then calls [`AuthState::advance`], which
//! walks through every stage whose prerequisites are met and reports the
//! messages to send and the waiters to wake. It performs no I/O.
//!
//! The presenter runs SPAKE2 side A and the consumer side B. Key
//! confirmation is HMAC-SHA256 over the transcript (presenter public value,
//! then consumer public value) under role-specific keys expanded from the
//! SPAKE2 key with HKDF-SHA256. The presenter confirms first.

use crate::error::AuthError;
use crate::message::{Message, PskStatus};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use osp_types::{AuthResult, AuthenticationRole, PeerId};
use sha2::{Digest, Sha256};
use spake2::{Ed25519Group, Identity, Password, Spake2};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

const PRESENTER_CONFIRMATION_INFO: &[u8] = b"openscreen spake2 presenter confirmation";
const CONSUMER_CONFIRMATION_INFO: &[u8] = b"openscreen spake2 consumer confirmation";

/// Progress of one authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    New,
    AwaitPsk,
    AwaitHandshake,
    AwaitConfirmation,
    AwaitResult,
    Done,
}

/// Side effects requested by [`AuthState::advance`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthAction {
    Send(Message),
    /// The local secret is needed: wake `accept_authenticate`.
    NeedPsk,
    /// Both sides reported success.
    Complete,
}

struct ConfirmationKeys {
    presenter: Zeroizing<[u8; 32]>,
    consumer: Zeroizing<[u8; 32]>,
    transcript: Vec<u8>,
}

impl ConfirmationKeys {
    fn derive(key: &[u8], transcript: Vec<u8>) -> Result<Self, AuthError> {
        let hk = Hkdf::<Sha256>::new(None, key);
        let mut presenter = Zeroizing::new([0u8; 32]);
        let mut consumer = Zeroizing::new([0u8; 32]);
        hk.expand(PRESENTER_CONFIRMATION_INFO, &mut presenter[..])
            .and_then(|_| hk.expand(CONSUMER_CONFIRMATION_INFO, &mut consumer[..]))
            .map_err(|e| AuthError::UnknownError(format!("HKDF expand failed: {e}")))?;
        Ok(Self {
            presenter,
            consumer,
            transcript,
        })
    }

    fn confirmation(&self, role: AuthenticationRole) -> Result<Vec<u8>, AuthError> {
        let key: &[u8] = match role {
            AuthenticationRole::Presenter => &self.presenter[..],
            AuthenticationRole::Consumer => &self.consumer[..],
        };
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| AuthError::UnknownError(format!("HMAC key rejected: {e}")))?;
        mac.update(&self.transcript);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn other(role: AuthenticationRole) -> AuthenticationRole {
    match role {
        AuthenticationRole::Presenter => AuthenticationRole::Consumer,
        AuthenticationRole::Consumer => AuthenticationRole::Presenter,
    }
}

/// State of one authentication attempt on one connection.
pub(crate) struct AuthState {
    role: AuthenticationRole,
    stage: AuthStage,
    local_id: PeerId,
    remote_id: PeerId,
    initiation_token: Option<String>,
    local_psk: Option<Zeroizing<Vec<u8>>>,
    spake: Option<Spake2<Ed25519Group>>,
    local_public: Option<Vec<u8>>,
    remote_public: Option<Vec<u8>>,
    keys: Option<ConfirmationKeys>,
    shared_secret: Option<Zeroizing<Vec<u8>>>,
    remote_confirmation: Option<Vec<u8>>,
    local_result: Option<AuthResult>,
    remote_result: Option<AuthResult>,
}

impl AuthState {
    pub(crate) fn new(
        role: AuthenticationRole,
        local_id: PeerId,
        remote_id: PeerId,
        initiation_token: Option<String>,
    ) -> Self {
        debug!(%role, "PAKE state created");
        Self {
            role,
            stage: AuthStage::New,
            local_id,
            remote_id,
            initiation_token,
            local_psk: None,
            spake: None,
            local_public: None,
            remote_public: None,
            keys: None,
            shared_secret: None,
            remote_confirmation: None,
            local_result: None,
            remote_result: None,
        }
    }

    pub(crate) fn stage(&self) -> AuthStage {
        self.stage
    }

    pub(crate) fn local_result(&self) -> Option<AuthResult> {
        self.local_result
    }

    pub(crate) fn remote_result(&self) -> Option<AuthResult> {
        self.remote_result
    }

    pub(crate) fn shared_secret(&self) -> Option<&[u8]> {
        self.shared_secret.as_ref().map(|s| s.as_slice())
    }

    pub(crate) fn set_local_psk(&mut self, psk: &[u8]) -> Result<(), AuthError> {
        if psk.is_empty() {
            return Err(AuthError::MissingPsk);
        }
        if self.local_psk.is_some() {
            return Err(AuthError::AlreadyAuthenticating);
        }
        self.local_psk = Some(Zeroizing::new(psk.to_vec()));
        Ok(())
    }

    pub(crate) fn set_remote_public(&mut self, public_value: Vec<u8>) {
        self.remote_public = Some(public_value);
    }

    pub(crate) fn set_remote_confirmation(&mut self, confirmation: Vec<u8>) {
        self.remote_confirmation = Some(confirmation);
    }

    pub(crate) fn set_remote_result(&mut self, result: AuthResult) {
        self.remote_result = Some(result);
    }

    fn enter(&mut self, stage: AuthStage) {
        debug!(role = %self.role, from = ?self.stage, to = ?stage, "PAKE state transition");
        self.stage = stage;
    }

    /// Record a local failure and queue the matching auth-status for the peer.
    fn fail(&mut self, error: AuthError, out: &mut Vec<AuthAction>) -> AuthError {
        let result = error.result();
        self.local_result = Some(result);
        out.push(AuthAction::Send(Message::AuthStatus { result }));
        error
    }

    /// Give up on a peer that did not finish in time.
    pub(crate) fn time_out(&mut self, out: &mut Vec<AuthAction>) -> AuthError {
        warn!(role = %self.role, stage = ?self.stage, "PAKE timed out");
        self.fail(AuthError::Timeout, out)
    }

    fn handshake(&self, public_value: Vec<u8>) -> Message {
        let psk_status = match self.role {
            AuthenticationRole::Presenter => PskStatus::Shown,
            AuthenticationRole::Consumer => PskStatus::Input,
        };
        Message::AuthSpake2Handshake {
            initiation_token: self.initiation_token.clone(),
            psk_status,
            public_value,
        }
    }

    fn install_key(&mut self, key: Vec<u8>) -> Result<(), AuthError> {
        let key = Zeroizing::new(key);
        let (presenter_public, consumer_public) = match self.role {
            AuthenticationRole::Presenter => (&self.local_public, &self.remote_public),
            AuthenticationRole::Consumer => (&self.remote_public, &self.local_public),
        };
        let mut transcript = presenter_public.clone().unwrap_or_default();
        transcript.extend_from_slice(consumer_public.as_deref().unwrap_or_default());

        self.keys = Some(ConfirmationKeys::derive(&key, transcript)?);
        debug!(
            role = %self.role,
            fingerprint = %secret_fingerprint(&key),
            "PAKE shared secret derived"
        );
        self.shared_secret = Some(key);
        Ok(())
    }

    fn confirmation(&self, role: AuthenticationRole) -> Result<Vec<u8>, AuthError> {
        self.keys
            .as_ref()
            .ok_or_else(|| AuthError::UnknownError("no shared key".to_string()))?
            .confirmation(role)
    }

    /// Run every stage whose prerequisites are satisfied. Re-running with
    /// nothing new is a no-op.
    pub(crate) fn advance(&mut self, out: &mut Vec<AuthAction>) -> Result<(), AuthError> {
        if let Some(result) = self.remote_result {
            if result != AuthResult::Authenticated {
                return Err(AuthError::RemoteRejected(result));
            }
        }

        if self.stage == AuthStage::New {
            match self.role {
                AuthenticationRole::Presenter => {
                    if self.local_psk.is_none() {
                        out.push(AuthAction::NeedPsk);
                    }
                }
                AuthenticationRole::Consumer => {
                    if self.remote_public.is_none() {
                        out.push(AuthAction::Send(Message::LegacyNeedPsk {
                            auth_initiation_token: self
                                .initiation_token
                                .clone()
                                .unwrap_or_default(),
                        }));
                    } else if self.local_psk.is_none() {
                        out.push(AuthAction::NeedPsk);
                    }
                }
            }
            self.enter(AuthStage::AwaitPsk);
        }

        if self.stage == AuthStage::AwaitPsk {
            let Some(psk) = self.local_psk.as_ref() else {
                return Ok(());
            };
            if self.role == AuthenticationRole::Presenter {
                let (spake, public_value) = Spake2::<Ed25519Group>::start_a(
                    &Password::new(psk.as_slice()),
                    &Identity::new(self.local_id.as_bytes()),
                    &Identity::new(self.remote_id.as_bytes()),
                );
                self.spake = Some(spake);
                self.local_public = Some(public_value.clone());
                out.push(AuthAction::Send(self.handshake(public_value)));
            }
            self.enter(AuthStage::AwaitHandshake);
        }

        if self.stage == AuthStage::AwaitHandshake {
            let Some(remote_public) = self.remote_public.clone() else {
                return Ok(());
            };
            let spake = match self.role {
                AuthenticationRole::Presenter => self.spake.take(),
                AuthenticationRole::Consumer => match self.local_psk.as_ref() {
                    Some(psk) => {
                        let (spake, public_value) = Spake2::<Ed25519Group>::start_b(
                            &Password::new(psk.as_slice()),
                            &Identity::new(self.remote_id.as_bytes()),
                            &Identity::new(self.local_id.as_bytes()),
                        );
                        self.local_public = Some(public_value);
                        Some(spake)
                    }
                    None => None,
                },
            };
            let Some(spake) = spake else {
                let err = AuthError::UnknownError("PAKE not started".to_string());
                return Err(self.fail(err, out));
            };
            let key = match spake.finish(&remote_public) {
                Ok(key) => key,
                Err(e) => {
                    let err = AuthError::UnknownError(format!("SPAKE2 finish: {e:?}"));
                    return Err(self.fail(err, out));
                }
            };
            if let Err(err) = self.install_key(key) {
                return Err(self.fail(err, out));
            }

            match self.role {
                AuthenticationRole::Presenter => match self.confirmation(self.role) {
                    Ok(confirmation_value) => {
                        out.push(AuthAction::Send(Message::AuthSpake2Confirmation {
                            confirmation_value,
                        }))
                    }
                    Err(err) => return Err(self.fail(err, out)),
                },
                AuthenticationRole::Consumer => {
                    let public_value = self.local_public.clone().unwrap_or_default();
                    out.push(AuthAction::Send(self.handshake(public_value)));
                }
            }
            self.enter(AuthStage::AwaitConfirmation);
        }

        if self.stage == AuthStage::AwaitConfirmation {
            let Some(remote_confirmation) = self.remote_confirmation.clone() else {
                return Ok(());
            };
            let expected = match self.confirmation(other(self.role)) {
                Ok(expected) => expected,
                Err(err) => return Err(self.fail(err, out)),
            };
            if !bool::from(expected.as_slice().ct_eq(remote_confirmation.as_slice())) {
                debug!(role = %self.role, "PAKE confirmation mismatch");
                return Err(self.fail(AuthError::ProofInvalid, out));
            }

            if self.role == AuthenticationRole::Consumer {
                match self.confirmation(self.role) {
                    Ok(confirmation_value) => {
                        out.push(AuthAction::Send(Message::AuthSpake2Confirmation {
                            confirmation_value,
                        }))
                    }
                    Err(err) => return Err(self.fail(err, out)),
                }
            }
            self.local_result = Some(AuthResult::Authenticated);
            out.push(AuthAction::Send(Message::AuthStatus {
                result: AuthResult::Authenticated,
            }));
            self.enter(AuthStage::AwaitResult);
        }

        if self.stage == AuthStage::AwaitResult {
            if self.remote_result.is_none() {
                return Ok(());
            }
            self.enter(AuthStage::Done);
            out.push(AuthAction::Complete);
        }

        Ok(())
    }
}

/// Short hex digest of a shared secret, safe to log or show.
pub fn secret_fingerprint(secret: &[u8]) -> String {
    hex::encode(&Sha256::digest(secret)[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(psk_a: &[u8], psk_b: &[u8]) -> (AuthState, AuthState) {
        let a = PeerId::from_spki(b"presenter");
        let b = PeerId::from_spki(b"consumer");
        let mut presenter =
            AuthState::new(AuthenticationRole::Presenter, a.clone(), b.clone(), None);
        let mut consumer = AuthState::new(AuthenticationRole::Consumer, b, a, None);
        presenter.set_local_psk(psk_a).unwrap();
        consumer.set_local_psk(psk_b).unwrap();
        (presenter, consumer)
    }

    fn deliver(state: &mut AuthState, msg: &Message) {
        match msg {
            Message::AuthSpake2Handshake { public_value, .. } => {
                state.set_remote_public(public_value.clone())
            }
            Message::AuthSpake2Confirmation { confirmation_value } => {
                state.set_remote_confirmation(confirmation_value.clone())
            }
            Message::AuthStatus { result } => state.set_remote_result(*result),
            _ => {}
        }
    }

    /// Ping-pong messages until neither side produces anything new.
    fn run(
        presenter: &mut AuthState,
        consumer: &mut AuthState,
    ) -> (Result<(), AuthError>, Result<(), AuthError>) {
        let mut results = (Ok(()), Ok(()));
        let mut to_consumer = Vec::new();
        let mut to_presenter = Vec::new();
        for _ in 0..8 {
            let mut out = Vec::new();
            if results.0.is_ok() {
                results.0 = presenter.advance(&mut out);
            }
            to_consumer.extend(out.into_iter().filter_map(|a| match a {
                AuthAction::Send(m) => Some(m),
                _ => None,
            }));
            for msg in to_consumer.drain(..) {
                deliver(consumer, &msg);
            }

            let mut out = Vec::new();
            if results.1.is_ok() {
                results.1 = consumer.advance(&mut out);
            }
            to_presenter.extend(out.into_iter().filter_map(|a| match a {
                AuthAction::Send(m) => Some(m),
                _ => None,
            }));
            for msg in to_presenter.drain(..) {
                deliver(presenter, &msg);
            }
        }
        results
    }

    #[test]
    fn test_matching_psk_converges() {
        let psk = 123_456u64.to_be_bytes();
        let (mut presenter, mut consumer) = pair(&psk, &psk);
        let (p, c) = run(&mut presenter, &mut consumer);
        assert!(p.is_ok() && c.is_ok(), "{p:?} {c:?}");
        assert_eq!(presenter.stage(), AuthStage::Done);
        assert_eq!(consumer.stage(), AuthStage::Done);
        assert_eq!(presenter.local_result(), Some(AuthResult::Authenticated));
        assert_eq!(presenter.remote_result(), Some(AuthResult::Authenticated));
        assert_eq!(consumer.local_result(), Some(AuthResult::Authenticated));
        assert_eq!(consumer.remote_result(), Some(AuthResult::Authenticated));
        assert!(presenter.shared_secret().is_some());
        assert_eq!(presenter.shared_secret(), consumer.shared_secret());
    }

    #[test]
    fn test_mismatched_psk_diverges() {
        let (mut presenter, mut consumer) = pair(b"secret-1", b"secret-2");
        let (p, c) = run(&mut presenter, &mut consumer);
        assert_eq!(c, Err(AuthError::ProofInvalid));
        assert_eq!(consumer.local_result(), Some(AuthResult::ProofInvalid));
        assert_eq!(p, Err(AuthError::RemoteRejected(AuthResult::ProofInvalid)));
        assert_ne!(presenter.stage(), AuthStage::Done);
        assert_ne!(presenter.shared_secret(), consumer.shared_secret());
    }

    #[test]
    fn test_presenter_without_psk_asks_for_it() {
        let mut state = AuthState::new(
            AuthenticationRole::Presenter,
            PeerId::from_spki(b"a"),
            PeerId::from_spki(b"b"),
            None,
        );
        let mut out = Vec::new();
        state.advance(&mut out).unwrap();
        assert_eq!(out, vec![AuthAction::NeedPsk]);
        assert_eq!(state.stage(), AuthStage::AwaitPsk);

        out.clear();
        state.advance(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_consumer_requests_psk_then_waits() {
        let mut state = AuthState::new(
            AuthenticationRole::Consumer,
            PeerId::from_spki(b"b"),
            PeerId::from_spki(b"a"),
            Some("abcdefghi".to_string()),
        );
        let mut out = Vec::new();
        state.advance(&mut out).unwrap();
        match out.as_slice() {
            [AuthAction::Send(Message::LegacyNeedPsk {
                auth_initiation_token,
            })] => assert_eq!(auth_initiation_token, "abcdefghi"),
            other => panic!("Expected need-psk, got {other:?}"),
        }
    }

    #[test]
    fn test_psk_is_set_once() {
        let mut state = AuthState::new(
            AuthenticationRole::Consumer,
            PeerId::from_spki(b"b"),
            PeerId::from_spki(b"a"),
            None,
        );
        assert_eq!(state.set_local_psk(b""), Err(AuthError::MissingPsk));
        state.set_local_psk(b"1").unwrap();
        assert_eq!(state.set_local_psk(b"1"), Err(AuthError::AlreadyAuthenticating));
    }

    #[test]
    fn test_secret_fingerprint_is_short_hex() {
        let fp = secret_fingerprint(b"key");
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
