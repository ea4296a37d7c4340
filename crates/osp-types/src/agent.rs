//! Agent identity: fingerprint-derived peer IDs, display metadata and PSK policy.

use crate::config::{AgentConfig, EngineConfig};
use crate::error::{TypesError, TypesResult};
use crate::txt::TxtRecords;
use crate::varint;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable agent identifier: the base64 SHA-256 fingerprint of the agent
/// certificate's SubjectPublicKeyInfo (44 characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Fingerprint a DER-encoded SubjectPublicKeyInfo.
    pub fn from_spki(spki_der: &[u8]) -> Self {
        let digest = Sha256::digest(spki_der);
        Self(STANDARD.encode(digest))
    }

    /// Wrap an already computed fingerprint, such as a discovered `fp` record.
    pub fn from_fingerprint(fp: impl Into<String>) -> Self {
        Self(fp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Check that one of the presented SPKIs hashes to `fp`.
    pub fn verify_fingerprint<'a>(
        fp: &str,
        spkis: impl IntoIterator<Item = &'a [u8]>,
    ) -> TypesResult<()> {
        if spkis.into_iter().any(|spki| Self::from_spki(spki).0 == fp) {
            Ok(())
        } else {
            Err(TypesError::FingerprintMismatch(format!(
                "no certificate matching fingerprint {fp}"
            )))
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capabilities an agent can announce in its agent-info.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentCapability {
    ReceiveAudio,
    ReceiveVideo,
    ReceivePresentation,
    ControlPresentation,
    ReceiveRemotePlayback,
    ControlRemotePlayback,
    ReceiveStreaming,
    SendStreaming,
    DataChannels,
    QuickTransport,
    /// A capability this implementation does not know.
    Other(u64),
}

impl AgentCapability {
    pub fn code(self) -> u64 {
        match self {
            AgentCapability::ReceiveAudio => 1,
            AgentCapability::ReceiveVideo => 2,
            AgentCapability::ReceivePresentation => 3,
            AgentCapability::ControlPresentation => 4,
            AgentCapability::ReceiveRemotePlayback => 5,
            AgentCapability::ControlRemotePlayback => 6,
            AgentCapability::ReceiveStreaming => 7,
            AgentCapability::SendStreaming => 8,
            AgentCapability::DataChannels => 1100,
            AgentCapability::QuickTransport => 1200,
            AgentCapability::Other(code) => code,
        }
    }

    pub fn from_code(code: u64) -> Self {
        match code {
            1 => AgentCapability::ReceiveAudio,
            2 => AgentCapability::ReceiveVideo,
            3 => AgentCapability::ReceivePresentation,
            4 => AgentCapability::ControlPresentation,
            5 => AgentCapability::ReceiveRemotePlayback,
            6 => AgentCapability::ControlRemotePlayback,
            7 => AgentCapability::ReceiveStreaming,
            8 => AgentCapability::SendStreaming,
            1100 => AgentCapability::DataChannels,
            1200 => AgentCapability::QuickTransport,
            other => AgentCapability::Other(other),
        }
    }
}

/// Display metadata exchanged through agent-info messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentInfo {
    pub display_name: String,
    pub model_name: String,
    pub capabilities: Vec<AgentCapability>,
    pub state_token: String,
    pub locales: Vec<String>,
}

/// How the PSK is entered on the consuming device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PskInputMethod {
    Numeric,
    QrCode,
}

impl PskInputMethod {
    pub fn code(self) -> u64 {
        match self {
            PskInputMethod::Numeric => 0,
            PskInputMethod::QrCode => 1,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(PskInputMethod::Numeric),
            1 => Some(PskInputMethod::QrCode),
            _ => None,
        }
    }
}

/// PAKE policy announced in auth-capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PskConfig {
    /// 0 (hardest to enter) to 100 (easiest).
    pub ease_of_input: u8,
    /// Minimum PSK entropy in bits, 20 to 60.
    pub min_entropy_bits: u8,
}

impl Default for PskConfig {
    fn default() -> Self {
        Self {
            ease_of_input: 0,
            min_entropy_bits: 20,
        }
    }
}

impl PskConfig {
    pub const MAX_EASE_OF_INPUT: u8 = 100;
    pub const MIN_ENTROPY_BITS: u8 = 20;
    pub const MAX_ENTROPY_BITS: u8 = 60;

    pub fn validate(&self) -> TypesResult<()> {
        if self.ease_of_input > Self::MAX_EASE_OF_INPUT {
            return Err(TypesError::OutOfRange {
                field: "psk.ease_of_input",
                value: u64::from(self.ease_of_input),
                min: 0,
                max: u64::from(Self::MAX_EASE_OF_INPUT),
            });
        }
        if !(Self::MIN_ENTROPY_BITS..=Self::MAX_ENTROPY_BITS).contains(&self.min_entropy_bits) {
            return Err(TypesError::OutOfRange {
                field: "psk.min_entropy_bits",
                value: u64::from(self.min_entropy_bits),
                min: u64::from(Self::MIN_ENTROPY_BITS),
                max: u64::from(Self::MAX_ENTROPY_BITS),
            });
        }
        Ok(())
    }
}

const STATE_TOKEN_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const AUTH_TOKEN_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn random_from(chars: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| chars[rng.gen_range(0..chars.len())] as char)
        .collect()
}

/// Fresh 8-character state token for agent-info replies.
pub fn new_state_token() -> String {
    random_from(STATE_TOKEN_CHARS, 8)
}

/// Fresh 9-character auth-initiation token for the `at` record.
pub fn new_auth_token() -> String {
    random_from(AUTH_TOKEN_CHARS, 9)
}

/// Process-wide local agent context, shared by every engine, listener and
/// dialer through an `Arc`.
#[derive(Debug, Clone)]
pub struct AgentContext {
    peer_id: PeerId,
    info: AgentInfo,
    psk: PskConfig,
    certificate_serial: u64,
    metadata_version: u64,
    engine: EngineConfig,
}

impl AgentContext {
    /// Build the local identity from validated configuration and the agent
    /// certificate's fingerprint.
    pub fn new(config: &AgentConfig, peer_id: PeerId) -> TypesResult<Self> {
        config.validate()?;
        let certificate_serial = config
            .certificate_serial
            .unwrap_or_else(|| u64::from(rand::random::<u32>()) << 32);
        Ok(Self {
            peer_id,
            info: AgentInfo {
                display_name: config.display_name.clone(),
                model_name: config.model_name.clone(),
                capabilities: vec![AgentCapability::DataChannels, AgentCapability::QuickTransport],
                state_token: String::new(),
                locales: config.locales.clone(),
            },
            psk: config.psk,
            certificate_serial,
            metadata_version: 0,
            engine: config.engine.clone(),
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn info(&self) -> &AgentInfo {
        &self.info
    }

    pub fn psk_config(&self) -> PskConfig {
        self.psk
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn certificate_serial(&self) -> u64 {
        self.certificate_serial
    }

    /// TXT records advertising this agent: `fp`, `sn`, `at` and `mv`.
    pub fn advertisement(&self, auth_token: &str) -> TypesResult<TxtRecords> {
        let mut mv = Vec::new();
        varint::encode(self.metadata_version, &mut mv)?;

        let serial = self.certificate_serial.to_be_bytes();
        let first = serial.iter().position(|b| *b != 0).unwrap_or(serial.len() - 1);

        let mut txt = TxtRecords::new();
        txt.set("fp", self.peer_id.as_str());
        txt.set("sn", URL_SAFE_NO_PAD.encode(&serial[first..]));
        txt.set("at", auth_token);
        txt.set("mv", URL_SAFE_NO_PAD.encode(mv));
        Ok(txt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_is_44_chars() {
        let id = PeerId::from_spki(b"spki-der-bytes");
        assert_eq!(id.as_str().len(), 44);
        assert!(id.as_str().ends_with('='));
        assert_eq!(id, PeerId::from_spki(b"spki-der-bytes"));
        assert_ne!(id, PeerId::from_spki(b"other"));
    }

    #[test]
    fn test_verify_fingerprint() {
        let fp = PeerId::from_spki(b"cert-b").to_string();
        let certs: [&[u8]; 2] = [b"cert-a", b"cert-b"];
        assert!(PeerId::verify_fingerprint(&fp, certs).is_ok());
        let wrong: [&[u8]; 1] = [b"cert-a"];
        assert!(matches!(
            PeerId::verify_fingerprint(&fp, wrong),
            Err(TypesError::FingerprintMismatch(_))
        ));
    }

    #[test]
    fn test_capability_codes() {
        assert_eq!(AgentCapability::DataChannels.code(), 1100);
        assert_eq!(AgentCapability::from_code(1200), AgentCapability::QuickTransport);
        assert_eq!(AgentCapability::from_code(4242), AgentCapability::Other(4242));
    }

    #[test]
    fn test_psk_config_bounds() {
        assert!(PskConfig::default().validate().is_ok());
        let bad_ease = PskConfig {
            ease_of_input: 101,
            min_entropy_bits: 20,
        };
        assert!(bad_ease.validate().is_err());
        let bad_bits = PskConfig {
            ease_of_input: 0,
            min_entropy_bits: 61,
        };
        assert!(bad_bits.validate().is_err());
    }

    #[test]
    fn test_tokens() {
        let token = new_state_token();
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(new_auth_token().len(), 9);
    }

    #[test]
    fn test_advertisement_records() {
        let config = AgentConfig {
            display_name: "Living Room".to_string(),
            certificate_serial: Some(0x0102_0000_0000),
            ..Default::default()
        };
        let ctx = AgentContext::new(&config, PeerId::from_spki(b"tv")).unwrap();
        let txt = ctx.advertisement("abcdefghi").unwrap();
        assert_eq!(txt.get_one("fp").unwrap(), ctx.peer_id().as_str());
        assert_eq!(txt.get_one("at").unwrap(), "abcdefghi");
        assert_eq!(txt.get_one("sn").unwrap(), URL_SAFE_NO_PAD.encode([1u8, 2, 0, 0, 0, 0]));
        assert_eq!(txt.get_one("mv").unwrap(), "AA");
    }
}
