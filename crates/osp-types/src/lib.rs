//! Core types for Open Screen Protocol agents.
//!
//! This crate defines the data shared by the protocol engine and its
//! surrounding tooling: agent identity, authentication roles, configuration,
//! PSK presentation and discovery records. It performs no I/O beyond
//! reading a config file.

pub mod agent;
pub mod auth;
pub mod config;
pub mod error;
pub mod psk;
pub mod txt;
pub mod varint;

pub use agent::{AgentCapability, AgentContext, AgentInfo, PeerId, PskConfig, PskInputMethod};
pub use auth::{derive_role, AuthResult, AuthenticationRole, ConnectionRole};
pub use config::{AgentConfig, EngineConfig};
pub use error::{TypesError, TypesResult};
