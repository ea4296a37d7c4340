//! Open Screen Protocol agent connections.
//!
//! Takes a raw authenticated-transport connection between two agents,
//! exchanges capabilities over its control stream, runs SPAKE2 PSK
//! authentication, and then multiplexes data channels and pooled transports
//! over the connection's streams.
//!
//! ## Architecture
//!
//! - **MessageCodec**: varint type key plus CBOR body framing
//! - **UnauthenticatedConnection**: info exchange and PAKE on the control stream
//! - **Connection**: data channels, pooled transports and raw message streams
//! - **Listener** / **DiscoveredAgent**: inbound and outbound connection setup
//! - **transport**: the seams a QUIC or in-memory transport plugs into

mod cbor;
mod engine;

pub mod auth;
pub mod channel;
pub mod codec;
pub mod connection;
pub mod error;
pub mod listener;
pub mod message;
pub mod pooled;
pub mod stream;
pub mod transport;

pub use auth::{secret_fingerprint, AuthStage};
pub use channel::DataChannel;
pub use codec::{MessageCodec, MAX_FRAME_SIZE};
pub use connection::{Connection, InfoExchange, UnauthenticatedConnection};
pub use engine::RemoteAgent;
pub use error::{AuthError, ErrorKind, WireError, WireResult};
pub use listener::{DiscoveredAgent, Listener};
pub use message::{DataEncoding, DataFrame, Message, ResultCode};
pub use pooled::{PooledTransport, TransportStream};
pub use stream::MessageStream;
