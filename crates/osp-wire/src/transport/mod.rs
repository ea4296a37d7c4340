//! Transport seams the engine is written against.
//!
//! A [`NetworkConnection`] carries the control stream used before
//! authentication. Once authenticated it is upgraded into an
//! [`ApplicationConnection`], which opens and accepts independent
//! bidirectional streams. Listeners and dialers produce network connections.

pub mod memory;

use crate::error::WireResult;
use crate::listener::DiscoveredAgent;
use async_trait::async_trait;
use osp_types::PeerId;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Read half of a transport stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Write half of a transport stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One bidirectional stream, split into halves that can be owned by
/// separate tasks.
pub struct ApplicationStream {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
}

impl std::fmt::Debug for ApplicationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationStream").finish_non_exhaustive()
    }
}

/// A secured connection before authentication.
#[async_trait]
pub trait NetworkConnection: Send + Sync + 'static {
    /// Identity of the remote agent as proven by its certificate.
    fn remote_peer_id(&self) -> &PeerId;

    /// Hand out the control stream. Returns `None` after the first call.
    fn take_control_stream(&mut self) -> Option<ApplicationStream>;

    /// Upgrade into multiplexed stream mode. The control stream must have
    /// been released by its users first.
    async fn into_application(self: Box<Self>) -> WireResult<Arc<dyn ApplicationConnection>>;

    /// Tear down the connection. Idempotent.
    async fn close(&self);
}

/// An authenticated connection carrying independent streams.
#[async_trait]
pub trait ApplicationConnection: Send + Sync + 'static {
    async fn open_stream(&self) -> WireResult<ApplicationStream>;

    /// Wait for the remote side to open a stream.
    async fn accept_stream(&self) -> WireResult<ApplicationStream>;

    /// Tear down the connection and every stream on it. Idempotent.
    async fn close(&self);
}

/// Source of inbound network connections.
#[async_trait]
pub trait NetworkListener: Send + Sync + 'static {
    async fn accept(&self) -> WireResult<Box<dyn NetworkConnection>>;

    async fn close(&self);
}

/// Establishes outbound network connections to discovered agents.
#[async_trait]
pub trait NetworkDialer: Send + Sync + 'static {
    async fn dial(&self, agent: &DiscoveredAgent) -> WireResult<Box<dyn NetworkConnection>>;
}
