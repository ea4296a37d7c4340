//! Connection handles.
//!
//! An [`UnauthenticatedConnection`] wraps a freshly established network
//! connection. It runs the info exchange and the PAKE; a successful
//! [`authenticate_psk`](UnauthenticatedConnection::authenticate_psk) yields
//! the [`Connection`] used for data channels, pooled transports and raw
//! message streams.

use crate::auth::AuthStage;
use crate::channel::DataChannel;
use crate::engine::{Engine, RemoteAgent};
use crate::error::{WireError, WireResult};
use crate::message::Message;
use crate::pooled::PooledTransport;
use crate::stream::MessageStream;
use crate::transport::NetworkConnection;
use osp_types::{AgentContext, AuthenticationRole, ConnectionRole, PeerId};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// A connection that has not yet completed authentication.
#[derive(Clone)]
pub struct UnauthenticatedConnection {
    engine: Arc<Engine>,
}

impl UnauthenticatedConnection {
    /// Start the protocol engine over `network`. Must be called from within
    /// a tokio runtime.
    pub fn new(
        ctx: Arc<AgentContext>,
        network: Box<dyn NetworkConnection>,
        role: ConnectionRole,
    ) -> WireResult<Self> {
        Self::with_auth_token(ctx, network, role, None)
    }

    /// Like [`new`](Self::new), carrying the auth-initiation token the peer
    /// advertised so a consumer can echo it back.
    pub fn with_auth_token(
        ctx: Arc<AgentContext>,
        network: Box<dyn NetworkConnection>,
        role: ConnectionRole,
        auth_token: Option<String>,
    ) -> WireResult<Self> {
        Ok(Self {
            engine: Engine::start(ctx, network, role, auth_token)?,
        })
    }

    pub fn id(&self) -> Uuid {
        self.engine.id()
    }

    pub fn connection_role(&self) -> ConnectionRole {
        self.engine.connection_role()
    }

    pub fn remote_peer_id(&self) -> &PeerId {
        self.engine.remote_peer_id()
    }

    /// Start the info exchange. Returns `None` if one is already running.
    pub fn exchange_info(&self) -> WireResult<Option<InfoExchange>> {
        Ok(self.engine.exchange_info()?.map(|done| InfoExchange {
            engine: self.engine.clone(),
            done,
        }))
    }

    /// The negotiated PAKE role, once both agents' PSK policies are known.
    pub fn authentication_role(&self) -> Option<AuthenticationRole> {
        self.engine.authentication_role()
    }

    pub fn remote_agent(&self) -> RemoteAgent {
        self.engine.remote_agent()
    }

    /// Progress of the PAKE, once it has started.
    pub fn auth_stage(&self) -> Option<AuthStage> {
        self.engine.auth_stage()
    }

    /// A fresh PSK meeting the stricter of the two agents' entropy
    /// requirements.
    pub fn generate_psk(&self) -> [u8; osp_types::psk::PSK_LEN] {
        let local = self.engine.context().psk_config().min_entropy_bits;
        let remote = self
            .engine
            .remote_agent()
            .psk
            .map_or(0, |p| p.min_entropy_bits);
        osp_types::psk::generate_psk(local.max(remote))
    }

    /// Wait until the peer starts authentication and this agent has to
    /// supply a PSK. A presenter is woken by the consumer's request, a
    /// consumer by the presenter's handshake.
    pub async fn accept_authenticate(
        &self,
        cancel: &CancellationToken,
    ) -> WireResult<AuthenticationRole> {
        self.engine.wait_need_psk(cancel).await?;
        self.authentication_role().ok_or_else(|| {
            WireError::Protocol("PSK requested before the info exchange".to_string())
        })
    }

    /// As consumer, ask the presenting peer to begin. No-op as presenter.
    pub fn request_authenticate_psk(&self) -> WireResult<()> {
        self.engine.request_psk()
    }

    /// Authenticate with `psk` and wait for the authenticated connection.
    pub async fn authenticate_psk(
        &self,
        psk: &[u8],
        cancel: &CancellationToken,
    ) -> WireResult<Connection> {
        self.engine.authenticate(psk, cancel).await?;
        Ok(Connection {
            engine: self.engine.clone(),
        })
    }

    /// Close the connection. Returns the error it terminated with.
    pub async fn close(&self) -> WireError {
        self.engine.close(WireError::Closed).await
    }

    pub async fn close_with_error(&self, err: WireError) -> WireError {
        self.engine.close(err).await
    }
}

impl std::fmt::Debug for UnauthenticatedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnauthenticatedConnection")
            .field("id", &self.engine.id())
            .field("remote", self.engine.remote_peer_id())
            .finish()
    }
}

/// An info exchange in flight.
pub struct InfoExchange {
    engine: Arc<Engine>,
    done: oneshot::Receiver<WireResult<AuthenticationRole>>,
}

impl InfoExchange {
    /// Wait for the peer's agent info and PSK policy. Yields the negotiated
    /// authentication role.
    pub async fn wait(self, cancel: &CancellationToken) -> WireResult<AuthenticationRole> {
        let Self { engine, done } = self;
        engine
            .wait(
                async move { done.await.unwrap_or(Err(WireError::Closed)) },
                cancel,
                engine.context().engine().info_timeout(),
            )
            .await
    }
}

/// An authenticated connection.
#[derive(Clone)]
pub struct Connection {
    engine: Arc<Engine>,
}

impl Connection {
    pub fn id(&self) -> Uuid {
        self.engine.id()
    }

    pub fn remote_agent(&self) -> RemoteAgent {
        self.engine.remote_agent()
    }

    /// Short fingerprint of the PAKE shared secret. Equal on both ends of
    /// the same connection.
    pub fn shared_secret_fingerprint(&self) -> Option<String> {
        self.engine.shared_secret_fingerprint()
    }

    /// Open a data channel. `id` defaults to the next locally allocated
    /// channel id.
    pub async fn open_data_channel(
        &self,
        label: &str,
        protocol: &str,
        id: Option<u64>,
    ) -> WireResult<DataChannel> {
        let app = self.engine.app()?;
        let channel_id = id.unwrap_or_else(|| self.engine.next_local_id());
        let stream = MessageStream::new(app.open_stream().await?);
        stream
            .send(Message::DataChannelOpenRequest {
                request_id: self.engine.next_request_id(),
                channel_id,
                label: label.to_string(),
                protocol: protocol.to_string(),
            })
            .await?;
        debug!(conn = %self.engine.id(), channel_id, label, "OSP: data channel opened");
        Ok(DataChannel::new(
            channel_id,
            label.to_string(),
            protocol.to_string(),
            stream,
        ))
    }

    /// Wait for the peer to open a data channel.
    pub async fn accept_data_channel(&self, cancel: &CancellationToken) -> WireResult<DataChannel> {
        self.engine.app()?;
        self.engine
            .wait(self.engine.channels.pop(), cancel, None)
            .await
    }

    pub async fn open_pooled_transport(&self) -> WireResult<PooledTransport> {
        PooledTransport::open(self.engine.clone()).await
    }

    pub async fn accept_pooled_transport(
        &self,
        cancel: &CancellationToken,
    ) -> WireResult<PooledTransport> {
        self.engine.app()?;
        self.engine
            .wait(self.engine.transports.pop(), cancel, None)
            .await
    }

    /// Open a raw message stream. The peer receives it from
    /// [`accept_stream`](Self::accept_stream) once the first message
    /// arrives.
    pub async fn open_stream(&self) -> WireResult<MessageStream> {
        Ok(MessageStream::new(self.engine.app()?.open_stream().await?))
    }

    /// Wait for a peer stream whose first message is neither a data channel
    /// nor a pooled transport request.
    pub async fn accept_stream(&self, cancel: &CancellationToken) -> WireResult<MessageStream> {
        self.engine.app()?;
        self.engine
            .wait(self.engine.streams.pop(), cancel, None)
            .await
    }

    pub async fn close(&self) -> WireError {
        self.engine.close(WireError::Closed).await
    }

    pub async fn close_with_error(&self, err: WireError) -> WireError {
        self.engine.close(err).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.engine.id())
            .field("remote", self.engine.remote_peer_id())
            .finish()
    }
}
