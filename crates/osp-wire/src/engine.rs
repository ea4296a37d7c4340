//! Per-connection protocol engine.
//!
//! One [`Engine`] backs each connection for its whole life. Before
//! authentication it owns the control stream through two tasks:
//!
//! - **reader**: decodes control messages and applies them to the shared
//!   state under one lock, so handlers are serialized
//! - **writer**: drains the outbound queue onto the stream, in order
//!
//! When both sides report a successful PAKE the reader hands the network
//! connection over to its application transport and starts the stream
//! acceptor, which dispatches each incoming stream by its first message.
//!
//! The first terminal error wins. Closing cancels every task, lets the
//! writer flush what is already queued, and closes the transport.

use crate::auth::{AuthAction, AuthStage, AuthState};
use crate::channel::DataChannel;
use crate::codec::MessageCodec;
use crate::error::{WireError, WireResult};
use crate::message::{Message, ResultCode};
use crate::pooled::{PooledTransport, TransportStream};
use crate::stream::MessageStream;
use crate::transport::{
    ApplicationConnection, ApplicationStream, BoxedReader, BoxedWriter, NetworkConnection,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use osp_types::agent::new_state_token;
use osp_types::{
    derive_role, AgentContext, AgentInfo, AuthResult, AuthenticationRole, ConnectionRole,
    PeerId, PskConfig, PskInputMethod,
};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Single-slot queue between a stream dispatcher and an `accept_*` caller.
pub(crate) struct HandOff<T> {
    tx: mpsc::Sender<T>,
    rx: tokio::sync::Mutex<mpsc::Receiver<T>>,
}

impl<T> HandOff<T> {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub(crate) async fn pop(&self) -> WireResult<T> {
        self.rx.lock().await.recv().await.ok_or(WireError::Closed)
    }
}

/// What the peer has told us about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAgent {
    pub peer_id: PeerId,
    pub info: Option<AgentInfo>,
    pub psk: Option<PskConfig>,
}

struct PendingExchange {
    request_id: u64,
    done: oneshot::Sender<WireResult<AuthenticationRole>>,
}

struct EngineState {
    next_request_id: u64,
    next_local_id: u64,
    remote_info: Option<AgentInfo>,
    remote_psk: Option<PskConfig>,
    pending_exchange: Option<PendingExchange>,
    auth: Option<AuthState>,
    shared_secret_fingerprint: Option<String>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    network: Option<Box<dyn NetworkConnection>>,
    app: Option<Arc<dyn ApplicationConnection>>,
    closed: Option<WireError>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    acceptor: Option<JoinHandle<()>>,
}

impl EngineState {
    fn send(&self, message: Message) {
        match &self.outbound {
            Some(tx) => {
                if tx.send(message).is_err() {
                    debug!("OSP: control writer is gone, dropping message");
                }
            }
            None => debug!(msg = message.name(), "OSP: control stream closed, dropping message"),
        }
    }
}

/// Streams tagged with one exchange id are parked until the transport
/// for that id is registered, up to this many.
const MAX_PARKED_STREAMS: usize = 16;

enum Route {
    Live(mpsc::UnboundedSender<TransportStream>),
    Parked(Vec<TransportStream>),
}

pub(crate) struct Engine {
    id: Uuid,
    ctx: Arc<AgentContext>,
    role: ConnectionRole,
    remote_id: PeerId,
    local_info: AgentInfo,
    auth_token: Option<String>,
    state: Mutex<EngineState>,
    shutdown: CancellationToken,
    auth_complete: CancellationToken,
    need_psk: watch::Sender<bool>,
    connected: watch::Sender<bool>,
    closed_done: watch::Sender<bool>,
    pub(crate) channels: HandOff<DataChannel>,
    pub(crate) transports: HandOff<PooledTransport>,
    pub(crate) streams: HandOff<MessageStream>,
    routes: DashMap<u64, Route>,
}

impl Engine {
    /// Take over `network`'s control stream and start the control tasks.
    pub(crate) fn start(
        ctx: Arc<AgentContext>,
        mut network: Box<dyn NetworkConnection>,
        role: ConnectionRole,
        auth_token: Option<String>,
    ) -> WireResult<Arc<Self>> {
        let control = network.take_control_stream().ok_or_else(|| {
            WireError::Protocol("network connection has no control stream".to_string())
        })?;
        let remote_id = network.remote_peer_id().clone();
        let (outbound, rx) = mpsc::unbounded_channel();

        let mut local_info = ctx.info().clone();
        local_info.state_token = new_state_token();

        let engine = Arc::new(Self {
            id: Uuid::new_v4(),
            ctx,
            role,
            remote_id,
            local_info,
            auth_token,
            state: Mutex::new(EngineState {
                next_request_id: 1,
                next_local_id: match role {
                    ConnectionRole::Initiator => 1,
                    ConnectionRole::Responder => 2,
                },
                remote_info: None,
                remote_psk: None,
                pending_exchange: None,
                auth: None,
                shared_secret_fingerprint: None,
                outbound: Some(outbound),
                network: Some(network),
                app: None,
                closed: None,
                reader: None,
                writer: None,
                acceptor: None,
            }),
            shutdown: CancellationToken::new(),
            auth_complete: CancellationToken::new(),
            need_psk: watch::Sender::new(false),
            connected: watch::Sender::new(false),
            closed_done: watch::Sender::new(false),
            channels: HandOff::new(),
            transports: HandOff::new(),
            streams: HandOff::new(),
            routes: DashMap::new(),
        });

        let ApplicationStream { reader, writer } = control;
        let writer_task = tokio::spawn(
            engine
                .clone()
                .run_control_writer(FramedWrite::new(writer, MessageCodec::new()), rx),
        );
        let reader_task = tokio::spawn(
            engine
                .clone()
                .run_control_reader(FramedRead::new(reader, MessageCodec::new())),
        );
        {
            let mut state = engine.lock();
            state.writer = Some(writer_task);
            state.reader = Some(reader_task);
        }

        info!(
            conn = %engine.id,
            role = ?role,
            remote = %engine.remote_id,
            "OSP: connection started"
        );
        Ok(engine)
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn connection_role(&self) -> ConnectionRole {
        self.role
    }

    pub(crate) fn remote_peer_id(&self) -> &PeerId {
        &self.remote_id
    }

    pub(crate) fn context(&self) -> &AgentContext {
        &self.ctx
    }

    fn local_psk(&self) -> PskConfig {
        self.ctx.psk_config()
    }

    fn role_from(&self, state: &EngineState) -> Option<AuthenticationRole> {
        state.remote_psk.map(|remote| {
            derive_role(
                self.local_psk().ease_of_input,
                remote.ease_of_input,
                self.role,
            )
        })
    }

    pub(crate) fn authentication_role(&self) -> Option<AuthenticationRole> {
        self.role_from(&self.lock())
    }

    pub(crate) fn remote_agent(&self) -> RemoteAgent {
        let state = self.lock();
        RemoteAgent {
            peer_id: self.remote_id.clone(),
            info: state.remote_info.clone(),
            psk: state.remote_psk,
        }
    }

    pub(crate) fn auth_stage(&self) -> Option<AuthStage> {
        self.lock().auth.as_ref().map(AuthState::stage)
    }

    pub(crate) fn shared_secret_fingerprint(&self) -> Option<String> {
        self.lock().shared_secret_fingerprint.clone()
    }

    /// The error the connection terminated with, or `Closed`.
    pub(crate) fn terminal_error(&self) -> WireError {
        self.lock().closed.clone().unwrap_or(WireError::Closed)
    }

    fn new_auth(&self, role: AuthenticationRole) -> AuthState {
        AuthState::new(
            role,
            self.ctx.peer_id().clone(),
            self.remote_id.clone(),
            self.auth_token.clone(),
        )
    }

    // ---- info exchange ----

    /// Send our PAKE capabilities and ask for the peer's agent info. Returns
    /// `None` when an exchange is already in flight.
    pub(crate) fn exchange_info(
        &self,
    ) -> WireResult<Option<oneshot::Receiver<WireResult<AuthenticationRole>>>> {
        let mut state = self.lock();
        if let Some(err) = &state.closed {
            return Err(err.clone());
        }
        if state.pending_exchange.is_some() {
            debug!(conn = %self.id, "OSP: info exchange already pending");
            return Ok(None);
        }

        let psk = self.local_psk();
        state.send(Message::AuthCapabilities {
            psk_ease_of_input: u64::from(psk.ease_of_input),
            psk_input_methods: vec![PskInputMethod::Numeric],
            psk_min_bits_of_entropy: u64::from(psk.min_entropy_bits),
        });

        let request_id = state.next_request_id;
        state.next_request_id += 1;
        state.send(Message::AgentInfoRequest { request_id });

        let (done, rx) = oneshot::channel();
        state.pending_exchange = Some(PendingExchange { request_id, done });
        Ok(Some(rx))
    }

    fn check_info_complete(&self, state: &mut EngineState) {
        if state.closed.is_some() || state.remote_info.is_none() {
            return;
        }
        let Some(role) = self.role_from(state) else {
            return;
        };
        let Some(pending) = state.pending_exchange.take() else {
            return;
        };
        info!(conn = %self.id, %role, "OSP: info exchange complete");
        if pending.done.send(Ok(role)).is_err() {
            debug!(conn = %self.id, "OSP: info exchange waiter went away");
        }
    }

    // ---- authentication ----

    fn drive_auth(&self, state: &mut EngineState) -> WireResult<()> {
        let Some(auth) = state.auth.as_mut() else {
            return Ok(());
        };
        let mut actions = Vec::new();
        let advanced = auth.advance(&mut actions);
        let fingerprint = auth.shared_secret().map(crate::auth::secret_fingerprint);

        for action in actions {
            match action {
                AuthAction::Send(message) => state.send(message),
                AuthAction::NeedPsk => {
                    debug!(conn = %self.id, "OSP: PSK needed");
                    self.need_psk.send_replace(true);
                }
                AuthAction::Complete => {
                    state.shared_secret_fingerprint = fingerprint.clone();
                    info!(conn = %self.id, "OSP: authentication complete");
                    self.auth_complete.cancel();
                }
            }
        }
        advanced.map_err(WireError::from)
    }

    /// Wait until the PSK is needed locally.
    pub(crate) async fn wait_need_psk(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> WireResult<()> {
        let mut rx = self.need_psk.subscribe();
        let waited = self
            .wait(
                async move {
                    rx.wait_for(|needed| *needed)
                        .await
                        .map(|_| ())
                        .map_err(|_| WireError::Closed)
                },
                cancel,
                self.ctx.engine().auth_timeout(),
            )
            .await;
        self.expire_auth_on_deadline(waited)
    }

    /// Ask a presenting peer to start. No-op when we present.
    pub(crate) fn request_psk(&self) -> WireResult<()> {
        let mut state = self.lock();
        if let Some(err) = &state.closed {
            return Err(err.clone());
        }
        match self.role_from(&state) {
            None => Err(WireError::Protocol(
                "authentication role is unknown until the info exchange completes".to_string(),
            )),
            Some(AuthenticationRole::Presenter) => Ok(()),
            Some(role) => {
                if state.auth.is_some() {
                    return Err(crate::error::AuthError::AlreadyAuthenticating.into());
                }
                state.auth = Some(self.new_auth(role));
                self.drive_auth(&mut state)
            }
        }
    }

    /// Supply the local PSK and wait until the connection is handed over to
    /// its application transport.
    pub(crate) async fn authenticate(
        self: &Arc<Self>,
        psk: &[u8],
        cancel: &CancellationToken,
    ) -> WireResult<()> {
        let driven = {
            let mut state = self.lock();
            if let Some(err) = &state.closed {
                return Err(err.clone());
            }
            let role = self.role_from(&state).ok_or_else(|| {
                WireError::Protocol(
                    "authentication role is unknown until the info exchange completes"
                        .to_string(),
                )
            })?;
            if state.auth.is_none() {
                state.auth = Some(self.new_auth(role));
            }
            if let Some(auth) = state.auth.as_mut() {
                auth.set_local_psk(psk)?;
            }
            self.drive_auth(&mut state)
        };
        if let Err(e) = driven {
            self.begin_close(e.clone());
            return Err(e);
        }

        let mut rx = self.connected.subscribe();
        let waited = self
            .wait(
                async move {
                    rx.wait_for(|connected| *connected)
                        .await
                        .map(|_| ())
                        .map_err(|_| WireError::Closed)
                },
                cancel,
                self.ctx.engine().auth_timeout(),
            )
            .await;
        self.expire_auth_on_deadline(waited)
    }

    /// Turn an elapsed auth deadline into a timeout failure: tell the peer
    /// and close the connection.
    fn expire_auth_on_deadline(self: &Arc<Self>, waited: WireResult<()>) -> WireResult<()> {
        if !matches!(waited, Err(WireError::DeadlineElapsed)) {
            return waited;
        }
        {
            let mut state = self.lock();
            if state.closed.is_some() {
                drop(state);
                return Err(self.terminal_error());
            }
            let mut actions = Vec::new();
            match state.auth.as_mut() {
                Some(auth) => {
                    auth.time_out(&mut actions);
                }
                None => actions.push(AuthAction::Send(Message::AuthStatus {
                    result: AuthResult::Timeout,
                })),
            }
            for action in actions {
                if let AuthAction::Send(message) = action {
                    state.send(message);
                }
            }
        }
        let err = WireError::Auth(crate::error::AuthError::Timeout);
        self.begin_close(err.clone());
        Err(err)
    }

    // ---- control stream ----

    fn handle_control(&self, message: Message) -> WireResult<()> {
        debug!(conn = %self.id, msg = message.name(), "OSP: control message received");
        let mut state = self.lock();
        if state.closed.is_some() {
            return Ok(());
        }

        match message {
            Message::AgentInfoRequest { request_id } => {
                state.send(Message::AgentInfoResponse {
                    request_id,
                    agent_info: self.local_info.clone(),
                });
            }
            Message::AgentInfoResponse {
                request_id,
                agent_info,
            } => match state.pending_exchange.as_ref().map(|p| p.request_id) {
                Some(expected) if expected == request_id => {
                    state.remote_info = Some(agent_info);
                    self.check_info_complete(&mut state);
                }
                Some(_) => debug!(request_id, "OSP: ignoring stale agent-info-response"),
                None => debug!(request_id, "OSP: ignoring unsolicited agent-info-response"),
            },
            Message::AgentInfoEvent { agent_info } => {
                debug!(conn = %self.id, name = %agent_info.display_name, "OSP: remote agent info changed");
                state.remote_info = Some(agent_info);
            }
            Message::AgentStatusRequest { request_id, .. } => {
                state.send(Message::AgentStatusResponse {
                    request_id,
                    status: None,
                });
            }
            Message::AgentStatusResponse { .. } => {}
            Message::AuthCapabilities {
                psk_ease_of_input,
                psk_min_bits_of_entropy,
                ..
            } => {
                let clamp = |v: u64, max: u8| u8::try_from(v).unwrap_or(max).min(max);
                state.remote_psk = Some(PskConfig {
                    ease_of_input: clamp(psk_ease_of_input, PskConfig::MAX_EASE_OF_INPUT),
                    min_entropy_bits: clamp(psk_min_bits_of_entropy, PskConfig::MAX_ENTROPY_BITS),
                });
                self.check_info_complete(&mut state);
            }
            Message::LegacyNeedPsk { .. } => {
                match self.role_from(&state) {
                    Some(AuthenticationRole::Presenter) if state.auth.is_none() => {
                        state.auth = Some(self.new_auth(AuthenticationRole::Presenter));
                        return self.drive_auth(&mut state);
                    }
                    _ => debug!(conn = %self.id, "OSP: ignoring auth-spake2-need-psk"),
                }
            }
            Message::AuthSpake2Handshake { public_value, .. } => {
                let role = self.role_from(&state).ok_or_else(|| {
                    WireError::Protocol(
                        "auth-spake2-handshake before auth-capabilities".to_string(),
                    )
                })?;
                if state.auth.is_none() {
                    state.auth = Some(self.new_auth(role));
                }
                if let Some(auth) = state.auth.as_mut() {
                    auth.set_remote_public(public_value);
                }
                return self.drive_auth(&mut state);
            }
            Message::AuthSpake2Confirmation { confirmation_value } => {
                let auth = state.auth.as_mut().ok_or_else(|| {
                    WireError::Protocol("unsolicited auth-spake2-confirmation".to_string())
                })?;
                auth.set_remote_confirmation(confirmation_value);
                return self.drive_auth(&mut state);
            }
            Message::AuthStatus { result } => {
                let auth = state
                    .auth
                    .as_mut()
                    .ok_or_else(|| WireError::Protocol("unsolicited auth-status".to_string()))?;
                if result != AuthResult::Authenticated {
                    return Err(crate::error::AuthError::RemoteRejected(result).into());
                }
                auth.set_remote_result(result);
                return self.drive_auth(&mut state);
            }
            Message::LegacyHandshake { .. } | Message::LegacyConfirmation { .. } => {
                debug!(conn = %self.id, "OSP: ignoring legacy PAKE message");
            }
            other => {
                return Err(WireError::Protocol(format!(
                    "unexpected {} on control stream",
                    other.name()
                )));
            }
        }
        Ok(())
    }

    async fn run_control_reader(
        self: Arc<Self>,
        mut framed: FramedRead<BoxedReader, MessageCodec>,
    ) {
        let authenticated = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break false,
                _ = self.auth_complete.cancelled() => break true,
                frame = framed.next() => match frame {
                    Some(Ok(message)) => {
                        if let Err(e) = self.handle_control(message) {
                            self.begin_close(e);
                            break false;
                        }
                    }
                    Some(Err(e)) => {
                        self.begin_close(e);
                        break false;
                    }
                    None => {
                        self.begin_close(WireError::ConnectionClosed);
                        break false;
                    }
                },
            }
        };
        drop(framed);

        if authenticated {
            if let Err(e) = self.hand_off().await {
                self.begin_close(e);
            }
        }
    }

    async fn run_control_writer(
        self: Arc<Self>,
        mut framed: FramedWrite<BoxedWriter, MessageCodec>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(message) = rx.recv().await {
            debug!(conn = %self.id, msg = message.name(), "OSP: control message sent");
            if let Err(e) = framed.send(message).await {
                self.begin_close(e);
                return;
            }
        }
    }

    /// Upgrade to the application transport once the control stream has
    /// flushed everything it was given.
    async fn hand_off(self: &Arc<Self>) -> WireResult<()> {
        let writer = {
            let mut state = self.lock();
            state.outbound = None;
            state.writer.take()
        };
        if let Some(mut writer) = writer {
            let drain = self.ctx.engine().close_drain_timeout();
            if tokio::time::timeout(drain, &mut writer).await.is_err() {
                warn!(conn = %self.id, "OSP: control writer did not drain in time");
                writer.abort();
            }
        }

        let network = self.lock().network.take();
        let Some(network) = network else {
            return Err(self.terminal_error());
        };
        let app = network.into_application().await?;

        let closing = {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.app = Some(app.clone());
                state.acceptor = Some(tokio::spawn(self.clone().run_acceptor(app.clone())));
            }
            state.closed.is_some()
        };
        if closing {
            app.close().await;
            return Ok(());
        }

        self.connected.send_replace(true);
        info!(conn = %self.id, remote = %self.remote_id, "OSP: connection authenticated");
        Ok(())
    }

    // ---- application streams ----

    pub(crate) fn app(&self) -> WireResult<Arc<dyn ApplicationConnection>> {
        let state = self.lock();
        if let Some(err) = &state.closed {
            return Err(err.clone());
        }
        state.app.clone().ok_or(WireError::NotAuthenticated)
    }

    pub(crate) fn next_request_id(&self) -> u64 {
        let mut state = self.lock();
        let id = state.next_request_id;
        state.next_request_id += 1;
        id
    }

    /// Next locally allocated channel or exchange id. Initiators use odd
    /// ids and responders even ones, so the two sides never collide.
    pub(crate) fn next_local_id(&self) -> u64 {
        let mut state = self.lock();
        let id = state.next_local_id;
        state.next_local_id += 2;
        id
    }

    /// Start routing streams tagged `exchange_id` to the returned receiver,
    /// handing over any that arrived first.
    pub(crate) fn register_transport(
        &self,
        exchange_id: u64,
    ) -> mpsc::UnboundedReceiver<TransportStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.routes.entry(exchange_id) {
            Entry::Occupied(mut entry) => {
                match std::mem::replace(entry.get_mut(), Route::Live(tx.clone())) {
                    Route::Parked(parked) => {
                        debug!(conn = %self.id, exchange_id, count = parked.len(), "OSP: releasing parked transport streams");
                        for stream in parked {
                            let _ = tx.send(stream);
                        }
                    }
                    Route::Live(_) => {
                        warn!(conn = %self.id, exchange_id, "OSP: replacing pooled transport route");
                    }
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(Route::Live(tx));
            }
        }
        rx
    }

    fn route_stream(&self, stream: TransportStream) {
        let exchange_id = stream.exchange_id();
        match self.routes.entry(exchange_id) {
            Entry::Occupied(mut entry) => match entry.get_mut() {
                Route::Live(tx) => {
                    if tx.send(stream).is_err() {
                        debug!(conn = %self.id, exchange_id, "OSP: pooled transport went away");
                    }
                }
                Route::Parked(parked) if parked.len() >= MAX_PARKED_STREAMS => {
                    warn!(conn = %self.id, exchange_id, "OSP: too many streams for unknown pooled transport, dropping");
                }
                Route::Parked(parked) => parked.push(stream),
            },
            Entry::Vacant(entry) => {
                debug!(conn = %self.id, exchange_id, "OSP: parking stream for pooled transport not yet started");
                entry.insert(Route::Parked(vec![stream]));
            }
        }
    }

    pub(crate) fn unregister_transport(&self, exchange_id: u64) {
        self.routes.remove(&exchange_id);
    }

    async fn push<T>(&self, queue: &HandOff<T>, item: T) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            sent = queue.tx.send(item) => {
                if sent.is_err() {
                    debug!(conn = %self.id, "OSP: accept queue closed");
                }
            }
        }
    }

    async fn run_acceptor(self: Arc<Self>, app: Arc<dyn ApplicationConnection>) {
        let mut dispatchers = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = app.accept_stream() => match accepted {
                    Ok(stream) => {
                        dispatchers.spawn(self.clone().dispatch(stream));
                    }
                    Err(e) => {
                        self.begin_close(e);
                        break;
                    }
                },
                Some(_) = dispatchers.join_next(), if !dispatchers.is_empty() => {}
            }
        }
        dispatchers.shutdown().await;
    }

    /// Route one incoming stream by its first message.
    async fn dispatch(self: Arc<Self>, stream: ApplicationStream) {
        let mut reader = FramedRead::new(stream.reader, MessageCodec::new());
        let writer = FramedWrite::new(stream.writer, MessageCodec::new());

        let first = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            first = reader.next() => first,
        };
        let message = match first {
            Some(Ok(message)) => message,
            Some(Err(e)) if e.kind() == crate::error::ErrorKind::Protocol => {
                self.begin_close(WireError::Protocol(format!(
                    "malformed message on application stream: {e}"
                )));
                return;
            }
            Some(Err(e)) => {
                debug!(conn = %self.id, error = %e, "OSP: application stream failed");
                return;
            }
            None => return,
        };
        debug!(conn = %self.id, msg = message.name(), "OSP: application stream opened");

        match message {
            Message::DataChannelOpenRequest {
                request_id,
                channel_id,
                label,
                protocol,
            } => {
                let stream = MessageStream::from_parts(reader, writer, None);
                let reply = Message::DataChannelOpenResponse {
                    request_id,
                    result: ResultCode::Success,
                };
                if let Err(e) = stream.send(reply).await {
                    debug!(conn = %self.id, error = %e, "OSP: failed to answer data-channel-open-request");
                    return;
                }
                let channel = DataChannel::new(channel_id, label, protocol, stream);
                self.push(&self.channels, channel).await;
            }
            Message::DataTransportStartRequest {
                request_id,
                exchange_id,
            } => {
                let stream = MessageStream::from_parts(reader, writer, None);
                match PooledTransport::accept(self.clone(), exchange_id, request_id, stream).await {
                    Ok(transport) => self.push(&self.transports, transport).await,
                    Err(e) => {
                        debug!(conn = %self.id, error = %e, "OSP: failed to answer data-transport-start-request");
                    }
                }
            }
            Message::DataTransportStreamRequest { exchange_id, .. } => {
                self.route_stream(TransportStream::new(
                    exchange_id,
                    MessageStream::from_parts(reader, writer, None),
                ));
            }
            other => {
                let stream = MessageStream::from_parts(reader, writer, Some(other));
                self.push(&self.streams, stream).await;
            }
        }
    }

    // ---- waiting and closing ----

    /// Run `fut` until it finishes, the connection closes, `cancel` fires or
    /// `deadline` elapses, whichever comes first.
    pub(crate) async fn wait<T>(
        &self,
        fut: impl Future<Output = WireResult<T>>,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
    ) -> WireResult<T> {
        let deadline = async move {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            result = fut => result,
            _ = self.shutdown.cancelled() => Err(self.terminal_error()),
            _ = cancel.cancelled() => Err(WireError::Cancelled),
            _ = deadline => Err(WireError::DeadlineElapsed),
        }
    }

    /// Record `err` as the terminal error and start tearing down. Returns
    /// false if the connection was already closing.
    pub(crate) fn begin_close(self: &Arc<Self>, err: WireError) -> bool {
        let mut state = self.lock();
        if state.closed.is_some() {
            return false;
        }
        match &err {
            WireError::Closed => info!(conn = %self.id, "OSP: closing connection"),
            other => warn!(conn = %self.id, error = %other, "OSP: connection failed"),
        }
        state.closed = Some(err.clone());
        state.outbound = None;
        if let Some(pending) = state.pending_exchange.take() {
            let _ = pending.done.send(Err(err));
        }
        drop(state);

        self.shutdown.cancel();
        tokio::spawn(self.clone().teardown());
        true
    }

    async fn teardown(self: Arc<Self>) {
        let (reader, writer, acceptor) = {
            let mut state = self.lock();
            (state.reader.take(), state.writer.take(), state.acceptor.take())
        };
        if let Some(reader) = reader {
            let _ = reader.await;
        }
        if let Some(mut writer) = writer {
            let drain = self.ctx.engine().close_drain_timeout();
            if tokio::time::timeout(drain, &mut writer).await.is_err() {
                warn!(conn = %self.id, "OSP: dropping unsent control messages");
                writer.abort();
            }
        }
        // The reader may have started an acceptor before it stopped.
        let acceptor = acceptor.or_else(|| self.lock().acceptor.take());
        if let Some(acceptor) = acceptor {
            let _ = acceptor.await;
        }

        let (network, app) = {
            let mut state = self.lock();
            (state.network.take(), state.app.clone())
        };
        if let Some(network) = network {
            network.close().await;
        }
        if let Some(app) = app {
            app.close().await;
        }
        self.routes.clear();
        self.closed_done.send_replace(true);
        debug!(conn = %self.id, "OSP: connection torn down");
    }

    /// Close with `err` and wait for teardown. Returns the terminal error,
    /// which is `err` only if this call closed the connection.
    pub(crate) async fn close(self: &Arc<Self>, err: WireError) -> WireError {
        self.begin_close(err);
        let mut done = self.closed_done.subscribe();
        let _ = done.wait_for(|done| *done).await;
        self.terminal_error()
    }
}
