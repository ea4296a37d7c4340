//! In-process transport built on tokio duplex pipes.
//!
//! Both ends of a connection pair share one close signal, so closing either
//! side resets every stream of the pair, like a QUIC connection close.

use super::{
    ApplicationConnection, ApplicationStream, NetworkConnection, NetworkDialer, NetworkListener,
};
use crate::error::{WireError, WireResult};
use crate::listener::DiscoveredAgent;
use async_trait::async_trait;
use dashmap::DashMap;
use osp_types::PeerId;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::debug;

const PIPE_CAPACITY: usize = 64 * 1024;

fn reset() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, "connection closed")
}

struct ClosableReader {
    inner: ReadHalf<DuplexStream>,
    closed: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl AsyncRead for ClosableReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        // Bytes written before the close stay readable.
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Pending if self.closed.as_mut().poll(cx).is_ready() => {
                Poll::Ready(Err(reset()))
            }
            other => other,
        }
    }
}

struct ClosableWriter {
    inner: WriteHalf<DuplexStream>,
    closed: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl AsyncWrite for ClosableWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.closed.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(reset()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

fn wrap(stream: DuplexStream, closed: &CancellationToken) -> ApplicationStream {
    let (reader, writer) = tokio::io::split(stream);
    ApplicationStream {
        reader: Box::new(ClosableReader {
            inner: reader,
            closed: Box::pin(closed.clone().cancelled_owned()),
        }),
        writer: Box::new(ClosableWriter {
            inner: writer,
            closed: Box::pin(closed.clone().cancelled_owned()),
        }),
    }
}

/// One end of an in-memory connection. Serves as both the pre-auth network
/// connection and, after upgrade, the application connection.
pub struct MemoryConnection {
    local_id: PeerId,
    remote_id: PeerId,
    control: Option<DuplexStream>,
    outgoing: mpsc::UnboundedSender<DuplexStream>,
    incoming: Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
    closed: CancellationToken,
}

impl MemoryConnection {
    pub fn local_peer_id(&self) -> &PeerId {
        &self.local_id
    }
}

/// A connected pair: the first end belongs to `a`, the second to `b`.
pub fn connection_pair(a: PeerId, b: PeerId) -> (MemoryConnection, MemoryConnection) {
    let (control_a, control_b) = tokio::io::duplex(PIPE_CAPACITY);
    let (to_b, from_a) = mpsc::unbounded_channel();
    let (to_a, from_b) = mpsc::unbounded_channel();
    let closed = CancellationToken::new();

    let end_a = MemoryConnection {
        local_id: a.clone(),
        remote_id: b.clone(),
        control: Some(control_a),
        outgoing: to_b,
        incoming: Mutex::new(from_b),
        closed: closed.clone(),
    };
    let end_b = MemoryConnection {
        local_id: b,
        remote_id: a,
        control: Some(control_b),
        outgoing: to_a,
        incoming: Mutex::new(from_a),
        closed,
    };
    (end_a, end_b)
}

#[async_trait]
impl NetworkConnection for MemoryConnection {
    fn remote_peer_id(&self) -> &PeerId {
        &self.remote_id
    }

    fn take_control_stream(&mut self) -> Option<ApplicationStream> {
        self.control.take().map(|s| wrap(s, &self.closed))
    }

    async fn into_application(self: Box<Self>) -> WireResult<Arc<dyn ApplicationConnection>> {
        if self.closed.is_cancelled() {
            return Err(WireError::ConnectionClosed);
        }
        Ok(Arc::new(*self))
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

#[async_trait]
impl ApplicationConnection for MemoryConnection {
    async fn open_stream(&self) -> WireResult<ApplicationStream> {
        if self.closed.is_cancelled() {
            return Err(reset().into());
        }
        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        self.outgoing
            .send(remote)
            .map_err(|_| WireError::ConnectionClosed)?;
        Ok(wrap(local, &self.closed))
    }

    async fn accept_stream(&self) -> WireResult<ApplicationStream> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(WireError::ConnectionClosed),
            stream = incoming.recv() => match stream {
                Some(stream) => Ok(wrap(stream, &self.closed)),
                None => Err(WireError::ConnectionClosed),
            },
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

struct Endpoint {
    identity: PeerId,
    inbound: mpsc::UnboundedSender<MemoryConnection>,
}

/// Registry of in-memory listeners keyed by the fingerprint they are
/// reachable under.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<DashMap<PeerId, Endpoint>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen under `identity`.
    pub fn listen(&self, identity: PeerId) -> MemoryListener {
        self.listen_at(identity.clone(), identity)
    }

    /// Listen under `address` while presenting `identity` to dialers. The
    /// two differ only when simulating a certificate that does not match
    /// the advertised fingerprint.
    pub fn listen_at(&self, address: PeerId, identity: PeerId) -> MemoryListener {
        let (inbound, incoming) = mpsc::unbounded_channel();
        self.endpoints
            .insert(address.clone(), Endpoint { identity, inbound });
        MemoryListener {
            network: self.clone(),
            address,
            incoming: Mutex::new(incoming),
            closed: CancellationToken::new(),
        }
    }

    pub fn dialer(&self, identity: PeerId) -> MemoryDialer {
        MemoryDialer {
            network: self.clone(),
            identity,
        }
    }
}

/// Accepts connections dialed to one address of a [`MemoryNetwork`].
pub struct MemoryListener {
    network: MemoryNetwork,
    address: PeerId,
    incoming: Mutex<mpsc::UnboundedReceiver<MemoryConnection>>,
    closed: CancellationToken,
}

#[async_trait]
impl NetworkListener for MemoryListener {
    async fn accept(&self) -> WireResult<Box<dyn NetworkConnection>> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(WireError::Closed),
            conn = incoming.recv() => match conn {
                Some(conn) => Ok(Box::new(conn)),
                None => Err(WireError::Closed),
            },
        }
    }

    async fn close(&self) {
        self.closed.cancel();
        self.network.endpoints.remove(&self.address);
    }
}

/// Dials listeners of a [`MemoryNetwork`] by discovered fingerprint.
pub struct MemoryDialer {
    network: MemoryNetwork,
    identity: PeerId,
}

#[async_trait]
impl NetworkDialer for MemoryDialer {
    async fn dial(&self, agent: &DiscoveredAgent) -> WireResult<Box<dyn NetworkConnection>> {
        let endpoint = self.network.endpoints.get(agent.peer_id()).ok_or_else(|| {
            WireError::from(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no listener for {}", agent.peer_id()),
            ))
        })?;

        let (local, remote) = connection_pair(self.identity.clone(), endpoint.identity.clone());
        endpoint.inbound.send(remote).map_err(|_| {
            WireError::from(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "listener is gone",
            ))
        })?;
        debug!(peer = %agent.peer_id(), "Memory connection established");
        Ok(Box::new(local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn ids() -> (PeerId, PeerId) {
        (PeerId::from_spki(b"a"), PeerId::from_spki(b"b"))
    }

    #[tokio::test]
    async fn test_control_stream_carries_bytes() {
        let (a, b) = ids();
        let (mut end_a, mut end_b) = connection_pair(a.clone(), b.clone());
        assert_eq!(end_a.remote_peer_id(), &b);
        assert_eq!(end_b.remote_peer_id(), &a);

        let mut sa = end_a.take_control_stream().unwrap();
        let mut sb = end_b.take_control_stream().unwrap();
        assert!(end_a.take_control_stream().is_none());

        sa.writer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        sb.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_application_streams_and_close() {
        let (a, b) = ids();
        let (end_a, end_b) = connection_pair(a, b);
        let app_a = Box::new(end_a).into_application().await.unwrap();
        let app_b = Box::new(end_b).into_application().await.unwrap();

        let mut opened = app_a.open_stream().await.unwrap();
        let mut accepted = app_b.accept_stream().await.unwrap();
        opened.writer.write_all(b"x").await.unwrap();
        let mut buf = [0u8; 1];
        accepted.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"x");

        app_a.close().await;
        let err = accepted.reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(matches!(
            app_b.accept_stream().await,
            Err(WireError::ConnectionClosed)
        ));
        assert!(app_a.open_stream().await.is_err());
    }

    #[tokio::test]
    async fn test_dial_unknown_address_is_refused() {
        let network = MemoryNetwork::new();
        let dialer = network.dialer(PeerId::from_spki(b"me"));
        let agent = DiscoveredAgent::new("tv", PeerId::from_spki(b"nobody"), Default::default());
        match dialer.dial(&agent).await {
            Err(WireError::Transport(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused)
            }
            Err(other) => panic!("Expected Transport error, got {other:?}"),
            Ok(_) => panic!("Expected Transport error, got a connection"),
        }
    }
}
