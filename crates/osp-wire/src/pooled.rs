//! Pooled data transports.
//!
//! A pooled transport is an exchange id shared by both agents. Either side
//! can open any number of streams tagged with that id; the receiving
//! engine routes each one to the transport registered under it.

use crate::engine::Engine;
use crate::error::{WireError, WireResult};
use crate::message::{DataEncoding, DataFrame, Message, ResultCode};
use crate::stream::MessageStream;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One pooled transport. Dropping it stops routing new streams to it.
pub struct PooledTransport {
    engine: Arc<Engine>,
    exchange_id: u64,
    /// The stream that carried the start request, kept open for the life
    /// of the transport.
    start: MessageStream,
    incoming: Mutex<mpsc::UnboundedReceiver<TransportStream>>,
}

impl PooledTransport {
    fn new(engine: Arc<Engine>, exchange_id: u64, start: MessageStream) -> Self {
        let incoming = engine.register_transport(exchange_id);
        debug!(conn = %engine.id(), exchange_id, "OSP: pooled transport registered");
        Self {
            engine,
            exchange_id,
            start,
            incoming: Mutex::new(incoming),
        }
    }

    /// Ask the peer to start a new transport.
    pub(crate) async fn open(engine: Arc<Engine>) -> WireResult<Self> {
        let app = engine.app()?;
        let exchange_id = engine.next_local_id();
        let start = MessageStream::new(app.open_stream().await?);
        // Register before the peer can learn the id and open streams on it.
        let transport = Self::new(engine.clone(), exchange_id, start);
        transport
            .start
            .send(Message::DataTransportStartRequest {
                request_id: engine.next_request_id(),
                exchange_id,
            })
            .await?;
        Ok(transport)
    }

    /// Take on a transport the peer started, then answer its request.
    pub(crate) async fn accept(
        engine: Arc<Engine>,
        exchange_id: u64,
        request_id: u64,
        start: MessageStream,
    ) -> WireResult<Self> {
        let transport = Self::new(engine, exchange_id, start);
        transport
            .start
            .send(Message::DataTransportStartResponse {
                request_id,
                result: ResultCode::Success,
            })
            .await?;
        Ok(transport)
    }

    pub fn exchange_id(&self) -> u64 {
        self.exchange_id
    }

    /// Open a new stream within this transport.
    pub async fn open_stream(&self) -> WireResult<TransportStream> {
        let stream = MessageStream::new(self.engine.app()?.open_stream().await?);
        stream
            .send(Message::DataTransportStreamRequest {
                request_id: self.engine.next_request_id(),
                exchange_id: self.exchange_id,
            })
            .await?;
        Ok(TransportStream::new(self.exchange_id, stream))
    }

    /// Wait for the peer to open a stream within this transport.
    pub async fn accept_stream(&self, cancel: &CancellationToken) -> WireResult<TransportStream> {
        self.engine
            .wait(
                async {
                    self.incoming
                        .lock()
                        .await
                        .recv()
                        .await
                        .ok_or(WireError::Closed)
                },
                cancel,
                None,
            )
            .await
    }
}

impl Drop for PooledTransport {
    fn drop(&mut self) {
        self.engine.unregister_transport(self.exchange_id);
    }
}

impl std::fmt::Debug for PooledTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledTransport")
            .field("exchange_id", &self.exchange_id)
            .finish_non_exhaustive()
    }
}

/// A stream within a pooled transport, carrying data frames.
#[derive(Debug)]
pub struct TransportStream {
    exchange_id: u64,
    stream: MessageStream,
}

impl TransportStream {
    pub(crate) fn new(exchange_id: u64, stream: MessageStream) -> Self {
        Self {
            exchange_id,
            stream,
        }
    }

    pub fn exchange_id(&self) -> u64 {
        self.exchange_id
    }

    pub async fn send(&self, payload: &[u8], encoding: DataEncoding) -> WireResult<()> {
        self.stream
            .send(Message::DataFrame(DataFrame::new(payload.to_vec(), encoding)))
            .await
    }

    /// Next payload, or `None` once the peer has finished the stream.
    pub async fn receive(&self) -> WireResult<Option<(Vec<u8>, DataEncoding)>> {
        loop {
            match self.stream.receive().await? {
                Some(Message::DataFrame(frame)) => return Ok(Some((frame.payload, frame.encoding))),
                Some(other) => {
                    debug!(exchange_id = self.exchange_id, msg = other.name(), "OSP: ignoring message on transport stream");
                }
                None => return Ok(None),
            }
        }
    }

    pub async fn close(&self) -> WireResult<()> {
        self.stream.finish().await
    }
}
