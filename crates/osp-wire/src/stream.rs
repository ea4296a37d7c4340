//! Framed message streams over one application stream.

use crate::codec::MessageCodec;
use crate::error::WireResult;
use crate::message::Message;
use crate::transport::{ApplicationStream, BoxedReader, BoxedWriter};
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

struct ReadSide {
    framed: FramedRead<BoxedReader, MessageCodec>,
    /// A message already taken off the wire by the stream dispatcher.
    peeked: Option<Message>,
}

/// A bidirectional stream of protocol messages.
///
/// The read and write halves are locked separately, so one task can block
/// in [`receive`](Self::receive) while another sends.
pub struct MessageStream {
    reader: Mutex<ReadSide>,
    writer: Mutex<FramedWrite<BoxedWriter, MessageCodec>>,
}

impl MessageStream {
    pub fn new(stream: ApplicationStream) -> Self {
        Self::from_parts(
            FramedRead::new(stream.reader, MessageCodec::new()),
            FramedWrite::new(stream.writer, MessageCodec::new()),
            None,
        )
    }

    pub(crate) fn from_parts(
        reader: FramedRead<BoxedReader, MessageCodec>,
        writer: FramedWrite<BoxedWriter, MessageCodec>,
        peeked: Option<Message>,
    ) -> Self {
        Self {
            reader: Mutex::new(ReadSide {
                framed: reader,
                peeked,
            }),
            writer: Mutex::new(writer),
        }
    }

    pub async fn send(&self, message: Message) -> WireResult<()> {
        self.writer.lock().await.send(message).await
    }

    /// Next message, or `None` once the peer has finished the stream.
    pub async fn receive(&self) -> WireResult<Option<Message>> {
        let mut reader = self.reader.lock().await;
        if let Some(message) = reader.peeked.take() {
            return Ok(Some(message));
        }
        reader.framed.next().await.transpose()
    }

    /// Finish the write side. The peer sees end-of-stream after any
    /// messages already sent.
    pub async fn finish(&self) -> WireResult<()> {
        self.writer.lock().await.close().await
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DataEncoding, DataFrame};

    fn pipe() -> (MessageStream, MessageStream) {
        let (a, b) = tokio::io::duplex(4096);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (
            MessageStream::new(ApplicationStream {
                reader: Box::new(ar),
                writer: Box::new(aw),
            }),
            MessageStream::new(ApplicationStream {
                reader: Box::new(br),
                writer: Box::new(bw),
            }),
        )
    }

    #[tokio::test]
    async fn test_send_receive_finish() {
        let (a, b) = pipe();
        let frame = Message::DataFrame(DataFrame::new(b"hello".to_vec(), DataEncoding::Binary));
        a.send(frame.clone()).await.unwrap();
        a.finish().await.unwrap();

        assert_eq!(b.receive().await.unwrap(), Some(frame));
        assert_eq!(b.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_peeked_message_comes_first() {
        let (x, y) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(x);
        let stream = MessageStream::from_parts(
            FramedRead::new(Box::new(reader) as BoxedReader, MessageCodec::new()),
            FramedWrite::new(Box::new(writer) as BoxedWriter, MessageCodec::new()),
            Some(Message::AgentInfoRequest { request_id: 9 }),
        );
        drop(y);

        assert_eq!(
            stream.receive().await.unwrap(),
            Some(Message::AgentInfoRequest { request_id: 9 })
        );
        assert_eq!(stream.receive().await.unwrap(), None);
    }
}
