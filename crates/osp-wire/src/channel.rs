//! Data channels: labelled message streams opened by either agent.

use crate::error::WireResult;
use crate::message::{DataEncoding, DataFrame, Message, ResultCode};
use crate::stream::MessageStream;
use tracing::{debug, warn};

/// One data channel on an authenticated connection.
pub struct DataChannel {
    id: u64,
    label: String,
    protocol: String,
    stream: MessageStream,
}

impl DataChannel {
    pub(crate) fn new(id: u64, label: String, protocol: String, stream: MessageStream) -> Self {
        Self {
            id,
            label,
            protocol,
            stream,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Send `payload` as one data frame.
    pub async fn send(&self, payload: &[u8], encoding: DataEncoding) -> WireResult<()> {
        self.send_frame(DataFrame::new(payload.to_vec(), encoding))
            .await
    }

    pub async fn send_frame(&self, frame: DataFrame) -> WireResult<()> {
        self.stream.send(Message::DataFrame(frame)).await
    }

    /// Next payload and its encoding, or `None` once the peer has closed the
    /// channel.
    pub async fn receive(&self) -> WireResult<Option<(Vec<u8>, DataEncoding)>> {
        Ok(self
            .receive_frame()
            .await?
            .map(|frame| (frame.payload, frame.encoding)))
    }

    /// Like [`receive`](Self::receive), keeping the frame's timing fields.
    pub async fn receive_frame(&self) -> WireResult<Option<DataFrame>> {
        loop {
            match self.stream.receive().await? {
                Some(Message::DataFrame(frame)) => return Ok(Some(frame)),
                Some(Message::DataChannelOpenResponse { result, .. }) => {
                    if result != ResultCode::Success {
                        warn!(channel = self.id, ?result, "OSP: data channel open was refused");
                    }
                }
                Some(other) => {
                    debug!(channel = self.id, msg = other.name(), "OSP: ignoring message on data channel");
                }
                None => return Ok(None),
            }
        }
    }

    /// Finish the sending side. Frames already sent are still delivered.
    pub async fn close(&self) -> WireResult<()> {
        self.stream.finish().await
    }
}

impl std::fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataChannel")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("protocol", &self.protocol)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ApplicationStream;

    fn pair() -> (DataChannel, DataChannel) {
        let (a, b) = tokio::io::duplex(4096);
        let wrap = |s: tokio::io::DuplexStream| {
            let (r, w) = tokio::io::split(s);
            MessageStream::new(ApplicationStream {
                reader: Box::new(r),
                writer: Box::new(w),
            })
        };
        (
            DataChannel::new(1, "chat".into(), String::new(), wrap(a)),
            DataChannel::new(1, "chat".into(), String::new(), wrap(b)),
        )
    }

    #[tokio::test]
    async fn test_open_response_is_skipped() {
        let (a, b) = pair();
        a.stream
            .send(Message::DataChannelOpenResponse {
                request_id: 1,
                result: ResultCode::Success,
            })
            .await
            .unwrap();
        a.send(b"hi", DataEncoding::Text).await.unwrap();
        a.close().await.unwrap();

        assert_eq!(
            b.receive().await.unwrap(),
            Some((b"hi".to_vec(), DataEncoding::Text))
        );
        assert_eq!(b.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_frame_fields_survive() {
        let (a, b) = pair();
        let mut frame = DataFrame::new(vec![1, 2, 3], DataEncoding::ArrayBuffer);
        frame.sequence_number = Some(7);
        a.send_frame(frame.clone()).await.unwrap();
        assert_eq!(b.receive_frame().await.unwrap(), Some(frame));
    }
}
