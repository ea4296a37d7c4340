//! Message framing codec.
//!
//! Messages are framed as:
//! - a QUIC variable-length integer holding the type key
//! - one CBOR data item holding the body
//!
//! There is no length prefix: the end of a frame is the end of its CBOR item.
//! The decoder finds that end by walking item headers as bytes arrive,
//! resuming where the previous call stopped and skipping string contents
//! without reading them. The body is parsed once, after it is complete.

use bytes::{Buf, BufMut, BytesMut};
use ciborium::value::Value;
use osp_types::varint;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{WireError, WireResult};
use crate::message::{self, Message};

/// Upper bound on a single frame (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Deepest container nesting accepted in a body.
const MAX_NESTING: usize = 128;

/// Codec for type-keyed CBOR frames.
#[derive(Debug, Default, Clone)]
pub struct MessageCodec {
    scan: ItemScan,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> WireResult<Option<Message>> {
        let Some((key, key_len)) = varint::decode(&src[..]) else {
            return Ok(None);
        };
        if message::name_of(key).is_none() {
            return Err(WireError::Codec(format!("unknown type key: {key}")));
        }

        let body_len = match self.scan.resume(&src[key_len..])? {
            Scan::NeedMore(needed) => {
                let frame_len = key_len.saturating_add(needed);
                if frame_len > MAX_FRAME_SIZE {
                    return Err(WireError::MessageTooLarge {
                        size: frame_len,
                        max: MAX_FRAME_SIZE,
                    });
                }
                src.reserve(frame_len.saturating_sub(src.len()));
                return Ok(None);
            }
            Scan::Complete(body_len) => body_len,
        };
        self.scan = ItemScan::default();
        if key_len + body_len > MAX_FRAME_SIZE {
            return Err(WireError::MessageTooLarge {
                size: key_len + body_len,
                max: MAX_FRAME_SIZE,
            });
        }

        let value: Value = ciborium::de::from_reader(&src[key_len..key_len + body_len])
            .map_err(|e| WireError::Codec(format!("malformed CBOR body: {e}")))?;
        src.advance(key_len + body_len);
        Message::from_body(key, value).map(Some)
    }
}

enum Scan {
    /// The item ends at this body offset.
    Complete(usize),
    /// At least this many body bytes are needed before scanning can go on.
    NeedMore(usize),
}

#[derive(Debug, Clone, Copy)]
enum Expect {
    Items(u64),
    UntilBreak,
}

/// Where the walk over a partially received CBOR item stands.
#[derive(Debug, Default, Clone)]
struct ItemScan {
    offset: usize,
    /// Items still owed by each open container, innermost last.
    open: Vec<Expect>,
    started: bool,
}

enum Arg {
    Value(u64),
    Indefinite,
    Break,
}

struct Header {
    major: u8,
    arg: Arg,
    len: usize,
}

fn codec_err(msg: &str) -> WireError {
    WireError::Codec(format!("malformed CBOR body: {msg}"))
}

fn read_header(buf: &[u8]) -> WireResult<Option<Header>> {
    let Some(&initial) = buf.first() else {
        return Ok(None);
    };
    let major = initial >> 5;
    let extra = match initial & 0x1f {
        info @ 0..=23 => {
            return Ok(Some(Header {
                major,
                arg: Arg::Value(u64::from(info)),
                len: 1,
            }))
        }
        24 => 1,
        25 => 2,
        26 => 4,
        27 => 8,
        31 => {
            let arg = if initial == 0xff {
                Arg::Break
            } else {
                Arg::Indefinite
            };
            return Ok(Some(Header { major, arg, len: 1 }));
        }
        info => return Err(codec_err(&format!("reserved additional info {info}"))),
    };
    let Some(bytes) = buf.get(1..1 + extra) else {
        return Ok(None);
    };
    let value = bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    Ok(Some(Header {
        major,
        arg: Arg::Value(value),
        len: 1 + extra,
    }))
}

impl ItemScan {
    /// Continue walking `body`, which holds everything received so far.
    fn resume(&mut self, body: &[u8]) -> WireResult<Scan> {
        if !self.started {
            self.open.push(Expect::Items(1));
            self.started = true;
        }
        loop {
            if self.offset > body.len() {
                return Ok(Scan::NeedMore(self.offset));
            }
            match self.open.last() {
                None => return Ok(Scan::Complete(self.offset)),
                Some(Expect::Items(0)) => {
                    self.open.pop();
                    continue;
                }
                Some(_) => {}
            }

            let Some(Header { major, arg, len }) = read_header(&body[self.offset..])? else {
                return Ok(Scan::NeedMore(self.offset + 1));
            };
            if let Arg::Break = arg {
                match self.open.last() {
                    Some(Expect::UntilBreak) => {
                        self.open.pop();
                        self.offset += len;
                        continue;
                    }
                    _ => return Err(codec_err("unexpected break")),
                }
            }

            if let Some(Expect::Items(remaining)) = self.open.last_mut() {
                *remaining -= 1;
            }
            self.offset += len;
            let nested = match (major, arg) {
                (2 | 3, Arg::Value(n)) => {
                    self.offset = usize::try_from(n)
                        .ok()
                        .and_then(|n| self.offset.checked_add(n))
                        .ok_or(WireError::MessageTooLarge {
                            size: usize::MAX,
                            max: MAX_FRAME_SIZE,
                        })?;
                    None
                }
                (4, Arg::Value(n)) => Some(Expect::Items(n)),
                (5, Arg::Value(n)) => Some(Expect::Items(
                    n.checked_mul(2).ok_or_else(|| codec_err("map too large"))?,
                )),
                (6, Arg::Value(_)) => Some(Expect::Items(1)),
                (2..=5, Arg::Indefinite) => Some(Expect::UntilBreak),
                (0 | 1 | 7, Arg::Value(_)) => None,
                _ => return Err(codec_err("invalid indefinite-length item")),
            };
            if let Some(expect) = nested {
                if self.open.len() >= MAX_NESTING {
                    return Err(codec_err("nesting too deep"));
                }
                self.open.push(expect);
            }
        }
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = WireError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> WireResult<()> {
        let frame = encode_message(&message)?;
        dst.reserve(frame.len());
        dst.put_slice(&frame);
        Ok(())
    }
}

/// Encode one message into a standalone frame.
pub fn encode_message(message: &Message) -> WireResult<Vec<u8>> {
    let mut frame = Vec::new();
    varint::encode(message.type_key(), &mut frame)?;
    ciborium::ser::into_writer(&message.to_body(), &mut frame)
        .map_err(|e| WireError::Codec(format!("failed to encode {}: {e}", message.name())))?;

    if frame.len() > MAX_FRAME_SIZE {
        return Err(WireError::MessageTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(frame)
}

/// Decode exactly one frame from a complete buffer.
pub fn decode_message(bytes: &[u8]) -> WireResult<Message> {
    let mut buf = BytesMut::from(bytes);
    match MessageCodec::new().decode(&mut buf)? {
        Some(message) if buf.is_empty() => Ok(message),
        Some(message) => Err(WireError::Codec(format!(
            "{} trailing bytes after {}",
            buf.len(),
            message.name()
        ))),
        None => Err(WireError::Codec("truncated frame".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DataEncoding, DataFrame};

    #[test]
    fn test_roundtrip_info_request() {
        let mut codec = MessageCodec::new();
        let original = Message::AgentInfoRequest { request_id: 100 };

        let mut buf = BytesMut::new();
        codec.encode(original.clone(), &mut buf).unwrap();
        assert_eq!(buf[0], 10);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, original);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_byte_type_key() {
        let frame = encode_message(&Message::AuthSpake2Handshake {
            initiation_token: None,
            psk_status: crate::message::PskStatus::Shown,
            public_value: vec![7; 33],
        })
        .unwrap();
        assert_eq!(&frame[..2], &[0x43, 0xED]);
        assert!(matches!(
            decode_message(&frame).unwrap(),
            Message::AuthSpake2Handshake { .. }
        ));
    }

    #[test]
    fn test_consecutive_messages_do_not_drift() {
        let mut codec = MessageCodec::new();
        let messages = vec![
            Message::AuthCapabilities {
                psk_ease_of_input: 0,
                psk_input_methods: vec![],
                psk_min_bits_of_entropy: 20,
            },
            Message::AgentInfoRequest { request_id: 1 },
            Message::DataFrame(DataFrame::new(b"hi".to_vec(), DataEncoding::Text)),
        ];

        let mut buf = BytesMut::new();
        for msg in &messages {
            codec.encode(msg.clone(), &mut buf).unwrap();
        }

        let mut decoded = Vec::new();
        while let Some(msg) = codec.decode(&mut buf).unwrap() {
            decoded.push(msg);
        }
        assert_eq!(decoded, messages);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let mut codec = MessageCodec::new();
        let frame = encode_message(&Message::DataChannelOpenRequest {
            request_id: 3,
            channel_id: 9,
            label: "chat".to_string(),
            protocol: String::new(),
        })
        .unwrap();

        let mut buf = BytesMut::new();
        for (i, byte) in frame.iter().enumerate() {
            buf.put_u8(*byte);
            let result = codec.decode(&mut buf).unwrap();
            if i + 1 < frame.len() {
                assert!(result.is_none(), "decoded early at byte {i}");
            } else {
                assert!(result.is_some());
            }
        }
    }

    #[test]
    fn test_unknown_type_key() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        let mut key = Vec::new();
        varint::encode(4242, &mut key).unwrap();
        buf.put_slice(&key);
        buf.put_u8(0xa0);
        match codec.decode(&mut buf) {
            Err(WireError::Codec(msg)) => assert!(msg.contains("4242")),
            other => panic!("Expected Codec error, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let payload = vec![0u8; MAX_FRAME_SIZE];
        let msg = Message::DataFrame(DataFrame::new(payload, DataEncoding::Binary));
        match encode_message(&msg) {
            Err(WireError::MessageTooLarge { max, .. }) => assert_eq!(max, MAX_FRAME_SIZE),
            other => panic!("Expected MessageTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_declared_length_over_limit_rejected_early() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        // data-frame key, one-entry map, key 0, byte string of 32 MiB.
        buf.put_slice(&[0x18, 0xa1, 0x00, 0x5b]);
        buf.put_u64(32 * 1024 * 1024);
        match codec.decode(&mut buf) {
            Err(WireError::MessageTooLarge { size, max }) => {
                assert_eq!(max, MAX_FRAME_SIZE);
                assert!(size > MAX_FRAME_SIZE);
            }
            other => panic!("Expected MessageTooLarge, got {other:?}"),
        }
    }

    #[test]
    fn test_large_frame_arriving_in_chunks() {
        let mut codec = MessageCodec::new();
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let frame = encode_message(&Message::DataFrame(DataFrame::new(
            payload.clone(),
            DataEncoding::Binary,
        )))
        .unwrap();

        let mut buf = BytesMut::new();
        let mut decoded = None;
        for chunk in frame.chunks(4096) {
            assert!(decoded.is_none());
            buf.put_slice(chunk);
            decoded = codec.decode(&mut buf).unwrap();
        }
        match decoded {
            Some(Message::DataFrame(frame)) => assert_eq!(frame.payload, payload),
            other => panic!("Expected DataFrame, got {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_scan_follows_indefinite_items() {
        // [_ 1, (_ h'aa')]
        let item = [0x9f, 0x01, 0x5f, 0x41, 0xaa, 0xff, 0xff];
        let mut scan = ItemScan::default();
        for end in 0..item.len() {
            assert!(matches!(scan.resume(&item[..end]).unwrap(), Scan::NeedMore(_)));
        }
        assert!(matches!(scan.resume(&item).unwrap(), Scan::Complete(7)));

        let mut scan = ItemScan::default();
        assert!(scan.resume(&[0x81, 0xff]).is_err());
        let mut scan = ItemScan::default();
        assert!(scan.resume(&[0x1c]).is_err());
    }

    #[test]
    fn test_decode_message_rejects_trailing_bytes() {
        let mut frame = encode_message(&Message::AgentInfoRequest { request_id: 1 }).unwrap();
        frame.push(0);
        assert!(decode_message(&frame).is_err());
        assert!(decode_message(&frame[..1]).is_err());
    }

    #[tokio::test]
    async fn test_framed_read_across_split_writes() {
        use futures::StreamExt;
        use tokio_util::codec::FramedRead;

        let first = encode_message(&Message::AgentInfoRequest { request_id: 7 }).unwrap();
        let second = encode_message(&Message::DataFrame(DataFrame::new(
            b"payload".to_vec(),
            DataEncoding::Binary,
        )))
        .unwrap();
        let (head, tail) = second.split_at(3);

        let mock = tokio_test::io::Builder::new()
            .read(&first)
            .read(head)
            .read(tail)
            .build();
        let mut framed = FramedRead::new(mock, MessageCodec::new());

        assert_eq!(
            framed.next().await.unwrap().unwrap(),
            Message::AgentInfoRequest { request_id: 7 }
        );
        match framed.next().await.unwrap().unwrap() {
            Message::DataFrame(frame) => assert_eq!(frame.payload, b"payload"),
            other => panic!("Expected DataFrame, got {other:?}"),
        }
        assert!(framed.next().await.is_none());
    }
}
