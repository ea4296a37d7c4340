//! Wire protocol message types.
//!
//! Every message on every stream is a type key followed by a CBOR map with
//! small integer keys. [`Message`] is the closed set of messages this engine
//! speaks; [`Message::from_body`] is the lookup from type key to record
//! shape, and [`Message::to_body`] its inverse.

use crate::cbor::{Record, RecordBuilder};
use crate::error::{WireError, WireResult};
use ciborium::value::Value;
use osp_types::{AgentCapability, AgentInfo, AuthResult, PskInputMethod};

/// Type keys, as assigned by the protocol registry.
pub mod type_key {
    pub const AGENT_INFO_REQUEST: u64 = 10;
    pub const AGENT_INFO_RESPONSE: u64 = 11;
    pub const AGENT_STATUS_REQUEST: u64 = 12;
    pub const AGENT_STATUS_RESPONSE: u64 = 13;
    pub const DATA_FRAME: u64 = 24;
    pub const AGENT_INFO_EVENT: u64 = 120;
    pub const AUTH_CAPABILITIES: u64 = 1001;
    pub const AUTH_SPAKE2_CONFIRMATION: u64 = 1003;
    pub const AUTH_STATUS: u64 = 1004;
    pub const AUTH_SPAKE2_HANDSHAKE: u64 = 1005;
    pub const DATA_CHANNEL_OPEN_REQUEST: u64 = 1101;
    pub const DATA_CHANNEL_OPEN_RESPONSE: u64 = 1102;
    pub const DATA_TRANSPORT_START_REQUEST: u64 = 1201;
    pub const DATA_TRANSPORT_START_RESPONSE: u64 = 1202;
    pub const DATA_TRANSPORT_STREAM_REQUEST: u64 = 1203;
    pub const DATA_TRANSPORT_STREAM_RESPONSE: u64 = 1204;
    pub const LEGACY_NEED_PSK: u64 = 99001;
    pub const LEGACY_HANDSHAKE: u64 = 99002;
    pub const LEGACY_CONFIRMATION: u64 = 99003;
}

/// PSK state announced alongside a SPAKE2 public value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PskStatus {
    NeedsPresentation,
    Shown,
    Input,
}

impl PskStatus {
    pub fn code(self) -> u64 {
        match self {
            PskStatus::NeedsPresentation => 0,
            PskStatus::Shown => 1,
            PskStatus::Input => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(PskStatus::NeedsPresentation),
            1 => Some(PskStatus::Shown),
            2 => Some(PskStatus::Input),
            _ => None,
        }
    }
}

/// Encoding of a data-frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataEncoding {
    Binary,
    Text,
    ArrayBuffer,
}

impl DataEncoding {
    pub fn code(self) -> u64 {
        match self {
            DataEncoding::Binary => 0,
            DataEncoding::Text => 1,
            DataEncoding::ArrayBuffer => 2,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(DataEncoding::Binary),
            1 => Some(DataEncoding::Text),
            2 => Some(DataEncoding::ArrayBuffer),
            _ => None,
        }
    }
}

/// Generic result carried by open and start responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    InvalidUrl,
    InvalidPresentationId,
    Timeout,
    TransientError,
    PermanentError,
    Terminating,
    UnknownError,
}

impl ResultCode {
    pub fn code(self) -> u64 {
        match self {
            ResultCode::Success => 1,
            ResultCode::InvalidUrl => 10,
            ResultCode::InvalidPresentationId => 11,
            ResultCode::Timeout => 100,
            ResultCode::TransientError => 101,
            ResultCode::PermanentError => 102,
            ResultCode::Terminating => 103,
            ResultCode::UnknownError => 199,
        }
    }

    /// Unassigned codes read as `UnknownError`.
    pub fn from_code(code: u64) -> Self {
        match code {
            1 => ResultCode::Success,
            10 => ResultCode::InvalidUrl,
            11 => ResultCode::InvalidPresentationId,
            100 => ResultCode::Timeout,
            101 => ResultCode::TransientError,
            102 => ResultCode::PermanentError,
            103 => ResultCode::Terminating,
            _ => ResultCode::UnknownError,
        }
    }
}

/// Media synchronisation point attached to a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaSyncTime {
    pub value: u64,
    pub scale: u64,
}

/// One application payload on a data channel or transport stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    pub encoding: DataEncoding,
    pub sequence_number: Option<u64>,
    pub start_time: Option<u64>,
    pub duration: Option<u64>,
    pub payload: Vec<u8>,
    pub sync_time: Option<MediaSyncTime>,
}

impl DataFrame {
    /// A bare frame with only encoding and payload set.
    pub fn new(payload: impl Into<Vec<u8>>, encoding: DataEncoding) -> Self {
        Self {
            encoding,
            sequence_number: None,
            start_time: None,
            duration: None,
            payload: payload.into(),
            sync_time: None,
        }
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    AgentInfoRequest {
        request_id: u64,
    },
    AgentInfoResponse {
        request_id: u64,
        agent_info: AgentInfo,
    },
    AgentStatusRequest {
        request_id: u64,
        status: Option<String>,
    },
    AgentStatusResponse {
        request_id: u64,
        status: Option<String>,
    },
    /// Unsolicited update of the sender's agent-info.
    AgentInfoEvent {
        agent_info: AgentInfo,
    },
    DataFrame(DataFrame),
    AuthCapabilities {
        psk_ease_of_input: u64,
        psk_input_methods: Vec<PskInputMethod>,
        psk_min_bits_of_entropy: u64,
    },
    AuthSpake2Confirmation {
        confirmation_value: Vec<u8>,
    },
    AuthStatus {
        result: AuthResult,
    },
    AuthSpake2Handshake {
        initiation_token: Option<String>,
        psk_status: PskStatus,
        public_value: Vec<u8>,
    },
    DataChannelOpenRequest {
        request_id: u64,
        channel_id: u64,
        label: String,
        protocol: String,
    },
    DataChannelOpenResponse {
        request_id: u64,
        result: ResultCode,
    },
    DataTransportStartRequest {
        request_id: u64,
        exchange_id: u64,
    },
    DataTransportStartResponse {
        request_id: u64,
        result: ResultCode,
    },
    DataTransportStreamRequest {
        request_id: u64,
        exchange_id: u64,
    },
    DataTransportStreamResponse {
        request_id: u64,
        result: ResultCode,
    },
    /// Consumer asking the presenter to start PSK presentation.
    LegacyNeedPsk {
        auth_initiation_token: String,
    },
    LegacyHandshake {
        auth_initiation_token: String,
        payload: Vec<u8>,
    },
    LegacyConfirmation {
        payload: Vec<u8>,
    },
}

fn agent_info_to_value(info: &AgentInfo) -> Value {
    RecordBuilder::new()
        .text(0, &info.display_name)
        .text(1, &info.model_name)
        .uints(2, info.capabilities.iter().map(|c| c.code()))
        .text(3, &info.state_token)
        .texts(4, &info.locales)
        .build()
}

fn agent_info_at(record: &Record, key: u64) -> WireResult<AgentInfo> {
    let info = record.record(key, "agent-info")?;
    Ok(AgentInfo {
        display_name: info.text(0)?,
        model_name: info.text(1)?,
        capabilities: info
            .uints(2)?
            .into_iter()
            .map(AgentCapability::from_code)
            .collect(),
        state_token: info.text(3)?,
        locales: info.texts(4)?,
    })
}

fn opt_status_to_value(builder: RecordBuilder, status: Option<&str>) -> RecordBuilder {
    match status {
        Some(status) => builder.value(1, RecordBuilder::new().text(0, status).build()),
        None => builder,
    }
}

fn opt_status_from_record(record: &Record) -> WireResult<Option<String>> {
    record
        .opt_record(1, "status")?
        .map(|status| status.text(0))
        .transpose()
}

// Sync time is a plain struct on the wire, keyed by field name.
fn sync_time_to_value(sync: &MediaSyncTime) -> Value {
    Value::Map(vec![
        (Value::Text("Value".into()), Value::Integer(sync.value.into())),
        (Value::Text("Scale".into()), Value::Integer(sync.scale.into())),
    ])
}

fn sync_time_from_value(value: &Value) -> WireResult<MediaSyncTime> {
    let bad = || WireError::Codec("data-frame: malformed sync time".to_string());
    let fields = value.as_map().ok_or_else(bad)?;
    let field = |name: &str| {
        fields
            .iter()
            .find(|(k, _)| k.as_text() == Some(name))
            .and_then(|(_, v)| v.as_integer())
            .and_then(|i| u64::try_from(i).ok())
            .ok_or_else(bad)
    };
    Ok(MediaSyncTime {
        value: field("Value")?,
        scale: field("Scale")?,
    })
}

impl Message {
    pub fn type_key(&self) -> u64 {
        use type_key::*;
        match self {
            Message::AgentInfoRequest { .. } => AGENT_INFO_REQUEST,
            Message::AgentInfoResponse { .. } => AGENT_INFO_RESPONSE,
            Message::AgentStatusRequest { .. } => AGENT_STATUS_REQUEST,
            Message::AgentStatusResponse { .. } => AGENT_STATUS_RESPONSE,
            Message::AgentInfoEvent { .. } => AGENT_INFO_EVENT,
            Message::DataFrame(_) => DATA_FRAME,
            Message::AuthCapabilities { .. } => AUTH_CAPABILITIES,
            Message::AuthSpake2Confirmation { .. } => AUTH_SPAKE2_CONFIRMATION,
            Message::AuthStatus { .. } => AUTH_STATUS,
            Message::AuthSpake2Handshake { .. } => AUTH_SPAKE2_HANDSHAKE,
            Message::DataChannelOpenRequest { .. } => DATA_CHANNEL_OPEN_REQUEST,
            Message::DataChannelOpenResponse { .. } => DATA_CHANNEL_OPEN_RESPONSE,
            Message::DataTransportStartRequest { .. } => DATA_TRANSPORT_START_REQUEST,
            Message::DataTransportStartResponse { .. } => DATA_TRANSPORT_START_RESPONSE,
            Message::DataTransportStreamRequest { .. } => DATA_TRANSPORT_STREAM_REQUEST,
            Message::DataTransportStreamResponse { .. } => DATA_TRANSPORT_STREAM_RESPONSE,
            Message::LegacyNeedPsk { .. } => LEGACY_NEED_PSK,
            Message::LegacyHandshake { .. } => LEGACY_HANDSHAKE,
            Message::LegacyConfirmation { .. } => LEGACY_CONFIRMATION,
        }
    }

    /// Registry name, used in logs and decode errors.
    pub fn name(&self) -> &'static str {
        name_of(self.type_key()).unwrap_or("unknown")
    }

    /// Encode the message body as a CBOR value.
    pub fn to_body(&self) -> Value {
        let b = RecordBuilder::new();
        match self {
            Message::AgentInfoRequest { request_id } => b.uint(0, *request_id).build(),
            Message::AgentInfoResponse {
                request_id,
                agent_info,
            } => b
                .uint(0, *request_id)
                .value(1, agent_info_to_value(agent_info))
                .build(),
            Message::AgentStatusRequest { request_id, status }
            | Message::AgentStatusResponse { request_id, status } => {
                opt_status_to_value(b.uint(0, *request_id), status.as_deref()).build()
            }
            Message::AgentInfoEvent { agent_info } => {
                b.value(0, agent_info_to_value(agent_info)).build()
            }
            Message::DataFrame(frame) => {
                let b = b
                    .uint(0, frame.encoding.code())
                    .opt_uint(1, frame.sequence_number)
                    .opt_uint(2, frame.start_time)
                    .opt_uint(3, frame.duration)
                    .bytes(4, &frame.payload);
                match &frame.sync_time {
                    Some(sync) => b.value(5, sync_time_to_value(sync)).build(),
                    None => b.build(),
                }
            }
            Message::AuthCapabilities {
                psk_ease_of_input,
                psk_input_methods,
                psk_min_bits_of_entropy,
            } => b
                .uint(0, *psk_ease_of_input)
                .uints(1, psk_input_methods.iter().map(|m| m.code()))
                .uint(2, *psk_min_bits_of_entropy)
                .build(),
            Message::AuthSpake2Confirmation { confirmation_value } => {
                b.bytes(0, confirmation_value).build()
            }
            Message::AuthStatus { result } => b.uint(0, result.code()).build(),
            Message::AuthSpake2Handshake {
                initiation_token,
                psk_status,
                public_value,
            } => b
                .value(
                    0,
                    RecordBuilder::new()
                        .opt_text(0, initiation_token.as_deref())
                        .build(),
                )
                .uint(1, psk_status.code())
                .bytes(2, public_value)
                .build(),
            Message::DataChannelOpenRequest {
                request_id,
                channel_id,
                label,
                protocol,
            } => b
                .uint(0, *request_id)
                .uint(1, *channel_id)
                .text(2, label)
                .text(3, protocol)
                .build(),
            Message::DataTransportStartRequest {
                request_id,
                exchange_id,
            }
            | Message::DataTransportStreamRequest {
                request_id,
                exchange_id,
            } => b.uint(0, *request_id).uint(1, *exchange_id).build(),
            Message::DataChannelOpenResponse { request_id, result }
            | Message::DataTransportStartResponse { request_id, result }
            | Message::DataTransportStreamResponse { request_id, result } => {
                b.uint(0, *request_id).uint(1, result.code()).build()
            }
            Message::LegacyNeedPsk {
                auth_initiation_token,
            } => b.text(0, auth_initiation_token).build(),
            Message::LegacyHandshake {
                auth_initiation_token,
                payload,
            } => b.text(0, auth_initiation_token).bytes(1, payload).build(),
            Message::LegacyConfirmation { payload } => b.bytes(1, payload).build(),
        }
    }

    /// Decode the body of a message with the given type key.
    pub fn from_body(key: u64, body: Value) -> WireResult<Self> {
        use type_key::*;
        let what = name_of(key)
            .ok_or_else(|| WireError::Codec(format!("unknown type key: {key}")))?;
        let r = Record::from_value(body, what)?;

        let msg = match key {
            AGENT_INFO_REQUEST => Message::AgentInfoRequest {
                request_id: r.uint(0)?,
            },
            AGENT_INFO_RESPONSE => Message::AgentInfoResponse {
                request_id: r.uint(0)?,
                agent_info: agent_info_at(&r, 1)?,
            },
            AGENT_STATUS_REQUEST => Message::AgentStatusRequest {
                request_id: r.uint(0)?,
                status: opt_status_from_record(&r)?,
            },
            AGENT_STATUS_RESPONSE => Message::AgentStatusResponse {
                request_id: r.uint(0)?,
                status: opt_status_from_record(&r)?,
            },
            AGENT_INFO_EVENT => Message::AgentInfoEvent {
                agent_info: agent_info_at(&r, 0)?,
            },
            DATA_FRAME => {
                let encoding = DataEncoding::from_code(r.uint(0)?).ok_or_else(|| {
                    WireError::Codec("data-frame: unknown encoding id".to_string())
                })?;
                Message::DataFrame(DataFrame {
                    encoding,
                    sequence_number: r.opt_uint(1)?,
                    start_time: r.opt_uint(2)?,
                    duration: r.opt_uint(3)?,
                    payload: r.opt_bytes(4)?.unwrap_or_default(),
                    sync_time: r.opt_value(5).map(sync_time_from_value).transpose()?,
                })
            }
            AUTH_CAPABILITIES => Message::AuthCapabilities {
                psk_ease_of_input: r.uint(0)?,
                psk_input_methods: r
                    .uints(1)?
                    .into_iter()
                    .filter_map(PskInputMethod::from_code)
                    .collect(),
                psk_min_bits_of_entropy: r.uint(2)?,
            },
            AUTH_SPAKE2_CONFIRMATION => Message::AuthSpake2Confirmation {
                confirmation_value: r.bytes(0)?,
            },
            AUTH_STATUS => Message::AuthStatus {
                result: AuthResult::from_code(r.uint(0)?).unwrap_or(AuthResult::UnknownError),
            },
            AUTH_SPAKE2_HANDSHAKE => {
                let token = r.opt_record(0, "auth-initiation-token")?;
                let psk_status = PskStatus::from_code(r.uint(1)?).ok_or_else(|| {
                    WireError::Codec("auth-spake2-handshake: unknown psk status".to_string())
                })?;
                Message::AuthSpake2Handshake {
                    initiation_token: match token {
                        Some(token) => token.opt_text(0)?,
                        None => None,
                    },
                    psk_status,
                    public_value: r.bytes(2)?,
                }
            }
            DATA_CHANNEL_OPEN_REQUEST => Message::DataChannelOpenRequest {
                request_id: r.uint(0)?,
                channel_id: r.uint(1)?,
                label: r.opt_text(2)?.unwrap_or_default(),
                protocol: r.opt_text(3)?.unwrap_or_default(),
            },
            DATA_CHANNEL_OPEN_RESPONSE => Message::DataChannelOpenResponse {
                request_id: r.uint(0)?,
                result: ResultCode::from_code(r.uint(1)?),
            },
            DATA_TRANSPORT_START_REQUEST => Message::DataTransportStartRequest {
                request_id: r.uint(0)?,
                exchange_id: r.uint(1)?,
            },
            DATA_TRANSPORT_START_RESPONSE => Message::DataTransportStartResponse {
                request_id: r.uint(0)?,
                result: ResultCode::from_code(r.uint(1)?),
            },
            DATA_TRANSPORT_STREAM_REQUEST => Message::DataTransportStreamRequest {
                request_id: r.uint(0)?,
                exchange_id: r.uint(1)?,
            },
            DATA_TRANSPORT_STREAM_RESPONSE => Message::DataTransportStreamResponse {
                request_id: r.uint(0)?,
                result: ResultCode::from_code(r.uint(1)?),
            },
            LEGACY_NEED_PSK => Message::LegacyNeedPsk {
                auth_initiation_token: r.opt_text(0)?.unwrap_or_default(),
            },
            LEGACY_HANDSHAKE => Message::LegacyHandshake {
                auth_initiation_token: r.opt_text(0)?.unwrap_or_default(),
                payload: r.opt_bytes(1)?.unwrap_or_default(),
            },
            LEGACY_CONFIRMATION => Message::LegacyConfirmation {
                payload: r.opt_bytes(1)?.unwrap_or_default(),
            },
            other => return Err(WireError::Codec(format!("unknown type key: {other}"))),
        };
        Ok(msg)
    }
}

/// Registry name for a type key, or `None` when the key is not supported.
pub fn name_of(key: u64) -> Option<&'static str> {
    use type_key::*;
    Some(match key {
        AGENT_INFO_REQUEST => "agent-info-request",
        AGENT_INFO_RESPONSE => "agent-info-response",
        AGENT_STATUS_REQUEST => "agent-status-request",
        AGENT_STATUS_RESPONSE => "agent-status-response",
        DATA_FRAME => "data-frame",
        AGENT_INFO_EVENT => "agent-info-event",
        AUTH_CAPABILITIES => "auth-capabilities",
        AUTH_SPAKE2_CONFIRMATION => "auth-spake2-confirmation",
        AUTH_STATUS => "auth-status",
        AUTH_SPAKE2_HANDSHAKE => "auth-spake2-handshake",
        DATA_CHANNEL_OPEN_REQUEST => "data-channel-open-request",
        DATA_CHANNEL_OPEN_RESPONSE => "data-channel-open-response",
        DATA_TRANSPORT_START_REQUEST => "data-transport-start-request",
        DATA_TRANSPORT_START_RESPONSE => "data-transport-start-response",
        DATA_TRANSPORT_STREAM_REQUEST => "data-transport-stream-request",
        DATA_TRANSPORT_STREAM_RESPONSE => "data-transport-stream-response",
        LEGACY_NEED_PSK => "auth-spake2-need-psk",
        LEGACY_HANDSHAKE => "auth-spake2-handshake-legacy",
        LEGACY_CONFIRMATION => "auth-spake2-confirmation-legacy",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) -> Message {
        Message::from_body(msg.type_key(), msg.to_body()).unwrap()
    }

    fn bond() -> AgentInfo {
        AgentInfo {
            display_name: "Agent007".to_string(),
            model_name: "Bond".to_string(),
            capabilities: vec![AgentCapability::DataChannels, AgentCapability::QuickTransport],
            state_token: "01234567".to_string(),
            locales: vec!["EN".to_string()],
        }
    }

    #[test]
    fn test_agent_info_request() {
        let msg = Message::AgentInfoRequest { request_id: 100 };
        assert_eq!(msg.type_key(), 10);
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_agent_info_response() {
        let msg = Message::AgentInfoResponse {
            request_id: 100,
            agent_info: bond(),
        };
        match round_trip(msg) {
            Message::AgentInfoResponse {
                request_id,
                agent_info,
            } => {
                assert_eq!(request_id, 100);
                assert_eq!(agent_info.display_name, "Agent007");
                assert_eq!(agent_info.capabilities[0], AgentCapability::DataChannels);
                assert_eq!(agent_info, bond());
            }
            other => panic!("Expected AgentInfoResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_agent_info_event_and_status() {
        let event = Message::AgentInfoEvent { agent_info: bond() };
        assert_eq!(event.type_key(), 120);
        assert_eq!(round_trip(event.clone()), event);
        // 122 is streaming-capabilities-request, which this engine does not speak.
        assert_eq!(name_of(122), None);

        let status = Message::AgentStatusResponse {
            request_id: 4,
            status: Some("ok".to_string()),
        };
        assert_eq!(round_trip(status.clone()), status);
        let bare = Message::AgentStatusRequest {
            request_id: 5,
            status: None,
        };
        assert_eq!(round_trip(bare.clone()), bare);
    }

    #[test]
    fn test_handshake_with_and_without_token() {
        let msg = Message::AuthSpake2Handshake {
            initiation_token: Some("abcdefghi".to_string()),
            psk_status: PskStatus::Shown,
            public_value: vec![1, 2, 3],
        };
        assert_eq!(round_trip(msg.clone()), msg);

        let msg = Message::AuthSpake2Handshake {
            initiation_token: None,
            psk_status: PskStatus::Input,
            public_value: vec![9; 33],
        };
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_data_frame_optional_fields() {
        let mut frame = DataFrame::new(b"hi".to_vec(), DataEncoding::Text);
        let msg = Message::DataFrame(frame.clone());
        assert_eq!(round_trip(msg.clone()), msg);

        frame.sequence_number = Some(3);
        frame.duration = Some(40);
        frame.sync_time = Some(MediaSyncTime {
            value: 90_000,
            scale: 1_000,
        });
        let msg = Message::DataFrame(frame);
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn test_auth_messages() {
        let caps = Message::AuthCapabilities {
            psk_ease_of_input: 50,
            psk_input_methods: vec![PskInputMethod::Numeric, PskInputMethod::QrCode],
            psk_min_bits_of_entropy: 20,
        };
        assert_eq!(round_trip(caps.clone()), caps);

        let status = Message::AuthStatus {
            result: AuthResult::ProofInvalid,
        };
        assert_eq!(round_trip(status.clone()), status);
    }

    #[test]
    fn test_auth_status_unknown_code_reads_as_unknown_error() {
        let body = RecordBuilder::new().uint(0, 77).build();
        match Message::from_body(type_key::AUTH_STATUS, body).unwrap() {
            Message::AuthStatus { result } => assert_eq!(result, AuthResult::UnknownError),
            other => panic!("Expected AuthStatus, got {other:?}"),
        }
    }

    #[test]
    fn test_channel_and_transport_messages() {
        let open = Message::DataChannelOpenRequest {
            request_id: 1,
            channel_id: 7,
            label: "chat".to_string(),
            protocol: "text".to_string(),
        };
        assert_eq!(round_trip(open.clone()), open);

        let start = Message::DataTransportStartResponse {
            request_id: 2,
            result: ResultCode::Success,
        };
        assert_eq!(round_trip(start.clone()), start);
        assert_eq!(ResultCode::from_code(4242), ResultCode::UnknownError);
    }

    #[test]
    fn test_legacy_messages() {
        let need = Message::LegacyNeedPsk {
            auth_initiation_token: "tok".to_string(),
        };
        assert_eq!(need.type_key(), 99001);
        assert_eq!(round_trip(need.clone()), need);
        let conf = Message::LegacyConfirmation { payload: vec![5] };
        assert_eq!(round_trip(conf.clone()), conf);
    }

    #[test]
    fn test_unknown_key_and_malformed_body() {
        assert!(matches!(
            Message::from_body(4242, Value::Map(vec![])),
            Err(WireError::Codec(_))
        ));
        assert!(Message::from_body(type_key::AGENT_INFO_REQUEST, Value::Map(vec![])).is_err());
        assert!(Message::from_body(type_key::DATA_FRAME, Value::Text("x".into())).is_err());
    }
}
