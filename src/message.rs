/// Cluster envelopes exchanged between adapter instances
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::error::AdapterResult;
use crate::options::{Room, WireOptions};
use crate::packet::Packet;

/// Sender id used by stand-alone emitters that are not cluster members
pub const EMITTER_UID: &str = "emitter";

/// The unique id of one adapter instance, regenerated on every start
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn random() -> Self {
        Self(random_id())
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_emitter(&self) -> bool {
        self.0 == EMITTER_UID
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type RequestId = String;

/// Ordering token returned by a transport for a published message
pub type Offset = String;

pub type SocketId = String;

pub fn random_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    uuid[..16].to_string()
}

/// Cluster message kinds, numbered as on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MessageType {
    InitialHeartbeat,
    Heartbeat,
    Broadcast,
    SocketsJoin,
    SocketsLeave,
    DisconnectSockets,
    FetchSockets,
    FetchSocketsResponse,
    ServerSideEmit,
    ServerSideEmitResponse,
    BroadcastClientCount,
    BroadcastAck,
    /// Sent by a newer peer; tolerated and ignored
    Unknown(u8),
}

impl From<u8> for MessageType {
    fn from(val: u8) -> Self {
        match val {
            1 => Self::InitialHeartbeat,
            2 => Self::Heartbeat,
            3 => Self::Broadcast,
            4 => Self::SocketsJoin,
            5 => Self::SocketsLeave,
            6 => Self::DisconnectSockets,
            7 => Self::FetchSockets,
            8 => Self::FetchSocketsResponse,
            9 => Self::ServerSideEmit,
            10 => Self::ServerSideEmitResponse,
            11 => Self::BroadcastClientCount,
            12 => Self::BroadcastAck,
            other => Self::Unknown(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(message_type: MessageType) -> Self {
        match message_type {
            MessageType::InitialHeartbeat => 1,
            MessageType::Heartbeat => 2,
            MessageType::Broadcast => 3,
            MessageType::SocketsJoin => 4,
            MessageType::SocketsLeave => 5,
            MessageType::DisconnectSockets => 6,
            MessageType::FetchSockets => 7,
            MessageType::FetchSocketsResponse => 8,
            MessageType::ServerSideEmit => 9,
            MessageType::ServerSideEmitResponse => 10,
            MessageType::BroadcastClientCount => 11,
            MessageType::BroadcastAck => 12,
            MessageType::Unknown(other) => other,
        }
    }
}

impl MessageType {
    /// Kinds that are answers addressed to one requesting peer
    pub fn is_response(self) -> bool {
        matches!(
            self,
            Self::FetchSocketsResponse
                | Self::ServerSideEmitResponse
                | Self::BroadcastClientCount
                | Self::BroadcastAck
        )
    }
}

/// Envelope published to every other peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMessage {
    pub uid: ServerId,
    #[serde(default)]
    pub nsp: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ClusterMessage {
    pub fn new(uid: ServerId, nsp: &str, message_type: MessageType) -> Self {
        Self {
            uid,
            nsp: nsp.to_string(),
            message_type,
            data: None,
        }
    }

    pub fn with_data<T: Serialize>(mut self, data: &T) -> AdapterResult<Self> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }

    pub fn payload<T: DeserializeOwned>(&self) -> AdapterResult<T> {
        let data = self.data.clone().unwrap_or(JsonValue::Null);
        Ok(serde_json::from_value(data)?)
    }
}

/// Envelope addressed to one specific peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterResponse {
    pub uid: ServerId,
    #[serde(default)]
    pub nsp: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub data: JsonValue,
}

impl ClusterResponse {
    pub fn new<T: Serialize>(
        uid: ServerId,
        nsp: &str,
        message_type: MessageType,
        data: &T,
    ) -> AdapterResult<Self> {
        Ok(Self {
            uid,
            nsp: nsp.to_string(),
            message_type,
            data: serde_json::to_value(data)?,
        })
    }

    pub fn request_id(&self) -> Option<&str> {
        self.data.get("requestId").and_then(|id| id.as_str())
    }

    pub fn payload<T: DeserializeOwned>(&self) -> AdapterResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

impl From<ClusterMessage> for ClusterResponse {
    fn from(message: ClusterMessage) -> Self {
        Self {
            uid: message.uid,
            nsp: message.nsp,
            message_type: message.message_type,
            data: message.data.unwrap_or(JsonValue::Null),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastData {
    pub packet: Packet,
    pub opts: WireOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

/// Payload of SOCKETS_JOIN and SOCKETS_LEAVE
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketsRoomsData {
    pub opts: WireOptions,
    pub rooms: Vec<Room>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectSocketsData {
    pub opts: WireOptions,
    #[serde(default)]
    pub close: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSocketsData {
    pub opts: WireOptions,
    pub request_id: RequestId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSideEmitData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    pub packet: Vec<JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchSocketsResponseData {
    pub request_id: RequestId,
    pub sockets: Vec<JsonValue>,
}

/// Payload of SERVER_SIDE_EMIT_RESPONSE and BROADCAST_ACK
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketResponseData {
    pub request_id: RequestId,
    #[serde(default)]
    pub packet: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCountData {
    pub request_id: RequestId,
    pub client_count: usize,
}

/// Serializable view of a socket, as returned by `fetchSockets`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocketSummary {
    pub id: SocketId,
    #[serde(default)]
    pub handshake: JsonValue,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub data: JsonValue,
}

impl SocketSummary {
    pub fn new(id: impl Into<SocketId>) -> Self {
        Self {
            id: id.into(),
            handshake: JsonValue::Object(Map::new()),
            rooms: Vec::new(),
            data: JsonValue::Null,
        }
    }

    /// Drops the session store reference, which is process-local and may not serialize
    pub fn without_session_store(mut self) -> Self {
        if let JsonValue::Object(handshake) = &mut self.handshake {
            handshake.remove("sessionStore");
        }
        self
    }
}
