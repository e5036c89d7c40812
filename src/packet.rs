/// Socket.IO packet as seen by the cluster adapter
///
/// The adapter never encodes packets for clients; it forwards them between
/// servers inside cluster envelopes and only inspects the type, the ack id
/// and the argument array (for offset tagging).
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Socket.IO packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PacketType {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    ConnectError = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl PacketType {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(Self::Connect),
            1 => Some(Self::Disconnect),
            2 => Some(Self::Event),
            3 => Some(Self::Ack),
            4 => Some(Self::ConnectError),
            5 => Some(Self::BinaryEvent),
            6 => Some(Self::BinaryAck),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = String;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        Self::from_u8(val).ok_or_else(|| format!("Invalid packet type: {}", val))
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> Self {
        packet_type.to_u8()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "type")]
    pub packet_type: PacketType,
    #[serde(default = "default_nsp")]
    pub nsp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

fn default_nsp() -> String {
    "/".to_string()
}

impl Packet {
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            nsp: default_nsp(),
            data: None,
            id: None,
        }
    }

    /// EVENT packet whose arguments are `[event, ...args]`
    pub fn event(nsp: &str, event: &str, args: Vec<JsonValue>) -> Self {
        let mut data = Vec::with_capacity(args.len() + 1);
        data.push(JsonValue::String(event.to_string()));
        data.extend(args);

        Self {
            packet_type: PacketType::Event,
            nsp: nsp.to_string(),
            data: Some(JsonValue::Array(data)),
            id: None,
        }
    }

    pub fn is_event(&self) -> bool {
        self.packet_type == PacketType::Event
    }

    pub fn event_name(&self) -> Option<&str> {
        match &self.data {
            Some(JsonValue::Array(args)) if self.is_event() => args.first()?.as_str(),
            _ => None,
        }
    }

    /// Appends a trailing argument; returns false when the data is not an array
    pub fn push_arg(&mut self, arg: JsonValue) -> bool {
        match &mut self.data {
            Some(JsonValue::Array(args)) => {
                args.push(arg);
                true
            }
            _ => false,
        }
    }
}
