/// Broadcast options and their wire form
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub type Room = String;

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastFlags {
    /// Never leave this process
    #[serde(default, skip_serializing_if = "is_false")]
    pub local: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub volatile: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOptions {
    pub rooms: HashSet<Room>,
    pub except: HashSet<Room>,
    pub flags: BroadcastFlags,
}

impl BroadcastOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_rooms<I, S>(rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Room>,
    {
        Self {
            rooms: rooms.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn except<I, S>(mut self, rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Room>,
    {
        self.except.extend(rooms.into_iter().map(Into::into));
        self
    }

    pub fn local(mut self) -> Self {
        self.flags.local = true;
        self
    }

    pub fn volatile(mut self) -> Self {
        self.flags.volatile = true;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.flags.timeout = Some(ms);
        self
    }

    pub fn is_local(&self) -> bool {
        self.flags.local
    }
}

/// List-based representation carried inside cluster envelopes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireOptions {
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub except: Vec<Room>,
    #[serde(default)]
    pub flags: BroadcastFlags,
}

pub fn encode_options(opts: &BroadcastOptions) -> WireOptions {
    let mut rooms: Vec<Room> = opts.rooms.iter().cloned().collect();
    let mut except: Vec<Room> = opts.except.iter().cloned().collect();
    rooms.sort();
    except.sort();

    WireOptions {
        rooms,
        except,
        flags: opts.flags.clone(),
    }
}

pub fn decode_options(wire: WireOptions) -> BroadcastOptions {
    BroadcastOptions {
        rooms: wire.rooms.into_iter().collect(),
        except: wire.except.into_iter().collect(),
        flags: wire.flags,
    }
}

impl From<&BroadcastOptions> for WireOptions {
    fn from(opts: &BroadcastOptions) -> Self {
        encode_options(opts)
    }
}

impl From<WireOptions> for BroadcastOptions {
    fn from(wire: WireOptions) -> Self {
        decode_options(wire)
    }
}
