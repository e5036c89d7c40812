/// Process-local room bookkeeping and delivery
///
/// The cluster adapter applies every operation locally through `LocalAdapter`
/// before (or instead of) forwarding it to the other servers.
/// `InMemoryAdapter` keeps:
/// - Sockets (sid -> socket state and delivery channel)
/// - Rooms (room -> [sids])
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, RwLock};

use crate::message::{SocketId, SocketSummary};
use crate::options::{BroadcastOptions, Room};
use crate::packet::Packet;
use crate::registry::{AckCallback, ClientCountCallback};

#[async_trait]
pub trait LocalAdapter: Send + Sync {
    async fn broadcast(&self, packet: Packet, opts: &BroadcastOptions);

    /// Calls `on_client_count` once with the number of targeted sockets, then
    /// `on_ack` for every socket acknowledgement
    async fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: &BroadcastOptions,
        on_client_count: ClientCountCallback,
        on_ack: AckCallback,
    );

    async fn add_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]);

    async fn del_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]);

    async fn disconnect_sockets(&self, opts: &BroadcastOptions, close: bool);

    async fn fetch_sockets(&self, opts: &BroadcastOptions) -> Vec<SocketSummary>;
}

/// What a connected socket receives from the adapter
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Packet(Packet),
    Disconnect { close: bool },
}

struct LocalSocket {
    handshake: JsonValue,
    data: JsonValue,
    rooms: HashSet<Room>,
    tx: mpsc::UnboundedSender<Delivery>,
    acks: HashMap<u64, AckCallback>,
}

impl LocalSocket {
    fn summary(&self, id: &str) -> SocketSummary {
        let mut rooms: Vec<Room> = self.rooms.iter().cloned().collect();
        rooms.sort();

        SocketSummary {
            id: id.to_string(),
            handshake: self.handshake.clone(),
            rooms,
            data: self.data.clone(),
        }
    }
}

#[derive(Default)]
struct State {
    sockets: HashMap<SocketId, LocalSocket>,
    rooms: HashMap<Room, HashSet<SocketId>>,
}

impl State {
    fn join(&mut self, sid: &str, room: &str) {
        let Some(socket) = self.sockets.get_mut(sid) else {
            return;
        };
        socket.rooms.insert(room.to_string());
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(sid.to_string());
    }

    fn leave(&mut self, sid: &str, room: &str) {
        if let Some(socket) = self.sockets.get_mut(sid) {
            socket.rooms.remove(room);
        }
        if let Some(sids) = self.rooms.get_mut(room) {
            sids.remove(sid);
            if sids.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    fn remove(&mut self, sid: &str) -> Option<LocalSocket> {
        let socket = self.sockets.remove(sid)?;
        for room in &socket.rooms {
            if let Some(sids) = self.rooms.get_mut(room) {
                sids.remove(sid);
                if sids.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        Some(socket)
    }

    /// Sockets matching `opts`: members of any target room (every socket when
    /// there is none) minus the excluded ones
    fn matching(&self, opts: &BroadcastOptions) -> Vec<SocketId> {
        let except = self.except_sids(&opts.except);

        let mut sids: Vec<SocketId> = if opts.rooms.is_empty() {
            self.sockets
                .keys()
                .filter(|sid| !except.contains(*sid))
                .cloned()
                .collect()
        } else {
            let mut seen = HashSet::new();
            for room in &opts.rooms {
                if let Some(members) = self.rooms.get(room) {
                    seen.extend(
                        members
                            .iter()
                            .filter(|sid| !except.contains(*sid))
                            .cloned(),
                    );
                }
            }
            seen.into_iter().collect()
        };

        sids.sort();
        sids
    }

    /// An excluded entry is a room, or a bare socket id when no such room exists
    fn except_sids(&self, except: &HashSet<Room>) -> HashSet<SocketId> {
        let mut sids = HashSet::new();
        for room in except {
            if let Some(members) = self.rooms.get(room) {
                sids.extend(members.iter().cloned());
            } else if self.sockets.contains_key(room) {
                sids.insert(room.clone());
            }
        }
        sids
    }
}

/// Single-process adapter: keeps room membership in memory and hands packets
/// to each socket's delivery channel
#[derive(Clone, Default)]
pub struct InMemoryAdapter {
    nsp: String,
    state: Arc<RwLock<State>>,
    next_ack_id: Arc<AtomicU64>,
}

impl InMemoryAdapter {
    pub fn new(nsp: &str) -> Self {
        Self {
            nsp: nsp.to_string(),
            state: Arc::new(RwLock::new(State::default())),
            next_ack_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn nsp(&self) -> &str {
        &self.nsp
    }

    /// Register a socket; it implicitly joins the room named after its id
    pub async fn connect(
        &self,
        sid: &str,
        handshake: JsonValue,
    ) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.write().await;

        state.sockets.insert(
            sid.to_string(),
            LocalSocket {
                handshake,
                data: JsonValue::Null,
                rooms: HashSet::new(),
                tx,
                acks: HashMap::new(),
            },
        );
        state.join(sid, sid);

        tracing::debug!("Socket {} connected to {}", sid, self.nsp);
        rx
    }

    pub async fn set_data(&self, sid: &str, data: JsonValue) -> Result<(), String> {
        let mut state = self.state.write().await;
        let socket = state
            .sockets
            .get_mut(sid)
            .ok_or_else(|| format!("Socket not found: {}", sid))?;
        socket.data = data;
        Ok(())
    }

    pub async fn join(&self, sid: &str, rooms: &[Room]) {
        let mut state = self.state.write().await;
        for room in rooms {
            state.join(sid, room);
        }
    }

    pub async fn leave(&self, sid: &str, room: &str) {
        self.state.write().await.leave(sid, room);
    }

    pub async fn remove(&self, sid: &str) {
        if self.state.write().await.remove(sid).is_some() {
            tracing::debug!("Socket {} removed from {}", sid, self.nsp);
        }
    }

    pub async fn socket_rooms(&self, sid: &str) -> Option<HashSet<Room>> {
        let state = self.state.read().await;
        state.sockets.get(sid).map(|socket| socket.rooms.clone())
    }

    pub async fn room_sockets(&self, room: &str) -> Vec<SocketId> {
        let state = self.state.read().await;
        let mut sids: Vec<SocketId> = state
            .rooms
            .get(room)
            .map(|sids| sids.iter().cloned().collect())
            .unwrap_or_default();
        sids.sort();
        sids
    }

    pub async fn socket_count(&self) -> usize {
        self.state.read().await.sockets.len()
    }

    /// Deliver a client acknowledgement for a broadcast-with-ack packet
    pub async fn acknowledge(&self, sid: &str, packet_id: u64, value: JsonValue) -> bool {
        let callback = {
            let mut state = self.state.write().await;
            state
                .sockets
                .get_mut(sid)
                .and_then(|socket| socket.acks.remove(&packet_id))
        };

        match callback {
            Some(callback) => {
                callback(value);
                true
            }
            None => false,
        }
    }

    async fn deliver(&self, packet: &Packet, opts: &BroadcastOptions, ack: Option<&AckCallback>) -> usize {
        let mut state = self.state.write().await;
        let sids = state.matching(opts);
        let mut delivered = 0;

        for sid in sids {
            let Some(socket) = state.sockets.get_mut(&sid) else {
                continue;
            };
            if let (Some(ack), Some(id)) = (ack, packet.id) {
                socket.acks.insert(id, ack.clone());
            }
            if socket.tx.send(Delivery::Packet(packet.clone())).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!("Socket {} is no longer reading", sid);
            }
        }

        delivered
    }
}

#[async_trait]
impl LocalAdapter for InMemoryAdapter {
    async fn broadcast(&self, mut packet: Packet, opts: &BroadcastOptions) {
        packet.nsp = self.nsp.clone();
        let delivered = self.deliver(&packet, opts, None).await;
        tracing::debug!("Broadcast delivered to {} local sockets", delivered);
    }

    async fn broadcast_with_ack(
        &self,
        mut packet: Packet,
        opts: &BroadcastOptions,
        on_client_count: ClientCountCallback,
        on_ack: AckCallback,
    ) {
        packet.nsp = self.nsp.clone();
        // One id for every socket: the counter is shared, so ids never collide
        packet.id = Some(self.next_ack_id.fetch_add(1, Ordering::SeqCst));

        let client_count = self.deliver(&packet, opts, Some(&on_ack)).await;
        on_client_count(client_count);
    }

    async fn add_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        let mut state = self.state.write().await;
        for sid in state.matching(opts) {
            for room in rooms {
                state.join(&sid, room);
            }
        }
    }

    async fn del_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        let mut state = self.state.write().await;
        for sid in state.matching(opts) {
            for room in rooms {
                state.leave(&sid, room);
            }
        }
    }

    async fn disconnect_sockets(&self, opts: &BroadcastOptions, close: bool) {
        let mut state = self.state.write().await;
        for sid in state.matching(opts) {
            if let Some(socket) = state.remove(&sid) {
                let _ = socket.tx.send(Delivery::Disconnect { close });
                tracing::debug!("Disconnected socket {} (close: {})", sid, close);
            }
        }
    }

    async fn fetch_sockets(&self, opts: &BroadcastOptions) -> Vec<SocketSummary> {
        let state = self.state.read().await;
        state
            .matching(opts)
            .iter()
            .filter_map(|sid| state.sockets.get(sid).map(|socket| socket.summary(sid)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    async fn adapter_with_sockets() -> (InMemoryAdapter, Vec<mpsc::UnboundedReceiver<Delivery>>) {
        let adapter = InMemoryAdapter::new("/");
        let mut receivers = Vec::new();
        for sid in ["sid-1", "sid-2", "sid-3"] {
            receivers.push(adapter.connect(sid, json!({"address": "::1"})).await);
        }
        adapter.join("sid-1", &["room-a".to_string()]).await;
        adapter
            .join("sid-2", &["room-a".to_string(), "room-b".to_string()])
            .await;
        (adapter, receivers)
    }

    #[tokio::test]
    async fn test_rooms() {
        let (adapter, _rx) = adapter_with_sockets().await;

        assert_eq!(adapter.room_sockets("room-a").await, vec!["sid-1", "sid-2"]);
        assert!(adapter.socket_rooms("sid-3").await.unwrap().contains("sid-3"));

        adapter.leave("sid-1", "room-a").await;
        assert_eq!(adapter.room_sockets("room-a").await, vec!["sid-2"]);

        adapter.remove("sid-2").await;
        assert!(adapter.room_sockets("room-a").await.is_empty());
        assert_eq!(adapter.socket_count().await, 2);
    }

    #[tokio::test]
    async fn test_broadcast_respects_rooms_and_except() {
        let (adapter, mut rx) = adapter_with_sockets().await;

        let opts = BroadcastOptions::to_rooms(["room-a"]).except(["room-b"]);
        adapter
            .broadcast(Packet::event("/", "hello", vec![]), &opts)
            .await;

        assert!(matches!(rx[0].try_recv(), Ok(Delivery::Packet(_))));
        assert!(rx[1].try_recv().is_err());
        assert!(rx[2].try_recv().is_err());

        // A bare socket id is a valid exclusion
        adapter
            .broadcast(
                Packet::event("/", "hello", vec![]),
                &BroadcastOptions::new().except(["sid-3"]),
            )
            .await;
        assert!(rx[0].try_recv().is_ok());
        assert!(rx[1].try_recv().is_ok());
        assert!(rx[2].try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_with_ack_counts_and_collects_acks() {
        let (adapter, mut rx) = adapter_with_sockets().await;
        let count = Arc::new(Mutex::new(None));
        let acks = Arc::new(Mutex::new(Vec::new()));

        let count_ref = count.clone();
        let acks_ref = acks.clone();
        adapter
            .broadcast_with_ack(
                Packet::event("/", "question", vec![]),
                &BroadcastOptions::to_rooms(["room-a"]),
                Arc::new(move |n| *count_ref.lock().unwrap() = Some(n)),
                Arc::new(move |value| acks_ref.lock().unwrap().push(value)),
            )
            .await;

        assert_eq!(*count.lock().unwrap(), Some(2));

        let Ok(Delivery::Packet(packet)) = rx[0].try_recv() else {
            panic!("sid-1 should have received the packet");
        };
        let packet_id = packet.id.unwrap();

        assert!(adapter.acknowledge("sid-1", packet_id, json!("yes")).await);
        assert!(!adapter.acknowledge("sid-1", packet_id, json!("again")).await);
        assert!(adapter.acknowledge("sid-2", packet_id, json!("no")).await);
        assert!(!adapter.acknowledge("sid-3", packet_id, json!("never sent")).await);

        assert_eq!(*acks.lock().unwrap(), vec![json!("yes"), json!("no")]);
    }

    #[tokio::test]
    async fn test_add_del_and_disconnect_sockets() {
        let (adapter, mut rx) = adapter_with_sockets().await;

        adapter
            .add_sockets(&BroadcastOptions::to_rooms(["room-b"]), &["room-c".to_string()])
            .await;
        assert_eq!(adapter.room_sockets("room-c").await, vec!["sid-2"]);

        adapter
            .del_sockets(&BroadcastOptions::new(), &["room-a".to_string()])
            .await;
        assert!(adapter.room_sockets("room-a").await.is_empty());

        adapter
            .disconnect_sockets(&BroadcastOptions::to_rooms(["room-c"]), true)
            .await;
        assert_eq!(rx[1].try_recv(), Ok(Delivery::Disconnect { close: true }));
        assert_eq!(adapter.socket_count().await, 2);
    }

    #[tokio::test]
    async fn test_fetch_sockets_returns_summaries() {
        let (adapter, _rx) = adapter_with_sockets().await;
        adapter.set_data("sid-2", json!({"user": "alice"})).await.unwrap();

        let sockets = adapter
            .fetch_sockets(&BroadcastOptions::to_rooms(["room-b"]))
            .await;

        assert_eq!(sockets.len(), 1);
        assert_eq!(sockets[0].id, "sid-2");
        assert_eq!(sockets[0].rooms, vec!["room-a", "room-b", "sid-2"]);
        assert_eq!(sockets[0].data, json!({"user": "alice"}));
    }
}
