/// In-process transport connecting several adapters of one process
///
/// Used by tests and by single-binary deployments running many namespaces.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use super::{Inbound, Transport};
use crate::error::{AdapterError, AdapterResult};
use crate::message::{ClusterMessage, ClusterResponse, Offset, ServerId};

#[derive(Clone, Default)]
pub struct MemoryBus {
    nodes: Arc<RwLock<HashMap<ServerId, mpsc::UnboundedSender<Inbound>>>>,
    offset: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach server `uid`; inbound traffic for it arrives on the receiver
    pub async fn join(&self, uid: &ServerId) -> (MemoryTransport, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.nodes.write().await.insert(uid.clone(), tx);

        let transport = MemoryTransport {
            bus: self.clone(),
            uid: uid.clone(),
        };
        (transport, rx)
    }

    /// Detach a server, simulating a crash: nothing more reaches it
    pub async fn leave(&self, uid: &ServerId) {
        self.nodes.write().await.remove(uid);
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    fn next_offset(&self) -> Offset {
        (self.offset.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

pub struct MemoryTransport {
    bus: MemoryBus,
    uid: ServerId,
}

impl MemoryTransport {
    pub fn uid(&self) -> &ServerId {
        &self.uid
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish_message(&self, message: &ClusterMessage) -> AdapterResult<Option<Offset>> {
        let nodes = self.bus.nodes.read().await;
        if !nodes.contains_key(&self.uid) {
            return Err(AdapterError::Transport(format!(
                "Server {} is not attached to the bus",
                self.uid
            )));
        }

        let offset = self.bus.next_offset();
        for (uid, tx) in nodes.iter() {
            if *uid == self.uid {
                continue;
            }
            let _ = tx.send(Inbound::Message {
                message: message.clone(),
                offset: Some(offset.clone()),
            });
        }

        Ok(Some(offset))
    }

    async fn publish_response(&self, target: &ServerId, response: &ClusterResponse) -> AdapterResult<()> {
        let nodes = self.bus.nodes.read().await;
        match nodes.get(target) {
            Some(tx) => tx
                .send(Inbound::Response(response.clone()))
                .map_err(|_| AdapterError::Transport(format!("Server {} stopped listening", target))),
            None => Err(AdapterError::Transport(format!("Unknown server: {}", target))),
        }
    }
}
