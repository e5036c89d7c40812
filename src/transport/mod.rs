/// Transports moving cluster envelopes between servers
///
/// A transport publishes envelopes to every other server of the namespace,
/// sends responses point-to-point, and feeds what it receives back to the
/// adapter as `Inbound` values.
use async_trait::async_trait;

use crate::error::AdapterResult;
use crate::message::{ClusterMessage, ClusterResponse, Offset, ServerId};

pub mod memory;
pub mod redis;

pub use memory::{MemoryBus, MemoryTransport};
pub use self::redis::RedisTransport;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `message` to all other live servers; may return an ordering token
    async fn publish_message(&self, message: &ClusterMessage) -> AdapterResult<Option<Offset>>;

    /// Deliver `response` to the server `target` only
    async fn publish_response(&self, target: &ServerId, response: &ClusterResponse) -> AdapterResult<()>;
}

/// Something a transport received for this server
#[derive(Debug, Clone)]
pub enum Inbound {
    Message {
        message: ClusterMessage,
        offset: Option<Offset>,
    },
    Response(ClusterResponse),
}
