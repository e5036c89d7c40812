//! Cluster coordination for Socket.IO namespaces spread over many processes.
//!
//! A [`ClusterAdapter`] applies broadcasts and room operations to the local
//! sockets, forwards them to the other servers through a [`Transport`], and
//! correlates the answers of multi-server requests such as `fetch_sockets`.

pub mod adapter;
pub mod config;
pub mod error;
pub mod liveness;
pub mod local;
pub mod message;
pub mod namespace;
pub mod options;
pub mod packet;
pub mod registry;
pub mod transport;

pub use adapter::ClusterAdapter;
pub use config::{AdapterConfig, Config, RedisConfig};
pub use error::{AdapterError, AdapterResult};
pub use local::{Delivery, InMemoryAdapter, LocalAdapter};
pub use message::{ClusterMessage, ClusterResponse, MessageType, ServerId, SocketSummary};
pub use namespace::{ServerSideAck, ServerSideEmit};
pub use options::{BroadcastFlags, BroadcastOptions};
pub use packet::{Packet, PacketType};
pub use registry::{AckCallback, ClientCountCallback};
pub use transport::{Inbound, MemoryBus, RedisTransport, Transport};
