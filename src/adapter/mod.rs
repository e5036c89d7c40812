/// Cluster adapter
///
/// Makes one namespace spread over many server processes behave as a single
/// one: local operations are applied through the `LocalAdapter`, forwarded to
/// the other servers through a `Transport`, and answers from peers are
/// correlated by request id.
///
/// Layout:
/// - `ops`: outbound operations (broadcast, fetchSockets, serverSideEmit, ...)
/// - `dispatch`: inbound envelopes and responses
use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AdapterConfig;
use crate::error::AdapterResult;
use crate::liveness::{HeartbeatTimer, Liveness};
use crate::local::LocalAdapter;
use crate::message::{ClusterMessage, ClusterResponse, MessageType, Offset, ServerId};
use crate::namespace::ServerSideEmit;
use crate::registry::Registry;
use crate::transport::{Inbound, Transport};

mod dispatch;
mod ops;


struct Inner {
    uid: ServerId,
    nsp: String,
    config: AdapterConfig,
    local: Arc<dyn LocalAdapter>,
    transport: Arc<dyn Transport>,
    server_side_emit: mpsc::UnboundedSender<ServerSideEmit>,
    registry: Registry,
    liveness: Liveness,
    heartbeat: HeartbeatTimer,
}

#[derive(Clone)]
pub struct ClusterAdapter {
    inner: Arc<Inner>,
}

impl ClusterAdapter {
    pub fn new(
        nsp: &str,
        config: AdapterConfig,
        local: Arc<dyn LocalAdapter>,
        transport: Arc<dyn Transport>,
        server_side_emit: mpsc::UnboundedSender<ServerSideEmit>,
    ) -> Self {
        Self::with_uid(ServerId::random(), nsp, config, local, transport, server_side_emit)
    }

    /// Same as `new`, for transports that must know the server id up front
    pub fn with_uid(
        uid: ServerId,
        nsp: &str,
        config: AdapterConfig,
        local: Arc<dyn LocalAdapter>,
        transport: Arc<dyn Transport>,
        server_side_emit: mpsc::UnboundedSender<ServerSideEmit>,
    ) -> Self {
        let liveness = Liveness::new(config.heartbeat_timeout);
        let heartbeat = HeartbeatTimer::new(config.heartbeat_interval);

        Self {
            inner: Arc::new(Inner {
                uid,
                nsp: nsp.to_string(),
                config,
                local,
                transport,
                server_side_emit,
                registry: Registry::new(),
                liveness,
                heartbeat,
            }),
        }
    }

    pub fn uid(&self) -> &ServerId {
        &self.inner.uid
    }

    pub fn nsp(&self) -> &str {
        &self.inner.nsp
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Announce this server; every live peer answers with a heartbeat
    pub async fn init(&self) {
        tracing::info!("[{}] joining cluster for namespace {}", self.uid(), self.nsp());
        self.publish(self.message(MessageType::InitialHeartbeat)).await;
    }

    /// Stop sending heartbeats. Pending requests still end by their own timers.
    pub fn close(&self) {
        tracing::info!("[{}] closing adapter for namespace {}", self.uid(), self.nsp());
        self.inner.heartbeat.stop();
    }

    /// Number of live servers, this one included
    pub async fn server_count(&self) -> usize {
        self.inner.liveness.server_count().await
    }

    /// Drain `inbox` in receipt order until the transport closes it
    pub fn listen(&self, mut inbox: mpsc::UnboundedReceiver<Inbound>) -> JoinHandle<()> {
        let adapter = self.clone();
        tokio::spawn(async move {
            while let Some(inbound) = inbox.recv().await {
                adapter.handle_inbound(inbound).await;
            }
            tracing::debug!("[{}] inbound stream closed", adapter.uid());
        })
    }

    pub async fn handle_inbound(&self, inbound: Inbound) {
        match inbound {
            Inbound::Message { message, offset } => self.on_message(message, offset).await,
            Inbound::Response(response) => self.on_response(response).await,
        }
    }

    fn message(&self, message_type: MessageType) -> ClusterMessage {
        ClusterMessage::new(self.inner.uid.clone(), &self.inner.nsp, message_type)
    }

    async fn publish_data<T: Serialize>(
        &self,
        message_type: MessageType,
        data: &T,
    ) -> AdapterResult<Option<Offset>> {
        let message = self.message(message_type).with_data(data)?;
        self.publish_and_return_offset(message).await
    }

    /// Every publish postpones the next explicit heartbeat
    async fn publish_and_return_offset(&self, message: ClusterMessage) -> AdapterResult<Option<Offset>> {
        self.schedule_heartbeat();
        self.inner.transport.publish_message(&message).await
    }

    async fn publish(&self, message: ClusterMessage) {
        if let Err(e) = self.publish_and_return_offset(message).await {
            tracing::warn!("[{}] error while publishing message: {}", self.uid(), e);
        }
    }

    fn spawn_publish(&self, message: ClusterMessage) {
        let adapter = self.clone();
        tokio::spawn(async move {
            adapter.publish(message).await;
        });
    }

    fn schedule_heartbeat(&self) {
        let inner = Arc::downgrade(&self.inner);
        self.inner.heartbeat.schedule(move || {
            let inner = inner.clone();
            async move {
                if let Some(inner) = inner.upgrade() {
                    let adapter = ClusterAdapter { inner };
                    adapter.publish(adapter.message(MessageType::Heartbeat)).await;
                }
            }
        });
    }

    /// Must be called from within the runtime
    fn responder(&self, target: &ServerId) -> Responder {
        Responder {
            uid: self.inner.uid.clone(),
            nsp: self.inner.nsp.clone(),
            target: target.clone(),
            transport: self.inner.transport.clone(),
            runtime: Handle::current(),
        }
    }
}

/// Sends responses to the server that issued a request.
///
/// Held by callbacks that outlive the dispatch of the request, so it carries
/// only what publishing needs.
#[derive(Clone)]
struct Responder {
    uid: ServerId,
    nsp: String,
    target: ServerId,
    transport: Arc<dyn Transport>,
    /// Acks may be called from threads outside the runtime
    runtime: Handle,
}

impl Responder {
    fn send<T: Serialize>(&self, message_type: MessageType, data: &T) {
        let response = match ClusterResponse::new(self.uid.clone(), &self.nsp, message_type, data) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("[{}] cannot encode {:?} response: {}", self.uid, message_type, e);
                return;
            }
        };

        let responder = self.clone();
        self.runtime.spawn(async move {
            if let Err(e) = responder
                .transport
                .publish_response(&responder.target, &response)
                .await
            {
                tracing::warn!(
                    "[{}] error while publishing response to {}: {}",
                    responder.uid,
                    responder.target,
                    e
                );
            }
        });
    }
}
