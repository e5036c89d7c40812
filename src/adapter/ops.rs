use std::time::Duration;

use serde::Serialize;
use serde_json::Value as JsonValue;

use super::ClusterAdapter;
use crate::error::{AdapterError, AdapterResult};
use crate::message::{
    BroadcastData, DisconnectSocketsData, FetchSocketsData, MessageType, Offset,
    ServerSideEmitData, SocketSummary, SocketsRoomsData,
};
use crate::options::{encode_options, BroadcastOptions, Room};
use crate::packet::Packet;
use crate::registry::{AckCallback, AckRequest, ClientCountCallback, Registry};

impl ClusterAdapter {
    /// Send a packet to the matching sockets of every server.
    ///
    /// Local sockets are served even when publishing fails.
    pub async fn broadcast(&self, mut packet: Packet, opts: &BroadcastOptions) {
        if !opts.is_local() {
            let data = BroadcastData {
                packet: packet.clone(),
                opts: encode_options(opts),
                request_id: None,
            };

            match self.publish_data(MessageType::Broadcast, &data).await {
                Ok(offset) => self.add_offset_if_necessary(&mut packet, opts, offset.as_ref()),
                Err(e) => {
                    tracing::warn!("[{}] error while broadcasting message: {}", self.uid(), e);
                }
            }
        }

        self.inner.local.broadcast(packet, opts).await;
    }

    /// Tag an event packet with its transport offset so a reconnecting client
    /// can resume after it
    pub(super) fn add_offset_if_necessary(
        &self,
        packet: &mut Packet,
        opts: &BroadcastOptions,
        offset: Option<&Offset>,
    ) {
        if !self.inner.config.connection_state_recovery {
            return;
        }
        let Some(offset) = offset else {
            return;
        };

        if packet.is_event() && packet.id.is_none() && !opts.flags.volatile {
            packet.push_arg(JsonValue::String(offset.clone()));
        }
    }

    /// Broadcast and collect client acknowledgements from every server.
    ///
    /// Both callbacks may run many times. Remote answers are accepted until
    /// `flags.timeout` (or the configured request timeout) expires.
    pub async fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: &BroadcastOptions,
        on_client_count: ClientCountCallback,
        on_ack: AckCallback,
    ) {
        if !opts.is_local() {
            let request_id = Registry::next_request_id();
            let timeout = self.ack_timeout(opts);

            // Registered first: a fast peer may answer before publish returns
            self.inner
                .registry
                .register_ack(
                    request_id.clone(),
                    AckRequest {
                        on_client_count: on_client_count.clone(),
                        on_ack: on_ack.clone(),
                    },
                    timeout,
                )
                .await;

            let data = BroadcastData {
                packet: packet.clone(),
                opts: encode_options(opts),
                request_id: Some(request_id),
            };
            self.publish_or_log(MessageType::Broadcast, &data).await;
        }

        self.inner
            .local
            .broadcast_with_ack(packet, opts, on_client_count, on_ack)
            .await;
    }

    /// Make the matching sockets of every server join `rooms`
    pub async fn add_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        self.inner.local.add_sockets(opts, rooms).await;

        if !opts.is_local() {
            let data = SocketsRoomsData {
                opts: encode_options(opts),
                rooms: rooms.to_vec(),
            };
            self.publish_or_log(MessageType::SocketsJoin, &data).await;
        }
    }

    /// Make the matching sockets of every server leave `rooms`
    pub async fn del_sockets(&self, opts: &BroadcastOptions, rooms: &[Room]) {
        self.inner.local.del_sockets(opts, rooms).await;

        if !opts.is_local() {
            let data = SocketsRoomsData {
                opts: encode_options(opts),
                rooms: rooms.to_vec(),
            };
            self.publish_or_log(MessageType::SocketsLeave, &data).await;
        }
    }

    pub async fn disconnect_sockets(&self, opts: &BroadcastOptions, close: bool) {
        self.inner.local.disconnect_sockets(opts, close).await;

        if !opts.is_local() {
            let data = DisconnectSocketsData {
                opts: encode_options(opts),
                close,
            };
            self.publish_or_log(MessageType::DisconnectSockets, &data).await;
        }
    }

    /// Collect the matching sockets of every live server.
    ///
    /// Local sockets come first. If some peers stay silent, the error carries
    /// whatever was collected until the timeout.
    pub async fn fetch_sockets(&self, opts: &BroadcastOptions) -> AdapterResult<Vec<SocketSummary>> {
        let local_sockets = self.inner.local.fetch_sockets(opts).await;

        if opts.is_local() {
            return Ok(local_sockets);
        }

        let expected = self.server_count().await.saturating_sub(1);
        if expected == 0 {
            return Ok(local_sockets);
        }

        let request_id = Registry::next_request_id();
        let message = self.message(MessageType::FetchSockets).with_data(&FetchSocketsData {
            opts: encode_options(opts),
            request_id: request_id.clone(),
        })?;
        let seed = local_sockets
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;

        let completion = self
            .inner
            .registry
            .register(
                request_id.clone(),
                MessageType::FetchSockets,
                expected,
                seed,
                self.fetch_timeout(opts),
            )
            .await;

        self.publish(message).await;

        let responses = completion
            .await
            .map_err(|_| AdapterError::RequestDropped(request_id))??;

        Ok(responses
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<SocketSummary>(value) {
                Ok(socket) => Some(socket),
                Err(e) => {
                    tracing::warn!("[{}] skipping malformed socket: {}", self.uid(), e);
                    None
                }
            })
            .collect())
    }

    /// Emit to the other servers of the cluster, without acknowledgement
    pub async fn server_side_emit(&self, args: Vec<JsonValue>) {
        let data = ServerSideEmitData {
            request_id: None,
            packet: args,
        };
        self.publish_or_log(MessageType::ServerSideEmit, &data).await;
    }

    /// Emit to the other servers and wait for each one to acknowledge.
    ///
    /// Resolves with one value per peer, or at once with nothing when this
    /// server is alone.
    pub async fn server_side_emit_with_ack(&self, args: Vec<JsonValue>) -> AdapterResult<Vec<JsonValue>> {
        let expected = self.server_count().await.saturating_sub(1);

        tracing::debug!(
            "[{}] waiting for {} responses to serverSideEmit",
            self.uid(),
            expected
        );

        if expected == 0 {
            return Ok(Vec::new());
        }

        let request_id = Registry::next_request_id();
        let message = self.message(MessageType::ServerSideEmit).with_data(&ServerSideEmitData {
            request_id: Some(request_id.clone()),
            packet: args,
        })?;

        let completion = self
            .inner
            .registry
            .register(
                request_id.clone(),
                MessageType::ServerSideEmit,
                expected,
                Vec::new(),
                self.inner.config.request_timeout,
            )
            .await;

        self.publish(message).await;

        completion
            .await
            .map_err(|_| AdapterError::RequestDropped(request_id))?
    }

    fn ack_timeout(&self, opts: &BroadcastOptions) -> Duration {
        opts.flags
            .timeout
            .map(Duration::from_millis)
            .unwrap_or(self.inner.config.request_timeout)
    }

    /// A zero timeout means none was given
    fn fetch_timeout(&self, opts: &BroadcastOptions) -> Duration {
        opts.flags
            .timeout
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.inner.config.request_timeout)
    }

    async fn publish_or_log<T: Serialize>(&self, message_type: MessageType, data: &T) {
        if let Err(e) = self.publish_data(message_type, data).await {
            tracing::warn!("[{}] error while publishing message: {}", self.uid(), e);
        }
    }
}
