use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use super::ClusterAdapter;
use crate::message::{
    BroadcastData, ClientCountData, ClusterMessage, ClusterResponse, DisconnectSocketsData,
    FetchSocketsData, FetchSocketsResponseData, MessageType, Offset, PacketResponseData,
    ServerSideEmitData, SocketSummary, SocketsRoomsData,
};
use crate::namespace::{ServerSideAck, ServerSideEmit};
use crate::options::decode_options;
use crate::registry::{AckCallback, ClientCountCallback, ResponseOutcome};

impl ClusterAdapter {
    /// Handle an envelope published by another server
    pub async fn on_message(&self, message: ClusterMessage, offset: Option<Offset>) {
        let uid = self.uid();

        if message.uid == *uid {
            tracing::debug!("[{}] ignore message from self", uid);
            return;
        }

        // Any traffic proves the sender is alive
        self.inner.liveness.record(&message.uid).await;

        tracing::debug!(
            "[{}] new event of type {:?} from {}",
            uid,
            message.message_type,
            message.uid
        );

        match message.message_type {
            MessageType::InitialHeartbeat => {
                self.spawn_publish(self.message(MessageType::Heartbeat));
            }
            MessageType::Heartbeat => {}
            MessageType::Broadcast => self.on_broadcast(&message, offset).await,
            MessageType::SocketsJoin => {
                if let Some(data) = self.message_payload::<SocketsRoomsData>(&message) {
                    let opts = decode_options(data.opts);
                    self.inner.local.add_sockets(&opts, &data.rooms).await;
                }
            }
            MessageType::SocketsLeave => {
                if let Some(data) = self.message_payload::<SocketsRoomsData>(&message) {
                    let opts = decode_options(data.opts);
                    self.inner.local.del_sockets(&opts, &data.rooms).await;
                }
            }
            MessageType::DisconnectSockets => {
                if let Some(data) = self.message_payload::<DisconnectSocketsData>(&message) {
                    let opts = decode_options(data.opts);
                    self.inner.local.disconnect_sockets(&opts, data.close).await;
                }
            }
            MessageType::FetchSockets => self.on_fetch_sockets(&message),
            MessageType::ServerSideEmit => self.on_server_side_emit(&message),
            // Some transports do not tell messages and responses apart
            message_type if message_type.is_response() => {
                self.on_response(ClusterResponse::from(message)).await;
            }
            message_type => {
                tracing::debug!("[{}] unknown message type: {:?}", uid, message_type);
            }
        }
    }

    async fn on_broadcast(&self, message: &ClusterMessage, offset: Option<Offset>) {
        let Some(data) = self.message_payload::<BroadcastData>(message) else {
            return;
        };
        let opts = decode_options(data.opts);

        match data.request_id {
            Some(request_id) => {
                let responder = self.responder(&message.uid);
                let count_responder = responder.clone();
                let count_request_id = request_id.clone();

                let on_client_count: ClientCountCallback = Arc::new(move |client_count| {
                    tracing::debug!(
                        "[{}] waiting for {} client acknowledgements",
                        count_responder.uid,
                        client_count
                    );
                    count_responder.send(
                        MessageType::BroadcastClientCount,
                        &ClientCountData {
                            request_id: count_request_id.clone(),
                            client_count,
                        },
                    );
                });

                let on_ack: AckCallback = Arc::new(move |packet: JsonValue| {
                    tracing::debug!(
                        "[{}] received acknowledgement with value {}",
                        responder.uid,
                        packet
                    );
                    responder.send(
                        MessageType::BroadcastAck,
                        &PacketResponseData {
                            request_id: request_id.clone(),
                            packet,
                        },
                    );
                });

                self.inner
                    .local
                    .broadcast_with_ack(data.packet, &opts, on_client_count, on_ack)
                    .await;
            }
            None => {
                let mut packet = data.packet;
                self.add_offset_if_necessary(&mut packet, &opts, offset.as_ref());
                self.inner.local.broadcast(packet, &opts).await;
            }
        }
    }

    fn on_fetch_sockets(&self, message: &ClusterMessage) {
        let Some(data) = self.message_payload::<FetchSocketsData>(message) else {
            return;
        };
        let opts = decode_options(data.opts);
        let request_id = data.request_id;
        let local = self.inner.local.clone();
        let responder = self.responder(&message.uid);

        tracing::debug!("[{}] calling fetchSockets with opts {:?}", responder.uid, opts);

        // Answer without holding up the next inbound envelope
        tokio::spawn(async move {
            let sockets = local
                .fetch_sockets(&opts)
                .await
                .into_iter()
                .map(SocketSummary::without_session_store)
                .filter_map(|socket| match serde_json::to_value(&socket) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::warn!("Cannot encode socket {}: {}", socket.id, e);
                        None
                    }
                })
                .collect();

            responder.send(
                MessageType::FetchSocketsResponse,
                &FetchSocketsResponseData {
                    request_id,
                    sockets,
                },
            );
        });
    }

    fn on_server_side_emit(&self, message: &ClusterMessage) {
        let Some(data) = self.message_payload::<ServerSideEmitData>(message) else {
            return;
        };

        let ack = data.request_id.map(|request_id| {
            let responder = self.responder(&message.uid);
            ServerSideAck::new(move |packet| {
                tracing::debug!(
                    "[{}] calling acknowledgement with {}",
                    responder.uid,
                    packet
                );
                responder.send(
                    MessageType::ServerSideEmitResponse,
                    &PacketResponseData { request_id, packet },
                );
            })
        });

        let emit = ServerSideEmit {
            args: data.packet,
            ack,
        };
        if self.inner.server_side_emit.send(emit).is_err() {
            tracing::debug!("[{}] no listener for server-side emits", self.uid());
        }
    }

    /// Handle a response addressed to this server
    pub async fn on_response(&self, response: ClusterResponse) {
        let uid = self.uid();

        let Some(request_id) = response.request_id().map(str::to_string) else {
            tracing::warn!(
                "[{}] response {:?} from {} has no request id",
                uid,
                response.message_type,
                response.uid
            );
            return;
        };

        tracing::debug!(
            "[{}] received response {:?} to request {}",
            uid,
            response.message_type,
            request_id
        );

        let registry = &self.inner.registry;

        match response.message_type {
            MessageType::BroadcastClientCount => {
                let Some(data) = self.response_payload::<ClientCountData>(&response) else {
                    return;
                };
                if let Some(request) = registry.ack_request(&request_id).await {
                    (request.on_client_count)(data.client_count);
                }
            }
            MessageType::BroadcastAck => {
                let Some(data) = self.response_payload::<PacketResponseData>(&response) else {
                    return;
                };
                if let Some(request) = registry.ack_request(&request_id).await {
                    (request.on_ack)(data.packet);
                }
            }
            MessageType::FetchSocketsResponse => {
                let Some(data) = self.response_payload::<FetchSocketsResponseData>(&response) else {
                    return;
                };
                let outcome = registry.record_response(&request_id, data.sockets).await;
                self.log_outcome(&request_id, outcome);
            }
            MessageType::ServerSideEmitResponse => {
                let Some(data) = self.response_payload::<PacketResponseData>(&response) else {
                    return;
                };
                let outcome = registry.record_response(&request_id, vec![data.packet]).await;
                self.log_outcome(&request_id, outcome);
            }
            message_type => {
                tracing::debug!("[{}] unknown response type: {:?}", uid, message_type);
            }
        }
    }

    fn log_outcome(&self, request_id: &str, outcome: ResponseOutcome) {
        match outcome {
            ResponseOutcome::Pending { current, expected } => tracing::debug!(
                "[{}] request {}: {} of {} responses",
                self.uid(),
                request_id,
                current,
                expected
            ),
            ResponseOutcome::Completed => {}
            ResponseOutcome::Unknown => tracing::debug!(
                "[{}] dropping response to unknown request {}",
                self.uid(),
                request_id
            ),
        }
    }

    fn message_payload<T: DeserializeOwned>(&self, message: &ClusterMessage) -> Option<T> {
        match message.payload() {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(
                    "[{}] malformed {:?} message from {}: {}",
                    self.uid(),
                    message.message_type,
                    message.uid,
                    e
                );
                None
            }
        }
    }

    fn response_payload<T: DeserializeOwned>(&self, response: &ClusterResponse) -> Option<T> {
        match response.payload() {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(
                    "[{}] malformed {:?} response from {}: {}",
                    self.uid(),
                    response.message_type,
                    response.uid,
                    e
                );
                None
            }
        }
    }
}
