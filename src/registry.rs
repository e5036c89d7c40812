/// Correlation registry for requests that expect answers from other servers
///
/// Holds two maps keyed by request id:
/// - fan-in requests (FETCH_SOCKETS, SERVER_SIDE_EMIT with ack), completed once
///   the expected number of responses arrived or failed by their own timer
/// - broadcast ack listeners, removed only by their timer
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::error::{AdapterError, AdapterResult};
use crate::message::{random_id, MessageType, RequestId};

pub type ClientCountCallback = Arc<dyn Fn(usize) + Send + Sync>;
pub type AckCallback = Arc<dyn Fn(JsonValue) + Send + Sync>;

/// Resolves with every collected response, or with a partial-timeout error
pub type Completion = oneshot::Receiver<AdapterResult<Vec<JsonValue>>>;

struct PendingRequest {
    kind: MessageType,
    expected: usize,
    current: usize,
    responses: Vec<JsonValue>,
    resolve: oneshot::Sender<AdapterResult<Vec<JsonValue>>>,
    timer: JoinHandle<()>,
}

/// Listeners of a broadcast-with-ack; the number of acks is unknown up front
#[derive(Clone)]
pub struct AckRequest {
    pub on_client_count: ClientCountCallback,
    pub on_ack: AckCallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    Pending { current: usize, expected: usize },
    Completed,
    /// Already timed out, completed, or never registered
    Unknown,
}

#[derive(Clone, Default)]
pub struct Registry {
    requests: Arc<RwLock<HashMap<RequestId, PendingRequest>>>,
    ack_requests: Arc<RwLock<HashMap<RequestId, AckRequest>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_request_id() -> RequestId {
        random_id()
    }

    /// Register a fan-in request waiting for `expected` responses.
    ///
    /// `seed` holds results that are already known (the local sockets of a
    /// FETCH_SOCKETS request); they are returned ahead of remote responses.
    pub async fn register(
        &self,
        request_id: RequestId,
        kind: MessageType,
        expected: usize,
        seed: Vec<JsonValue>,
        timeout: Duration,
    ) -> Completion {
        let (resolve, completion) = oneshot::channel();

        // The timer cannot observe the map before the entry is inserted
        let mut requests = self.requests.write().await;
        let timer = tokio::spawn(expire_request(
            self.requests.clone(),
            request_id.clone(),
            timeout,
        ));

        requests.insert(
            request_id,
            PendingRequest {
                kind,
                expected,
                current: 0,
                responses: seed,
                resolve,
                timer,
            },
        );

        completion
    }

    /// Record one peer's answer to a fan-in request
    pub async fn record_response(
        &self,
        request_id: &str,
        payloads: Vec<JsonValue>,
    ) -> ResponseOutcome {
        let mut requests = self.requests.write().await;

        let Some(request) = requests.get_mut(request_id) else {
            return ResponseOutcome::Unknown;
        };

        request.current += 1;
        request.responses.extend(payloads);

        if request.current < request.expected {
            return ResponseOutcome::Pending {
                current: request.current,
                expected: request.expected,
            };
        }

        let Some(request) = requests.remove(request_id) else {
            return ResponseOutcome::Unknown;
        };
        drop(requests);

        request.timer.abort();
        tracing::debug!(
            "Request {} ({:?}) completed with {} responses",
            request_id,
            request.kind,
            request.current
        );
        let _ = request.resolve.send(Ok(request.responses));

        ResponseOutcome::Completed
    }

    /// Register broadcast-with-ack listeners, dropped after `timeout`
    pub async fn register_ack(&self, request_id: RequestId, request: AckRequest, timeout: Duration) {
        self.ack_requests
            .write()
            .await
            .insert(request_id.clone(), request);

        let ack_requests = self.ack_requests.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if ack_requests.write().await.remove(&request_id).is_some() {
                tracing::debug!("Ack request {} expired", request_id);
            }
        });
    }

    pub async fn ack_request(&self, request_id: &str) -> Option<AckRequest> {
        self.ack_requests.read().await.get(request_id).cloned()
    }

    pub async fn pending_requests(&self) -> usize {
        self.requests.read().await.len()
    }

    pub async fn pending_acks(&self) -> usize {
        self.ack_requests.read().await.len()
    }
}

async fn expire_request(
    requests: Arc<RwLock<HashMap<RequestId, PendingRequest>>>,
    request_id: RequestId,
    timeout: Duration,
) {
    tokio::time::sleep(timeout).await;

    let Some(request) = requests.write().await.remove(&request_id) else {
        return;
    };

    tracing::warn!(
        "Request {} ({:?}) timed out: {} of {} responses received",
        request_id,
        request.kind,
        request.current,
        request.expected
    );

    let _ = request.resolve.send(Err(AdapterError::Timeout {
        current: request.current,
        expected: request.expected,
        responses: request.responses,
    }));
}
