/// Heartbeat-derived view of the live servers of the cluster
///
/// No server announces its departure: a peer counts as live while it was heard
/// from within `heartbeat_timeout`, and stale peers are pruned when the count
/// is queried.
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::message::ServerId;

pub struct Liveness {
    /// uid -> last time a message was received from it
    nodes: RwLock<HashMap<ServerId, Instant>>,
    timeout: Duration,
}

impl Liveness {
    pub fn new(timeout: Duration) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Mark `uid` as seen now. Anonymous and emitter senders are not members.
    pub async fn record(&self, uid: &ServerId) {
        if uid.is_empty() || uid.is_emitter() {
            return;
        }

        let mut nodes = self.nodes.write().await;
        if nodes.insert(uid.clone(), Instant::now()).is_none() {
            tracing::debug!("Discovered server {}", uid);
        }
    }

    /// 1 (this server) + every peer heard from within the timeout
    pub async fn server_count(&self) -> usize {
        let now = Instant::now();
        let mut nodes = self.nodes.write().await;

        nodes.retain(|uid, last_seen| {
            let seems_down = now.duration_since(*last_seen) > self.timeout;
            if seems_down {
                tracing::debug!("Server {} seems down", uid);
            }
            !seems_down
        });

        1 + nodes.len()
    }

    /// Peers currently in the map, without pruning
    pub async fn peers(&self) -> Vec<ServerId> {
        self.nodes.read().await.keys().cloned().collect()
    }
}

/// Timer firing after `interval` without any call to `schedule`.
///
/// Only one timer task exists per instance; `schedule` re-arms it.
pub struct HeartbeatTimer {
    interval: Duration,
    reset: Arc<Notify>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            reset: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn schedule<F, Fut>(&self, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return;
        }

        let mut task = match self.task.lock() {
            Ok(task) => task,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                self.reset.notify_one();
                return;
            }
        }

        let interval = self.interval;
        let reset = self.reset.clone();
        let cancel = self.cancel.clone();

        *task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = reset.notified() => continue,
                    _ = tokio::time::sleep(interval) => tick().await,
                }
            }
        }));
    }

    pub fn stop(&self) {
        self.cancel.cancel();

        let task = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = task {
            handle.abort();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for HeartbeatTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
