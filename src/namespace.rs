/// Delivery of server-side emits to namespace listeners
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;

type AckFn = Box<dyn FnOnce(JsonValue) + Send>;

/// Single-use acknowledgement handed to listeners of a server-side emit.
///
/// Clones share the same slot: only the first `call` across all clones runs.
#[derive(Clone)]
pub struct ServerSideAck {
    slot: Arc<Mutex<Option<AckFn>>>,
}

impl ServerSideAck {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(JsonValue) + Send + 'static,
    {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(callback)))),
        }
    }

    /// Returns false when the acknowledgement was already sent
    pub fn call(&self, value: JsonValue) -> bool {
        let callback = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match callback {
            Some(callback) => {
                callback(value);
                true
            }
            None => false,
        }
    }

    pub fn is_called(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => slot.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl fmt::Debug for ServerSideAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSideAck")
            .field("called", &self.is_called())
            .finish()
    }
}

/// A server-side emit received from another server of the cluster
#[derive(Debug, Clone)]
pub struct ServerSideEmit {
    pub args: Vec<JsonValue>,
    pub ack: Option<ServerSideAck>,
}

impl ServerSideEmit {
    pub fn event_name(&self) -> Option<&str> {
        self.args.first().and_then(|name| name.as_str())
    }
}
