use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use super::{Completion, ContinuationProcessor, TriggerRequest, deliver};
use crate::debug;
use crate::script::{ConnectionId, TriggerError, TriggerKind};

/// Open connections and the continuation (if any) waiting on each.
#[derive(Default)]
pub struct ConnectionHub {
    connections: DashMap<ConnectionId, Option<Completion>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, id: ConnectionId) {
        self.connections.insert(id, None);
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Whether a script is currently waiting for a message on `id`.
    pub fn is_waiting(&self, id: ConnectionId) -> bool {
        self.connections
            .get(&id)
            .is_some_and(|waiting| waiting.is_some())
    }

    /// Park `completion` until a message for `id` arrives.
    fn park(&self, id: ConnectionId, completion: Completion) {
        let replaced = match self.connections.get_mut(&id) {
            Some(mut waiting) => waiting.replace(completion),
            None => {
                deliver(completion, Err(TriggerError::ConnectionClosed));
                return;
            }
        };
        if let Some(previous) = replaced {
            debug!("ws"; "{} had a waiting receive, abandoning it", id);
            drop(previous);
        }
    }

    /// Hand `message` to the script waiting on `id`.
    ///
    /// Gives the message back when nobody waits, so the caller can start a
    /// `message` handler instead.
    pub fn deliver(&self, id: ConnectionId, message: Value) -> Result<(), Value> {
        let waiting = self
            .connections
            .get_mut(&id)
            .and_then(|mut waiting| waiting.take());

        match waiting {
            Some(completion) => {
                deliver(completion, Ok(message));
                Ok(())
            }
            None => Err(message),
        }
    }

    /// Forget `id`, failing any script still waiting on it.
    pub fn close(&self, id: ConnectionId) {
        if let Some((_, Some(completion))) = self.connections.remove(&id) {
            deliver(completion, Err(TriggerError::ConnectionClosed));
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Waits for the next message on the connection in the context chain.
pub struct ClientMessageProcessor {
    hub: Arc<ConnectionHub>,
}

impl ClientMessageProcessor {
    pub fn new(hub: Arc<ConnectionHub>) -> Self {
        Self { hub }
    }
}

impl ContinuationProcessor for ClientMessageProcessor {
    fn kind(&self) -> TriggerKind {
        TriggerKind::ClientMessage
    }

    fn perform(&self, request: TriggerRequest, completion: Completion) {
        match request.context.nearest_connection() {
            Some(connection) => self.hub.park(connection.id(), completion),
            None => deliver(completion, Err(TriggerError::NoConnection)),
        }
    }
}
