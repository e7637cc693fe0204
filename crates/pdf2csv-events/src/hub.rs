// WebSocket fan-out hub
//
// Subscribes to the event bus, serializes each event exactly once, records
// it in the owning collection's replay buffer, and pushes the frame to every
// registered client. A client whose outbound channel is full has exceeded
// the configured backlog and is dropped; a failed send closes only that
// client.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use pdf2csv_core::QueueEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::EventBus;
use crate::replay::ReplayBuffer;

pub type ClientId = u64;

#[derive(Debug, Default)]
struct ClientTable {
    next_id: ClientId,
    senders: HashMap<ClientId, mpsc::Sender<String>>,
}

/// Fan-out hub shared between the bus task and the socket handlers.
#[derive(Debug)]
pub struct WebSocketHub {
    backlog_threshold: usize,
    clients: Mutex<ClientTable>,
    replay: Mutex<HashMap<String, ReplayBuffer>>,
}

impl WebSocketHub {
    pub fn new(backlog_threshold: usize) -> Arc<Self> {
        Arc::new(Self {
            backlog_threshold: backlog_threshold.max(1),
            clients: Mutex::new(ClientTable::default()),
            replay: Mutex::new(HashMap::new()),
        })
    }

    /// Register a connected socket; the handler forwards frames from the
    /// returned receiver. The channel capacity is the backlog threshold.
    pub fn register(&self) -> (ClientId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.backlog_threshold);
        let mut table = self.clients.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.senders.insert(id, tx);
        debug!(client_id = id, clients = table.senders.len(), "ws client registered");
        (id, rx)
    }

    pub fn unregister(&self, id: ClientId) {
        let mut table = self.clients.lock();
        if table.senders.remove(&id).is_some() {
            debug!(client_id = id, clients = table.senders.len(), "ws client unregistered");
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().senders.len()
    }

    /// Buffered frames for a collection, oldest first.
    pub fn replay_for(&self, collection_id: &str) -> Vec<String> {
        let mut buffers = self.replay.lock();
        match buffers.get_mut(collection_id) {
            Some(buffer) => buffer.recent(),
            None => Vec::new(),
        }
    }

    pub fn drop_replay_for(&self, collection_id: &str) {
        self.replay.lock().remove(collection_id);
    }

    /// Spawn the bus-draining task. One per process.
    pub fn spawn_fanout(self: Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let hub = self;
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => hub.dispatch(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "ws hub lagged behind the event bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn dispatch(&self, event: &QueueEvent) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event_type = event.event_type(), %err, "failed to serialize event");
                return;
            }
        };

        if let Some(collection_id) = event.collection_id() {
            let mut buffers = self.replay.lock();
            buffers
                .entry(collection_id.to_string())
                .or_insert_with(ReplayBuffer::new)
                .push(frame.clone());
        }

        self.broadcast_frame(&frame);
    }

    fn broadcast_frame(&self, frame: &str) {
        let mut dropped = Vec::new();
        {
            let table = self.clients.lock();
            for (id, tx) in &table.senders {
                match tx.try_send(frame.to_string()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(client_id = *id, "ws client backlog exceeded; dropping");
                        dropped.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        dropped.push(*id);
                    }
                }
            }
        }

        if !dropped.is_empty() {
            counter!("ws.clients.dropped", dropped.len() as u64);
            let mut table = self.clients.lock();
            for id in dropped {
                table.senders.remove(&id);
            }
        }
    }
}
