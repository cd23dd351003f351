//! Fan-out of pipeline events to live listeners.
//!
//! Each subscriber gets its own bounded queue. A listener is removed when
//! its [`Subscription`] is dropped, when it has disconnected, or when its
//! queue is full. A removed listener's stream ends after the events already
//! queued for it.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::Stream;
use tracing::{debug, warn};

pub const BUILD_SUCCEEDED: &str = "build-succeeded";
pub const BUILD_FAILED: &str = "build-failed";
pub const AI_BUILD_SUCCEEDED: &str = "ai-build-succeeded";
pub const AI_BUILD_FAILED: &str = "ai-build-failed";
pub const AI_DEBUG: &str = "ai-debug";

/// Events a listener may have pending before it is dropped.
pub const LISTENER_CAPACITY: usize = 256;

/// A named event with a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineEvent {
    pub name: String,
    pub data: Value,
}

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    senders: Mutex<HashMap<u64, mpsc::Sender<PipelineEvent>>>,
}

/// Shared set of live listeners. Cloning yields a handle to the same set.
#[derive(Clone, Default)]
pub struct EventBroadcaster {
    inner: Arc<Listeners>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(LISTENER_CAPACITY);
        self.inner.senders.lock().insert(id, tx);
        debug!(listener = id, "[EVENTS] Listener subscribed");
        Subscription {
            id,
            receiver: rx,
            listeners: Arc::clone(&self.inner),
        }
    }

    /// Deliver an event to every current listener. Returns how many got it.
    pub fn broadcast(&self, name: &str, data: Value) -> usize {
        let event = PipelineEvent {
            name: name.to_string(),
            data,
        };
        let mut senders = self.inner.senders.lock();
        senders.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(listener = *id, "[EVENTS] Dropping listener that stopped reading");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(listener = *id, "[EVENTS] Dropping closed listener");
                false
            }
        });
        senders.len()
    }

    /// Broadcast an `ai-debug` event for `phase` with extra fields.
    pub fn debug_phase(&self, phase: &str, fields: Value) -> usize {
        let mut data = serde_json::json!({ "phase": phase });
        if let (Some(target), Value::Object(extra)) = (data.as_object_mut(), fields) {
            target.extend(extra);
        }
        self.broadcast(AI_DEBUG, data)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.senders.lock().len()
    }
}

/// A registered listener. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<PipelineEvent>,
    listeners: Arc<Listeners>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = PipelineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.listeners.senders.lock().remove(&self.id);
        debug!(listener = self.id, "[EVENTS] Listener unsubscribed");
    }
}
