/// Publish/subscribe bus seam and an in-process implementation
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect to bus at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bus i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed bus frame: {0}")]
    Codec(#[from] postcard::Error),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("bus connection closed")]
    Closed,
}

/// Callback invoked with the raw payload of each message on a topic.
pub type MessageHandler = Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

#[async_trait]
pub trait Bus: Send + Sync {
    /// Delivers every future message on `topic` to `handler`, in bus order.
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Messages buffered per subscription before new ones are dropped.
pub const DELIVERY_QUEUE: usize = 100;

/// Spawns the task that feeds one subscription.
///
/// Each subscription gets its own queue, so messages on one topic are handled
/// one after another while different topics interleave.
pub(crate) fn spawn_delivery(topic: &str, handler: MessageHandler) -> mpsc::Sender<Vec<u8>> {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(DELIVERY_QUEUE);
    let topic = topic.to_string();
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            trace!(%topic, bytes = payload.len(), "delivering message");
            handler(payload).await;
        }
        debug!(%topic, "subscription closed");
    });
    tx
}

/// Queues `payload` for every subscriber of `topic`.
///
/// A full queue drops the message for that subscriber only; closed
/// subscriptions are pruned.
pub(crate) fn deliver(topic: &str, senders: &mut Vec<mpsc::Sender<Vec<u8>>>, payload: &[u8]) {
    senders.retain(|tx| match tx.try_send(payload.to_vec()) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(%topic, bytes = payload.len(), "subscriber queue full, dropping message");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    });
}

/// Bus that lives entirely inside the process.
#[derive(Default)]
pub struct LocalBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Vec<u8>>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BusError> {
        let tx = spawn_delivery(topic, handler);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = subscribers.get_mut(topic) {
            deliver(topic, senders, &payload);
        }
        Ok(())
    }
}
