pub mod user_events;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Base trait all events implement.
#[async_trait]
pub trait Event: Send + Sync + std::fmt::Debug {
    /// Topic name the event is published under
    fn event_name(&self) -> &'static str;

    /// Correlation id of the request that produced the event
    fn trace_id(&self) -> &str;

    /// Event payload for listeners
    fn to_json(&self) -> serde_json::Value;
}

/// Base trait for event listeners.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn handle(&self, event: Arc<dyn Event>) -> Result<()>;

    fn listener_name(&self) -> &'static str;
}

/// In-process pub/sub with best-effort async fan-out. Publishing never
/// blocks on listeners; each listener runs in its own task and a failing
/// listener cannot keep the others from running.
pub struct EventDispatcher {
    listeners: RwLock<HashMap<String, Vec<Arc<dyn EventListener>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub async fn listen(&self, event_name: &str, listener: Arc<dyn EventListener>) {
        let mut listeners = self.listeners.write().await;
        listeners
            .entry(event_name.to_string())
            .or_insert_with(Vec::new)
            .push(listener);
    }

    /// Fire an event to all listeners registered for its topic.
    pub async fn fire(&self, event: Arc<dyn Event>) {
        let listeners = self.listeners.read().await;

        let Some(event_listeners) = listeners.get(event.event_name()) else {
            return;
        };

        for listener in event_listeners {
            let listener = listener.clone();
            let event = event.clone();

            tokio::spawn(async move {
                if let Err(e) = listener.handle(event.clone()).await {
                    tracing::error!(
                        trace_id = %event.trace_id(),
                        "Listener {} failed handling {}: {}",
                        listener.listener_name(),
                        event.event_name(),
                        e
                    );
                }
            });
        }
    }

    pub async fn listener_counts(&self) -> HashMap<String, usize> {
        let listeners = self.listeners.read().await;
        listeners.iter().map(|(k, v)| (k.clone(), v.len())).collect()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Global event dispatcher instance
static EVENT_DISPATCHER: tokio::sync::OnceCell<Arc<EventDispatcher>> = tokio::sync::OnceCell::const_new();

pub async fn event_dispatcher() -> Arc<EventDispatcher> {
    EVENT_DISPATCHER
        .get_or_init(|| async { Arc::new(EventDispatcher::new()) })
        .await
        .clone()
}

/// Fire an event using the global dispatcher
pub async fn event(event: Arc<dyn Event>) {
    event_dispatcher().await.fire(event).await;
}

/// Register a listener using the global dispatcher
pub async fn listen(event_name: &str, listener: Arc<dyn EventListener>) {
    event_dispatcher().await.listen(event_name, listener).await;
}
