//! Named-event notifier
//!
//! The session owns one of these and publishes lifecycle events and server
//! pushes through it. Handlers receive the event payload as JSON.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pushed when the server kicks the client; payload is the kick body or null
pub const EVENT_KICK: &str = "onKick";
/// Pushed when the server stops answering heartbeats
pub const EVENT_HEARTBEAT_TIMEOUT: &str = "heartbeat timeout";
/// Pushed on handshake rejection and fatal protocol errors
pub const EVENT_ERROR: &str = "error";
/// Pushed when the transport fails
pub const EVENT_IO_ERROR: &str = "io-error";
/// Pushed once when the session closes
pub const EVENT_CLOSE: &str = "close";

/// Event handler
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies a registered handler for [`EventEmitter::off`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    once: bool,
    handler: Handler,
}

/// Registry of handlers keyed by event name
#[derive(Default)]
pub struct EventEmitter {
    listeners: DashMap<String, Vec<Listener>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    /// Create an emitter with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every emission of `event`
    pub fn on<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add(event, Arc::new(handler), false)
    }

    /// Register `handler` for the next emission of `event` only
    pub fn once<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add(event, Arc::new(handler), true)
    }

    fn add(&self, event: &str, handler: Handler, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push(Listener { id, once, handler });
        id
    }

    /// Remove one handler; returns whether it was registered
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut removed = false;
        if let Some(mut listeners) = self.listeners.get_mut(event) {
            let before = listeners.len();
            listeners.retain(|l| l.id != id);
            removed = listeners.len() != before;
        }
        self.listeners.remove_if(event, |_, listeners| listeners.is_empty());
        removed
    }

    /// Remove every handler for `event`
    pub fn off_all(&self, event: &str) {
        self.listeners.remove(event);
    }

    /// Invoke the handlers for `event` in registration order
    ///
    /// Handlers run after the registry lock is released, so they may register
    /// or emit themselves. Returns the number of handlers invoked.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        let handlers: Vec<Handler> = match self.listeners.get_mut(event) {
            Some(mut listeners) => {
                let handlers = listeners.iter().map(|l| Arc::clone(&l.handler)).collect();
                listeners.retain(|l| !l.once);
                handlers
            }
            None => return 0,
        };
        self.listeners.remove_if(event, |_, listeners| listeners.is_empty());

        tracing::trace!("Emitting '{}' to {} handler(s)", event, handlers.len());
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    /// Number of handlers registered for `event`
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map(|l| l.len()).unwrap_or(0)
    }

    /// Whether anything listens for `event`
    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("events", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Value) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &Value| sink.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn test_on_receives_every_emit() {
        let emitter = EventEmitter::new();
        let (seen, handler) = recorder();
        emitter.on("chat.onMessage", handler);

        assert_eq!(emitter.emit("chat.onMessage", &json!({"text": "a"})), 1);
        assert_eq!(emitter.emit("chat.onMessage", &json!({"text": "b"})), 1);
        assert_eq!(emitter.emit("other", &json!(null)), 0);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![json!({"text": "a"}), json!({"text": "b"})]
        );
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let emitter = EventEmitter::new();
        let (seen, handler) = recorder();
        emitter.once(EVENT_CLOSE, handler);

        emitter.emit(EVENT_CLOSE, &json!(1));
        emitter.emit(EVENT_CLOSE, &json!(2));

        assert_eq!(*seen.lock().unwrap(), vec![json!(1)]);
        assert!(!emitter.has_listeners(EVENT_CLOSE));
    }

    #[test]
    fn test_off_removes_only_that_handler() {
        let emitter = EventEmitter::new();
        let (first, h1) = recorder();
        let (second, h2) = recorder();
        let id = emitter.on(EVENT_KICK, h1);
        emitter.on(EVENT_KICK, h2);

        assert!(emitter.off(EVENT_KICK, id));
        assert!(!emitter.off(EVENT_KICK, id));
        emitter.emit(EVENT_KICK, &json!(null));

        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
        assert_eq!(emitter.listener_count(EVENT_KICK), 1);

        emitter.off_all(EVENT_KICK);
        assert!(!emitter.has_listeners(EVENT_KICK));
    }

    #[test]
    fn test_handler_may_reenter() {
        let emitter = Arc::new(EventEmitter::new());
        let (seen, handler) = recorder();
        emitter.on("second", handler);

        let inner = Arc::clone(&emitter);
        emitter.on("first", move |v| {
            inner.emit("second", v);
        });

        emitter.emit("first", &json!("x"));
        assert_eq!(*seen.lock().unwrap(), vec![json!("x")]);
    }
}
