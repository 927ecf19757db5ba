//! Store event dispatch
//!
//! ```text
//! MailStore::commit ──emit──▶ [bounded queue] ──▶ dispatcher ──spawn──▶ handler
//!                    (never blocks; drops and                 (bounded by a
//!                     logs when full)                          semaphore)
//! ```
//!
//! Handlers run on the blocking pool, so a slow or stuck handler never stalls
//! ingestion or other handlers beyond the concurrency limit.

use crate::config::EventsConfig;
use crate::model::Email;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    New,
    Delete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::New => write!(f, "new"),
            EventKind::Delete => write!(f, "delete"),
        }
    }
}

pub type EventHandler = Arc<dyn Fn(Arc<Email>) + Send + Sync>;

type HandlerMap = Arc<RwLock<HashMap<EventKind, Vec<EventHandler>>>>;

struct Event {
    kind: EventKind,
    email: Email,
}

/// Cloneable handle for registering handlers and emitting events.
#[derive(Clone)]
pub struct EventBus {
    handlers: HandlerMap,
    sender: mpsc::Sender<Event>,
}

impl EventBus {
    /// Start the dispatcher task. Must be called inside a Tokio runtime.
    pub fn new(config: &EventsConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let handlers: HandlerMap = Arc::new(RwLock::new(HashMap::new()));
        let permits = Arc::new(Semaphore::new(config.max_concurrent_handlers.max(1)));

        tokio::spawn(Self::dispatch(receiver, handlers.clone(), permits));

        Self { handlers, sender }
    }

    pub async fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(Arc<Email>) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .await
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Queue an event for the registered handlers. Never blocks; the event is
    /// dropped when the dispatch queue is full.
    pub fn emit(&self, kind: EventKind, email: Email) {
        match self.sender.try_send(Event { kind, email }) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    "Event queue full, dropping {} event for {}",
                    event.kind, event.email.id
                );
            }
            Err(TrySendError::Closed(event)) => {
                debug!("Event dispatcher stopped, dropping {} event", event.kind);
            }
        }
    }

    async fn dispatch(
        mut receiver: mpsc::Receiver<Event>,
        handlers: HandlerMap,
        permits: Arc<Semaphore>,
    ) {
        while let Some(event) = receiver.recv().await {
            let registered = handlers
                .read()
                .await
                .get(&event.kind)
                .cloned()
                .unwrap_or_default();
            if registered.is_empty() {
                continue;
            }

            let email = Arc::new(event.email);
            for handler in registered {
                let permit = match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let email = email.clone();
                tokio::task::spawn_blocking(move || {
                    handler(email);
                    drop(permit);
                });
            }
        }
    }
}
