//! Outgoing relay queue
//!
//! Captured messages are forwarded to a real SMTP server on request, or
//! automatically when auto-relay is on.
//!
//! # Architecture
//! ```text
//! ┌─────────┐  try_send / wait ≤ enqueue_timeout   ┌──────────┐
//! │  relay  │ ───────────────────────────────────▶ │  Queue   │ (bounded FIFO)
//! └─────────┘          │                            └──────────┘
//!                      └─▶ X QueueFull                    │
//!                                                         ▼
//!                         callback(result) ◀── [Worker × N] → [RelayClient] → upstream
//! ```
//!
//! Every attempt is bounded by `attempt_timeout`. Nothing is retried.

use crate::config::{OutgoingConfig, RelayConfig};
use crate::error::RelayError;
use crate::model::Email;
use crate::relay::client::{RelayClient, FALLBACK_SENDER};
use crate::relay::rules::RecipientRules;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Receives the outcome of a relay request exactly once.
pub type RelayCallback = Box<dyn FnOnce(Result<(), RelayError>) + Send + 'static>;

/// What to deliver and to whom
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub email: Email,
    pub raw_path: PathBuf,
    /// Explicit recipient that replaces every other source
    pub relay_to: Option<String>,
    pub is_auto_relay: bool,
}

/// A queued relay request and the callback waiting for its outcome
pub struct RelayTask {
    pub request: RelayRequest,
    pub callback: Option<RelayCallback>,
}

impl RelayTask {
    fn complete(self, outcome: Result<(), RelayError>) {
        if let Some(callback) = self.callback {
            callback(outcome);
        }
    }
}

/// Queue and worker pool for outgoing relay
pub struct RelayEngine {
    config: Arc<RwLock<OutgoingConfig>>,
    sender: RwLock<Option<mpsc::Sender<RelayTask>>>,
    // Held so the queue stays open when no worker is running
    _receiver: Arc<Mutex<mpsc::Receiver<RelayTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    enqueue_timeout: Duration,
}

impl RelayEngine {
    /// Create the queue and start the workers. Must be called inside a Tokio
    /// runtime. Zero workers leaves the queue undrained.
    pub fn new(outgoing: OutgoingConfig, settings: &RelayConfig) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let config = Arc::new(RwLock::new(outgoing));
        let attempt_timeout = settings.attempt_timeout();

        let workers = (0..settings.workers)
            .map(|index| {
                tokio::spawn(Self::run_worker(
                    index,
                    receiver.clone(),
                    config.clone(),
                    attempt_timeout,
                ))
            })
            .collect();

        info!(
            "Relay queue started (capacity {}, {} worker(s))",
            settings.queue_capacity, settings.workers
        );

        Self {
            config,
            sender: RwLock::new(Some(sender)),
            _receiver: receiver,
            workers: Mutex::new(workers),
            enqueue_timeout: settings.enqueue_timeout(),
        }
    }

    pub async fn is_enabled(&self) -> bool {
        self.config.read().await.is_enabled()
    }

    pub async fn is_auto_relay_enabled(&self) -> bool {
        let config = self.config.read().await;
        config.is_enabled() && config.auto_relay
    }

    pub async fn config(&self) -> OutgoingConfig {
        self.config.read().await.clone()
    }

    /// Replace the outgoing configuration. An empty host disables relay.
    pub async fn update_config(&self, config: OutgoingConfig) {
        info!(
            "Outgoing relay {}",
            if config.is_enabled() {
                format!("configured for {}:{}", config.host, config.effective_port())
            } else {
                "disabled".to_string()
            }
        );
        *self.config.write().await = config;
    }

    /// Queue `email` for delivery. The callback receives the outcome: an
    /// immediate failure when relay is disabled or the queue stays full for
    /// the enqueue timeout, otherwise the worker's delivery result.
    pub async fn relay(
        &self,
        email: Email,
        raw_path: PathBuf,
        relay_to: Option<String>,
        is_auto_relay: bool,
        callback: Option<RelayCallback>,
    ) {
        let task = RelayTask {
            request: RelayRequest {
                email,
                raw_path,
                relay_to: relay_to.filter(|r| !r.trim().is_empty()),
                is_auto_relay,
            },
            callback,
        };

        if !self.is_enabled().await {
            task.complete(Err(RelayError::NotConfigured));
            return;
        }

        let sender = match self.sender.read().await.clone() {
            Some(sender) => sender,
            None => {
                task.complete(Err(RelayError::Closed));
                return;
            }
        };

        match sender.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(task)) => {
                debug!("Relay queue full, waiting up to {:?}", self.enqueue_timeout);
                match timeout(self.enqueue_timeout, sender.reserve()).await {
                    Ok(Ok(permit)) => permit.send(task),
                    Ok(Err(_)) => task.complete(Err(RelayError::Closed)),
                    Err(_) => {
                        warn!(
                            "Relay queue is full, dropping request for {}",
                            task.request.email.id
                        );
                        task.complete(Err(RelayError::QueueFull));
                    }
                }
            }
            Err(TrySendError::Closed(task)) => task.complete(Err(RelayError::Closed)),
        }
    }

    /// Close the queue and wait for the workers to finish what is queued.
    pub async fn shutdown(&self) {
        self.sender.write().await.take();

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                error!("Relay worker failed: {}", e);
            }
        }
        info!("Relay queue stopped");
    }

    async fn run_worker(
        index: usize,
        receiver: Arc<Mutex<mpsc::Receiver<RelayTask>>>,
        config: Arc<RwLock<OutgoingConfig>>,
        attempt_timeout: Duration,
    ) {
        debug!("Relay worker {} started", index);

        loop {
            let task = receiver.lock().await.recv().await;
            let Some(task) = task else { break };

            let RelayTask { request, callback } = task;
            let outcome = Self::deliver(&config, &request, attempt_timeout).await;
            match &outcome {
                Ok(()) => info!("Relayed email {}", request.email.id),
                Err(e) => warn!("Relay of email {} failed: {}", request.email.id, e),
            }
            if let Some(callback) = callback {
                callback(outcome);
            }
        }

        debug!("Relay worker {} stopped", index);
    }

    async fn deliver(
        config: &RwLock<OutgoingConfig>,
        request: &RelayRequest,
        attempt_timeout: Duration,
    ) -> Result<(), RelayError> {
        let config = config.read().await.clone();
        if !config.is_enabled() {
            return Err(RelayError::NotConfigured);
        }

        let recipients = resolve_recipients(&config, request);
        if recipients.is_empty() {
            return Err(RelayError::NoRecipients);
        }

        let message = tokio::fs::read(&request.raw_path)
            .await
            .map_err(|e| RelayError::Delivery(format!("failed to read email file: {}", e)))?;

        let sender = sender_for(&request.email);
        let client = RelayClient::new(&config, attempt_timeout)?;

        match timeout(attempt_timeout, client.send(&sender, &recipients, &message)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout),
        }
    }
}

/// Recipients for `request`: the explicit override, else the auto-relay
/// address for auto-relay requests, else the envelope recipients that pass
/// the rules.
pub fn resolve_recipients(config: &OutgoingConfig, request: &RelayRequest) -> Vec<String> {
    if let Some(relay_to) = &request.relay_to {
        return vec![relay_to.clone()];
    }

    if request.is_auto_relay && !config.auto_relay_addr.is_empty() {
        return vec![config.auto_relay_addr.clone()];
    }

    RecipientRules::new(&config.allow_rules, &config.deny_rules).filter(&request.email.envelope.to)
}

/// Envelope sender, else the first From address, else a fixed fallback.
pub fn sender_for(email: &Email) -> String {
    if !email.envelope.from.is_empty() {
        return email.envelope.from.clone();
    }

    email
        .sender()
        .filter(|s| !s.is_empty())
        .unwrap_or(FALLBACK_SENDER)
        .to_string()
}
