//! Top-level assembly: store, event bus, relay engine and SMTP listener.

use crate::config::{Config, OutgoingConfig};
use crate::error::Result;
use crate::events::EventBus;
use crate::relay::{RelayCallback, RelayEngine};
use crate::smtp::SmtpServer;
use crate::storage::{BasicSanitizer, HtmlSanitizer, MailStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct MailServer {
    config: Config,
    store: Arc<MailStore>,
    relay: Arc<RelayEngine>,
    shutdown: CancellationToken,
}

impl MailServer {
    /// Build every component with the default HTML sanitizer. Fails when the
    /// mail directory cannot be created.
    pub async fn new(config: Config) -> Result<Self> {
        let sanitizer = Arc::new(BasicSanitizer::new()?);
        Self::with_sanitizer(config, sanitizer).await
    }

    pub async fn with_sanitizer(config: Config, sanitizer: Arc<dyn HtmlSanitizer>) -> Result<Self> {
        let events = EventBus::new(&config.events);
        let relay = Arc::new(RelayEngine::new(config.outgoing.clone(), &config.relay));
        let store = Arc::new(
            MailStore::new(
                config.storage.mail_dir.clone(),
                events,
                relay.clone(),
                sanitizer,
            )
            .await?,
        );

        Ok(Self {
            config,
            store,
            relay,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<MailStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        self.store.events()
    }

    pub fn relay_engine(&self) -> &Arc<RelayEngine> {
        &self.relay
    }

    /// Manually relay a stored email.
    pub async fn relay(
        &self,
        id: &str,
        relay_to: Option<String>,
        callback: Option<RelayCallback>,
    ) -> Result<()> {
        self.store.relay(id, relay_to, callback).await
    }

    pub async fn outgoing_config(&self) -> OutgoingConfig {
        self.relay.config().await
    }

    pub async fn set_outgoing_config(&self, config: OutgoingConfig) {
        self.relay.update_config(config).await;
    }

    pub fn smtp_server(&self) -> SmtpServer {
        SmtpServer::new(self.config.clone(), self.store.clone())
    }

    /// Serve SMTP on the configured address until [`MailServer::shutdown`].
    pub async fn run(&self) -> Result<()> {
        self.smtp_server().run(self.shutdown.clone()).await
    }

    /// Serve SMTP on an already bound listener until [`MailServer::shutdown`].
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.smtp_server()
            .serve(listener, self.shutdown.clone())
            .await
    }

    /// Stop accepting connections and drain the relay workers.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.shutdown.cancel();
        self.relay.shutdown().await;
    }
}
