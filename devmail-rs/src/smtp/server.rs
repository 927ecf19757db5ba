use crate::config::Config;
use crate::error::Result;
use crate::smtp::connection::SmtpConnection;
use crate::smtp::session::SmtpSession;
use crate::storage::MailStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct SmtpServer {
    config: Config,
    store: Arc<MailStore>,
}

impl SmtpServer {
    pub fn new(config: Config, store: Arc<MailStore>) -> Self {
        Self { config, store }
    }

    /// Bind `smtp.listen_addr` and accept connections until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.config.smtp.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!("SMTP server listening on {}", listener.local_addr()?);

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("SMTP server stopped accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, addr)) => {
                    info!("New SMTP connection from {}", addr);

                    let session =
                        SmtpSession::new(self.store.clone(), &self.config.smtp, addr.to_string());
                    let connection = SmtpConnection::new(
                        session,
                        self.config.server.hostname.clone(),
                        self.config.smtp.max_message_size,
                        self.config.smtp.credentials(),
                    );

                    tokio::spawn(async move {
                        if let Err(e) = connection.handle(socket).await {
                            error!("Session error from {}: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
