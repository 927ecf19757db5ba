use crate::config::OutgoingConfig;
use crate::error::RelayError;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::time::Duration;
use tracing::debug;

/// Sender used when neither the envelope nor the headers name one
pub const FALLBACK_SENDER: &str = "noreply@localhost";

/// One-shot SMTP client for the configured upstream server.
pub struct RelayClient {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    target: String,
}

impl RelayClient {
    /// Build a transport for `config`. With `secure` set, STARTTLS is used
    /// whenever the server offers it.
    pub fn new(config: &OutgoingConfig, timeout: Duration) -> Result<Self, RelayError> {
        let port = config.effective_port();

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(port)
            .timeout(Some(timeout));

        if config.has_credentials() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        if config.secure {
            let parameters = TlsParameters::new(config.host.clone())
                .map_err(|e| RelayError::Delivery(format!("TLS setup failed: {}", e)))?;
            builder = builder.tls(Tls::Opportunistic(parameters));
        }

        Ok(Self {
            transport: builder.build(),
            target: format!("{}:{}", config.host, port),
        })
    }

    /// Send `message` verbatim to `recipients`.
    pub async fn send(
        &self,
        sender: &str,
        recipients: &[String],
        message: &[u8],
    ) -> Result<(), RelayError> {
        let from = sender
            .parse::<lettre::Address>()
            .map_err(|e| RelayError::Delivery(format!("invalid sender {}: {}", sender, e)))?;

        let to = recipients
            .iter()
            .map(|r| {
                r.parse::<lettre::Address>()
                    .map_err(|e| RelayError::Delivery(format!("invalid recipient {}: {}", r, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let envelope = lettre::address::Envelope::new(Some(from), to)
            .map_err(|e| RelayError::Delivery(e.to_string()))?;

        debug!(
            "Relaying {} bytes from {} to {} recipient(s) via {}",
            message.len(),
            sender,
            recipients.len(),
            self.target
        );

        AsyncTransport::send_raw(&self.transport, &envelope, message)
            .await
            .map_err(|e| RelayError::Delivery(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str) -> OutgoingConfig {
        OutgoingConfig {
            host: host.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_invalid_sender_rejected() {
        let client = RelayClient::new(&config("127.0.0.1"), Duration::from_secs(1)).unwrap();
        let err = client
            .send("not an address", &["a@x.com".to_string()], b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Delivery(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_delivery_error() {
        // Port 9 (discard) is closed on loopback in test environments.
        let mut cfg = config("127.0.0.1");
        cfg.port = 9;
        let client = RelayClient::new(&cfg, Duration::from_secs(2)).unwrap();

        let err = client
            .send(FALLBACK_SENDER, &["a@x.com".to_string()], b"Subject: x\r\n\r\nbody\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Delivery(_)));
    }

    #[tokio::test]
    async fn test_target_uses_default_port() {
        let client = RelayClient::new(&config("mail.example.com"), Duration::from_secs(1)).unwrap();
        assert_eq!(client.target, "mail.example.com:25");
    }
}
