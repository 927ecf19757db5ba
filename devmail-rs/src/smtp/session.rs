//! SMTP ingestion session
//!
//! Tracks one connection's mail transaction:
//! `Idle → HaveSender → HaveRecipients → Receiving → Committed | Failed`.
//! DATA writes the raw message to `<mail_dir>/<id>.eml` while buffering it
//! for MIME parsing, saves the attachments and commits the result to the
//! store. The wire protocol lives in [`crate::smtp::connection`].

use crate::config::SmtpConfig;
use crate::error::{MailError, Result};
use crate::mime::MimeParser;
use crate::model::{Email, Envelope};
use crate::storage::MailStore;
use crate::utils::make_id;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Timeout for reading one line of DATA content
const DATA_TIMEOUT: Duration = Duration::from_secs(600); // 10 minutes

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    HaveSender,
    HaveRecipients,
    Receiving,
    Committed,
    Failed,
}

pub struct SmtpSession {
    store: Arc<MailStore>,
    state: SessionState,
    from: Option<String>,
    to: Vec<String>,
    helo: String,
    remote_address: String,
    max_message_size: usize,
    max_recipients: usize,
}

impl SmtpSession {
    pub fn new(store: Arc<MailStore>, config: &SmtpConfig, remote_address: impl Into<String>) -> Self {
        Self {
            store,
            state: SessionState::Idle,
            from: None,
            to: Vec::new(),
            helo: String::new(),
            remote_address: remote_address.into(),
            max_message_size: config.max_message_size,
            max_recipients: config.max_recipients,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn sender(&self) -> Option<&str> {
        self.from.as_deref()
    }

    pub fn recipients(&self) -> &[String] {
        &self.to
    }

    pub fn helo(&self) -> &str {
        &self.helo
    }

    /// Hostname announced by HELO/EHLO, recorded in the envelope.
    pub fn set_helo(&mut self, name: impl Into<String>) {
        self.helo = name.into();
    }

    /// MAIL FROM. Starts a new transaction, dropping any recipients.
    pub fn mail(&mut self, from: impl Into<String>) -> Result<()> {
        if self.state == SessionState::Receiving {
            return Err(MailError::SmtpProtocol("MAIL during DATA".to_string()));
        }

        let from = from.into();
        debug!("MAIL FROM: {}", from);
        self.from = Some(from);
        self.to.clear();
        self.state = SessionState::HaveSender;
        Ok(())
    }

    /// RCPT TO. Duplicates are kept.
    pub fn rcpt(&mut self, to: impl Into<String>) -> Result<()> {
        if !matches!(
            self.state,
            SessionState::HaveSender | SessionState::HaveRecipients
        ) {
            return Err(MailError::SmtpProtocol("RCPT requires MAIL first".to_string()));
        }

        if self.to.len() >= self.max_recipients {
            warn!("Too many recipients from {}", self.remote_address);
            return Err(MailError::TooManyRecipients(self.max_recipients));
        }

        let to = to.into();
        debug!("RCPT TO: {}", to);
        self.to.push(to);
        self.state = SessionState::HaveRecipients;
        Ok(())
    }

    /// Whether DATA may start.
    pub fn can_receive(&self) -> bool {
        self.state == SessionState::HaveRecipients
    }

    /// Receive the message body up to the terminating `.` line and commit it.
    ///
    /// The sender and recipients are cleared whatever the outcome. A raw file
    /// written before a failure is left on disk.
    pub async fn data<R>(&mut self, reader: &mut R) -> Result<Email>
    where
        R: AsyncBufRead + Unpin,
    {
        if !self.can_receive() {
            return Err(MailError::SmtpProtocol("DATA requires RCPT first".to_string()));
        }

        self.state = SessionState::Receiving;
        let outcome = self.receive(reader).await;

        match &outcome {
            Ok(email) => {
                info!(
                    "Accepted email {} from {} for {} recipient(s)",
                    email.id,
                    self.remote_address,
                    self.to.len()
                );
                self.state = SessionState::Committed;
            }
            Err(e) => {
                warn!("Transaction from {} failed: {}", self.remote_address, e);
                self.state = SessionState::Failed;
            }
        }

        self.from = None;
        self.to.clear();
        outcome
    }

    async fn receive<R>(&self, reader: &mut R) -> Result<Email>
    where
        R: AsyncBufRead + Unpin,
    {
        let id = self.unused_id().await;
        let path = self.store.message_path(&id)?;
        let file = File::create(&path).await.map_err(|e| {
            MailError::Storage(format!("Failed to create {}: {}", path.display(), e))
        })?;

        let mut file = BufWriter::new(file);
        let raw = read_message(reader, &mut file, self.max_message_size).await;
        file.flush()
            .await
            .map_err(|e| MailError::Storage(format!("Failed to write {}: {}", path.display(), e)))?;
        let raw = raw?;

        let mut parsed = MimeParser::parse(&raw)?;

        let mut attachments = Vec::with_capacity(parsed.attachments.len());
        for part in std::mem::take(&mut parsed.attachments) {
            let mut attachment = part.to_attachment();
            self.store
                .save_attachment(&id, &mut attachment, &part.body)
                .await?;
            attachments.push(attachment);
        }

        let envelope = Envelope {
            from: self.from.clone().unwrap_or_default(),
            to: self.to.clone(),
            host: self.helo.clone(),
            remote_address: self.remote_address.clone(),
        };

        self.store
            .commit(&id, false, envelope, parsed.into_draft(attachments, None))
            .await
    }

    async fn unused_id(&self) -> String {
        loop {
            let id = make_id();
            if !self.store.contains(&id).await {
                return id;
            }
        }
    }

    /// RSET. Keeps the connection and its HELO name.
    pub fn reset(&mut self) {
        self.from = None;
        self.to.clear();
        self.state = SessionState::Idle;
    }

    /// QUIT.
    pub fn logout(&mut self) {
        debug!("Session from {} closed", self.remote_address);
        self.reset();
    }
}

/// Copy dot-terminated DATA lines into `sink`, undoing dot-stuffing, and
/// return the same bytes.
///
/// Lines past `max_size` are drained up to the terminator and dropped so the
/// connection stays in sync, then the whole message is refused.
pub async fn read_message<R, W>(reader: &mut R, sink: &mut W, max_size: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut raw = Vec::new();
    let mut line = Vec::new();
    let mut oversized = false;

    loop {
        line.clear();
        let n = timeout(DATA_TIMEOUT, reader.read_until(b'\n', &mut line))
            .await
            .map_err(|_| MailError::SmtpProtocol("Timeout during DATA".to_string()))??;

        if n == 0 {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "connection closed during DATA",
            )
            .into());
        }

        if line == b".\r\n" || line == b".\n" {
            break;
        }

        if oversized {
            continue;
        }

        let content = line.strip_prefix(b".").unwrap_or(&line[..]);
        if raw.len() + content.len() > max_size {
            warn!("Message exceeds {} bytes, discarding", max_size);
            oversized = true;
            continue;
        }

        sink.write_all(content)
            .await
            .map_err(|e| MailError::Storage(format!("Failed to write message: {}", e)))?;
        raw.extend_from_slice(content);
    }

    if oversized {
        return Err(MailError::MessageTooLarge(max_size));
    }

    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventsConfig, OutgoingConfig, RelayConfig};
    use crate::events::EventBus;
    use crate::relay::RelayEngine;
    use crate::storage::BasicSanitizer;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn open_store(tmp: &TempDir) -> Arc<MailStore> {
        let relay = Arc::new(RelayEngine::new(
            OutgoingConfig::default(),
            &RelayConfig::default(),
        ));
        Arc::new(
            MailStore::new(
                tmp.path(),
                EventBus::new(&EventsConfig::default()),
                relay,
                Arc::new(BasicSanitizer::new().unwrap()),
            )
            .await
            .unwrap(),
        )
    }

    fn session(store: Arc<MailStore>) -> SmtpSession {
        let config = SmtpConfig {
            max_recipients: 3,
            max_message_size: 2048,
            ..Default::default()
        };
        let mut session = SmtpSession::new(store, &config, "127.0.0.1:40000");
        session.set_helo("client.local");
        session
    }

    const MULTIPART: &str = "From: Alice <alice@x.com>\r\n\
To: bob@x.com\r\n\
Subject: Report\r\n\
Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
\r\n\
--sep\r\n\
Content-Type: text/plain\r\n\
\r\n\
..leading dot\r\n\
--sep\r\n\
Content-Type: text/csv\r\n\
Content-Disposition: attachment; filename=\"data.csv\"\r\n\
\r\n\
a,b\r\n\
--sep--\r\n\
.\r\n";

    #[tokio::test]
    async fn test_command_sequence() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(open_store(&tmp).await);

        assert!(matches!(
            session.rcpt("bob@x.com"),
            Err(MailError::SmtpProtocol(_))
        ));
        assert!(!session.can_receive());

        session.mail("alice@x.com").unwrap();
        assert_eq!(session.state(), SessionState::HaveSender);
        session.rcpt("bob@x.com").unwrap();
        session.rcpt("bob@x.com").unwrap();
        assert_eq!(session.recipients(), &["bob@x.com", "bob@x.com"]);
        assert_eq!(session.state(), SessionState::HaveRecipients);

        session.rcpt("carol@x.com").unwrap();
        assert!(matches!(
            session.rcpt("dave@x.com"),
            Err(MailError::TooManyRecipients(3))
        ));

        session.reset();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.sender().is_none());
        assert!(session.recipients().is_empty());
        assert_eq!(session.helo(), "client.local");
    }

    #[tokio::test]
    async fn test_data_keeps_binary_attachment_bytes() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let mut session = session(store.clone());
        session.mail("alice@x.com").unwrap();
        session.rcpt("bob@x.com").unwrap();

        let mut input = b"Subject: bin\r\n\
Content-Type: multipart/mixed; boundary=sep\r\n\
\r\n\
--sep\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=raw.bin\r\n\
Content-Transfer-Encoding: 8bit\r\n\
\r\n"
            .to_vec();
        input.extend_from_slice(&[0xff, 0xfe, 0x80, 0x41]);
        input.extend_from_slice(b"\r\n--sep--\r\n.\r\n");

        let email = session.data(&mut input.as_slice()).await.unwrap();
        let attachment = &email.attachments[0];
        assert_eq!(attachment.size, 4);

        let (_, bytes) = store
            .attachment(&email.id, &attachment.generated_file_name)
            .await
            .unwrap();
        assert_eq!(bytes, vec![0xff, 0xfe, 0x80, 0x41]);
    }

    #[tokio::test]
    async fn test_data_commits_message() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let mut session = session(store.clone());

        session.mail("alice@x.com").unwrap();
        session.rcpt("bob@x.com").unwrap();
        session.rcpt("hidden@x.com").unwrap();

        let mut input = MULTIPART.as_bytes();
        let email = session.data(&mut input).await.unwrap();

        assert_eq!(session.state(), SessionState::Committed);
        assert!(session.recipients().is_empty());
        assert!(!email.read);
        assert_eq!(email.subject, "Report");
        assert_eq!(email.text, ".leading dot");
        assert_eq!(email.envelope.from, "alice@x.com");
        assert_eq!(email.envelope.to, vec!["bob@x.com", "hidden@x.com"]);
        assert_eq!(email.envelope.host, "client.local");
        assert_eq!(email.envelope.remote_address, "127.0.0.1:40000");
        assert_eq!(email.calculated_bcc.len(), 1);
        assert_eq!(email.calculated_bcc[0].address, "hidden@x.com");

        assert_eq!(email.attachments.len(), 1);
        let attachment = &email.attachments[0];
        assert_eq!(attachment.file_name, "data.csv");
        assert!(attachment.generated_file_name.ends_with(".csv"));
        assert_eq!(attachment.size, 3);

        let raw = std::fs::read_to_string(tmp.path().join(format!("{}.eml", email.id))).unwrap();
        assert!(raw.contains("\r\n.leading dot\r\n"));
        assert!(!raw.contains("\r\n.\r\n"));
        assert_eq!(email.size, raw.len() as u64);

        assert!(store.contains(&email.id).await);
    }

    #[tokio::test]
    async fn test_data_requires_recipients() {
        let tmp = TempDir::new().unwrap();
        let mut session = session(open_store(&tmp).await);
        session.mail("alice@x.com").unwrap();

        let mut input: &[u8] = b"Subject: x\r\n\r\nbody\r\n.\r\n";
        assert!(matches!(
            session.data(&mut input).await,
            Err(MailError::SmtpProtocol(_))
        ));
        assert_eq!(session.state(), SessionState::HaveSender);
    }

    #[tokio::test]
    async fn test_data_parse_failure() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let mut session = session(store.clone());
        session.mail("alice@x.com").unwrap();
        session.rcpt("bob@x.com").unwrap();

        let mut input: &[u8] = b".\r\n";
        assert!(matches!(
            session.data(&mut input).await,
            Err(MailError::Parse(_))
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(store.is_empty().await);

        // A new transaction may start after a failure
        session.mail("alice@x.com").unwrap();
        assert_eq!(session.state(), SessionState::HaveSender);
    }

    #[tokio::test]
    async fn test_data_too_large_drains_to_terminator() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp).await;
        let mut session = session(store.clone());
        session.mail("alice@x.com").unwrap();
        session.rcpt("bob@x.com").unwrap();

        let input = format!(
            "Subject: big\r\n\r\n{}\r\n.\r\nQUIT\r\n",
            "x".repeat(4096)
        );
        let mut reader = input.as_bytes();
        assert!(matches!(
            session.data(&mut reader).await,
            Err(MailError::MessageTooLarge(2048))
        ));
        assert!(store.is_empty().await);

        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "QUIT\r\n");
    }

    #[tokio::test]
    async fn test_read_message_unstuffs_and_stops() {
        let mut input: &[u8] = b"line one\r\n..two\r\n.\r\ntrailing\r\n";
        let mut sink = Vec::new();

        let raw = read_message(&mut input, &mut sink, 1024).await.unwrap();

        assert_eq!(raw, b"line one\r\n.two\r\n");
        assert_eq!(sink, raw);
        assert_eq!(input, b"trailing\r\n");
    }

    #[tokio::test]
    async fn test_read_message_eof() {
        let mut input: &[u8] = b"no terminator\r\n";
        let mut sink = Vec::new();

        let err = read_message(&mut input, &mut sink, 1024).await.unwrap_err();
        assert!(matches!(err, MailError::Io(_)));
    }
}
