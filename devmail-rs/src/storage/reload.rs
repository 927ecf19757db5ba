//! Rebuild the store from raw files left in the mail directory.

use crate::error::{MailError, Result};
use crate::mime::MimeParser;
use crate::model::Envelope;
use crate::storage::store::{MailStore, RAW_EXTENSION};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

impl MailStore {
    /// Load every `<id>.eml` not yet in memory, oldest file name first.
    ///
    /// Reloaded emails are marked read. Attachments are re-linked from the
    /// files already on disk; unparseable messages are skipped.
    pub async fn reload_from_directory(&self) -> Result<usize> {
        let mut entries = fs::read_dir(self.mail_dir()).await.map_err(|e| {
            MailError::Storage(format!(
                "Failed to read {}: {}",
                self.mail_dir().display(),
                e
            ))
        })?;

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RAW_EXTENSION) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(id.to_string());
            }
        }
        ids.sort();

        let mut loaded = 0;
        for id in ids {
            if self.contains(&id).await {
                continue;
            }
            match self.reload_one(&id).await {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Skipping {}.{}: {}", id, RAW_EXTENSION, e),
            }
        }

        info!(
            "Reloaded {} email(s) from {}",
            loaded,
            self.mail_dir().display()
        );
        Ok(loaded)
    }

    async fn reload_one(&self, id: &str) -> Result<()> {
        let raw = fs::read(self.message_path(id)?).await?;
        let mut parsed = MimeParser::parse(&raw)?;
        let dir = self.attachment_dir(id)?;

        let mut attachments = Vec::new();
        for part in std::mem::take(&mut parsed.attachments) {
            let mut attachment = part.to_attachment();
            let path = dir.join(attachment.transform());
            match file_size(&path).await {
                Some(size) => {
                    attachment.size = size;
                    attachments.push(attachment);
                }
                None => debug!("Attachment {} of {} not on disk", path.display(), id),
            }
        }

        let envelope = Envelope::from_headers(&parsed.from, &parsed.to);
        let time = parsed.date;
        let draft = parsed.into_draft(attachments, time);
        self.commit(id, true, envelope, draft).await?;
        Ok(())
    }
}

async fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

#[cfg(test)]
mod tests {
    use crate::config::{EventsConfig, OutgoingConfig, RelayConfig};
    use crate::events::EventBus;
    use crate::model::Attachment;
    use crate::relay::RelayEngine;
    use crate::storage::{BasicSanitizer, MailStore};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn open_store(dir: &Path) -> MailStore {
        let relay = Arc::new(RelayEngine::new(
            OutgoingConfig::default(),
            &RelayConfig::default(),
        ));
        MailStore::new(
            dir,
            EventBus::new(&EventsConfig::default()),
            relay,
            Arc::new(BasicSanitizer::new().unwrap()),
        )
        .await
        .unwrap()
    }

    const WITH_INLINE: &str = "From: Alice <alice@x.com>\r\n\
To: bob@x.com\r\n\
Subject: Logo\r\n\
Date: Fri, 17 May 2024 10:00:00 +0000\r\n\
Content-Type: multipart/related; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/html\r\n\
\r\n\
<img src=\"cid:logo\">\r\n\
--b1\r\n\
Content-Type: image/png\r\n\
Content-ID: <logo>\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
aGVsbG8=\r\n\
--b1--\r\n";

    #[tokio::test]
    async fn test_reload_restores_emails_and_inline_attachments() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("aaaa0001.eml"), WITH_INLINE).unwrap();
        std::fs::write(
            tmp.path().join("aaaa0002.eml"),
            "From: c@x.com\r\nTo: d@x.com\r\nSubject: Plain\r\n\r\nhello\r\n",
        )
        .unwrap();

        let mut logo = Attachment::new("image/png", "image/png", Some("logo".to_string()));
        let logo_name = logo.transform().to_string();
        std::fs::create_dir_all(tmp.path().join("aaaa0001")).unwrap();
        std::fs::write(tmp.path().join("aaaa0001").join(&logo_name), b"hello").unwrap();

        let store = open_store(tmp.path()).await;
        assert_eq!(store.reload_from_directory().await.unwrap(), 2);

        let email = store.get("aaaa0001").await.unwrap();
        assert!(email.read);
        assert_eq!(email.subject, "Logo");
        assert_eq!(email.envelope.from, "alice@x.com");
        assert_eq!(email.envelope.to, vec!["bob@x.com"]);
        assert_eq!(email.time.format("%Y-%m-%d").to_string(), "2024-05-17");
        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].generated_file_name, logo_name);
        assert_eq!(email.attachments[0].size, 5);

        let ids: Vec<String> = store.get_all().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["aaaa0001", "aaaa0002"]);
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("bbbb0001.eml"),
            "Subject: once\r\n\r\nbody\r\n",
        )
        .unwrap();

        let store = open_store(tmp.path()).await;
        assert_eq!(store.reload_from_directory().await.unwrap(), 1);
        assert_eq!(store.reload_from_directory().await.unwrap(), 0);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_reload_skips_bad_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bad00001.eml"), "").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "not mail").unwrap();
        std::fs::write(tmp.path().join("good0001.eml"), "Subject: ok\r\n\r\nx\r\n").unwrap();

        let store = open_store(tmp.path()).await;
        assert_eq!(store.reload_from_directory().await.unwrap(), 1);
        assert!(store.contains("good0001").await);
        assert!(!store.contains("bad00001").await);
    }
}
