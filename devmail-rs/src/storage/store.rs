use crate::error::{MailError, RelayError, Result};
use crate::events::{EventBus, EventKind};
use crate::model::{Attachment, Email, EmailStats, Envelope, MessageDraft};
use crate::relay::{RelayCallback, RelayEngine};
use crate::storage::bcc::calculate_bcc;
use crate::storage::sanitize::HtmlSanitizer;
use crate::utils::{format_bytes, validate_file_name, validate_id};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Extension of raw message files
pub const RAW_EXTENSION: &str = "eml";

/// Insertion-ordered emails with an id index.
#[derive(Default)]
struct Emails {
    by_seq: BTreeMap<u64, Email>,
    index: HashMap<String, u64>,
    next_seq: u64,
}

impl Emails {
    fn get(&self, id: &str) -> Option<&Email> {
        self.index.get(id).and_then(|seq| self.by_seq.get(seq))
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Email> {
        let seq = self.index.get(id)?;
        self.by_seq.get_mut(seq)
    }

    fn insert(&mut self, email: Email) -> bool {
        if self.index.contains_key(&email.id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(email.id.clone(), seq);
        self.by_seq.insert(seq, email);
        true
    }

    fn remove(&mut self, id: &str) -> Option<Email> {
        let seq = self.index.remove(id)?;
        self.by_seq.remove(&seq)
    }

    fn clear(&mut self) {
        self.by_seq.clear();
        self.index.clear();
    }

    fn values(&self) -> impl Iterator<Item = &Email> {
        self.by_seq.values()
    }

    fn values_mut(&mut self) -> impl Iterator<Item = &mut Email> {
        self.by_seq.values_mut()
    }
}

/// In-memory index of captured emails backed by a mail directory.
///
/// Layout: `<mail_dir>/<id>.eml` holds the raw message and
/// `<mail_dir>/<id>/` its attachments.
pub struct MailStore {
    mail_dir: PathBuf,
    emails: RwLock<Emails>,
    events: EventBus,
    relay: Arc<RelayEngine>,
    sanitizer: Arc<dyn HtmlSanitizer>,
}

impl MailStore {
    /// Open the store, creating the mail directory if needed.
    pub async fn new(
        mail_dir: impl Into<PathBuf>,
        events: EventBus,
        relay: Arc<RelayEngine>,
        sanitizer: Arc<dyn HtmlSanitizer>,
    ) -> Result<Self> {
        let mail_dir = mail_dir.into();
        fs::create_dir_all(&mail_dir).await.map_err(|e| {
            MailError::Storage(format!(
                "Failed to create mail directory {}: {}",
                mail_dir.display(),
                e
            ))
        })?;

        Ok(Self {
            mail_dir,
            emails: RwLock::new(Emails::default()),
            events,
            relay,
            sanitizer,
        })
    }

    pub fn mail_dir(&self) -> &Path {
        &self.mail_dir
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn relay_engine(&self) -> &Arc<RelayEngine> {
        &self.relay
    }

    /// Where the raw message for `id` lives, whether or not it exists yet.
    pub fn message_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.mail_dir.join(format!("{}.{}", id, RAW_EXTENSION)))
    }

    /// Raw message path of a stored email.
    pub async fn raw_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.get(id).await?.source)
    }

    /// Directory holding the attachments of `id`.
    pub fn attachment_dir(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.mail_dir.join(id))
    }

    /// Register an email whose raw file is already on disk.
    ///
    /// Fills in provenance (envelope, source path, size), derives the blind
    /// copies, sanitizes the HTML body and announces the email. When
    /// auto-relay is on, a relay request is queued in the background.
    pub async fn commit(
        &self,
        id: &str,
        is_read: bool,
        envelope: Envelope,
        draft: MessageDraft,
    ) -> Result<Email> {
        let source = self.message_path(id)?;
        let metadata = fs::metadata(&source).await.map_err(|e| {
            MailError::Storage(format!("Failed to stat {}: {}", source.display(), e))
        })?;

        let mut email = Email::from_draft(id, draft);
        email.read = is_read;
        email.calculated_bcc = calculate_bcc(&envelope.to, &email.to, &email.cc);
        email.envelope = envelope;
        email.source = source;
        email.size = metadata.len();
        email.size_human = format_bytes(email.size);
        email.html = self.sanitizer.sanitize(&email.html);

        if !self.emails.write().await.insert(email.clone()) {
            return Err(MailError::Storage(format!("Duplicate email id {}", id)));
        }

        info!(
            "Stored email {} from {} ({})",
            email.id, email.envelope.from, email.size_human
        );
        self.events.emit(EventKind::New, email.clone());

        if self.relay.is_auto_relay_enabled().await {
            self.spawn_auto_relay(email.clone());
        }

        Ok(email)
    }

    fn spawn_auto_relay(&self, email: Email) {
        let relay = self.relay.clone();
        let id = email.id.clone();
        let source = email.source.clone();
        let callback: RelayCallback = Box::new(move |outcome: std::result::Result<(), RelayError>| {
            if let Err(e) = outcome {
                error!("Auto-relay of email {} failed: {}", id, e);
            }
        });

        tokio::spawn(async move {
            relay.relay(email, source, None, true, Some(callback)).await;
        });
    }

    pub async fn get(&self, id: &str) -> Result<Email> {
        self.emails
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| MailError::NotFound(id.to_string()))
    }

    /// Snapshot of every email in arrival order.
    pub async fn get_all(&self) -> Vec<Email> {
        self.emails.read().await.values().cloned().collect()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.emails.read().await.get(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.emails.read().await.by_seq.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove an email and its files. File removal is best effort.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let email = self
            .emails
            .write()
            .await
            .remove(id)
            .ok_or_else(|| MailError::NotFound(id.to_string()))?;

        if let Err(e) = fs::remove_file(&email.source).await {
            warn!("Failed to remove {}: {}", email.source.display(), e);
        }

        let dir = self.mail_dir.join(&email.id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
        }

        info!("Deleted email {}", id);
        self.events.emit(EventKind::Delete, email);
        Ok(())
    }

    /// Remove every email and wipe the mail directory's contents. File
    /// removal is best effort; the in-memory store is always cleared.
    pub async fn delete_all(&self) -> Result<()> {
        let mut emails = self.emails.write().await;

        if let Err(e) = self.wipe_mail_dir().await {
            warn!("Failed to list {}: {}", self.mail_dir.display(), e);
        }

        let count = emails.by_seq.len();
        emails.clear();
        info!("Deleted all {} emails", count);
        Ok(())
    }

    async fn wipe_mail_dir(&self) -> std::io::Result<()> {
        let mut entries = fs::read_dir(&self.mail_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let removed = match entry.file_type().await {
                Ok(kind) if kind.is_dir() => fs::remove_dir_all(&path).await,
                _ => fs::remove_file(&path).await,
            };
            if let Err(e) = removed {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
        Ok(())
    }

    pub async fn mark_read(&self, id: &str) -> Result<()> {
        let mut emails = self.emails.write().await;
        let email = emails
            .get_mut(id)
            .ok_or_else(|| MailError::NotFound(id.to_string()))?;
        email.read = true;
        Ok(())
    }

    /// Mark every email read, returning how many were unread.
    pub async fn mark_all_read(&self) -> usize {
        let mut emails = self.emails.write().await;
        let mut flipped = 0;
        for email in emails.values_mut().filter(|e| !e.read) {
            email.read = true;
            flipped += 1;
        }
        debug!("Marked {} emails read", flipped);
        flipped
    }

    pub async fn stats(&self) -> EmailStats {
        let emails = self.emails.read().await;
        let mut stats = EmailStats::default();

        for email in emails.values() {
            stats.total += 1;
            if email.read {
                stats.read += 1;
            } else {
                stats.unread += 1;
            }
            *stats
                .by_date
                .entry(email.time.format("%Y-%m-%d").to_string())
                .or_default() += 1;
        }

        stats
    }

    /// Persist an attachment's bytes under the email's directory.
    pub async fn save_attachment(
        &self,
        id: &str,
        attachment: &mut Attachment,
        data: &[u8],
    ) -> Result<()> {
        let dir = self.attachment_dir(id)?;
        fs::create_dir_all(&dir).await.map_err(|e| {
            MailError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let path = dir.join(attachment.transform());
        fs::write(&path, data).await.map_err(|e| {
            MailError::Storage(format!("Failed to write {}: {}", path.display(), e))
        })?;

        attachment.size = data.len() as u64;
        debug!(
            "Saved attachment {} ({} bytes) for {}",
            attachment.generated_file_name, attachment.size, id
        );
        Ok(())
    }

    /// Raw bytes of a stored message.
    pub async fn raw_content(&self, id: &str) -> Result<Vec<u8>> {
        let email = self.get(id).await?;
        Ok(fs::read(&email.source).await?)
    }

    /// Sanitized HTML body.
    pub async fn html(&self, id: &str) -> Result<String> {
        Ok(self.get(id).await?.html)
    }

    /// Attachment metadata and bytes by generated file name.
    pub async fn attachment(&self, id: &str, file_name: &str) -> Result<(Attachment, Vec<u8>)> {
        validate_file_name(file_name)?;
        let email = self.get(id).await?;
        let attachment = email
            .find_attachment(file_name)
            .cloned()
            .ok_or_else(|| MailError::NotFound(format!("{}/{}", id, file_name)))?;

        let data = fs::read(self.attachment_dir(id)?.join(file_name)).await?;
        Ok((attachment, data))
    }

    /// Queue a stored email for manual relay.
    pub async fn relay(
        &self,
        id: &str,
        relay_to: Option<String>,
        callback: Option<RelayCallback>,
    ) -> Result<()> {
        let email = self.get(id).await?;
        let source = email.source.clone();
        self.relay.relay(email, source, relay_to, false, callback).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventsConfig, OutgoingConfig, RelayConfig};
    use crate::model::EmailAddress;
    use crate::storage::sanitize::BasicSanitizer;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    async fn open_store(dir: &Path) -> MailStore {
        let events = EventBus::new(&EventsConfig::default());
        let relay = Arc::new(RelayEngine::new(
            OutgoingConfig::default(),
            &RelayConfig::default(),
        ));
        MailStore::new(dir, events, relay, Arc::new(BasicSanitizer::new().unwrap()))
            .await
            .unwrap()
    }

    async fn write_raw(store: &MailStore, id: &str, body: &str) {
        fs::write(store.message_path(id).unwrap(), body).await.unwrap();
    }

    fn envelope(to: &[&str]) -> Envelope {
        Envelope {
            from: "sender@x.com".to_string(),
            to: to.iter().map(|t| t.to_string()).collect(),
            host: "client.local".to_string(),
            remote_address: "127.0.0.1:5000".to_string(),
        }
    }

    #[tokio::test]
    async fn test_commit_fills_provenance() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;
        write_raw(&store, "aaaa1111", "Subject: hi\r\n\r\nbody\r\n").await;

        let draft = MessageDraft {
            to: vec![EmailAddress::new("to1@x.com")],
            cc: vec![EmailAddress::new("cc1@x.com")],
            html: "<p onclick=\"x()\">hi</p>".to_string(),
            ..Default::default()
        };
        let email = store
            .commit(
                "aaaa1111",
                false,
                envelope(&["to1@x.com", "cc1@x.com", "hidden@x.com"]),
                draft,
            )
            .await
            .unwrap();

        assert_eq!(email.size, 21);
        assert!(!email.size_human.is_empty());
        assert_eq!(email.source, tmp.path().join("aaaa1111.eml"));
        assert_eq!(email.calculated_bcc, vec![EmailAddress::new("hidden@x.com")]);
        assert_eq!(email.html, "<p>hi</p>");
        assert_eq!(email.envelope.host, "client.local");
    }

    #[tokio::test]
    async fn test_commit_requires_raw_file() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;

        let err = store
            .commit("missing1", false, envelope(&[]), MessageDraft::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MailError::Storage(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_commit_rejects_duplicate_and_bad_ids() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;
        write_raw(&store, "dup00001", "x").await;

        store
            .commit("dup00001", false, envelope(&[]), MessageDraft::default())
            .await
            .unwrap();
        assert!(store
            .commit("dup00001", false, envelope(&[]), MessageDraft::default())
            .await
            .is_err());
        assert!(matches!(
            store
                .commit("../evil", false, envelope(&[]), MessageDraft::default())
                .await,
            Err(MailError::InvalidId(_))
        ));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_all_preserves_order() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;

        for id in ["zz000001", "aa000002", "mm000003"] {
            write_raw(&store, id, "x").await;
            store
                .commit(id, false, envelope(&[]), MessageDraft::default())
                .await
                .unwrap();
        }

        let ids: Vec<String> = store.get_all().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["zz000001", "aa000002", "mm000003"]);
    }

    #[tokio::test]
    async fn test_mark_read_and_stats() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;

        let day = Utc.with_ymd_and_hms(2024, 5, 17, 12, 0, 0).unwrap();
        for (id, read) in [("r0000001", true), ("u0000001", false), ("u0000002", false)] {
            write_raw(&store, id, "x").await;
            let draft = MessageDraft {
                time: Some(day),
                ..Default::default()
            };
            store.commit(id, read, envelope(&[]), draft).await.unwrap();
        }

        let stats = store.stats().await;
        assert_eq!((stats.total, stats.read, stats.unread), (3, 1, 2));
        assert_eq!(stats.by_date.get("2024-05-17"), Some(&3));

        store.mark_read("u0000001").await.unwrap();
        assert!(store.get("u0000001").await.unwrap().read);
        assert!(matches!(
            store.mark_read("nope0000").await,
            Err(MailError::NotFound(_))
        ));

        assert_eq!(store.mark_all_read().await, 1);
        assert_eq!(store.mark_all_read().await, 0);
        assert_eq!(store.stats().await.unread, 0);
    }

    #[tokio::test]
    async fn test_attachment_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;
        write_raw(&store, "att00001", "x").await;

        let mut attachment = Attachment::new("text/plain", "notes.txt", None);
        store
            .save_attachment("att00001", &mut attachment, b"hello")
            .await
            .unwrap();
        assert_eq!(attachment.size, 5);

        let name = attachment.generated_file_name.clone();
        let draft = MessageDraft {
            attachments: vec![attachment],
            ..Default::default()
        };
        store
            .commit("att00001", false, envelope(&[]), draft)
            .await
            .unwrap();

        let (meta, data) = store.attachment("att00001", &name).await.unwrap();
        assert_eq!(meta.file_name, "notes.txt");
        assert_eq!(data, b"hello");

        assert!(matches!(
            store.attachment("att00001", "../att00001.eml").await,
            Err(MailError::InvalidId(_))
        ));
        assert!(matches!(
            store.attachment("att00001", "other.txt").await,
            Err(MailError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_all_wipes_directory() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;

        write_raw(&store, "del00001", "x").await;
        let mut attachment = Attachment::new("image/png", "a.png", None);
        store
            .save_attachment("del00001", &mut attachment, b"png")
            .await
            .unwrap();
        store
            .commit("del00001", false, envelope(&[]), MessageDraft::default())
            .await
            .unwrap();

        store.delete_all().await.unwrap();

        assert!(store.is_empty().await);
        assert!(tmp.path().exists());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_delete_all_clears_when_directory_is_gone() {
        let tmp = TempDir::new().unwrap();
        let mail_dir = tmp.path().join("mail");
        let store = open_store(&mail_dir).await;
        write_raw(&store, "lost0001", "x").await;
        store
            .commit("lost0001", false, envelope(&[]), MessageDraft::default())
            .await
            .unwrap();

        std::fs::remove_dir_all(&mail_dir).unwrap();

        store.delete_all().await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_emits_event() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;
        write_raw(&store, "evt00001", "x").await;
        store
            .commit("evt00001", false, envelope(&[]), MessageDraft::default())
            .await
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        store
            .events()
            .on(EventKind::Delete, move |email| {
                let _ = tx.send(email.id.clone());
            })
            .await;

        store.delete("evt00001").await.unwrap();

        let deleted = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(deleted.as_deref(), Some("evt00001"));
    }

    #[tokio::test]
    async fn test_raw_content_and_html() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;
        write_raw(&store, "raw00001", "Subject: raw\r\n\r\nbody").await;

        let draft = MessageDraft {
            html: "<b>x</b><script>bad()</script>".to_string(),
            ..Default::default()
        };
        store
            .commit("raw00001", false, envelope(&[]), draft)
            .await
            .unwrap();

        assert_eq!(
            store.raw_content("raw00001").await.unwrap(),
            b"Subject: raw\r\n\r\nbody"
        );
        assert_eq!(store.html("raw00001").await.unwrap(), "<b>x</b>");
        assert_eq!(
            store.raw_path("raw00001").await.unwrap(),
            tmp.path().join("raw00001.eml")
        );
    }

    #[tokio::test]
    async fn test_delete_removes_files() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(tmp.path()).await;
        write_raw(&store, "gone0001", "x").await;
        let mut attachment = Attachment::new("text/plain", "a.txt", None);
        store
            .save_attachment("gone0001", &mut attachment, b"a")
            .await
            .unwrap();
        store
            .commit("gone0001", false, envelope(&[]), MessageDraft::default())
            .await
            .unwrap();

        store.delete("gone0001").await.unwrap();

        assert!(matches!(store.get("gone0001").await, Err(MailError::NotFound(_))));
        assert!(matches!(
            store.raw_path("gone0001").await,
            Err(MailError::NotFound(_))
        ));
        assert!(!tmp.path().join("gone0001.eml").exists());
        assert!(!tmp.path().join("gone0001").exists());
        assert!(matches!(
            store.delete("gone0001").await,
            Err(MailError::NotFound(_))
        ));
    }
}
