use super::{Attachment, EmailAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Placeholder for envelope fields that cannot be recovered from disk
pub const UNKNOWN_PEER: &str = "unknown";

/// SMTP transaction metadata, as opposed to what the headers claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub from: String,
    pub to: Vec<String>,
    pub host: String,
    pub remote_address: String,
}

impl Envelope {
    /// Best-effort envelope for a message restored from disk.
    pub fn from_headers(from: &[EmailAddress], to: &[EmailAddress]) -> Self {
        Self {
            from: from.first().map(|a| a.address.clone()).unwrap_or_default(),
            to: to.iter().map(|a| a.address.clone()).collect(),
            host: UNKNOWN_PEER.to_string(),
            remote_address: UNKNOWN_PEER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

/// Parsed content handed to the store for commit.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    /// Left unset to stamp the commit time.
    pub time: Option<DateTime<Utc>>,
    pub subject: String,
    pub from: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub text: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
    pub headers: BTreeMap<String, HeaderValue>,
}

/// A captured email.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: String,
    pub time: DateTime<Utc>,
    pub read: bool,
    pub subject: String,
    pub from: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    #[serde(rename = "calculatedBCC")]
    pub calculated_bcc: Vec<EmailAddress>,
    pub text: String,
    pub html: String,
    pub attachments: Vec<Attachment>,
    pub envelope: Envelope,
    pub source: PathBuf,
    pub size: u64,
    pub size_human: String,
    pub headers: BTreeMap<String, HeaderValue>,
}

impl Email {
    /// Email with content from `draft`. Provenance fields are left for the
    /// store to fill in on commit.
    pub fn from_draft(id: impl Into<String>, draft: MessageDraft) -> Self {
        Self {
            id: id.into(),
            time: draft.time.unwrap_or_else(Utc::now),
            read: false,
            subject: draft.subject,
            from: draft.from,
            to: draft.to,
            cc: draft.cc,
            bcc: draft.bcc,
            calculated_bcc: Vec::new(),
            text: draft.text,
            html: draft.html,
            attachments: draft.attachments,
            envelope: Envelope::default(),
            source: PathBuf::new(),
            size: 0,
            size_human: String::new(),
            headers: draft.headers,
        }
    }

    /// First `From` address, if any.
    pub fn sender(&self) -> Option<&str> {
        self.from.first().map(|a| a.address.as_str())
    }

    pub fn find_attachment(&self, generated_file_name: &str) -> Option<&Attachment> {
        self.attachments
            .iter()
            .find(|a| a.generated_file_name == generated_file_name)
    }
}

/// Aggregate counters over the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailStats {
    pub total: usize,
    pub unread: usize,
    pub read: usize,
    /// Counts keyed by `YYYY-MM-DD` in UTC
    pub by_date: BTreeMap<String, usize>,
}
