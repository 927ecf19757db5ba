use crate::model::{Attachment, EmailAddress, HeaderValue, MessageDraft};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Headers copied into [`crate::model::Email::headers`]
pub const COMMON_HEADERS: [&str; 17] = [
    "From",
    "To",
    "Cc",
    "Bcc",
    "Subject",
    "Date",
    "Message-ID",
    "Reply-To",
    "In-Reply-To",
    "References",
    "Content-Type",
    "Content-Transfer-Encoding",
    "MIME-Version",
    "X-Mailer",
    "X-Priority",
    "Priority",
    "Importance",
];

/// Ordered header list with case-insensitive lookup
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Common headers keyed by canonical name; repeated headers become lists.
    pub fn common(&self) -> BTreeMap<String, HeaderValue> {
        let mut map = BTreeMap::new();

        for name in COMMON_HEADERS {
            let values = self.get_all(name);
            match values.as_slice() {
                [] => {}
                [first] if first.is_empty() => {}
                [single] => {
                    map.insert(name.to_string(), HeaderValue::Single(single.to_string()));
                }
                [first, ..] if first.is_empty() => {}
                many => {
                    map.insert(
                        name.to_string(),
                        HeaderValue::Multiple(many.iter().map(|v| v.to_string()).collect()),
                    );
                }
            }
        }

        map
    }
}

/// A decoded leaf part of a message.
#[derive(Debug, Clone)]
pub struct MimePart {
    /// Lowercased media type without parameters
    pub content_type: String,
    /// Content-Type header as sent
    pub raw_content_type: Option<String>,
    /// Lowercased disposition kind (`attachment`, `inline`)
    pub disposition: Option<String>,
    /// Filename from Content-Disposition or Content-Type
    pub filename: Option<String>,
    /// Content-ID without angle brackets
    pub content_id: Option<String>,
    /// Body after transfer decoding
    pub body: Vec<u8>,
}

impl Default for MimePart {
    fn default() -> Self {
        MimePart {
            content_type: "text/plain".to_string(),
            raw_content_type: None,
            disposition: None,
            filename: None,
            content_id: None,
            body: Vec::new(),
        }
    }
}

impl MimePart {
    pub fn is_attachment_disposition(&self) -> bool {
        self.disposition.as_deref() == Some("attachment")
    }

    pub fn has_content_id(&self) -> bool {
        self.content_id.as_deref().is_some_and(|cid| !cid.is_empty())
    }

    /// Attachment metadata for this part. The raw Content-Type header stands
    /// in for a missing filename.
    pub fn to_attachment(&self) -> Attachment {
        let file_name = self
            .filename
            .clone()
            .or_else(|| self.raw_content_type.clone())
            .unwrap_or_default();

        Attachment::new(self.content_type.clone(), file_name, self.content_id.clone())
    }
}

/// Parsed email with separated parts
#[derive(Debug, Clone, Default)]
pub struct ParsedEmail {
    pub headers: Headers,
    pub subject: String,
    pub from: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    /// Date header, if it could be parsed
    pub date: Option<DateTime<Utc>>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<MimePart>,
}

impl ParsedEmail {
    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// Build the commit payload from this message and its stored attachments.
    pub fn into_draft(
        self,
        attachments: Vec<Attachment>,
        time: Option<DateTime<Utc>>,
    ) -> MessageDraft {
        MessageDraft {
            time,
            headers: self.headers.common(),
            subject: self.subject,
            from: self.from,
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            text: self.text_body.unwrap_or_default(),
            html: self.html_body.unwrap_or_default(),
            attachments,
        }
    }
}
