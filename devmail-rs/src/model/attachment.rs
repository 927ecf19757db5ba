use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of hex characters kept from the digest for generated names
const GENERATED_NAME_LEN: usize = 32;

const FALLBACK_EXTENSION: &str = ".bin";

/// Longest filename extension carried over into generated names
const MAX_EXTENSION_LEN: usize = 16;

static NAME_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Attachment metadata. The bytes live on disk under
/// `<mail_dir>/<email id>/<generated_file_name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub content_type: String,
    pub file_name: String,
    pub generated_file_name: String,
    pub content_id: Option<String>,
    pub size: u64,
    #[serde(skip)]
    transformed: bool,
}

impl Attachment {
    pub fn new(
        content_type: impl Into<String>,
        file_name: impl Into<String>,
        content_id: Option<String>,
    ) -> Self {
        Self {
            content_type: content_type.into(),
            file_name: file_name.into(),
            generated_file_name: String::new(),
            content_id: content_id.filter(|cid| !cid.is_empty()),
            size: 0,
            transformed: false,
        }
    }

    pub fn is_transformed(&self) -> bool {
        self.transformed
    }

    /// Assign the on-disk name. Only the first call has an effect.
    ///
    /// Attachments with a Content-ID get a name derived from it alone, so
    /// the same name is recomputed when a message is reloaded from disk.
    /// Others hash the original name with a timestamp and are unique per call.
    pub fn transform(&mut self) -> &str {
        if !self.transformed {
            let seed = match &self.content_id {
                Some(cid) => cid.clone(),
                None => format!(
                    "{}{}{}",
                    self.file_name,
                    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
                    NAME_SEQUENCE.fetch_add(1, Ordering::Relaxed)
                ),
            };

            let digest = hex(&Sha256::digest(seed.as_bytes()));
            self.generated_file_name = format!(
                "{}{}",
                &digest[..GENERATED_NAME_LEN],
                self.extension()
            );
            self.transformed = true;
        }

        &self.generated_file_name
    }

    fn extension(&self) -> String {
        if let Some(ext) = Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| is_safe_extension(e))
        {
            return format!(".{}", ext);
        }

        extension_for_content_type(&self.content_type)
            .unwrap_or(FALLBACK_EXTENSION)
            .to_string()
    }
}

fn is_safe_extension(ext: &str) -> bool {
    !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    let ext = match media_type.as_str() {
        "image/png" => ".png",
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/svg+xml" => ".svg",
        "image/bmp" => ".bmp",
        "text/plain" => ".txt",
        "text/html" => ".html",
        "text/css" => ".css",
        "text/csv" => ".csv",
        "text/calendar" => ".ics",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "application/json" => ".json",
        "application/xml" | "text/xml" => ".xml",
        "application/gzip" => ".gz",
        "application/msword" => ".doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "application/vnd.ms-excel" => ".xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ".xlsx",
        "message/rfc822" => ".eml",
        _ => return None,
    };

    Some(ext)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
