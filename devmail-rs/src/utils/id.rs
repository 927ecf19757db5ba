use crate::error::{MailError, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of generated email identifiers
pub const ID_LENGTH: usize = 8;

/// Generate a random identifier from `[A-Za-z0-9]`.
pub fn make_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Reject identifiers that could escape the mail directory.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(MailError::InvalidId("empty id".to_string()));
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(MailError::InvalidId(id.to_string()));
    }

    Ok(())
}

/// Reject attachment file names containing path components.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(MailError::InvalidId(name.to_string()));
    }

    Ok(())
}
