//! SMTP AUTH decoding (PLAIN and LOGIN)

use crate::error::{MailError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// base64 "Username:"
pub const LOGIN_USERNAME_PROMPT: &str = "334 VXNlcm5hbWU6\r\n";
/// base64 "Password:"
pub const LOGIN_PASSWORD_PROMPT: &str = "334 UGFzc3dvcmQ6\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    /// RFC 4616
    Plain,
    Login,
}

impl AuthMechanism {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

/// Decode a PLAIN response into (username, password).
///
/// The payload is `authzid \0 authcid \0 password`; the authorization
/// identity is ignored.
pub fn decode_plain(data: &str) -> Result<(String, String)> {
    let decoded = BASE64
        .decode(data.trim())
        .map_err(|e| MailError::SmtpProtocol(format!("Invalid base64: {}", e)))?;

    let text = std::str::from_utf8(&decoded)
        .map_err(|e| MailError::SmtpProtocol(format!("Invalid UTF-8: {}", e)))?;

    let parts: Vec<&str> = text.split('\0').collect();
    match parts.as_slice() {
        [_, username, password] => Ok((username.to_string(), password.to_string())),
        _ => Err(MailError::SmtpProtocol("Invalid PLAIN auth format".to_string())),
    }
}

/// Decode one base64 LOGIN step.
pub fn decode_login(data: &str) -> Result<String> {
    let decoded = BASE64
        .decode(data.trim())
        .map_err(|e| MailError::SmtpProtocol(format!("Invalid base64: {}", e)))?;

    String::from_utf8(decoded).map_err(|e| MailError::SmtpProtocol(format!("Invalid UTF-8: {}", e)))
}
