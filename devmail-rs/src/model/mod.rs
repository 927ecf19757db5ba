//! Captured email data model

pub mod address;
pub mod attachment;
pub mod email;

pub use address::EmailAddress;
pub use attachment::Attachment;
pub use email::{Email, EmailStats, Envelope, HeaderValue, MessageDraft, UNKNOWN_PEER};
