//! Mail storage: in-memory index over a directory of raw messages

pub mod bcc;
pub mod reload;
pub mod sanitize;
pub mod store;

pub use bcc::calculate_bcc;
pub use sanitize::{BasicSanitizer, HtmlSanitizer};
pub use store::{MailStore, RAW_EXTENSION};
