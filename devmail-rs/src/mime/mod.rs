/// MIME message parsing
///
/// Splits a raw message into headers, text and HTML bodies, and attachment
/// parts, descending into nested multiparts.

pub mod date;
pub mod parser;
pub mod types;

pub use date::parse_date;
pub use parser::MimeParser;
pub use types::{Headers, MimePart, ParsedEmail, COMMON_HEADERS};
