//! devmail-rs: development mail capture server
//!
//! Accepts mail over SMTP, keeps every message on disk and in memory for
//! inspection, and can forward captured messages to a real SMTP server.
//!
//! # Features
//!
//! - **SMTP ingestion**: MAIL/RCPT/DATA with size and recipient limits,
//!   optional (never enforced) AUTH PLAIN/LOGIN
//! - **MIME parsing**: text and HTML bodies, attachments and inline images
//! - **Store**: raw `.eml` files plus attachment directories, reloadable on
//!   restart
//! - **Events**: bounded, non-blocking "new"/"delete" notifications
//! - **Relay**: bounded queue and worker pool with allow/deny recipient rules
//!
//! # Example
//!
//! ```no_run
//! use devmail_rs::config::Config;
//! use devmail_rs::MailServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = MailServer::new(Config::default()).await?;
//!     server.store().reload_from_directory().await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling
//! - [`smtp`]: SMTP listener and ingestion session
//! - [`mime`]: MIME parsing
//! - [`storage`]: Mail store, reload and HTML sanitizing
//! - [`events`]: Store event bus
//! - [`relay`]: Outgoing relay queue and rules
//! - [`model`]: Email, address and attachment types
//! - [`utils`]: IDs and formatting helpers

pub mod config;
pub mod error;
pub mod events;
pub mod mime;
pub mod model;
pub mod relay;
pub mod server;
pub mod smtp;
pub mod storage;
pub mod utils;

pub use error::{MailError, RelayError, Result};
pub use server::MailServer;
