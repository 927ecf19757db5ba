//! SMTP ingestion (RFC 5321 subset)
//!
//! - [`server`]: accept loop, one task per connection
//! - [`connection`]: command/reply conversation, limits and AUTH
//! - [`session`]: mail transaction state and DATA ingestion
//! - [`commands`]: command line parsing
//! - [`auth`]: PLAIN and LOGIN decoding

pub mod auth;
pub mod commands;
pub mod connection;
pub mod server;
pub mod session;

pub use commands::SmtpCommand;
pub use connection::SmtpConnection;
pub use server::SmtpServer;
pub use session::{SessionState, SmtpSession};
