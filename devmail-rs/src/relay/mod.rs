//! Outgoing relay to an upstream SMTP server
//!
//! - [`rules`]: allow/deny recipient patterns
//! - [`client`]: single delivery attempt over SMTP
//! - [`queue`]: bounded queue and worker pool

pub mod client;
pub mod queue;
pub mod rules;

pub use client::{RelayClient, FALLBACK_SENDER};
pub use queue::{
    resolve_recipients, sender_for, RelayCallback, RelayEngine, RelayRequest, RelayTask,
};
pub use rules::{matches_rule, RecipientRules};
