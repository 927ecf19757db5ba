//! Utility helpers
//!
//! - [`id`]: identifier generation and path-safety validation
//! - [`size`]: human-readable sizes

pub mod id;
pub mod size;

pub use id::{make_id, validate_file_name, validate_id};
pub use size::format_bytes;
