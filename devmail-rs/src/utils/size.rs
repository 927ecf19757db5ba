use humansize::{format_size, BINARY};

/// Human-readable byte count using binary units.
pub fn format_bytes(bytes: u64) -> String {
    format_size(bytes, BINARY)
}
