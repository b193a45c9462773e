//! # Utility Modules
//!
//! Hex encoding/decoding for payloads and rate-limited logging helpers used by
//! the radio driver.

pub mod hex;
pub mod logging;

pub use hex::{decode_hex, encode_hex, format_hex_compact, HexError};
pub use logging::{log_packet_hex, LogThrottle};
