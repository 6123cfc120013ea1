//! Logging setup and frame formatting helpers
//!
//! The library only emits `tracing` events. Binaries call [`init_tracing`]
//! once to install a formatter; `RUST_LOG` takes precedence over the
//! filter passed in.

use std::fmt::Write as _;

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when neither `RUST_LOG` nor an explicit filter is set
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Install a global fmt subscriber.
///
/// Returns `false` if a global subscriber was already installed, which is
/// harmless in tests that initialise logging more than once.
pub fn init_tracing(filter: Option<&str>) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter.unwrap_or(DEFAULT_LOG_FILTER)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Space separated upper-case hex, e.g. `01 03 00 00 00 0A C5 CD`.
pub fn hex_frame(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_frame() {
        assert_eq!(hex_frame(&[0x01, 0x03, 0x0A, 0xFF]), "01 03 0A FF");
        assert_eq!(hex_frame(&[]), "");
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing(Some("debug"));
        assert!(!init_tracing(Some("debug")));
    }
}
