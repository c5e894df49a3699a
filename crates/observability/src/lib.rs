//! Process-wide logging setup shared by the binaries and tests.

pub mod tracing;

pub use self::tracing::{LogFormat, init_with};

/// Initialize logging from the environment (`RUST_LOG`, `LOG_FORMAT`).
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    self::tracing::init();
}
