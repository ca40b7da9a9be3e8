//! Process-wide logging setup shared by the batch binaries.

/// Subscriber construction (filters, output format).
pub mod tracing;

pub use crate::tracing::LogFormat;

/// Initialize structured logging with the format named by `ACADBATCH_LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    let format = std::env::var("ACADBATCH_LOG_FORMAT")
        .ok()
        .and_then(|v| LogFormat::parse(&v))
        .unwrap_or_default();
    tracing::init(format);
}
