//! tandem-llm error types
//!
//! Re-exports tandem-error and adds constructors for the failures this crate
//! reports.

pub use tandem_error::{Error, ErrorKind, ErrorStatus, Result};

/// Create a ConfigInvalid error for a zero batch size
pub fn zero_batch_size() -> Error {
    Error::config_invalid("flush.batch_size", "batch size must be a positive integer")
}

/// Create a ConfigInvalid error for an unknown provider name
pub fn unknown_provider(name: impl Into<String>) -> Error {
    let name = name.into();
    Error::new(ErrorKind::ConfigInvalid, format!("unknown provider '{}'", name))
        .with_context("provider", name)
}
