//! # tandem-error
//!
//! Unified error handling for tandem.
//!
//! - **ErrorKind**: what went wrong (e.g. `StreamFailed`, `ConfigInvalid`)
//! - **ErrorStatus**: whether retrying could help. Advisory only, since
//!   nothing in tandem retries on its own.
//! - **Error Context**: key-value pairs that help locate the cause
//! - **Error Source**: the wrapped underlying error, if any
//!
//! ## Usage
//!
//! ```rust
//! use tandem_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::ConfigInvalid, "batch size must be positive")
//!         .with_operation("config::validate")
//!         .with_context("batch_size", "0"))
//! }
//! ```
//!
//! ## Principles
//!
//! - Library functions return `Result<T, tandem_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, later layers only append context

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using tandem Error
pub type Result<T> = std::result::Result<T, Error>;
