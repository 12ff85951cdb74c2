//! Shared helpers: errors, logging and file-name handling.

pub mod errors;
pub mod logger;
pub mod paths;

pub use errors::{Error, ErrorKind, Result, ResultExt};
pub use paths::{normalize, slug};
