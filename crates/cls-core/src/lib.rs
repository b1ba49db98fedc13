//! # cls-core
//!
//! Core types and error handling for clscan.
//!
//! This crate provides:
//! - The error taxonomy shared by every clscan crate
//! - Result records produced by the CLs engine (`ClsResult`, `ScanPoint`)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ClsResult, ScanPoint};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
