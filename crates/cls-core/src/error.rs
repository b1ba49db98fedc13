//! Error types for clscan

use thiserror::Error;

/// clscan error type
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed expression.
    #[error("parse error in '{expr}': {message}")]
    Parse {
        /// Expression text as given by the caller.
        expr: String,
        /// What went wrong.
        message: String,
    },

    /// Malformed numeric literal inside an expression.
    #[error("invalid floating-point literal: '{literal}'")]
    FloatingParse {
        /// The offending literal text.
        literal: String,
    },

    /// Expression refers to a column the table does not have.
    #[error("unknown variable: '{0}'")]
    UnknownVariable(String),

    /// Expression calls a function that is neither builtin nor in the math module.
    #[error("unknown function: '{0}'")]
    UnknownFunction(String),

    /// Column name already present in the table.
    #[error("duplicate column: '{0}'")]
    DuplicateColumn(String),

    /// Column length disagrees with the table's row count.
    #[error("length mismatch for column '{name}': expected {expected}, got {got}")]
    LengthMismatch {
        /// Column name.
        name: String,
        /// Row count of the table.
        expected: usize,
        /// Length of the offending column.
        got: usize,
    },

    /// Quantile or tail probability requested before any generation.
    #[error("empty test-statistic cache for hypothesis '{0}'")]
    EmptyCache(String),

    /// Vectors that must share a dimension do not.
    #[error("dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Which quantity was checked.
        what: String,
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        got: usize,
    },

    /// Argument outside of its mathematical domain.
    #[error("domain error: {0}")]
    Domain(String),

    /// Malformed text table.
    #[error("format error at line {line}: {message}")]
    Format {
        /// 1-based line number in the input.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for [`Error::Parse`].
    pub fn parse(expr: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Parse { expr: expr.into(), message: message.into() }
    }

    /// Shorthand for [`Error::DimensionMismatch`].
    pub fn dimension(what: impl Into<String>, expected: usize, got: usize) -> Self {
        Error::DimensionMismatch { what: what.into(), expected, got }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
