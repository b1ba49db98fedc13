//! # cls-table
//!
//! Columnar event data for clscan.
//!
//! This crate provides:
//! - A cut / derived-variable expression compiler with vectorized evaluation
//! - A registry of math functions callable from expressions
//! - `ColumnTable`, a name-to-column store with selection and derivation
//! - Whitespace-delimited text import/export

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod expr;
pub mod math;
pub mod table;
pub mod text;

pub use expr::{CompiledExpr, Evaluated, normalize};
pub use math::{MathFn, MathFnPtr, MathModule};
pub use table::{Column, ColumnKind, ColumnTable, DeriveMode};
pub use text::{TableSink, TableSource, TextFormat, TextSchema, load_text, read_text, save_text, write_text};
