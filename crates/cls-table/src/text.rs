//! Whitespace-delimited text import/export and the tabular source/sink seams.
//!
//! Layout: one row per line, columns separated by whitespace, `#` comment
//! lines and blank lines ignored. If every token on the first line is
//! non-numeric the line is a header of column names; otherwise a
//! [`TextSchema`] must say which columns to read and how to name them.

use crate::table::{Column, ColumnKind, ColumnTable};
use cls_core::{Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Explicit column selection for text files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSchema {
    /// Zero-based column positions in the file.
    pub indices: Vec<usize>,
    /// Names given to the selected columns.
    pub names: Vec<String>,
}

impl TextSchema {
    /// Pair column positions with names; both lists must have equal length.
    pub fn new<S: Into<String>>(indices: Vec<usize>, names: impl IntoIterator<Item = S>) -> Result<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if indices.len() != names.len() {
            return Err(Error::dimension("text schema names", indices.len(), names.len()));
        }
        Ok(Self { indices, names })
    }
}

/// Source of tables addressed as `(file, tree, variables)`.
///
/// An empty `variables` list loads every column.
pub trait TableSource {
    /// Load `variables` from the table at `tree` inside `path`.
    fn load(&self, path: &Path, tree: &str, variables: &[&str]) -> Result<ColumnTable>;
}

/// Sink accepting whole tables.
pub trait TableSink {
    /// Store `table` under `tree` inside `path`.
    fn save(&self, table: &ColumnTable, path: &Path, tree: &str) -> Result<()>;
}

/// The whitespace-delimited text format. Text files hold a single table, so
/// the tree path is ignored.
#[derive(Debug, Clone, Default)]
pub struct TextFormat {
    /// Column selection for header-less files.
    pub schema: Option<TextSchema>,
}

impl TableSource for TextFormat {
    fn load(&self, path: &Path, _tree: &str, variables: &[&str]) -> Result<ColumnTable> {
        let table = load_text(path, self.schema.as_ref())?;
        if variables.is_empty() {
            return Ok(table);
        }
        table.subsample(None, None, Some(variables))
    }
}

impl TableSink for TextFormat {
    fn save(&self, table: &ColumnTable, path: &Path, _tree: &str) -> Result<()> {
        save_text(table, path)
    }
}

/// Numbers need a digit, so `inf` or `nan` in a header stay column names.
fn is_numeric(token: &str) -> bool {
    token.bytes().any(|b| b.is_ascii_digit()) && token.parse::<f64>().is_ok()
}

/// Checked value of an integer-kind cell; `line` is the output line.
fn integer_cell(name: &str, v: f64, line: usize) -> Result<i64> {
    // 2^63 is exactly representable; everything below it fits in i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if v.is_finite() && v.fract() == 0.0 && (-LIMIT..LIMIT).contains(&v) {
        return Ok(v as i64);
    }
    Err(Error::Format { line, message: format!("column '{name}': {v} is not representable as an integer") })
}

/// Per-column accumulation state while reading.
struct Builder {
    kind: ColumnKind,
    values: Vec<f64>,
    promoted: bool,
}

impl Builder {
    fn push(&mut self, name: &str, token: &str, line: usize) -> Result<()> {
        if self.values.is_empty() && !self.promoted {
            // First row decides the kind.
            if let Ok(v) = token.parse::<i64>() {
                self.kind = ColumnKind::Integer;
                self.values.push(v as f64);
                return Ok(());
            }
            self.kind = ColumnKind::Float;
        }
        if self.kind == ColumnKind::Integer {
            if let Ok(v) = token.parse::<i64>() {
                self.values.push(v as f64);
                return Ok(());
            }
            log::warn!("column '{name}': non-integer value '{token}' at line {line}, promoting to float");
            self.kind = ColumnKind::Float;
            self.promoted = true;
        }
        let v = token.parse::<f64>().map_err(|_| Error::Format {
            line,
            message: format!("column '{name}': invalid number '{token}'"),
        })?;
        self.values.push(v);
        Ok(())
    }
}

/// Read a table from text.
///
/// `schema` selects and names columns; it is required when the file has no
/// header and optional otherwise (header names are then replaced).
pub fn read_text<R: BufRead>(reader: R, schema: Option<&TextSchema>) -> Result<ColumnTable> {
    let mut rows = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        rows.push((i + 1, line));
    }

    let Some((first_line, first)) = rows.first() else {
        let mut empty = ColumnTable::new();
        if let Some(s) = schema {
            for name in &s.names {
                empty.add(name.clone(), Column::float(Vec::new()))?;
            }
        }
        return Ok(empty);
    };

    let first_tokens: Vec<&str> = first.split_whitespace().collect();
    let has_header = first_tokens.iter().all(|t| !is_numeric(t));
    let width = first_tokens.len();

    let (indices, names): (Vec<usize>, Vec<String>) = match (schema, has_header) {
        (Some(s), _) => (s.indices.clone(), s.names.clone()),
        (None, true) => ((0..width).collect(), first_tokens.iter().map(|t| t.to_string()).collect()),
        (None, false) => {
            return Err(Error::Format {
                line: *first_line,
                message: "no header line; a column schema is required".into(),
            });
        }
    };
    if indices.len() != names.len() {
        return Err(Error::dimension("text schema names", indices.len(), names.len()));
    }
    if let Some(&bad) = indices.iter().find(|&&i| i >= width) {
        return Err(Error::Format {
            line: *first_line,
            message: format!("column index {bad} out of range for {width} columns"),
        });
    }

    let mut builders: Vec<Builder> = indices
        .iter()
        .map(|_| Builder { kind: ColumnKind::Float, values: Vec::new(), promoted: false })
        .collect();
    let data = if has_header { &rows[1..] } else { &rows[..] };
    for (line_no, line) in data {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != width {
            return Err(Error::Format {
                line: *line_no,
                message: format!("expected {width} columns, found {}", tokens.len()),
            });
        }
        for ((builder, &idx), name) in builders.iter_mut().zip(&indices).zip(&names) {
            builder.push(name, tokens[idx], *line_no)?;
        }
    }

    let mut table = ColumnTable::new();
    for (builder, name) in builders.into_iter().zip(names) {
        table.add(name, Column::new(builder.kind, builder.values))?;
    }
    Ok(table)
}

/// Write a table as text with a header line.
///
/// Integer columns are written as integers, float columns with the shortest
/// representation that reads back to the same value and keeps a `.` or
/// exponent, so a re-import recovers the kind.
pub fn write_text<W: Write>(table: &ColumnTable, mut writer: W) -> Result<()> {
    writeln!(writer, "{}", table.names().join(" "))?;
    let columns: Vec<(&str, &Column)> = table.iter().collect();
    let mut line = String::new();
    for i in 0..table.n_rows() {
        line.clear();
        for (j, (name, col)) in columns.iter().enumerate() {
            if j > 0 {
                line.push(' ');
            }
            let v = col.values()[i];
            match col.kind() {
                ColumnKind::Integer => line.push_str(&integer_cell(name, v, i + 2)?.to_string()),
                ColumnKind::Float => line.push_str(&format!("{v:?}")),
            }
        }
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a text file.
pub fn load_text(path: &Path, schema: Option<&TextSchema>) -> Result<ColumnTable> {
    let table = read_text(BufReader::new(File::open(path)?), schema)?;
    log::debug!("loaded {} rows x {} columns from {}", table.n_rows(), table.n_columns(), path.display());
    Ok(table)
}

/// Write a text file.
pub fn save_text(table: &ColumnTable, path: &Path) -> Result<()> {
    write_text(table, BufWriter::new(File::create(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_detection_and_kinds() {
        let src = "# comment\nn pt\n1 2.5\n\n2 3.0\n";
        let t = read_text(Cursor::new(src), None).unwrap();
        assert_eq!(t.names(), ["n", "pt"]);
        assert_eq!(t.column("n").unwrap().kind(), ColumnKind::Integer);
        assert_eq!(t.column("pt").unwrap().kind(), ColumnKind::Float);
        assert_eq!(t.values("pt").unwrap(), &[2.5, 3.0]);
    }

    #[test]
    fn headerless_requires_schema() {
        let src = "1 2 3\n4 5 6\n";
        assert!(matches!(read_text(Cursor::new(src), None), Err(Error::Format { line: 1, .. })));
        let schema = TextSchema::new(vec![2, 0], ["z", "x"]).unwrap();
        let t = read_text(Cursor::new(src), Some(&schema)).unwrap();
        assert_eq!(t.names(), ["z", "x"]);
        assert_eq!(t.values("z").unwrap(), &[3.0, 6.0]);
    }

    #[test]
    fn schema_length_mismatch() {
        assert!(matches!(
            TextSchema::new(vec![0, 1], ["a"]),
            Err(Error::DimensionMismatch { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn ragged_rows_fail() {
        let src = "a b\n1 2\n3\n";
        assert!(matches!(read_text(Cursor::new(src), None), Err(Error::Format { line: 3, .. })));
    }

    #[test]
    fn integer_column_promotes() {
        let src = "k\n1\n2\n2.5\n";
        let t = read_text(Cursor::new(src), None).unwrap();
        assert_eq!(t.column("k").unwrap().kind(), ColumnKind::Float);
        assert_eq!(t.values("k").unwrap(), &[1.0, 2.0, 2.5]);
    }

    #[test]
    fn write_keeps_kinds() {
        let t = ColumnTable::from_columns([
            ("n", Column::from(vec![3_i64, -1])),
            ("x", Column::from(vec![1.0, 0.1])),
        ])
        .unwrap();
        let mut buf = Vec::new();
        write_text(&t, &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "n x\n3 1.0\n-1 0.1\n");
    }

    #[test]
    fn non_finite_header_tokens_are_names() {
        let src = "inf nan x\n1 2 3\n";
        let t = read_text(Cursor::new(src), None).unwrap();
        assert_eq!(t.names(), ["inf", "nan", "x"]);
        assert_eq!(t.n_rows(), 1);

        // Non-finite data values still read as floats.
        let t = read_text(Cursor::new("a b\n1 nan\n2 inf\n"), None).unwrap();
        assert_eq!(t.column("b").unwrap().kind(), ColumnKind::Float);
        assert!(t.values("b").unwrap()[0].is_nan());
        assert_eq!(t.values("b").unwrap()[1], f64::INFINITY);
    }

    #[test]
    fn unrepresentable_integers_fail_to_write() {
        for bad in [2.5, f64::NAN, f64::INFINITY, 1e19] {
            let t = ColumnTable::from_columns([("k", Column::new(ColumnKind::Integer, vec![1.0, bad]))]).unwrap();
            let mut buf = Vec::new();
            let err = write_text(&t, &mut buf).unwrap_err();
            assert!(matches!(err, Error::Format { line: 3, .. }), "{bad}: {err}");
        }
    }
}
