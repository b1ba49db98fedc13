//! Columnar in-memory event table.

use crate::expr::{CompiledExpr, Evaluated};
use crate::math::MathModule;
use cls_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Storage kind of a column. Values are always held as `f64`; the kind only
/// drives text formatting and survives export/import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Whole numbers (counts, flags, categories).
    Integer,
    /// Floating-point values.
    Float,
}

/// A named column's payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    kind: ColumnKind,
    values: Vec<f64>,
}

impl Column {
    /// Column of the given kind.
    pub fn new(kind: ColumnKind, values: Vec<f64>) -> Self {
        Self { kind, values }
    }

    /// Float column.
    pub fn float(values: Vec<f64>) -> Self {
        Self::new(ColumnKind::Float, values)
    }

    /// Storage kind.
    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    /// Values in row order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Unwrap into the value vector.
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    fn gather(&self, indices: &[usize]) -> Column {
        Column { kind: self.kind, values: indices.iter().map(|&i| self.values[i]).collect() }
    }
}

impl From<Vec<f64>> for Column {
    fn from(values: Vec<f64>) -> Self {
        Column::float(values)
    }
}

impl From<Vec<i64>> for Column {
    fn from(values: Vec<i64>) -> Self {
        Column::new(ColumnKind::Integer, values.into_iter().map(|v| v as f64).collect())
    }
}

impl From<Vec<bool>> for Column {
    fn from(values: Vec<bool>) -> Self {
        Column::new(ColumnKind::Integer, values.into_iter().map(|b| if b { 1.0 } else { 0.0 }).collect())
    }
}

impl From<Evaluated> for Column {
    fn from(values: Evaluated) -> Self {
        match values {
            Evaluated::Numeric(v) => Column::float(v),
            Evaluated::Boolean(v) => Column::from(v),
        }
    }
}

/// What [`ColumnTable::derive`] does when the target name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeriveMode {
    /// Fail with [`Error::DuplicateColumn`].
    #[default]
    Create,
    /// Replace the existing column.
    Overwrite,
}

/// Named, equal-length numeric columns (Structure-of-Arrays).
///
/// Column order is insertion order; it only matters for export.
#[derive(Debug, Clone, Default)]
pub struct ColumnTable {
    n_rows: usize,
    names: Vec<String>,
    columns: Vec<Column>,
    index: HashMap<String, usize>,
}

impl ColumnTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(name, column)` pairs.
    pub fn from_columns<N, C>(columns: impl IntoIterator<Item = (N, C)>) -> Result<Self>
    where
        N: Into<String>,
        C: Into<Column>,
    {
        let mut table = Self::new();
        for (name, col) in columns {
            table.add(name, col)?;
        }
        Ok(table)
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// `true` when the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Column names in insertion order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// `true` if a column called `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// `(name, column)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names.iter().map(String::as_str).zip(self.columns.iter())
    }

    /// Column by name.
    pub fn column(&self, name: &str) -> Result<&Column> {
        self.index
            .get(name)
            .map(|&i| &self.columns[i])
            .ok_or_else(|| Error::UnknownVariable(name.to_string()))
    }

    /// Column values by name.
    pub fn values(&self, name: &str) -> Result<&[f64]> {
        self.column(name).map(Column::values)
    }

    fn check_length(&self, name: &str, len: usize) -> Result<()> {
        if !self.columns.is_empty() && len != self.n_rows {
            return Err(Error::LengthMismatch { name: name.to_string(), expected: self.n_rows, got: len });
        }
        Ok(())
    }

    /// Append a column.
    ///
    /// Fails with [`Error::DuplicateColumn`] if the name exists and with
    /// [`Error::LengthMismatch`] if the length differs from the table's.
    pub fn add(&mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<()> {
        let name = name.into();
        let column = column.into();
        if self.contains(&name) {
            return Err(Error::DuplicateColumn(name));
        }
        self.check_length(&name, column.len())?;
        if self.columns.is_empty() {
            self.n_rows = column.len();
        }
        self.index.insert(name.clone(), self.columns.len());
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    /// Replace a column, or append it if absent.
    pub fn set(&mut self, name: impl Into<String>, column: impl Into<Column>) -> Result<()> {
        let name = name.into();
        let column = column.into();
        match self.index.get(&name) {
            Some(&i) => {
                // A sole column may change the table height.
                if self.columns.len() > 1 {
                    self.check_length(&name, column.len())?;
                }
                self.n_rows = column.len();
                self.columns[i] = column;
                Ok(())
            }
            None => self.add(name, column),
        }
    }

    /// Remove a column and return it.
    pub fn remove(&mut self, name: &str) -> Result<Column> {
        let i = self.index.remove(name).ok_or_else(|| Error::UnknownVariable(name.to_string()))?;
        self.names.remove(i);
        let column = self.columns.remove(i);
        for (j, n) in self.names.iter().enumerate().skip(i) {
            self.index.insert(n.clone(), j);
        }
        if self.columns.is_empty() {
            self.n_rows = 0;
        }
        Ok(column)
    }

    /// Rename a column in place.
    pub fn rename(&mut self, from: &str, to: impl Into<String>) -> Result<()> {
        let to = to.into();
        if from == to {
            return self.column(from).map(|_| ());
        }
        if self.contains(&to) {
            return Err(Error::DuplicateColumn(to));
        }
        let i = self.index.remove(from).ok_or_else(|| Error::UnknownVariable(from.to_string()))?;
        self.index.insert(to.clone(), i);
        self.names[i] = to;
        Ok(())
    }

    /// Append the rows of `other` on the intersection of column names.
    ///
    /// Columns present in only one of the tables are dropped (and logged);
    /// their names are returned. A column whose kinds disagree becomes
    /// [`ColumnKind::Float`]. Merging into a table without columns adopts
    /// `other` as is.
    pub fn merge(&mut self, other: &ColumnTable) -> Vec<String> {
        if self.columns.is_empty() {
            *self = other.clone();
            return Vec::new();
        }

        let mut dropped: Vec<String> =
            self.names.iter().filter(|n| !other.contains(n)).cloned().collect();
        dropped.extend(other.names.iter().filter(|n| !self.contains(n)).cloned());
        if !dropped.is_empty() {
            log::warn!("merge: dropping non-intersecting columns {:?}", dropped);
        }

        let mut merged = ColumnTable::new();
        for (name, col) in self.iter() {
            let Ok(theirs) = other.column(name) else { continue };
            let kind = if col.kind == theirs.kind { col.kind } else { ColumnKind::Float };
            let mut values = Vec::with_capacity(col.len() + theirs.len());
            values.extend_from_slice(&col.values);
            values.extend_from_slice(&theirs.values);
            merged.index.insert(name.to_string(), merged.columns.len());
            merged.names.push(name.to_string());
            merged.columns.push(Column { kind, values });
        }
        merged.n_rows = if merged.columns.is_empty() { 0 } else { self.n_rows + other.n_rows };
        *self = merged;
        dropped
    }

    // ── Expressions ────────────────────────────────────────────

    /// Columns an expression needs, in first-occurrence order.
    pub fn required_columns(expr: &str) -> Result<Vec<String>> {
        Ok(CompiledExpr::compile(expr)?.required_columns)
    }

    /// Evaluate a compiled expression over every row.
    pub fn evaluate(&self, expr: &CompiledExpr) -> Result<Evaluated> {
        expr.evaluate(self.n_rows, |name| self.values(name).ok())
    }

    /// Compile `expr` against the standard math module and evaluate it.
    pub fn eval(&self, expr: &str) -> Result<Evaluated> {
        self.evaluate(&CompiledExpr::compile(expr)?)
    }

    /// Boolean mask of rows passing `cut`.
    pub fn cut_mask(&self, cut: &str) -> Result<Vec<bool>> {
        self.cut_mask_with(cut, MathModule::standard())
    }

    /// [`cut_mask`](Self::cut_mask) resolving function calls in `module`.
    pub fn cut_mask_with(&self, cut: &str, module: &MathModule) -> Result<Vec<bool>> {
        let compiled = CompiledExpr::compile_with(cut, module)?;
        Ok(self.evaluate(&compiled)?.into_mask())
    }

    /// Ascending row indices passing `cut`.
    pub fn cut_indices(&self, cut: &str) -> Result<Vec<usize>> {
        Ok(mask_to_indices(&self.cut_mask(cut)?))
    }

    /// Row count, optionally restricted to rows passing `cut`.
    pub fn entries(&self, cut: Option<&str>) -> Result<usize> {
        match cut {
            None => Ok(self.n_rows),
            Some(c) => Ok(self.cut_mask(c)?.into_iter().filter(|&b| b).count()),
        }
    }

    /// Values of row `i` projected on `names`.
    pub fn row(&self, i: usize, names: &[&str]) -> Result<Vec<f64>> {
        if i >= self.n_rows {
            return Err(Error::Domain(format!("row {i} out of range for {} rows", self.n_rows)));
        }
        names.iter().map(|n| self.values(n).map(|v| v[i])).collect()
    }

    fn check_mode(&self, name: &str, mode: DeriveMode) -> Result<()> {
        if mode == DeriveMode::Create && self.contains(name) {
            return Err(Error::DuplicateColumn(name.to_string()));
        }
        Ok(())
    }

    /// New column from an expression. Boolean results are stored as integer 0/1.
    pub fn derive(&mut self, name: &str, expr: &str, mode: DeriveMode) -> Result<()> {
        self.derive_compiled(name, &CompiledExpr::compile(expr)?, mode)
    }

    /// [`derive`](Self::derive) with an already compiled expression.
    pub fn derive_compiled(&mut self, name: &str, expr: &CompiledExpr, mode: DeriveMode) -> Result<()> {
        self.check_mode(name, mode)?;
        let values = self.evaluate(expr)?;
        self.set(name, Column::from(values))
    }

    /// New column from a row-wise function of the named argument columns.
    pub fn derive_with<F>(&mut self, name: &str, args: &[&str], func: F, mode: DeriveMode) -> Result<()>
    where
        F: Fn(&[f64]) -> f64,
    {
        self.check_mode(name, mode)?;
        let inputs: Vec<&[f64]> = args.iter().map(|a| self.values(a)).collect::<Result<_>>()?;
        let mut buf = vec![0.0; inputs.len()];
        let values: Vec<f64> = (0..self.n_rows)
            .map(|i| {
                for (slot, col) in buf.iter_mut().zip(&inputs) {
                    *slot = col[i];
                }
                func(&buf)
            })
            .collect();
        self.set(name, Column::float(values))
    }

    // ── Row selection ──────────────────────────────────────────

    /// Table made of the given rows, in the given order.
    pub fn take(&self, indices: &[usize]) -> Result<ColumnTable> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.n_rows) {
            return Err(Error::Domain(format!("row {bad} out of range for {} rows", self.n_rows)));
        }
        Ok(self.gather(indices, None))
    }

    /// Table made of the rows where `mask` is true.
    pub fn filter(&self, mask: &[bool]) -> Result<ColumnTable> {
        if mask.len() != self.n_rows {
            return Err(Error::LengthMismatch {
                name: "mask".to_string(),
                expected: self.n_rows,
                got: mask.len(),
            });
        }
        Ok(self.gather(&mask_to_indices(mask), None))
    }

    /// Rows passing `cut` that are also listed in `rows`, projected on `columns`.
    ///
    /// Each argument is optional; `None` means no restriction. Rows are
    /// returned in ascending order.
    pub fn subsample(
        &self,
        cut: Option<&str>,
        rows: Option<&[usize]>,
        columns: Option<&[&str]>,
    ) -> Result<ColumnTable> {
        let mut keep = match cut {
            Some(c) => self.cut_mask(c)?,
            None => vec![true; self.n_rows],
        };
        if let Some(rows) = rows {
            let listed: BTreeSet<usize> = rows.iter().copied().collect();
            if let Some(&bad) = listed.iter().next_back().filter(|&&i| i >= self.n_rows) {
                return Err(Error::Domain(format!("row {bad} out of range for {} rows", self.n_rows)));
            }
            for (i, k) in keep.iter_mut().enumerate() {
                *k = *k && listed.contains(&i);
            }
        }
        if let Some(cols) = columns {
            for c in cols {
                self.column(c)?;
            }
        }
        Ok(self.gather(&mask_to_indices(&keep), columns))
    }

    fn gather(&self, indices: &[usize], columns: Option<&[&str]>) -> ColumnTable {
        let mut out = ColumnTable::new();
        for (name, col) in self.iter() {
            if columns.is_some_and(|cs| !cs.contains(&name)) {
                continue;
            }
            out.index.insert(name.to_string(), out.columns.len());
            out.names.push(name.to_string());
            out.columns.push(col.gather(indices));
        }
        out.n_rows = if out.columns.is_empty() { 0 } else { indices.len() };
        out
    }
}

fn mask_to_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter().enumerate().filter_map(|(i, &b)| b.then_some(i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ColumnTable {
        ColumnTable::from_columns([
            ("a", Column::from(vec![1_i64, 2, 3, 4, 5])),
            ("b", Column::from(vec![10.0, 20.0, 30.0, 40.0, 50.0])),
        ])
        .unwrap()
    }

    #[test]
    fn add_checks_invariants() {
        let mut t = sample();
        assert!(matches!(t.add("a", vec![0.0; 5]), Err(Error::DuplicateColumn(n)) if n == "a"));
        assert!(matches!(
            t.add("c", vec![0.0; 4]),
            Err(Error::LengthMismatch { expected: 5, got: 4, .. })
        ));
        t.add("c", vec![0.0; 5]).unwrap();
        assert_eq!(t.n_columns(), 3);
        assert_eq!(t.names(), ["a", "b", "c"]);
    }

    #[test]
    fn unknown_column() {
        let t = sample();
        assert!(matches!(t.values("zz"), Err(Error::UnknownVariable(n)) if n == "zz"));
        assert!(matches!(t.cut_mask("zz > 1"), Err(Error::UnknownVariable(_))));
    }

    #[test]
    fn remove_and_rename_keep_index() {
        let mut t = sample();
        t.add("c", vec![7.0; 5]).unwrap();
        t.remove("a").unwrap();
        assert_eq!(t.values("c").unwrap()[0], 7.0);
        t.rename("c", "d").unwrap();
        assert!(!t.contains("c"));
        assert_eq!(t.values("d").unwrap()[4], 7.0);
        assert!(matches!(t.rename("d", "b"), Err(Error::DuplicateColumn(_))));
    }

    #[test]
    fn entries_and_row() {
        let t = sample();
        assert_eq!(t.entries(None).unwrap(), 5);
        assert_eq!(t.entries(Some("a >= 4")).unwrap(), 2);
        assert_eq!(t.row(1, &["b", "a"]).unwrap(), vec![20.0, 2.0]);
        assert!(t.row(5, &["a"]).is_err());
    }

    #[test]
    fn derive_modes() {
        let mut t = sample();
        t.derive("c", "a * 2", DeriveMode::Create).unwrap();
        assert_eq!(t.values("c").unwrap(), &[2.0, 4.0, 6.0, 8.0, 10.0]);
        assert!(matches!(t.derive("c", "a", DeriveMode::Create), Err(Error::DuplicateColumn(_))));
        t.derive("c", "a > 3", DeriveMode::Overwrite).unwrap();
        assert_eq!(t.column("c").unwrap().kind(), ColumnKind::Integer);
        assert_eq!(t.values("c").unwrap(), &[0.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn derive_with_function() {
        let mut t = sample();
        t.derive_with("ratio", &["b", "a"], |v| v[0] / v[1], DeriveMode::Create).unwrap();
        assert!(t.values("ratio").unwrap().iter().all(|&r| (r - 10.0).abs() < 1e-12));
        assert!(t.derive_with("r2", &["nope"], |v| v[0], DeriveMode::Create).is_err());
    }

    #[test]
    fn merge_intersection() {
        let mut t = sample();
        let other = ColumnTable::from_columns([
            ("a", Column::from(vec![6.5])),
            ("c", Column::from(vec![1.0])),
        ])
        .unwrap();
        let dropped = t.merge(&other);
        assert_eq!(dropped, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(t.n_rows(), 6);
        assert_eq!(t.names(), ["a"]);
        assert_eq!(t.column("a").unwrap().kind(), ColumnKind::Float);
        assert_eq!(t.values("a").unwrap()[5], 6.5);
    }

    #[test]
    fn subsample_intersects_cut_and_rows() {
        let t = sample();
        let s = t.subsample(Some("a > 1"), Some(&[4, 0, 2, 2]), Some(&["b"])).unwrap();
        assert_eq!(s.names(), ["b"]);
        assert_eq!(s.values("b").unwrap(), &[30.0, 50.0]);
        assert!(t.subsample(None, Some(&[9]), None).is_err());
        assert!(t.subsample(None, None, Some(&["nope"])).is_err());
    }

    #[test]
    fn take_and_filter() {
        let t = sample();
        let taken = t.take(&[3, 1]).unwrap();
        assert_eq!(taken.values("a").unwrap(), &[4.0, 2.0]);
        let filtered = t.filter(&[true, false, false, false, true]).unwrap();
        assert_eq!(filtered.values("b").unwrap(), &[10.0, 50.0]);
        assert!(t.filter(&[true]).is_err());
    }
}
