//! Expression engine for evaluating cuts and derived variables from string
//! expressions over table columns.
//!
//! Supports arithmetic (+, -, *, /), comparisons (==, !=, <, <=, >, >=,
//! chainable as in `0 < x < 1`), boolean operators (`and`, `or`, `not`,
//! `xor` / `^`), builtins (`min`, `max`, `true`, `false`, `pi`) and calls
//! into a [`MathModule`].
//!
//! C-style `&&`, `||` and `!` are rewritten to their worded forms by
//! [`normalize`] before tokenization, and the bareword `abs` becomes `fabs`.

use crate::math::{MathFnPtr, MathModule, leaf_name};
use cls_core::{Error, Result};
use std::borrow::Cow;

/// Placeholder that shields `!=` while `!` is rewritten to `not`.
const NE_SENTINEL: &str = "\u{1}ne\u{1}";

// ── AST ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Bool(bool),
    Var(usize), // index into required_columns
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        }
    }

    fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Xor)
    }

    fn is_relational(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }
}

#[derive(Debug, Clone)]
enum Func {
    Min,
    Max,
    Math { name: String, func: MathFnPtr },
}

// ── Evaluation result ──────────────────────────────────────────

/// Column produced by evaluating an expression over a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluated {
    /// Arithmetic expression.
    Numeric(Vec<f64>),
    /// Relational or logical expression.
    Boolean(Vec<bool>),
}

impl Evaluated {
    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Evaluated::Numeric(v) => v.len(),
            Evaluated::Boolean(v) => v.len(),
        }
    }

    /// `true` when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` for relational/logical results.
    pub fn is_boolean(&self) -> bool {
        matches!(self, Evaluated::Boolean(_))
    }

    /// Boolean view; numbers are true when non-zero.
    pub fn into_mask(self) -> Vec<bool> {
        match self {
            Evaluated::Numeric(v) => v.into_iter().map(truthy).collect(),
            Evaluated::Boolean(v) => v,
        }
    }

    /// Numeric view; booleans become 1.0 / 0.0.
    pub fn into_values(self) -> Vec<f64> {
        match self {
            Evaluated::Numeric(v) => v,
            Evaluated::Boolean(v) => v.into_iter().map(bool_value).collect(),
        }
    }
}

#[inline]
fn truthy(x: f64) -> bool {
    x != 0.0
}

#[inline]
fn bool_value(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

// ── Compiled expression ────────────────────────────────────────

/// A compiled expression ready for evaluation.
///
/// Free identifiers in the expression are column names.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    source: String,
    normalized: String,
    namespace: String,
    ast: Expr,
    /// Column names referenced by this expression (ordered by first occurrence).
    pub required_columns: Vec<String>,
}

impl CompiledExpr {
    /// Parse and compile an expression against the standard math module.
    pub fn compile(input: &str) -> Result<Self> {
        Self::compile_with(input, MathModule::standard())
    }

    /// Parse and compile an expression, resolving calls in `module`.
    pub fn compile_with(input: &str, module: &MathModule) -> Result<Self> {
        let normalized = normalize(input);
        let tokens = tokenize(input, &normalized)?;
        let mut parser = Parser::new(input, &tokens, module);
        let ast = parser.parse_or()?;
        if let Some(t) = parser.peek() {
            return Err(Error::parse(
                input,
                format!("unexpected token {:?} at offset {}", t.kind, t.offset),
            ));
        }
        let columns = std::mem::take(&mut parser.columns);
        Ok(CompiledExpr {
            source: input.to_string(),
            normalized,
            namespace: module.namespace().to_string(),
            ast,
            required_columns: columns,
        })
    }

    /// Expression text as given.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expression text after operator normalization.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// `true` if the expression yields a boolean column.
    pub fn is_boolean(&self) -> bool {
        is_boolean(&self.ast)
    }

    /// Free variables, longest first (ties broken by name).
    ///
    /// The ordering guarantees that substituting names in sequence never
    /// rewrites a shorter name that is a substring of a longer one.
    pub fn free_variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self.required_columns.iter().map(String::as_str).collect();
        vars.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        vars
    }

    /// Canonical, fully parenthesized text with math calls namespaced
    /// (`math::sqrt(x)`).
    pub fn rewritten(&self) -> String {
        let mut out = String::new();
        render(&self.ast, &self.required_columns, &self.namespace, &mut out);
        out
    }

    /// Evaluate the expression for a single row.
    ///
    /// `values` must have the same length and order as `required_columns`.
    /// Booleans are returned as 1.0 / 0.0.
    pub fn eval_row(&self, values: &[f64]) -> f64 {
        eval_row(&self.ast, values)
    }

    /// Evaluate column-wise over `n_rows` rows.
    ///
    /// `columns` must have the same length and order as `required_columns`;
    /// each column must hold `n_rows` entries. Constant expressions are
    /// broadcast to `n_rows`.
    pub fn eval_columns(&self, columns: &[&[f64]], n_rows: usize) -> Evaluated {
        match eval_lane(&self.ast, columns, n_rows) {
            Lane::Scalar(x) => Evaluated::Numeric(vec![x; n_rows]),
            Lane::Flag(b) => Evaluated::Boolean(vec![b; n_rows]),
            Lane::Column(c) => Evaluated::Numeric(c.into_owned()),
            Lane::Mask(m) => Evaluated::Boolean(m),
        }
    }

    /// Evaluate over `n_rows` rows, resolving each required column through `lookup`.
    ///
    /// Fails with [`Error::UnknownVariable`] when `lookup` does not know a
    /// column and with [`Error::LengthMismatch`] when a column is not `n_rows` long.
    pub fn evaluate<'t, F>(&self, n_rows: usize, lookup: F) -> Result<Evaluated>
    where
        F: Fn(&str) -> Option<&'t [f64]>,
    {
        let mut columns: Vec<&'t [f64]> = Vec::with_capacity(self.required_columns.len());
        for name in &self.required_columns {
            let col = lookup(name).ok_or_else(|| Error::UnknownVariable(name.clone()))?;
            if col.len() != n_rows {
                return Err(Error::LengthMismatch {
                    name: name.clone(),
                    expected: n_rows,
                    got: col.len(),
                });
            }
            columns.push(col);
        }
        Ok(self.eval_columns(&columns, n_rows))
    }
}

/// Rewrite C-style logical operators into worded ones and `abs` into `fabs`.
///
/// `!=` is preserved through a sentinel so that `!` can be rewritten to `not`.
pub fn normalize(input: &str) -> String {
    let staged = input
        .replace("!=", NE_SENTINEL)
        .replace("&&", " and ")
        .replace("||", " or ")
        .replace('!', " not ")
        .replace(NE_SENTINEL, "!=");
    rename_bareword(&staged, "abs", "fabs")
}

fn rename_bareword(input: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(input.len() + 1);
    let mut word = String::new();
    for c in input.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
            continue;
        }
        flush_word(&mut out, &mut word, from, to);
        out.push(c);
    }
    flush_word(&mut out, &mut word, from, to);
    out
}

fn flush_word(out: &mut String, word: &mut String, from: &str, to: &str) {
    out.push_str(if word.as_str() == from { to } else { word.as_str() });
    word.clear();
}

fn is_boolean(e: &Expr) -> bool {
    match e {
        Expr::Bool(_) | Expr::Not(_) => true,
        Expr::Binary(op, _, _) => op.is_logical() || op.is_relational(),
        _ => false,
    }
}

fn render(e: &Expr, names: &[String], namespace: &str, out: &mut String) {
    match e {
        Expr::Number(x) => out.push_str(&format!("{x:?}")),
        Expr::Bool(b) => out.push_str(if *b { "True" } else { "False" }),
        Expr::Var(i) => out.push_str(&names[*i]),
        Expr::Neg(a) => {
            out.push_str("(-");
            render(a, names, namespace, out);
            out.push(')');
        }
        Expr::Not(a) => {
            out.push_str("(not ");
            render(a, names, namespace, out);
            out.push(')');
        }
        Expr::Binary(op, a, b) => {
            out.push('(');
            render(a, names, namespace, out);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            render(b, names, namespace, out);
            out.push(')');
        }
        Expr::Call(f, args) => {
            match f {
                Func::Min => out.push_str("min"),
                Func::Max => out.push_str("max"),
                Func::Math { name, .. } => out.push_str(&format!("{namespace}::{name}")),
            }
            out.push('(');
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render(a, names, namespace, out);
            }
            out.push(')');
        }
    }
}

// ── Row evaluation ─────────────────────────────────────────────

fn eval_row(e: &Expr, vals: &[f64]) -> f64 {
    match e {
        Expr::Number(n) => *n,
        Expr::Bool(b) => bool_value(*b),
        Expr::Var(i) => vals[*i],
        Expr::Neg(a) => -eval_row(a, vals),
        Expr::Not(a) => bool_value(!truthy(eval_row(a, vals))),
        Expr::Binary(op, a, b) => {
            let lhs = eval_row(a, vals);
            match op {
                BinOp::And if !truthy(lhs) => 0.0,
                BinOp::Or if truthy(lhs) => 1.0,
                _ => apply_binary(*op, lhs, eval_row(b, vals)),
            }
        }
        Expr::Call(f, args) => {
            let values: Vec<f64> = args.iter().map(|a| eval_row(a, vals)).collect();
            apply_func(f, &values)
        }
    }
}

fn apply_binary(op: BinOp, lhs: f64, rhs: f64) -> f64 {
    match op {
        BinOp::Add => lhs + rhs,
        BinOp::Sub => lhs - rhs,
        BinOp::Mul => lhs * rhs,
        BinOp::Div => lhs / rhs,
        BinOp::Eq => bool_value(lhs == rhs),
        BinOp::Ne => bool_value(lhs != rhs),
        BinOp::Lt => bool_value(lhs < rhs),
        BinOp::Le => bool_value(lhs <= rhs),
        BinOp::Gt => bool_value(lhs > rhs),
        BinOp::Ge => bool_value(lhs >= rhs),
        BinOp::And => bool_value(truthy(lhs) && truthy(rhs)),
        BinOp::Or => bool_value(truthy(lhs) || truthy(rhs)),
        BinOp::Xor => bool_value(truthy(lhs) ^ truthy(rhs)),
    }
}

fn apply_func(f: &Func, args: &[f64]) -> f64 {
    match f {
        Func::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
        Func::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Func::Math { func, .. } => func(args),
    }
}

// ── Column-wise evaluation ─────────────────────────────────────

/// Intermediate value of the column-wise evaluator: either a broadcastable
/// scalar or a full column, numeric or boolean.
enum Lane<'a> {
    Scalar(f64),
    Flag(bool),
    Column(Cow<'a, [f64]>),
    Mask(Vec<bool>),
}

impl Lane<'_> {
    fn is_scalar(&self) -> bool {
        matches!(self, Lane::Scalar(_) | Lane::Flag(_))
    }

    #[inline]
    fn num(&self, i: usize) -> f64 {
        match self {
            Lane::Scalar(x) => *x,
            Lane::Flag(b) => bool_value(*b),
            Lane::Column(c) => c[i],
            Lane::Mask(m) => bool_value(m[i]),
        }
    }

    #[inline]
    fn truth(&self, i: usize) -> bool {
        match self {
            Lane::Scalar(x) => truthy(*x),
            Lane::Flag(b) => *b,
            Lane::Column(c) => truthy(c[i]),
            Lane::Mask(m) => m[i],
        }
    }
}

fn eval_lane<'a>(e: &Expr, cols: &[&'a [f64]], n: usize) -> Lane<'a> {
    match e {
        Expr::Number(x) => Lane::Scalar(*x),
        Expr::Bool(b) => Lane::Flag(*b),
        Expr::Var(i) => Lane::Column(Cow::Borrowed(cols[*i])),
        Expr::Neg(a) => match eval_lane(a, cols, n) {
            Lane::Column(Cow::Owned(mut v)) => {
                v.iter_mut().for_each(|x| *x = -*x);
                Lane::Column(Cow::Owned(v))
            }
            l if l.is_scalar() => Lane::Scalar(-l.num(0)),
            l => Lane::Column(Cow::Owned((0..n).map(|i| -l.num(i)).collect())),
        },
        Expr::Not(a) => match eval_lane(a, cols, n) {
            Lane::Mask(mut m) => {
                m.iter_mut().for_each(|b| *b = !*b);
                Lane::Mask(m)
            }
            l if l.is_scalar() => Lane::Flag(!l.truth(0)),
            l => Lane::Mask((0..n).map(|i| !l.truth(i)).collect()),
        },
        Expr::Binary(op, a, b) => {
            let lhs = eval_lane(a, cols, n);
            let rhs = eval_lane(b, cols, n);
            binary_lane(*op, &lhs, &rhs, n)
        }
        Expr::Call(f, args) => {
            let lanes: Vec<Lane<'a>> = args.iter().map(|a| eval_lane(a, cols, n)).collect();
            let mut buf = vec![0.0; lanes.len()];
            if lanes.iter().all(Lane::is_scalar) {
                for (slot, l) in buf.iter_mut().zip(&lanes) {
                    *slot = l.num(0);
                }
                return Lane::Scalar(apply_func(f, &buf));
            }
            let out = (0..n)
                .map(|i| {
                    for (slot, l) in buf.iter_mut().zip(&lanes) {
                        *slot = l.num(i);
                    }
                    apply_func(f, &buf)
                })
                .collect();
            Lane::Column(Cow::Owned(out))
        }
    }
}

fn binary_lane<'a>(op: BinOp, lhs: &Lane<'a>, rhs: &Lane<'a>, n: usize) -> Lane<'a> {
    let scalar = lhs.is_scalar() && rhs.is_scalar();
    if op.is_logical() {
        let f: fn(bool, bool) -> bool = match op {
            BinOp::And => |a, b| a && b,
            BinOp::Or => |a, b| a || b,
            _ => |a, b| a ^ b,
        };
        if scalar {
            return Lane::Flag(f(lhs.truth(0), rhs.truth(0)));
        }
        return Lane::Mask((0..n).map(|i| f(lhs.truth(i), rhs.truth(i))).collect());
    }
    if op.is_relational() {
        if scalar {
            return Lane::Flag(truthy(apply_binary(op, lhs.num(0), rhs.num(0))));
        }
        return Lane::Mask(
            (0..n).map(|i| truthy(apply_binary(op, lhs.num(i), rhs.num(i)))).collect(),
        );
    }
    if scalar {
        return Lane::Scalar(apply_binary(op, lhs.num(0), rhs.num(0)));
    }
    Lane::Column(Cow::Owned((0..n).map(|i| apply_binary(op, lhs.num(i), rhs.num(i))).collect()))
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Xor,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Tokenize the normalized text; `original` is only used in error messages.
fn tokenize(original: &str, input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let n = chars.len();
    let mut i = 0;

    while i < n {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let offset = i;
        let next = chars.get(i + 1).copied();
        let two = match (c, next) {
            ('=', Some('=')) => Some(TokenKind::Eq),
            ('!', Some('=')) => Some(TokenKind::Ne),
            ('<', Some('=')) => Some(TokenKind::Le),
            ('>', Some('=')) => Some(TokenKind::Ge),
            _ => None,
        };
        if let Some(kind) = two {
            tokens.push(Token { kind, offset });
            i += 2;
            continue;
        }

        let single = match c {
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            ',' => Some(TokenKind::Comma),
            '<' => Some(TokenKind::Lt),
            '>' => Some(TokenKind::Gt),
            '^' => Some(TokenKind::Xor),
            _ => None,
        };
        if let Some(kind) = single {
            tokens.push(Token { kind, offset });
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < n && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < n && (chars[i] == 'e' || chars[i] == 'E') {
                i += 1;
                if i < n && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                let exp_start = i;
                while i < n && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i == exp_start {
                    // No exponent digits: `1e`, `2.5E+`.
                    return Err(Error::FloatingParse { literal: chars[start..i].iter().collect() });
                }
            }
            if i < n && is_ident_start(chars[i]) {
                while i < n && is_ident_char(chars[i]) {
                    i += 1;
                }
                return Err(Error::FloatingParse { literal: chars[start..i].iter().collect() });
            }
            let literal: String = chars[start..i].iter().collect();
            let value: f64 =
                literal.parse().map_err(|_| Error::FloatingParse { literal: literal.clone() })?;
            tokens.push(Token { kind: TokenKind::Num(value), offset });
            continue;
        }

        if is_ident_start(c) {
            let start = i;
            loop {
                while i < n && is_ident_char(chars[i]) {
                    i += 1;
                }
                // Qualified names: `math::sqrt`, `math.sqrt`.
                if i + 2 < n && chars[i] == ':' && chars[i + 1] == ':' && is_ident_start(chars[i + 2])
                {
                    i += 2;
                } else if i + 1 < n && chars[i] == '.' && is_ident_start(chars[i + 1]) {
                    i += 1;
                } else {
                    break;
                }
            }
            let word: String = chars[start..i].iter().collect();
            let kind = match word.as_str() {
                "and" => TokenKind::And,
                "or" => TokenKind::Or,
                "not" => TokenKind::Not,
                "xor" => TokenKind::Xor,
                _ => TokenKind::Ident(word),
            };
            tokens.push(Token { kind, offset });
            continue;
        }

        let hint = if c == '=' { " (did you mean '==')" } else { "" };
        return Err(Error::parse(
            original,
            format!("unexpected character '{c}' at offset {offset}{hint}"),
        ));
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    module: &'a MathModule,
    pos: usize,
    columns: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: &'a [Token], module: &'a MathModule) -> Self {
        Self { source, tokens, module, pos: 0, columns: Vec::new() }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::parse(self.source, message)
    }

    fn expect(&mut self, expected: TokenKind) -> Result<()> {
        match self.advance() {
            Some(t) if t.kind == expected => Ok(()),
            Some(t) => Err(self.error(format!(
                "expected {:?}, got {:?} at offset {}",
                expected, t.kind, t.offset
            ))),
            None => Err(self.error(format!("expected {:?}, got end of expression", expected))),
        }
    }

    fn resolve_var(&mut self, name: &str) -> usize {
        if let Some(i) = self.columns.iter().position(|b| b == name) {
            i
        } else {
            self.columns.push(name.to_string());
            self.columns.len() - 1
        }
    }

    // ── Grammar rules ──────────────────────────────────────────

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_xor()?;
        while matches!(self.peek_kind(), Some(TokenKind::Or)) {
            self.advance();
            let rhs = self.parse_xor()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_xor(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek_kind(), Some(TokenKind::Xor)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Xor, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek_kind(), Some(TokenKind::And)) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if matches!(self.peek_kind(), Some(TokenKind::Not)) {
            self.advance();
            let e = self.parse_not()?;
            return Ok(Expr::Not(Box::new(e)));
        }
        self.parse_cmp()
    }

    fn cmp_op(&self) -> Option<BinOp> {
        match self.peek_kind() {
            Some(TokenKind::Eq) => Some(BinOp::Eq),
            Some(TokenKind::Ne) => Some(BinOp::Ne),
            Some(TokenKind::Lt) => Some(BinOp::Lt),
            Some(TokenKind::Le) => Some(BinOp::Le),
            Some(TokenKind::Gt) => Some(BinOp::Gt),
            Some(TokenKind::Ge) => Some(BinOp::Ge),
            _ => None,
        }
    }

    /// `a < b <= c` chains into `(a < b) and (b <= c)`.
    fn parse_cmp(&mut self) -> Result<Expr> {
        let mut operand = self.parse_add()?;
        let mut chain: Option<Expr> = None;
        while let Some(op) = self.cmp_op() {
            self.advance();
            let rhs = self.parse_add()?;
            let cmp = Expr::Binary(op, Box::new(operand), Box::new(rhs.clone()));
            chain = Some(match chain {
                None => cmp,
                Some(acc) => Expr::Binary(BinOp::And, Box::new(acc), Box::new(cmp)),
            });
            operand = rhs;
        }
        Ok(chain.unwrap_or(operand))
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek_kind() {
            Some(TokenKind::Minus) => {
                self.advance();
                let e = self.parse_unary()?;
                Ok(Expr::Neg(Box::new(e)))
            }
            Some(TokenKind::Plus) => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        let Some(token) = self.advance() else {
            return Err(self.error("unexpected end of expression"));
        };
        match token.kind {
            TokenKind::Num(n) => Ok(Expr::Number(n)),
            TokenKind::LParen => {
                let e = self.parse_or()?;
                self.expect(TokenKind::RParen)?;
                Ok(e)
            }
            TokenKind::Ident(name) => {
                if matches!(self.peek_kind(), Some(TokenKind::LParen)) {
                    self.advance(); // consume '('
                    self.parse_call(&name)
                } else {
                    Ok(match name.as_str() {
                        "true" | "True" => Expr::Bool(true),
                        "false" | "False" => Expr::Bool(false),
                        "pi" => Expr::Number(std::f64::consts::PI),
                        _ => Expr::Var(self.resolve_var(&name)),
                    })
                }
            }
            other => Err(self.error(format!(
                "expected number, identifier, or '(', got {:?} at offset {}",
                other, token.offset
            ))),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr> {
        let (func, arity) = match name {
            "min" => (Func::Min, None),
            "max" => (Func::Max, None),
            _ => {
                let (canonical, f) = self
                    .module
                    .lookup(name)
                    .ok_or_else(|| Error::UnknownFunction(leaf_name(name).to_string()))?;
                (Func::Math { name: canonical.to_string(), func: f.func }, Some(f.arity))
            }
        };

        let mut args = Vec::new();
        if matches!(self.peek_kind(), Some(TokenKind::RParen)) {
            self.advance();
        } else {
            args.push(self.parse_or()?);
            while matches!(self.peek_kind(), Some(TokenKind::Comma)) {
                self.advance();
                args.push(self.parse_or()?);
            }
            self.expect(TokenKind::RParen)?;
        }

        match arity {
            None if args.is_empty() => {
                Err(self.error(format!("'{name}' needs at least one argument")))
            }
            Some(expected) if args.len() != expected => Err(self.error(format!(
                "function '{name}' expects {expected} argument(s), got {}",
                args.len()
            ))),
            _ => Ok(Expr::Call(func, args)),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(e: &CompiledExpr, cols: &[&[f64]]) -> Evaluated {
        let n = cols.first().map_or(1, |c| c.len());
        e.eval_columns(cols, n)
    }

    #[test]
    fn simple_arithmetic() {
        let e = CompiledExpr::compile("2 + 3 * 4").unwrap();
        assert!(e.required_columns.is_empty());
        assert!((e.eval_row(&[]) - 14.0).abs() < 1e-10);
        assert!(!e.is_boolean());
    }

    #[test]
    fn variables() {
        let e = CompiledExpr::compile("pt * weight_mc").unwrap();
        assert_eq!(e.required_columns, vec!["pt", "weight_mc"]);
        assert!((e.eval_row(&[100.0, 0.5]) - 50.0).abs() < 1e-10);
    }

    #[test]
    fn worded_and_c_style_logic_agree() {
        let worded = CompiledExpr::compile("njet >= 4 and pt_lead > 25.0").unwrap();
        let c_style = CompiledExpr::compile("njet >= 4 && pt_lead > 25.0").unwrap();
        for row in [[4.0, 30.0], [3.0, 30.0], [4.0, 20.0]] {
            assert_eq!(worded.eval_row(&row), c_style.eval_row(&row));
        }
        assert_eq!(worded.eval_row(&[4.0, 30.0]), 1.0);
        assert_eq!(worded.eval_row(&[3.0, 30.0]), 0.0);
        assert!(worded.is_boolean());
    }

    #[test]
    fn normalization_keeps_not_equal() {
        let n = normalize("a != 2 && !(b || c)");
        assert!(n.contains("!="));
        assert!(n.contains(" and "));
        assert!(n.contains(" not "));
        assert!(n.contains(" or "));

        let e = CompiledExpr::compile("x != 3").unwrap();
        assert_eq!(e.eval_row(&[3.0]), 0.0);
        assert_eq!(e.eval_row(&[4.0]), 1.0);
    }

    #[test]
    fn abs_maps_to_fabs() {
        assert_eq!(normalize("abs(eta) < 2.5"), "fabs(eta) < 2.5");
        // Only the bareword is renamed.
        assert_eq!(normalize("abseta + abs_x"), "abseta + abs_x");
        let e = CompiledExpr::compile("abs(eta)").unwrap();
        assert_eq!(e.rewritten(), "math::fabs(eta)");
        assert_eq!(e.eval_row(&[-1.5]), 1.5);
    }

    #[test]
    fn functions() {
        let e = CompiledExpr::compile("sqrt(x)").unwrap();
        assert!((e.eval_row(&[9.0]) - 3.0).abs() < 1e-10);

        let e = CompiledExpr::compile("pow(x, 2)").unwrap();
        assert!((e.eval_row(&[3.0]) - 9.0).abs() < 1e-10);

        let e = CompiledExpr::compile("max(a, b, 5)").unwrap();
        assert!((e.eval_row(&[3.0, 7.0]) - 7.0).abs() < 1e-10);
        assert!((e.eval_row(&[3.0, 1.0]) - 5.0).abs() < 1e-10);

        let e = CompiledExpr::compile("TMath::Sqrt(x) + math.log(1)").unwrap();
        assert!((e.eval_row(&[16.0]) - 4.0).abs() < 1e-10);
    }

    #[test]
    fn unknown_function_and_arity() {
        assert!(matches!(
            CompiledExpr::compile("frob(x)"),
            Err(Error::UnknownFunction(name)) if name == "frob"
        ));
        assert!(matches!(CompiledExpr::compile("sqrt(x, y)"), Err(Error::Parse { .. })));
        assert!(matches!(CompiledExpr::compile("min()"), Err(Error::Parse { .. })));
    }

    #[test]
    fn custom_module() {
        let module = MathModule::empty("phys").with("sq", 1, |a| a[0] * a[0]);
        let e = CompiledExpr::compile_with("sq(x) + 1", &module).unwrap();
        assert_eq!(e.eval_row(&[3.0]), 10.0);
        assert_eq!(e.rewritten(), "(phys::sq(x) + 1.0)");
        assert!(CompiledExpr::compile_with("sqrt(x)", &module).is_err());
    }

    #[test]
    fn negation() {
        let e = CompiledExpr::compile("-x + 1").unwrap();
        assert!((e.eval_row(&[5.0]) - (-4.0)).abs() < 1e-10);
    }

    #[test]
    fn logical_not() {
        let e = CompiledExpr::compile("!(x > 3)").unwrap();
        assert_eq!(e.eval_row(&[2.0]), 1.0);
        assert_eq!(e.eval_row(&[5.0]), 0.0);

        let e = CompiledExpr::compile("not x > 3").unwrap();
        assert_eq!(e.eval_row(&[2.0]), 1.0);
    }

    #[test]
    fn xor_operator() {
        let e = CompiledExpr::compile("(a > 0) ^ (b > 0)").unwrap();
        let r = bulk(&e, &[&[1.0, 1.0, -1.0, -1.0], &[1.0, -1.0, 1.0, -1.0]]);
        assert_eq!(r, Evaluated::Boolean(vec![false, true, true, false]));

        let e = CompiledExpr::compile("a > 0 xor b > 0").unwrap();
        assert_eq!(e.eval_row(&[1.0, -1.0]), 1.0);
    }

    #[test]
    fn chained_comparison() {
        let e = CompiledExpr::compile("0 < x <= 2").unwrap();
        let r = bulk(&e, &[&[-1.0, 0.5, 2.0, 3.0]]);
        assert_eq!(r, Evaluated::Boolean(vec![false, true, true, false]));
    }

    #[test]
    fn bulk_eval() {
        let e = CompiledExpr::compile("a + b").unwrap();
        let a = [1.0, 2.0, 3.0];
        let b = [10.0, 20.0, 30.0];
        assert_eq!(bulk(&e, &[&a, &b]), Evaluated::Numeric(vec![11.0, 22.0, 33.0]));
    }

    #[test]
    fn constant_expression_broadcasts() {
        let e = CompiledExpr::compile("2 > 1").unwrap();
        assert_eq!(e.eval_columns(&[], 3), Evaluated::Boolean(vec![true, true, true]));
        let e = CompiledExpr::compile("pi").unwrap();
        assert_eq!(e.eval_columns(&[], 2), Evaluated::Numeric(vec![std::f64::consts::PI; 2]));
    }

    #[test]
    fn or_expression() {
        let e = CompiledExpr::compile("x > 5 || y < 2").unwrap();
        assert_eq!(e.eval_row(&[6.0, 3.0]), 1.0);
        assert_eq!(e.eval_row(&[3.0, 1.0]), 1.0);
        assert_eq!(e.eval_row(&[3.0, 3.0]), 0.0);
    }

    #[test]
    fn nested_parens() {
        let e = CompiledExpr::compile("(1 + 2) * (3 + 4)").unwrap();
        assert!((e.eval_row(&[]) - 21.0).abs() < 1e-10);
        let e = CompiledExpr::compile("((a > 1) and (b < 2 or (c == 3)))").unwrap();
        assert_eq!(e.required_columns, vec!["a", "b", "c"]);
        assert_eq!(e.eval_row(&[2.0, 5.0, 3.0]), 1.0);
    }

    #[test]
    fn scientific_notation() {
        let e = CompiledExpr::compile("1.5e2 + 3.0E-1 + 2.5E+1 + 1e-3").unwrap();
        assert!((e.eval_row(&[]) - 175.301).abs() < 1e-10);
    }

    #[test]
    fn malformed_literals() {
        for bad in ["1e + x", "2.5E+", "1.2.3 * x", "3x > 1", "."] {
            assert!(
                matches!(CompiledExpr::compile(bad), Err(Error::FloatingParse { .. })),
                "{bad} should fail as a floating literal"
            );
        }
    }

    #[test]
    fn structural_errors() {
        for bad in ["", "a >", "(a + b", "a b", "a = 1", "a + * b", "a ? b"] {
            assert!(
                matches!(CompiledExpr::compile(bad), Err(Error::Parse { .. })),
                "{bad:?} should be a parse error"
            );
        }
    }

    #[test]
    fn free_variables_longest_first() {
        let e = CompiledExpr::compile("pt + pt_lead * x + ptx").unwrap();
        assert_eq!(e.required_columns, vec!["pt", "pt_lead", "x", "ptx"]);
        assert_eq!(e.free_variables(), vec!["pt_lead", "ptx", "pt", "x"]);
    }

    #[test]
    fn builtins_are_not_columns() {
        let e = CompiledExpr::compile("flag == True or x > pi").unwrap();
        assert_eq!(e.required_columns, vec!["flag", "x"]);
    }

    #[test]
    fn evaluate_reports_unknown_variable() {
        let e = CompiledExpr::compile("a > 2 and missing < 1").unwrap();
        let a = [1.0, 2.0, 3.0];
        let err = e.evaluate(3, |name| if name == "a" { Some(&a[..]) } else { None }).unwrap_err();
        assert!(matches!(err, Error::UnknownVariable(name) if name == "missing"));
    }

    #[test]
    fn division_by_zero_is_ieee() {
        let e = CompiledExpr::compile("1 / x").unwrap();
        let r = bulk(&e, &[&[0.0, 2.0]]).into_values();
        assert!(r[0].is_infinite());
        assert_eq!(r[1], 0.5);
    }

    #[test]
    fn rewritten_round_trips() {
        let e = CompiledExpr::compile("sqrt(x*x + y*y) > 2 && !(z == 0)").unwrap();
        let again = CompiledExpr::compile(&e.rewritten()).unwrap();
        let cols: [&[f64]; 3] = [&[1.0, 3.0], &[1.0, 0.0], &[0.0, 1.0]];
        assert_eq!(bulk(&e, &cols), bulk(&again, &cols));
    }
}
