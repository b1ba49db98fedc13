//! Function registry ("math module") consulted when compiling expressions.

use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Signature of a math-module function. Arguments arrive in call order.
pub type MathFnPtr = fn(&[f64]) -> f64;

/// A registered function with its fixed arity.
#[derive(Debug, Clone, Copy)]
pub struct MathFn {
    /// Number of arguments the function takes.
    pub arity: usize,
    /// Implementation.
    pub func: MathFnPtr,
}

/// Named set of functions callable from expressions.
///
/// Calls may be written bare (`sqrt(x)`) or qualified with any namespace
/// (`math::sqrt(x)`, `math.sqrt(x)`, `TMath::Sqrt(x)`); the namespace is
/// stripped and the leaf is matched exactly, then case-insensitively.
#[derive(Debug, Clone)]
pub struct MathModule {
    namespace: String,
    functions: BTreeMap<String, MathFn>,
}

static STANDARD: LazyLock<MathModule> = LazyLock::new(MathModule::build_standard);

/// Spellings accepted for functions registered under another name.
const ALIASES: [(&str, &str); 3] = [("abs", "fabs"), ("power", "pow"), ("ln", "log")];

impl MathModule {
    /// Module without any function.
    pub fn empty(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), functions: BTreeMap::new() }
    }

    /// The default `math` module shared by every compile that does not supply its own.
    pub fn standard() -> &'static MathModule {
        &STANDARD
    }

    fn build_standard() -> Self {
        let mut m = Self::empty("math");
        m.register("fabs", 1, |a| a[0].abs())
            .register("sqrt", 1, |a| a[0].sqrt())
            .register("log", 1, |a| a[0].ln())
            .register("log10", 1, |a| a[0].log10())
            .register("log2", 1, |a| a[0].log2())
            .register("exp", 1, |a| a[0].exp())
            .register("pow", 2, |a| a[0].powf(a[1]))
            .register("sin", 1, |a| a[0].sin())
            .register("cos", 1, |a| a[0].cos())
            .register("tan", 1, |a| a[0].tan())
            .register("asin", 1, |a| a[0].asin())
            .register("acos", 1, |a| a[0].acos())
            .register("atan", 1, |a| a[0].atan())
            .register("atan2", 2, |a| a[0].atan2(a[1]))
            .register("sinh", 1, |a| a[0].sinh())
            .register("cosh", 1, |a| a[0].cosh())
            .register("tanh", 1, |a| a[0].tanh())
            .register("floor", 1, |a| a[0].floor())
            .register("ceil", 1, |a| a[0].ceil())
            .register("hypot", 2, |a| a[0].hypot(a[1]));
        m
    }

    /// Register (or replace) a function.
    pub fn register(&mut self, name: impl Into<String>, arity: usize, func: MathFnPtr) -> &mut Self {
        self.functions.insert(name.into(), MathFn { arity, func });
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, name: impl Into<String>, arity: usize, func: MathFnPtr) -> Self {
        self.register(name, arity, func);
        self
    }

    /// Namespace used when printing rewritten expressions.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Registered function names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Resolve a possibly qualified function name to its canonical name and entry.
    pub fn lookup(&self, name: &str) -> Option<(&str, MathFn)> {
        let leaf = leaf_name(name);
        if let Some((k, f)) = self.functions.get_key_value(leaf) {
            return Some((k.as_str(), *f));
        }
        let lower = leaf.to_ascii_lowercase();
        let canonical =
            ALIASES.iter().find(|(alias, _)| *alias == lower).map_or(lower.as_str(), |(_, c)| *c);
        self.functions.get_key_value(canonical).map(|(k, f)| (k.as_str(), *f))
    }
}

/// Strip `ns::` or `ns.` qualifiers.
pub(crate) fn leaf_name(name: &str) -> &str {
    let leaf = name.rsplit("::").next().unwrap_or(name);
    leaf.rsplit('.').next().unwrap_or(leaf)
}
