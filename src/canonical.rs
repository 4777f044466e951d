//! Order-independent canonical form for tool-call arguments.

use std::cmp::Ordering;
use std::fmt;

use serde_json::{Map, Value};

/// Nesting depth beyond which a subtree is kept as its JSON rendering.
pub const MAX_CANONICAL_DEPTH: usize = 64;

/// `i64::MIN` as a float (exact).
const INTEGRAL_LOWER: f64 = -9_223_372_036_854_775_808.0;
/// `u64::MAX + 1` as a float (exact); integral floats below it fit in `u64`.
const INTEGRAL_UPPER: f64 = 18_446_744_073_709_551_616.0;

/// Bit pattern of a non-integral finite float, hashable and totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FloatBits(u64);

impl FloatBits {
    fn new(value: f64) -> Self {
        // -0.0 and 0.0 must share one identity.
        let value = if value == 0.0 { 0.0 } else { value };
        Self(value.to_bits())
    }

    /// Returns the float value.
    #[must_use]
    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

/// Canonical form of a single argument value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanonicalValue {
    /// JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integral number, whatever its JSON encoding (`1` and `1.0` are equal).
    Integer(i128),
    /// Non-integral number.
    Float(FloatBits),
    /// String.
    Str(String),
    /// Sequence in canonical order.
    Seq(Vec<CanonicalValue>),
    /// Mapping with entries sorted by key.
    Map(Vec<(String, CanonicalValue)>),
    /// JSON rendering of a value that could not be canonicalized structurally.
    Rendered(String),
}

impl CanonicalValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            #[allow(clippy::cast_precision_loss)]
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(f.value()),
            _ => None,
        }
    }

    /// Elements of one class can be sorted against each other.
    const fn order_class(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) | Self::Integer(_) | Self::Float(_) => 1,
            Self::Str(_) => 2,
            Self::Seq(_) => 3,
            Self::Map(_) => 4,
            Self::Rendered(_) => 5,
        }
    }
}

impl fmt::Display for CanonicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{}", x.value()),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Rendered(s) => write!(f, "{s}"),
            Self::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Canonical form of an argument mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalArgs(Vec<(String, CanonicalValue)>);

impl CanonicalArgs {
    /// Returns the canonical value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&CanonicalValue> {
        self.0
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|i| &self.0[i].1)
    }

    /// Returns true if every entry of `expected` is present here with an equal value.
    #[must_use]
    pub fn contains_all(&self, expected: &Self) -> bool {
        expected
            .0
            .iter()
            .all(|(k, v)| self.get(k).is_some_and(|actual| actual == v))
    }

    /// Number of top-level arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Identity of a tool call: two calls are the same iff their identities are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallIdentity {
    /// Tool name.
    pub name: String,
    /// Canonical arguments.
    pub args: CanonicalArgs,
}

impl CallIdentity {
    /// Builds the identity of a call from its name and raw arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: &Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            args: canonicalize(arguments),
        }
    }
}

impl fmt::Display for CallIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, (k, v)) in self.args.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, ")")
    }
}

/// Canonicalizes an argument mapping.
///
/// # Rules (Deterministic)
///
/// 1. Entries are sorted by key
/// 2. Mapping values are canonicalized recursively
/// 3. Sequence elements are canonicalized, then sorted; numbers and booleans
///    order by magnitude
/// 4. Mixed sequences group elements by kind (null, number, string,
///    sequence, mapping) before sorting within each kind
/// 5. Scalars pass through; integral floats in the `i64`/`u64` range become
///    integers
/// 6. Subtrees nested deeper than [`MAX_CANONICAL_DEPTH`] are kept as JSON text
///
/// # Examples
///
/// ```
/// use agent_metrics::canonicalize;
/// use serde_json::json;
///
/// let a = json!({"ids": [3, 1, 2], "filter": {"b": 1, "a": 2}});
/// let b = json!({"filter": {"a": 2, "b": 1}, "ids": [1, 2, 3]});
/// assert_eq!(
///     canonicalize(a.as_object().unwrap()),
///     canonicalize(b.as_object().unwrap()),
/// );
/// ```
#[must_use]
pub fn canonicalize(arguments: &Map<String, Value>) -> CanonicalArgs {
    CanonicalArgs(canonical_entries(arguments, 0))
}

/// Canonicalizes a single value.
#[must_use]
pub fn canonicalize_value(value: &Value) -> CanonicalValue {
    canonical_value(value, 0)
}

fn canonical_entries(map: &Map<String, Value>, depth: usize) -> Vec<(String, CanonicalValue)> {
    let mut entries: Vec<(String, CanonicalValue)> = map
        .iter()
        .map(|(k, v)| (k.clone(), canonical_value(v, depth + 1)))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

fn canonical_value(value: &Value, depth: usize) -> CanonicalValue {
    if depth > MAX_CANONICAL_DEPTH {
        return CanonicalValue::Rendered(value.to_string());
    }
    match value {
        Value::Null => CanonicalValue::Null,
        Value::Bool(b) => CanonicalValue::Bool(*b),
        Value::Number(n) => canonical_number(n),
        Value::String(s) => CanonicalValue::Str(s.clone()),
        Value::Object(map) => CanonicalValue::Map(canonical_entries(map, depth)),
        Value::Array(items) => canonical_sequence(items, depth),
    }
}

fn canonical_number(n: &serde_json::Number) -> CanonicalValue {
    if let Some(i) = n.as_i64() {
        return CanonicalValue::Integer(i128::from(i));
    }
    if let Some(u) = n.as_u64() {
        return CanonicalValue::Integer(i128::from(u));
    }
    match n.as_f64() {
        #[allow(clippy::cast_possible_truncation)]
        Some(f) if f.fract() == 0.0 && (INTEGRAL_LOWER..INTEGRAL_UPPER).contains(&f) => {
            CanonicalValue::Integer(f as i128)
        }
        Some(f) => CanonicalValue::Float(FloatBits::new(f)),
        None => CanonicalValue::Rendered(n.to_string()),
    }
}

fn canonical_sequence(items: &[Value], depth: usize) -> CanonicalValue {
    let mut elements: Vec<CanonicalValue> = items
        .iter()
        .map(|item| canonical_value(item, depth + 1))
        .collect();
    elements.sort_by(|a, b| {
        a.order_class()
            .cmp(&b.order_class())
            .then_with(|| canonical_order(a, b))
    });
    CanonicalValue::Seq(elements)
}

/// Numeric values compare by magnitude; everything else by structure.
fn canonical_order(a: &CanonicalValue, b: &CanonicalValue) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn canon(v: &Value) -> CanonicalArgs {
        canonicalize(v.as_object().unwrap())
    }

    #[test]
    fn key_order_is_irrelevant() {
        assert_eq!(
            canon(&json!({"a": 1, "b": "x"})),
            canon(&json!({"b": "x", "a": 1}))
        );
    }

    #[test]
    fn orderable_lists_are_multisets() {
        assert_eq!(
            canon(&json!({"ids": [3, 1, 2, 1]})),
            canon(&json!({"ids": [1, 1, 2, 3]}))
        );
        assert_ne!(
            canon(&json!({"ids": [1, 2]})),
            canon(&json!({"ids": [1, 2, 2]}))
        );
    }

    #[test]
    fn nested_mappings_recurse() {
        assert_eq!(
            canon(&json!({"f": {"y": [2, 1], "x": {"q": 1, "p": 2}}})),
            canon(&json!({"f": {"x": {"p": 2, "q": 1}, "y": [1, 2]}}))
        );
    }

    #[test]
    fn lists_of_mappings_are_sorted() {
        assert_eq!(
            canon(&json!({"items": [{"sku": "b"}, {"sku": "a"}]})),
            canon(&json!({"items": [{"sku": "a"}, {"sku": "b"}]}))
        );
    }

    #[test]
    fn mixed_lists_are_multisets() {
        let a = canon(&json!({"mixed": [1, "one", null]}));
        let b = canon(&json!({"mixed": ["one", null, 1]}));
        assert_eq!(a, b);
        assert_eq!(
            a.get("mixed"),
            Some(&CanonicalValue::Seq(vec![
                CanonicalValue::Null,
                CanonicalValue::Integer(1),
                CanonicalValue::Str("one".to_string()),
            ]))
        );
        assert_ne!(a, canon(&json!({"mixed": [1, "one", null, null]})));
    }

    #[test]
    fn mixed_lists_canonicalize_their_elements() {
        assert_eq!(
            canon(&json!({"m": [1, [2, 1]]})),
            canon(&json!({"m": [[1, 2], 1]}))
        );
        assert_eq!(
            canon(&json!({"m": ["x", 1]})),
            canon(&json!({"m": [1.0, "x"]}))
        );
        assert_eq!(
            canon(&json!({"m": [{"b": [3, 2], "a": 1}, "s"]})),
            canon(&json!({"m": ["s", {"a": 1.0, "b": [2, 3]}]}))
        );
        assert_ne!(
            canon(&json!({"m": [1, [2, 1]]})),
            canon(&json!({"m": [1, [2, 2]]}))
        );
    }

    #[test]
    fn integral_floats_equal_integers() {
        assert_eq!(canon(&json!({"n": 1})), canon(&json!({"n": 1.0})));
        assert_ne!(canon(&json!({"n": 1})), canon(&json!({"n": 1.5})));
    }

    #[test]
    fn large_integral_floats_equal_integers() {
        assert_eq!(
            canon(&json!({"n": 1e18})),
            canon(&json!({"n": 1_000_000_000_000_000_000_i64}))
        );
        let two_pow_63 = 2f64.powi(63);
        assert_eq!(
            canon(&json!({"n": two_pow_63})),
            canon(&json!({"n": 9_223_372_036_854_775_808_u64}))
        );
        assert_eq!(
            canonicalize_value(&json!(-two_pow_63)),
            CanonicalValue::Integer(i128::from(i64::MIN))
        );
        assert!(matches!(
            canonicalize_value(&json!(1e30)),
            CanonicalValue::Float(_)
        ));
    }

    #[test]
    fn negative_zero_matches_zero() {
        assert_eq!(
            canonicalize_value(&json!(-0.0)),
            canonicalize_value(&json!(0.0))
        );
    }

    #[test]
    fn deep_nesting_is_rendered() {
        let mut v = json!(1);
        for _ in 0..(MAX_CANONICAL_DEPTH + 5) {
            v = json!({ "k": v });
        }
        // Must not fail and must stay deterministic.
        assert_eq!(canonicalize_value(&v), canonicalize_value(&v.clone()));
    }

    #[test]
    fn contains_all_checks_subset() {
        let actual = canon(&json!({"account_id": "A1", "amount": 50, "memo": "x"}));
        let expected = canon(&json!({"amount": 50.0, "account_id": "A1"}));
        let wrong = canon(&json!({"amount": 51}));
        assert!(actual.contains_all(&expected));
        assert!(!actual.contains_all(&wrong));
        assert!(actual.contains_all(&CanonicalArgs::default()));
    }

    #[test]
    fn identity_display() {
        let args = json!({"b": [2, 1], "a": "x"});
        let id = CallIdentity::new("get_balance", args.as_object().unwrap());
        assert_eq!(id.to_string(), "get_balance(a=\"x\", b=[1, 2])");
    }
}
