//! Purpose: Give dynamically typed JSON values a total order for sorting, grouping and keying.
//! Exports: `Key`, `key_of`.
//! Role: Shared comparison currency for every ordering or map-building operation.
//! Invariants: Order is kind rank first (null, bool, number, string, array, object), then value.
//! Invariants: Equality agrees with `Ord`, so keys are safe as `BTreeMap` keys.
//! Invariants: Integers stay exact; `1` and `1.0` are equal, `0` and `-0.0` are equal.
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Number, Value};

use crate::core::error::Error;
use crate::core::record::Record;

/// Floats with magnitude below this are exact integers when they have no fraction.
const EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

#[derive(Clone, Debug)]
pub enum Key {
    Null,
    Bool(bool),
    /// Any JSON integer; `i128` holds the full `i64` and `u64` ranges.
    Int(i128),
    Float(f64),
    Str(String),
    Arr(Vec<Key>),
    Obj(BTreeMap<String, Key>),
}

impl Key {
    fn kind_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Float(_) => 2,
            Self::Str(_) => 3,
            Self::Arr(_) => 4,
            Self::Obj(_) => 5,
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::from_number(n),
            Value::String(s) => Self::Str(s.clone()),
            Value::Array(a) => Self::Arr(a.iter().map(Self::from_json).collect()),
            Value::Object(o) => Self::Obj(
                o.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    fn from_number(n: &Number) -> Self {
        if let Some(i) = n.as_i64() {
            return Self::Int(i128::from(i));
        }
        if let Some(u) = n.as_u64() {
            return Self::Int(i128::from(u));
        }
        Self::float(n.as_f64().unwrap_or(0.0))
    }

    /// Builds a float key with `-0.0` folded into `0.0`.
    pub fn float(n: f64) -> Self {
        if n == 0.0 {
            return Self::Float(0.0);
        }
        Self::Float(n)
    }

    /// Converts back to JSON. Integers are exact; integral floats come back as JSON integers.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => int_to_json(*i),
            Self::Float(n) => float_to_json(*n),
            Self::Str(s) => Value::String(s.clone()),
            Self::Arr(a) => Value::Array(a.iter().map(Self::to_json).collect()),
            Self::Obj(o) => Value::Object(o.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric addition; integers stay exact until they overflow.
    pub fn checked_add(&self, other: &Key) -> Option<Key> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(
                a.checked_add(*b)
                    .map_or_else(|| Self::float(*a as f64 + *b as f64), Self::Int),
            ),
            (a, b) => Some(Self::float(a.as_f64()? + b.as_f64()?)),
        }
    }
}

fn int_to_json(i: i128) -> Value {
    if let Ok(v) = i64::try_from(i) {
        return Value::from(v);
    }
    if let Ok(v) = u64::try_from(i) {
        return Value::from(v);
    }
    float_to_json(i as f64)
}

fn float_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= EXACT_FLOAT_INT {
        return Value::from(n as i64);
    }
    Number::from_f64(n).map_or(Value::Null, Value::Number)
}

/// Exact comparison of an integer with a float, without rounding either side.
fn cmp_int_float(i: i128, f: f64) -> Ordering {
    if f.is_nan() {
        return if f.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    // 2^127 bounds the i128 range; beyond it the float wins outright.
    if f >= 170_141_183_460_469_231_731_687_303_715_884_105_728.0 {
        return Ordering::Less;
    }
    if f < -170_141_183_460_469_231_731_687_303_715_884_105_728.0 {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    match i.cmp(&(whole as i128)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(f - whole)).unwrap_or(Ordering::Equal),
        other => other,
    }
}

fn cmp_float(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| a.total_cmp(&b))
}

impl From<&Value> for Key {
    fn from(value: &Value) -> Self {
        Self::from_json(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Int(i128::from(value))
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Self::Int(i128::from(value))
    }
}

impl From<f64> for Key {
    fn from(value: f64) -> Self {
        Self::float(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        let ka = self.kind_rank();
        let kb = other.kind_rank();
        if ka != kb {
            return ka.cmp(&kb);
        }
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => cmp_float(*a, *b),
            (Self::Int(a), Self::Float(b)) => cmp_int_float(*a, *b),
            (Self::Float(a), Self::Int(b)) => cmp_int_float(*b, *a).reverse(),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Arr(a), Self::Arr(b)) => a.cmp(b),
            (Self::Obj(a), Self::Obj(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

/// Builds the field-tuple key extractor used by the `*_by_names` operations.
///
/// A single name keys on that field's value; several names key on the array of
/// their values, which compares lexicographically. Missing fields are errors.
pub fn key_of(names: &[&str]) -> impl Fn(&Record) -> Result<Key, Error> + Clone + use<> {
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    move |record: &Record| {
        let mut parts = Vec::with_capacity(names.len());
        for name in &names {
            let value = record.get(name).ok_or_else(|| Error::missing_field(name))?;
            parts.push(Key::from_json(value));
        }
        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }
        Ok(Key::Arr(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::{Key, key_of};
    use crate::core::error::ErrorKind;
    use serde_json::{Value, json};

    #[test]
    fn kinds_order_before_values() {
        let mut keys = vec![
            Key::from_json(&json!("a")),
            Key::from_json(&json!(10)),
            Key::from_json(&json!(null)),
            Key::from_json(&json!(true)),
            Key::from_json(&json!([1])),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, vec!["null", "true", "10", "\"a\"", "[1]"]);
    }

    #[test]
    fn integer_and_float_keys_compare_equal() {
        assert_eq!(Key::from_json(&json!(1)), Key::from_json(&json!(1.0)));
        assert_eq!(Key::from_json(&json!(1.0)).to_json(), json!(1));
        assert_eq!(Key::from_json(&json!(1.5)).to_json(), json!(1.5));
        assert!(Key::from_json(&json!(1)) < Key::from_json(&json!(1.5)));
        assert!(Key::from_json(&json!(-1.5)) < Key::from_json(&json!(-1)));
    }

    #[test]
    fn large_integers_stay_distinct() {
        let low: Value = serde_json::from_str("9007199254740992").unwrap();
        let high: Value = serde_json::from_str("9007199254740993").unwrap();
        let (low, high) = (Key::from_json(&low), Key::from_json(&high));
        assert_ne!(low, high);
        assert!(low < high);
        assert_eq!(high.to_string(), "9007199254740993");
        let max: Value = serde_json::from_str("18446744073709551615").unwrap();
        assert_eq!(Key::from_json(&max).to_json(), max);
        // 2^53 as a float equals 2^53 as an integer, but not 2^53 + 1.
        assert_eq!(Key::Float(9007199254740992.0), low);
        assert!(Key::Float(9007199254740992.0) < high);
    }

    #[test]
    fn negative_zero_equals_zero() {
        let neg = Key::from_json(&json!(-0.0));
        assert_eq!(neg, Key::from_json(&json!(0.0)));
        assert_eq!(neg, Key::Int(0));
        assert_eq!(Key::Float(-0.0), Key::Float(0.0));
        assert_eq!(neg.to_json(), json!(0));
    }

    #[test]
    fn key_of_single_and_multiple_names() {
        let record = json!({"a": 1, "b": "x"}).as_object().cloned().unwrap();
        assert_eq!(key_of(&["a"])(&record).unwrap(), Key::Int(1));
        assert_eq!(
            key_of(&["a", "b"])(&record).unwrap(),
            Key::Arr(vec![Key::Int(1), Key::from("x")])
        );
        let err = key_of(&["c"])(&record).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
        assert_eq!(err.field(), Some("c"));
    }

    #[test]
    fn checked_add_keeps_integers_exact() {
        let big = Key::Int(9007199254740992);
        assert_eq!(big.checked_add(&Key::Int(1)).unwrap().to_string(), "9007199254740993");
        assert_eq!(Key::Int(1).checked_add(&Key::Float(0.5)), Some(Key::Float(1.5)));
        assert_eq!(Key::Int(1).checked_add(&Key::Null), None);
    }
}
