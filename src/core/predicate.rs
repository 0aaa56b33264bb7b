//! Purpose: Compile and evaluate jq boolean expressions against records.
//! Exports: `Predicate`.
//! Role: Small adapter around `jaq-core`; `Key` doubles as the jq value so comparisons share one order.
//! Invariants: Parse/compile failures are usage errors; runtime eval errors count as "no match".
//! Invariants: An expression must yield only booleans (otherwise: usage error).
//! Invariants: Indexing a missing object field yields `null`, as in jq.
use std::collections::BTreeMap;
use std::fmt;

use jaq_core::load::{Arena, File, Loader};
use jaq_core::ops::Math;
use jaq_core::{Compiler, Ctx, Error as JaqError, Native, RcIter};

use crate::core::error::{Error, ErrorKind};
use crate::core::key::Key;
use crate::core::record::Record;

#[derive(Clone)]
pub struct Predicate {
    expr: String,
    filter: jaq_core::Filter<Native<Key>>,
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("expr", &self.expr)
            .finish()
    }
}

impl Predicate {
    pub fn compile(expr: &str) -> Result<Self, Error> {
        let arena = Arena::default();
        let loader = Loader::new(std::iter::empty());
        let program = File {
            code: expr,
            path: (),
        };
        let modules = loader
            .load(&arena, program)
            .map_err(|errs| compile_error(expr, errs))?;
        let filter = Compiler::default()
            .with_funs(jaq_std::base_funs::<Key>())
            .compile(modules)
            .map_err(|errs| compile_error(expr, errs))?;
        Ok(Self {
            expr: expr.to_string(),
            filter,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// True when any output of the expression is `true`.
    pub fn matches(&self, record: &Record) -> Result<bool, Error> {
        let input = Key::Obj(
            record
                .iter()
                .map(|(k, v)| (k.clone(), Key::from_json(v)))
                .collect(),
        );
        let inputs = RcIter::new(core::iter::empty::<Result<Key, String>>());
        let out = self.filter.run((Ctx::new([], &inputs), input));

        let mut any_true = false;
        for item in out {
            match item {
                Ok(Key::Bool(true)) => any_true = true,
                Ok(Key::Bool(false)) => {}
                Ok(other) => {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("row condition must yield booleans")
                        .with_hint(format!(
                            "Expression `{}` yielded non-boolean value: {other}",
                            self.expr
                        )));
                }
                Err(_) => return Ok(false),
            }
        }
        Ok(any_true)
    }
}

fn compile_error<E: fmt::Debug>(expr: &str, err: E) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message("invalid row condition")
        .with_hint(format!(
            "Failed to parse/compile `{expr}`.\nDetails: {err:?}\nExample: --step 'filter .total > 100'"
        ))
}

impl Key {
    fn as_str_opt(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    fn as_index(&self) -> Option<isize> {
        match self {
            Self::Int(i) => isize::try_from(*i).ok(),
            Self::Float(n) if n.is_finite() && n.fract() == 0.0 => Some(*n as isize),
            _ => None,
        }
    }
}

/// Integer arithmetic while it stays exact, float arithmetic otherwise.
fn numeric(
    l: Key,
    op: Math,
    r: Key,
    int: fn(i128, i128) -> Option<i128>,
    float: fn(f64, f64) -> f64,
) -> Result<Key, JaqError<Key>> {
    if let (Key::Int(a), Key::Int(b)) = (&l, &r) {
        if let Some(v) = int(*a, *b) {
            return Ok(Key::Int(v));
        }
    }
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => Ok(Key::float(float(a, b))),
        _ => Err(JaqError::math(l, op, r)),
    }
}

impl From<bool> for Key {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<isize> for Key {
    fn from(value: isize) -> Self {
        Self::Int(value as i128)
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl FromIterator<Self> for Key {
    fn from_iter<T: IntoIterator<Item = Self>>(iter: T) -> Self {
        Self::Arr(iter.into_iter().collect())
    }
}

impl std::ops::Add for Key {
    type Output = Result<Self, JaqError<Self>>;

    fn add(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::Null, other) | (other, Self::Null) => Ok(other),
            (Self::Str(a), Self::Str(b)) => Ok(Self::Str(a + &b)),
            (Self::Arr(mut a), Self::Arr(b)) => {
                a.extend(b);
                Ok(Self::Arr(a))
            }
            (Self::Obj(mut a), Self::Obj(b)) => {
                a.extend(b);
                Ok(Self::Obj(a))
            }
            (l, r) => numeric(l, Math::Add, r, i128::checked_add, |a, b| a + b),
        }
    }
}

impl std::ops::Sub for Key {
    type Output = Result<Self, JaqError<Self>>;

    fn sub(self, rhs: Self) -> Self::Output {
        numeric(self, Math::Sub, rhs, i128::checked_sub, |a, b| a - b)
    }
}

impl std::ops::Mul for Key {
    type Output = Result<Self, JaqError<Self>>;

    fn mul(self, rhs: Self) -> Self::Output {
        numeric(self, Math::Mul, rhs, i128::checked_mul, |a, b| a * b)
    }
}

impl std::ops::Div for Key {
    type Output = Result<Self, JaqError<Self>>;

    fn div(self, rhs: Self) -> Self::Output {
        let exact = |a: i128, b: i128| match a.checked_rem(b) {
            Some(0) => a.checked_div(b),
            _ => None,
        };
        numeric(self, Math::Div, rhs, exact, |a, b| a / b)
    }
}

impl std::ops::Rem for Key {
    type Output = Result<Self, JaqError<Self>>;

    fn rem(self, rhs: Self) -> Self::Output {
        numeric(self, Math::Rem, rhs, i128::checked_rem, |a, b| a % b)
    }
}

impl std::ops::Neg for Key {
    type Output = Result<Self, JaqError<Self>>;

    fn neg(self) -> Self::Output {
        match self {
            Self::Int(a) => Ok(a
                .checked_neg()
                .map_or_else(|| Self::float(-(a as f64)), Self::Int)),
            Self::Float(a) => Ok(Self::float(-a)),
            other => Err(JaqError::typ(other, "number")),
        }
    }
}

impl jaq_core::ValT for Key {
    fn from_num(n: &str) -> Result<Self, JaqError<Self>> {
        if let Ok(i) = n.parse::<i128>() {
            return Ok(Self::Int(i));
        }
        let parsed = n.parse::<f64>().map_err(JaqError::str)?;
        Ok(Self::float(parsed))
    }

    fn from_map<I: IntoIterator<Item = (Self, Self)>>(iter: I) -> Result<Self, JaqError<Self>> {
        let mut map = BTreeMap::new();
        for (k, v) in iter {
            let Some(key) = k.as_str_opt() else {
                return Err(JaqError::typ(k, "string"));
            };
            map.insert(key.to_string(), v);
        }
        Ok(Self::Obj(map))
    }

    fn values(self) -> Box<dyn Iterator<Item = Result<Self, JaqError<Self>>>> {
        match self {
            Self::Arr(values) => Box::new(values.into_iter().map(Ok)),
            Self::Obj(values) => Box::new(values.into_values().map(Ok)),
            other => Box::new(std::iter::once(Err(JaqError::typ(other, "iterable")))),
        }
    }

    fn index(self, index: &Self) -> Result<Self, JaqError<Self>> {
        match (self, index) {
            (Self::Obj(mut obj), Self::Str(key)) => Ok(obj.remove(key).unwrap_or(Self::Null)),
            (Self::Null, Self::Str(_)) => Ok(Self::Null),
            (Self::Arr(arr), idx) if idx.as_index().is_some() => {
                let len = arr.len() as isize;
                let idx = idx.as_index().unwrap_or(0);
                let idx = if idx < 0 { len + idx } else { idx };
                Ok(usize::try_from(idx)
                    .ok()
                    .and_then(|i| arr.get(i).cloned())
                    .unwrap_or(Self::Null))
            }
            (l, r) => Err(JaqError::index(l, r.clone())),
        }
    }

    fn range(self, range: jaq_core::val::Range<&Self>) -> Result<Self, JaqError<Self>> {
        let to_index = |v: &Self| -> Result<isize, JaqError<Self>> {
            v.as_index()
                .ok_or_else(|| JaqError::typ(v.clone(), "integer"))
        };
        match self {
            Self::Arr(arr) => {
                let len = arr.len() as isize;
                let start = range.start.map(to_index).transpose()?.unwrap_or(0);
                let end = range.end.map(to_index).transpose()?.unwrap_or(len);
                let norm = |idx: isize| if idx < 0 { len + idx } else { idx };
                let start = norm(start).clamp(0, len) as usize;
                let end = norm(end).clamp(0, len) as usize;
                let slice = if end >= start {
                    arr[start..end].to_vec()
                } else {
                    Vec::new()
                };
                Ok(Self::Arr(slice))
            }
            other => Err(JaqError::typ(other, "array")),
        }
    }

    fn map_values<'a, I: Iterator<Item = jaq_core::ValX<'a, Self>>>(
        self,
        opt: jaq_core::path::Opt,
        f: impl Fn(Self) -> I,
    ) -> jaq_core::ValX<'a, Self> {
        let first = |value: Self| match f(value).next() {
            Some(result) => result,
            None => Ok(Self::Null),
        };
        match self {
            Self::Arr(values) => values
                .into_iter()
                .map(first)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Arr),
            Self::Obj(values) => values
                .into_iter()
                .map(|(k, v)| first(v).map(|v| (k, v)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(Self::Obj),
            other => match opt {
                jaq_core::path::Opt::Optional => Ok(other),
                jaq_core::path::Opt::Essential => Err(JaqError::typ(other, "iterable").into()),
            },
        }
    }

    fn map_index<'a, I: Iterator<Item = jaq_core::ValX<'a, Self>>>(
        self,
        index: &Self,
        opt: jaq_core::path::Opt,
        f: impl Fn(Self) -> I,
    ) -> jaq_core::ValX<'a, Self> {
        match self {
            Self::Obj(mut obj) => {
                let Some(key) = index.as_str_opt() else {
                    return Err(JaqError::typ(index.clone(), "string").into());
                };
                let current = obj.remove(key).unwrap_or(Self::Null);
                let next = match f(current).next() {
                    Some(result) => result?,
                    None => Self::Null,
                };
                obj.insert(key.to_string(), next);
                Ok(Self::Obj(obj))
            }
            other => match opt {
                jaq_core::path::Opt::Optional => Ok(other),
                jaq_core::path::Opt::Essential => Err(JaqError::index(other, index.clone()).into()),
            },
        }
    }

    fn map_range<'a, I: Iterator<Item = jaq_core::ValX<'a, Self>>>(
        self,
        range: jaq_core::val::Range<&Self>,
        opt: jaq_core::path::Opt,
        f: impl Fn(Self) -> I,
    ) -> jaq_core::ValX<'a, Self> {
        match self {
            Self::Arr(arr) => {
                let slice = jaq_core::ValT::range(Self::Arr(arr), range)?;
                match f(slice).next() {
                    Some(result) => result,
                    None => Ok(Self::Null),
                }
            }
            other => match opt {
                jaq_core::path::Opt::Optional => Ok(other),
                jaq_core::path::Opt::Essential => Err(JaqError::typ(other, "array").into()),
            },
        }
    }

    fn as_bool(&self) -> bool {
        !matches!(self, Self::Null | Self::Bool(false))
    }

    fn as_str(&self) -> Option<&str> {
        self.as_str_opt()
    }
}

impl jaq_std::ValT for Key {
    fn into_seq<S: FromIterator<Self>>(self) -> Result<S, Self> {
        match self {
            Self::Arr(values) => Ok(values.into_iter().collect()),
            other => Err(other),
        }
    }

    fn as_isize(&self) -> Option<isize> {
        self.as_index()
    }

    fn as_f64(&self) -> Result<f64, JaqError<Self>> {
        Key::as_f64(self).ok_or_else(|| JaqError::typ(self.clone(), "number"))
    }
}
