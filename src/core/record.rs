//! Purpose: Row-level helpers shared by the relation transforms.
//! Exports: `Record`, `Rename`, `Computed`, `project_record`, `rename_record`.
//! Role: Pure per-record building blocks; the stream plumbing lives in `relation`.
//! Invariants: Projection never fails; absent fields become `null`.
//! Invariants: Computed fields see only the record's fields from before the extension.
use std::fmt;

use serde_json::{Map, Value};

use crate::core::error::Error;

/// A row: field name to dynamically typed value. Rows in one stream may differ in shape.
pub type Record = Map<String, Value>;

/// One field rename, from the old field name to the new one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

impl Rename {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// The rename that undoes this one.
    pub fn inverse(&self) -> Self {
        Self::new(self.to.clone(), self.from.clone())
    }
}

type ComputeFn<'a> = Box<dyn Fn(&[&Value]) -> Value + 'a>;

/// A computed field: the output name, the input field names it reads, and the function.
///
/// The function receives the input values positionally, in the order `inputs` lists them.
pub struct Computed<'a> {
    name: String,
    inputs: Vec<String>,
    func: ComputeFn<'a>,
}

impl<'a> Computed<'a> {
    pub fn new<S, F>(name: impl Into<String>, inputs: &[S], func: F) -> Self
    where
        S: AsRef<str>,
        F: Fn(&[&Value]) -> Value + 'a,
    {
        Self {
            name: name.into(),
            inputs: inputs.iter().map(|s| s.as_ref().to_string()).collect(),
            func: Box::new(func),
        }
    }

    pub(crate) fn evaluate(&self, record: &Record) -> Result<Value, Error> {
        let mut args = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let value = record.get(input).ok_or_else(|| {
                Error::missing_field(input)
                    .with_hint(format!("computed field `{}` reads `{input}`", self.name))
            })?;
            args.push(value);
        }
        Ok((self.func)(&args[..]))
    }
}

impl fmt::Debug for Computed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .finish()
    }
}

pub fn project_record<S: AsRef<str>>(mut record: Record, names: &[S]) -> Record {
    let mut out = Map::new();
    for name in names {
        let name = name.as_ref();
        let value = record.remove(name).unwrap_or(Value::Null);
        out.entry(name.to_string()).or_insert(value);
    }
    out
}

/// Renamed fields overwrite pass-through fields that already use the target name.
pub fn rename_record(record: Record, renames: &[Rename]) -> Record {
    let mut out = Map::new();
    let mut renamed = Vec::new();
    for (name, value) in record {
        match renames.iter().find(|r| r.from == name) {
            Some(rename) => renamed.push((rename.to.clone(), value)),
            None => {
                out.insert(name, value);
            }
        }
    }
    out.extend(renamed);
    out
}

/// Evaluates every computation against the record as it was, then merges the results in place.
pub(crate) fn extend_record(record: &mut Record, computed: &[Computed<'_>]) -> Result<(), Error> {
    let values = computed
        .iter()
        .map(|c| c.evaluate(record).map(|v| (c.name.clone(), v)))
        .collect::<Result<Vec<_>, Error>>()?;
    record.extend(values);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Computed, Record, Rename, extend_record, project_record, rename_record};
    use crate::core::error::ErrorKind;
    use serde_json::{Value, json};

    fn record(value: Value) -> Record {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn project_fills_missing_with_null() {
        let out = project_record(record(json!({"a": 1, "b": 2, "c": 3})), &["a", "z"]);
        assert_eq!(Value::Object(out), json!({"a": 1, "z": null}));
    }

    #[test]
    fn rename_swaps_fields() {
        let renames = [Rename::new("a", "b"), Rename::new("b", "a")];
        let out = rename_record(record(json!({"a": 1, "b": 2, "c": 3})), &renames);
        assert_eq!(Value::Object(out), json!({"a": 2, "b": 1, "c": 3}));
    }

    #[test]
    fn rename_wins_over_passthrough_collision() {
        let out = rename_record(record(json!({"a": 1, "c": 9})), &[Rename::new("a", "c")]);
        assert_eq!(Value::Object(out), json!({"c": 1}));
    }

    #[test]
    fn computations_do_not_see_each_other() {
        let mut row = record(json!({"a": 1}));
        let computed = [
            Computed::new("a", &["a"], |args| json!(args[0].as_i64().unwrap_or(0) * 10)),
            Computed::new("b", &["a"], |args| json!(args[0].as_i64().unwrap_or(0) + 1)),
            Computed::new("k", &[] as &[&str], |_| json!("const")),
        ];
        extend_record(&mut row, &computed).expect("extend");
        assert_eq!(Value::Object(row), json!({"a": 10, "b": 2, "k": "const"}));
    }

    #[test]
    fn missing_input_fails_without_partial_merge() {
        let mut row = record(json!({"a": 1}));
        let computed = [
            Computed::new("b", &["a"], |_| json!(true)),
            Computed::new("c", &["nope"], |_| json!(true)),
        ];
        let err = extend_record(&mut row, &computed).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
        assert_eq!(err.field(), Some("nope"));
        assert_eq!(Value::Object(row), json!({"a": 1}));
    }
}
