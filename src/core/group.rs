//! Purpose: Sorting and grouping of record streams, with lazy sortedness verification.
//! Exports: `InputOrder`, `MonotonicRun`, `GroupLabel`, `Groups`, `sort_records`.
//! Role: Order-imposing half of the relation algebra; used by `Relation::sort_by`/`group_by`.
//! Invariants: Sorting is stable; equal keys keep their input order.
//! Invariants: A presorted stream may be ascending or descending, never both.
//! Invariants: Violations surface at the offending row; earlier groups stay valid.
use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};
use crate::core::key::Key;
use crate::core::record::Record;

/// Field holding a group's member records in a grouped record.
pub const GROUP_FIELD: &str = "group";
/// Field holding the key of a grouped record when grouping by an arbitrary key function.
pub const KEY_FIELD: &str = "key";

/// Whether the caller vouches for the input already being ordered by the group key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputOrder {
    /// Materialize and stable-sort before grouping.
    Unsorted,
    /// Group in a single lazy pass, verifying the order as rows arrive.
    Sorted,
}

/// Tracks whether every key seen so far forms one non-decreasing or non-increasing run.
#[derive(Debug, Default)]
pub struct MonotonicRun {
    last: Option<Key>,
    rose: bool,
    fell: bool,
}

impl MonotonicRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, key: &Key) -> Result<(), Error> {
        let ordering = match &self.last {
            Some(last) => key.cmp(last),
            None => {
                self.last = Some(key.clone());
                return Ok(());
            }
        };
        match ordering {
            Ordering::Equal => return Ok(()),
            Ordering::Greater => self.rose = true,
            Ordering::Less => self.fell = true,
        }
        if self.rose && self.fell {
            let previous = self.last.as_ref().map(Key::to_string).unwrap_or_default();
            return Err(Error::new(ErrorKind::SortednessViolation)
                .with_message(format!(
                    "the relation is not sorted: key {key} follows {previous} after the run changed direction"
                ))
                .with_hint("Group without the sorted flag, or sort the input first."));
        }
        self.last = Some(key.clone());
        Ok(())
    }
}

/// How a group's key is written into the grouped record.
#[derive(Clone, Debug)]
pub enum GroupLabel {
    /// Store the key itself under [`KEY_FIELD`].
    Key,
    /// Copy each named field from the group's first member.
    Names(Vec<String>),
}

impl GroupLabel {
    fn grouped(&self, key: &Key, members: Vec<Record>) -> Record {
        let mut out = Map::new();
        match self {
            GroupLabel::Key => {
                out.insert(KEY_FIELD.to_string(), key.to_json());
            }
            GroupLabel::Names(names) => {
                for name in names {
                    let value = members
                        .first()
                        .and_then(|m| m.get(name))
                        .cloned()
                        .unwrap_or(Value::Null);
                    out.insert(name.clone(), value);
                }
            }
        }
        let members = members.into_iter().map(Value::Object).collect();
        out.insert(GROUP_FIELD.to_string(), Value::Array(members));
        out
    }
}

type Rows<'a> = Box<dyn Iterator<Item = Result<Record, Error>> + 'a>;

/// Lazy partition of a stream into runs of equal keys.
///
/// Every row key passes through a [`MonotonicRun`], so an input that is not
/// uniformly ordered fails at the first row that proves it.
pub struct Groups<'a, F> {
    rows: Rows<'a>,
    key_fn: F,
    label: GroupLabel,
    run: MonotonicRun,
    pending: Option<(Key, Record)>,
    index: u64,
    done: bool,
}

impl<'a, F> Groups<'a, F>
where
    F: FnMut(&Record) -> Result<Key, Error>,
{
    pub(crate) fn new(rows: Rows<'a>, key_fn: F, label: GroupLabel) -> Self {
        Self {
            rows,
            key_fn,
            label,
            run: MonotonicRun::new(),
            pending: None,
            index: 0,
            done: false,
        }
    }

    fn pull(&mut self) -> Option<Result<(Key, Record), Error>> {
        let row = self.rows.next()?;
        let index = self.index;
        self.index += 1;
        Some(row.and_then(|record| {
            let key = (self.key_fn)(&record).map_err(|err| err.with_row(index))?;
            self.run.observe(&key).map_err(|err| err.with_row(index))?;
            Ok((key, record))
        }))
    }

    fn fail(&mut self, err: Error) -> Option<Result<Record, Error>> {
        self.done = true;
        self.pending = None;
        Some(Err(err))
    }
}

impl<F> Iterator for Groups<'_, F>
where
    F: FnMut(&Record) -> Result<Key, Error>,
{
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (key, first) = match self.pending.take() {
            Some(pending) => pending,
            None => match self.pull()? {
                Ok(pulled) => pulled,
                Err(err) => return self.fail(err),
            },
        };
        let mut members = vec![first];
        loop {
            match self.pull() {
                None => break,
                Some(Err(err)) => return self.fail(err),
                Some(Ok((next_key, record))) => {
                    if next_key == key {
                        members.push(record);
                    } else {
                        self.pending = Some((next_key, record));
                        break;
                    }
                }
            }
        }
        Some(Ok(self.label.grouped(&key, members)))
    }
}

/// Drains the stream and stable-sorts it by key.
pub(crate) fn sort_records<I, F>(rows: I, mut key_fn: F) -> Result<Vec<Record>, Error>
where
    I: IntoIterator<Item = Result<Record, Error>>,
    F: FnMut(&Record) -> Result<Key, Error>,
{
    let mut keyed = Vec::new();
    for (index, row) in rows.into_iter().enumerate() {
        let record = row?;
        let key = key_fn(&record).map_err(|err| err.with_row(index as u64))?;
        keyed.push((key, record));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    tracing::debug!(rows = keyed.len(), "sorted relation");
    Ok(keyed.into_iter().map(|(_, record)| record).collect())
}

#[cfg(test)]
mod tests {
    use super::{GroupLabel, Groups, MonotonicRun, sort_records};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::key::{Key, key_of};
    use crate::core::record::Record;
    use serde_json::{Value, json};

    fn rows(values: &[i64]) -> Vec<Result<Record, Error>> {
        values
            .iter()
            .map(|v| Ok(json!({"a": v}).as_object().cloned().unwrap()))
            .collect()
    }

    #[test]
    fn run_accepts_either_direction() {
        let mut up = MonotonicRun::new();
        for k in [1, 1, 2, 5, 5] {
            up.observe(&Key::Int(k)).expect("ascending");
        }
        assert!(up.rose && !up.fell);

        let mut down = MonotonicRun::new();
        for k in [9, 4, 4, 0] {
            down.observe(&Key::Int(k)).expect("descending");
        }
        assert!(down.fell && !down.rose);
    }

    #[test]
    fn run_rejects_direction_change() {
        let mut run = MonotonicRun::new();
        run.observe(&Key::Int(1)).unwrap();
        run.observe(&Key::Int(3)).unwrap();
        let err = run.observe(&Key::Int(2)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SortednessViolation);
    }

    #[test]
    fn groups_yield_before_violation() {
        let groups = Groups::new(
            Box::new(rows(&[2, 2, 1, 3]).into_iter()),
            key_of(&["a"]),
            GroupLabel::Names(vec!["a".to_string()]),
        );
        let out: Vec<_> = groups.collect();
        assert_eq!(out.len(), 2);
        let first = out[0].as_ref().expect("first group");
        assert_eq!(
            Value::Object(first.clone()),
            json!({"a": 2, "group": [{"a": 2}, {"a": 2}]})
        );
        let err = out[1].as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SortednessViolation);
        assert_eq!(err.row(), Some(3));
    }

    #[test]
    fn signed_zeros_form_one_sorted_run() {
        let input: Vec<Result<Record, Error>> = [json!(0), json!(-0.0), json!(0)]
            .into_iter()
            .map(|a| Ok(json!({"a": a}).as_object().cloned().unwrap()))
            .collect();
        let groups: Vec<_> = Groups::new(
            Box::new(input.into_iter()),
            key_of(&["a"]),
            GroupLabel::Names(vec!["a".to_string()]),
        )
        .collect::<Result<_, _>>()
        .expect("one run");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0]["group"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn key_label_stores_key_field() {
        let groups = Groups::new(
            Box::new(rows(&[1, 1]).into_iter()),
            |r: &Record| Ok(Key::from_json(&r["a"])),
            GroupLabel::Key,
        );
        let out: Vec<_> = groups.map(|g| Value::Object(g.unwrap())).collect();
        assert_eq!(out, vec![json!({"key": 1, "group": [{"a": 1}, {"a": 1}]})]);
    }

    #[test]
    fn sort_is_stable() {
        let input: Vec<Result<Record, Error>> = [(2, "x"), (1, "y"), (2, "z"), (1, "w")]
            .iter()
            .map(|(a, tag)| Ok(json!({"a": a, "t": tag}).as_object().cloned().unwrap()))
            .collect();
        let sorted = sort_records(input, key_of(&["a"])).unwrap();
        let tags: Vec<&str> = sorted.iter().map(|r| r["t"].as_str().unwrap()).collect();
        assert_eq!(tags, vec!["y", "w", "x", "z"]);
    }
}
