//! Purpose: Lazy relational algebra over a single-pass stream of records.
//! Exports: `Relation`, `Snapshot`.
//! Role: Chainable wrapper; row-wise transforms stay lazy, ordering and aggregation consume.
//! Invariants: A `Relation` owns its stream and is consumed by every operation (single pass).
//! Invariants: Stream errors pass through transforms untouched; consumers stop at the first one.
//! Invariants: Relative order of surviving rows is preserved except by sort/group.
use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::core::aggregate;
use crate::core::error::Error;
use crate::core::group::{GroupLabel, Groups, InputOrder, sort_records};
use crate::core::key::{Key, key_of};
use crate::core::record::{Computed, Record, Rename, extend_record, project_record, rename_record};
use crate::core::table::{Columns, Table};

type Rows<'a> = Box<dyn Iterator<Item = Result<Record, Error>> + 'a>;

/// A lazy, single-pass stream of records.
///
/// Every method consumes the relation. To iterate the same rows more than once,
/// materialize with [`Relation::fix`] and take fresh relations from
/// [`Snapshot::copy`]; copies own their records, so `extend` on a copy never
/// reaches the snapshot.
pub struct Relation<'a> {
    rows: Rows<'a>,
}

impl fmt::Debug for Relation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation").finish_non_exhaustive()
    }
}

impl<'a> Relation<'a> {
    pub fn new<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Record>,
        I::IntoIter: 'a,
    {
        Self::from_results(rows.into_iter().map(Ok))
    }

    /// Wraps a fallible source such as a file reader.
    pub fn from_results<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Result<Record, Error>>,
        I::IntoIter: 'a,
    {
        Self {
            rows: Box::new(rows.into_iter()),
        }
    }

    fn wrap<I>(rows: I) -> Self
    where
        I: Iterator<Item = Result<Record, Error>> + 'a,
    {
        Self {
            rows: Box::new(rows),
        }
    }

    pub fn map<F>(self, mut f: F) -> Self
    where
        F: FnMut(Record) -> Record + 'a,
    {
        Self::wrap(self.rows.map(move |row| row.map(&mut f)))
    }

    /// Like [`Relation::map`], for transforms that can fail per row.
    pub fn try_map<F>(self, mut f: F) -> Self
    where
        F: FnMut(Record) -> Result<Record, Error> + 'a,
    {
        Self::wrap(self.rows.map(move |row| row.and_then(&mut f)))
    }

    pub fn filter<P>(self, mut predicate: P) -> Self
    where
        P: FnMut(&Record) -> bool + 'a,
    {
        self.try_filter(move |record| Ok(predicate(record)))
    }

    /// Like [`Relation::filter`]; a predicate error replaces the row in the stream.
    pub fn try_filter<P>(self, mut predicate: P) -> Self
    where
        P: FnMut(&Record) -> Result<bool, Error> + 'a,
    {
        Self::wrap(self.rows.filter_map(move |row| {
            row.and_then(|record| Ok(predicate(&record)?.then_some(record)))
                .transpose()
        }))
    }

    pub fn project<S: AsRef<str>>(self, names: &[S]) -> Self {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        self.map(move |record| project_record(record, &names))
    }

    pub fn rename(self, renames: Vec<Rename>) -> Self {
        self.map(move |record| rename_record(record, &renames))
    }

    /// Adds computed fields, mutating each record in place before passing it on.
    ///
    /// All computations for a row read the row as it arrived, so they cannot see
    /// each other's outputs. A computation whose input field is absent fails that
    /// row with a `MissingField` error.
    pub fn extend(self, computed: Vec<Computed<'a>>) -> Self {
        let mut index = 0u64;
        self.try_map(move |mut record| {
            let row = index;
            index += 1;
            extend_record(&mut record, &computed).map_err(|err| err.with_row(row))?;
            Ok(record)
        })
    }

    pub fn take_while<P>(self, mut predicate: P) -> Self
    where
        P: FnMut(&Record) -> bool + 'a,
    {
        self.try_take_while(move |record| Ok(predicate(record)))
    }

    /// Like [`Relation::take_while`]; a predicate error is yielded and ends the stream.
    pub fn try_take_while<P>(self, mut predicate: P) -> Self
    where
        P: FnMut(&Record) -> Result<bool, Error> + 'a,
    {
        let mut done = false;
        Self::wrap(self.rows.map_while(move |row| {
            if done {
                return None;
            }
            let record = match row {
                Ok(record) => record,
                Err(err) => return Some(Err(err)),
            };
            match predicate(&record) {
                Ok(true) => Some(Ok(record)),
                Ok(false) => {
                    done = true;
                    None
                }
                Err(err) => {
                    done = true;
                    Some(Err(err))
                }
            }
        }))
    }

    pub fn drop_while<P>(self, mut predicate: P) -> Self
    where
        P: FnMut(&Record) -> bool + 'a,
    {
        self.try_drop_while(move |record| Ok(predicate(record)))
    }

    /// Like [`Relation::drop_while`]; any error ends the dropped prefix.
    pub fn try_drop_while<P>(self, mut predicate: P) -> Self
    where
        P: FnMut(&Record) -> Result<bool, Error> + 'a,
    {
        let mut dropping = true;
        Self::wrap(self.rows.filter_map(move |row| {
            if !dropping {
                return Some(row);
            }
            let record = match row {
                Ok(record) => record,
                Err(err) => {
                    dropping = false;
                    return Some(Err(err));
                }
            };
            match predicate(&record) {
                Ok(true) => None,
                Ok(false) => {
                    dropping = false;
                    Some(Ok(record))
                }
                Err(err) => {
                    dropping = false;
                    Some(Err(err))
                }
            }
        }))
    }

    pub fn skip(self, n: usize) -> Self {
        Self::wrap(self.rows.skip(n))
    }

    pub fn take(self, n: usize) -> Self {
        Self::wrap(self.rows.take(n))
    }

    /// Materializes the stream so it can be iterated more than once.
    pub fn fix(self) -> Result<Snapshot, Error> {
        let rows = self.rows.collect::<Result<Vec<_>, Error>>()?;
        tracing::debug!(rows = rows.len(), "materialized relation");
        Ok(Snapshot { rows })
    }

    /// Values of one field, `null` where the field is absent.
    pub fn values(self, name: &str) -> impl Iterator<Item = Result<Value, Error>> + use<'a> {
        let name = name.to_string();
        self.rows
            .map(move |row| row.map(|record| record.get(&name).cloned().unwrap_or(Value::Null)))
    }

    /// Field tuples in the order given; an absent field is an error.
    pub fn tuples(self, names: &[&str]) -> impl Iterator<Item = Result<Vec<Value>, Error>> + use<'a> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        self.rows.map(move |row| {
            let mut record = row?;
            names
                .iter()
                .map(|name| record.remove(name).ok_or_else(|| Error::missing_field(name)))
                .collect()
        })
    }

    pub fn sort_by<F>(self, key_fn: F) -> Result<Self, Error>
    where
        F: FnMut(&Record) -> Result<Key, Error>,
    {
        let sorted = sort_records(self.rows, key_fn)?;
        Ok(Self::new(sorted))
    }

    pub fn sort_by_names(self, names: &[&str]) -> Result<Self, Error> {
        self.sort_by(key_of(names))
    }

    /// Groups rows into `{"key": <key>, "group": [...]}` records.
    ///
    /// With [`InputOrder::Unsorted`] the stream is drained and stable-sorted
    /// first. With [`InputOrder::Sorted`] grouping stays lazy and the claimed
    /// order is verified row by row; the stream may run in either direction.
    pub fn group_by<F>(self, key_fn: F, order: InputOrder) -> Result<Self, Error>
    where
        F: FnMut(&Record) -> Result<Key, Error> + Clone + 'a,
    {
        self.group_with(key_fn, order, GroupLabel::Key)
    }

    /// Groups by field values; each name is copied into the grouped record.
    pub fn group_by_names(self, names: &[&str], order: InputOrder) -> Result<Self, Error> {
        let label = GroupLabel::Names(names.iter().map(|n| n.to_string()).collect());
        self.group_with(key_of(names), order, label)
    }

    fn group_with<F>(self, key_fn: F, order: InputOrder, label: GroupLabel) -> Result<Self, Error>
    where
        F: FnMut(&Record) -> Result<Key, Error> + Clone + 'a,
    {
        let rows = match order {
            InputOrder::Sorted => self.rows,
            InputOrder::Unsorted => Self::new(sort_records(self.rows, key_fn.clone())?).rows,
        };
        Ok(Self::wrap(Groups::new(rows, key_fn, label)))
    }

    /// Builds a key to record map; a repeated key fails the whole operation.
    pub fn mapping<F>(self, key_fn: F) -> Result<BTreeMap<Key, Record>, Error>
    where
        F: FnMut(&Record) -> Result<Key, Error>,
    {
        aggregate::unique_mapping(self.rows, key_fn)
    }

    pub fn mapping_by_names(self, names: &[&str]) -> Result<BTreeMap<Key, Record>, Error> {
        self.mapping(key_of(names))
    }

    /// Counts rows by draining the stream. Use [`Snapshot::count`] to count without consuming.
    pub fn count(self) -> Result<usize, Error> {
        aggregate::fold(self.rows, 0, |n, _| n + 1)
    }

    pub fn reduce<F>(self, f: F) -> Result<Record, Error>
    where
        F: FnMut(Record, Record) -> Record,
    {
        aggregate::reduce(self.rows, f)
    }

    pub fn fold<A, F>(self, init: A, f: F) -> Result<A, Error>
    where
        F: FnMut(A, Record) -> A,
    {
        aggregate::fold(self.rows, init, f)
    }

    pub fn max<F>(self, key_fn: F) -> Result<Record, Error>
    where
        F: FnMut(&Record) -> Result<Key, Error>,
    {
        aggregate::max_by_key(self.rows, key_fn)
    }

    pub fn min<F>(self, key_fn: F) -> Result<Record, Error>
    where
        F: FnMut(&Record) -> Result<Key, Error>,
    {
        aggregate::min_by_key(self.rows, key_fn)
    }

    pub fn count_by<F>(self, key_fn: F) -> Result<BTreeMap<Key, usize>, Error>
    where
        F: FnMut(&Record) -> Result<Key, Error>,
    {
        aggregate::count_by(self.rows, key_fn)
    }

    pub fn count_by_names(self, names: &[&str]) -> Result<BTreeMap<Key, usize>, Error> {
        self.count_by(key_of(names))
    }

    pub fn table(self, columns: &Columns) -> Result<Table, Error> {
        Table::from_records(self.rows, columns)
    }
}

impl Iterator for Relation<'_> {
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }
}

/// A materialized relation: owned, indexable and re-iterable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    rows: Vec<Record>,
}

impl Snapshot {
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.rows.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.rows.iter()
    }

    /// A relation over independent copies of the records; the snapshot is left untouched.
    pub fn copy(&self) -> Relation<'_> {
        Relation::new(self.rows.iter().cloned())
    }
}

impl From<Vec<Record>> for Snapshot {
    fn from(rows: Vec<Record>) -> Self {
        Self { rows }
    }
}

impl<'s> IntoIterator for &'s Snapshot {
    type Item = &'s Record;
    type IntoIter = std::slice::Iter<'s, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
