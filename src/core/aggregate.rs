//! Purpose: Strict, whole-stream aggregations over any fallible stream.
//! Exports: `reduce`, `fold`, `max_by_key`, `min_by_key`, `count_by`, `unique_mapping`.
//! Role: Free-standing consumers; `Relation` delegates its terminal operations here.
//! Invariants: The first stream error aborts the aggregation and is returned as-is.
//! Invariants: Ties in `max_by_key`/`min_by_key` keep the first element encountered.
//! Invariants: `unique_mapping` never exposes a partial map.
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt::Display;

use crate::core::error::{Error, ErrorKind};

pub fn reduce<T, I, F>(items: I, mut f: F) -> Result<T, Error>
where
    I: IntoIterator<Item = Result<T, Error>>,
    F: FnMut(T, T) -> T,
{
    let mut items = items.into_iter();
    let Some(first) = items.next() else {
        return Err(empty_sequence("reduce"));
    };
    let mut acc = first?;
    for item in items {
        acc = f(acc, item?);
    }
    Ok(acc)
}

/// Seeded left fold; an empty stream yields the seed.
pub fn fold<T, A, I, F>(items: I, init: A, mut f: F) -> Result<A, Error>
where
    I: IntoIterator<Item = Result<T, Error>>,
    F: FnMut(A, T) -> A,
{
    let mut acc = init;
    for item in items {
        acc = f(acc, item?);
    }
    Ok(acc)
}

pub fn max_by_key<T, K, I, F>(items: I, key: F) -> Result<T, Error>
where
    K: Ord,
    I: IntoIterator<Item = Result<T, Error>>,
    F: FnMut(&T) -> Result<K, Error>,
{
    scan_extreme(items, key, |candidate, best| candidate > best, "max")
}

pub fn min_by_key<T, K, I, F>(items: I, key: F) -> Result<T, Error>
where
    K: Ord,
    I: IntoIterator<Item = Result<T, Error>>,
    F: FnMut(&T) -> Result<K, Error>,
{
    scan_extreme(items, key, |candidate, best| candidate < best, "min")
}

fn scan_extreme<T, K, I, F, B>(items: I, mut key: F, beats: B, op: &str) -> Result<T, Error>
where
    I: IntoIterator<Item = Result<T, Error>>,
    F: FnMut(&T) -> Result<K, Error>,
    B: Fn(&K, &K) -> bool,
{
    let mut best: Option<(K, T)> = None;
    for item in items {
        let item = item?;
        let k = key(&item)?;
        let replace = match &best {
            Some((best_key, _)) => beats(&k, best_key),
            None => true,
        };
        if replace {
            best = Some((k, item));
        }
    }
    best.map(|(_, item)| item).ok_or_else(|| empty_sequence(op))
}

pub fn count_by<T, K, I, F>(items: I, mut key: F) -> Result<BTreeMap<K, usize>, Error>
where
    K: Ord,
    I: IntoIterator<Item = Result<T, Error>>,
    F: FnMut(&T) -> Result<K, Error>,
{
    let mut counts = BTreeMap::new();
    for item in items {
        let item = item?;
        *counts.entry(key(&item)?).or_insert(0) += 1;
    }
    Ok(counts)
}

pub fn unique_mapping<T, K, I, F>(items: I, mut key: F) -> Result<BTreeMap<K, T>, Error>
where
    K: Ord + Display,
    I: IntoIterator<Item = Result<T, Error>>,
    F: FnMut(&T) -> Result<K, Error>,
{
    let mut mapping = BTreeMap::new();
    for (row, item) in items.into_iter().enumerate() {
        let item = item?;
        match mapping.entry(key(&item)?) {
            Entry::Occupied(existing) => {
                return Err(Error::new(ErrorKind::DuplicateKey)
                    .with_message(format!("mapping key {} is not unique", existing.key()))
                    .with_row(row as u64));
            }
            Entry::Vacant(slot) => {
                slot.insert(item);
            }
        }
    }
    Ok(mapping)
}

fn empty_sequence(op: &str) -> Error {
    Error::new(ErrorKind::EmptySequence).with_message(format!("{op} of an empty sequence"))
}

#[cfg(test)]
mod tests {
    use super::{count_by, fold, max_by_key, min_by_key, reduce, unique_mapping};
    use crate::core::error::{Error, ErrorKind};

    fn ok<T>(items: Vec<T>) -> Vec<Result<T, Error>> {
        items.into_iter().map(Ok).collect()
    }

    #[test]
    fn reduce_folds_left_and_rejects_empty() {
        assert_eq!(reduce(ok(vec![1, 2, 3]), |a, b| a * 10 + b).unwrap(), 123);
        let err = reduce(ok(Vec::<i32>::new()), |a, b| a + b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptySequence);
        assert_eq!(fold(ok(Vec::<i32>::new()), 7, |a, b| a + b).unwrap(), 7);
    }

    #[test]
    fn extremes_keep_first_tie() {
        let items = vec![("a", 1), ("b", 3), ("c", 3), ("d", 1)];
        let max = max_by_key(ok(items.clone()), |(_, k)| Ok(*k)).unwrap();
        let min = min_by_key(ok(items), |(_, k)| Ok(*k)).unwrap();
        assert_eq!(max.0, "b");
        assert_eq!(min.0, "a");
    }

    #[test]
    fn extremes_of_empty_stream_fail() {
        let err = max_by_key(ok(Vec::<i32>::new()), |v| Ok(*v)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptySequence);
    }

    #[test]
    fn count_by_tallies_keys() {
        let counts = count_by(ok(vec!["x", "y", "x"]), |v| Ok(v.to_string())).unwrap();
        assert_eq!(counts.get("x"), Some(&2));
        assert_eq!(counts.get("y"), Some(&1));
    }

    #[test]
    fn unique_mapping_reports_duplicate_row() {
        let err = unique_mapping(ok(vec![1, 2, 2]), |v| Ok(*v)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
        assert_eq!(err.row(), Some(2));
        assert_eq!(unique_mapping(ok(vec![1, 2, 3]), |v| Ok(*v)).unwrap().len(), 3);
    }

    #[test]
    fn stream_errors_propagate() {
        let items = vec![Ok(1), Err(Error::new(ErrorKind::Io)), Ok(3)];
        assert_eq!(reduce(items, |a, b| a + b).unwrap_err().kind(), ErrorKind::Io);
    }
}
