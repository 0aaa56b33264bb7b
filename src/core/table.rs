//! Purpose: Materialize a record stream into the `(keys, rows)` pair handed to presentation.
//! Exports: `Columns`, `Table`.
//! Role: Boundary between the algebra and any tabular formatter.
//! Invariants: Without explicit columns, keys are the sorted union of all record fields.
//! Invariants: Every row tuple has exactly one value per key; absent fields are `null`.
use std::collections::BTreeSet;

use serde_json::Value;

use crate::core::error::Error;
use crate::core::record::Record;

/// Column selection for a [`Table`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Columns {
    #[default]
    All,
    Named(Vec<String>),
}

impl Columns {
    /// Parses a space-delimited list of field names; a blank string selects all fields.
    pub fn parse(spec: &str) -> Self {
        let names: Vec<String> = spec.split_whitespace().map(str::to_string).collect();
        if names.is_empty() {
            return Columns::All;
        }
        Columns::Named(names)
    }
}

impl<S: AsRef<str>> From<&[S]> for Columns {
    fn from(names: &[S]) -> Self {
        Columns::Named(names.iter().map(|n| n.as_ref().to_string()).collect())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub keys: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn from_records<I>(records: I, columns: &Columns) -> Result<Self, Error>
    where
        I: IntoIterator<Item = Result<Record, Error>>,
    {
        let records = records.into_iter().collect::<Result<Vec<_>, Error>>()?;
        let keys = match columns {
            Columns::Named(names) => names.clone(),
            Columns::All => records
                .iter()
                .flat_map(|r| r.keys().cloned())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        };
        let rows = records
            .iter()
            .map(|record| {
                keys.iter()
                    .map(|k| record.get(k).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(Self { keys, rows })
    }
}
