//! Purpose: Define the stable public Rust API boundary for relq.
//! Exports: Relation, records, keys, predicates, grouping modes, aggregations, tables and errors.
//! Role: Public, additive-only surface used by the CLI and integration tests.
//! Invariants: Callers build pipelines only through these re-exports.

pub use crate::core::aggregate::{count_by, fold, max_by_key, min_by_key, reduce, unique_mapping};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::group::{GROUP_FIELD, InputOrder, KEY_FIELD};
pub use crate::core::key::{Key, key_of};
pub use crate::core::predicate::Predicate;
pub use crate::core::record::{Computed, Record, Rename, project_record, rename_record};
pub use crate::core::relation::{Relation, Snapshot};
pub use crate::core::table::{Columns, Table};
