//! Purpose: Library crate behind the `relq` CLI: lazy relational algebra over JSON records.
//! Exports: `api` (stable surface), `core` (algebra, ordering, aggregation, errors).
//! Role: Streams of `serde_json` objects flow through chainable, single-pass transforms.
//! Invariants: Row-wise transforms never consume the source; only sort/group/aggregates do.
//! Invariants: Core modules take explicit inputs and hold no global state.
pub mod api;
pub mod core;
