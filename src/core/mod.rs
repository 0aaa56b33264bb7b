// Core modules implementing the relation algebra, key ordering, and error modeling.
pub mod aggregate;
pub mod error;
pub mod group;
pub mod key;
pub mod predicate;
pub mod record;
pub mod relation;
pub mod table;
