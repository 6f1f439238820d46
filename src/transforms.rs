//! Tree rewrites applied between parsing and printing.
//!
//! Each module is one pass. Passes that need names bound run after the
//! resolver and keep the tree's types consistent, so later passes and the
//! printer can rely on them.

pub mod cohorts;
pub mod eav;
pub mod lazy_tables;
pub mod placeholders;
pub mod predicate_pushdown;
pub mod preaggregation;
pub mod property_types;
pub mod session_where;
pub mod state_merge;
pub mod where_clause;
