//! Query compiler and executor: turns a BSON-ish filter/update document into
//! a normalized plan and runs it against a collection's primary table and
//! secondary indexes.

pub mod compiler;
pub mod executor;

pub use compiler::{Op, Predicate, Projection, QueryPlan, UpdateSpec};
pub use executor::{execute, ExplainInfo};
