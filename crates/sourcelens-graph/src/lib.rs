//! Neo4j-backed graph store for sourcelens
//!
//! Implements the core [`GraphStore`] contract over a bolt connection.
//! Batches run inside one transaction; upserts use `MERGE` keyed on the
//! composite id. The in-memory store in `sourcelens-core` remains the
//! reference implementation for tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod neo4j;

pub use config::GraphConfig;
pub use neo4j::Neo4jGraphStore;
