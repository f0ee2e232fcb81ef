//! Graph store configuration from the environment

use sourcelens_core::error::{Error, Result};

/// Bolt connection settings, read once at process start and immutable after
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Bolt URI, e.g. `bolt://localhost:7687`
    pub uri: String,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
    /// Database name
    pub database: String,
}

impl GraphConfig {
    /// Read `NEO4J_URI`, `NEO4J_USERNAME`, `NEO4J_PASSWORD`, `NEO4J_DATABASE`.
    ///
    /// URI and password are required; username defaults to `neo4j`, database
    /// to `neo4j`.
    pub fn from_env() -> Result<Self> {
        let uri = std::env::var("NEO4J_URI")
            .map_err(|_| Error::validation("NEO4J_URI", "environment variable not set"))?;
        let password = std::env::var("NEO4J_PASSWORD")
            .map_err(|_| Error::validation("NEO4J_PASSWORD", "environment variable not set"))?;
        Ok(Self {
            uri,
            username: std::env::var("NEO4J_USERNAME").unwrap_or_else(|_| "neo4j".to_string()),
            password,
            database: std::env::var("NEO4J_DATABASE").unwrap_or_else(|_| "neo4j".to_string()),
        })
    }
}
