//! Error types for dumpmerge.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the import pipeline and its collaborators.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The dump artifact could not be read or a block is malformed.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// One or more rows were rejected by the strict transform mode.
    #[error("Transform error: {0}")]
    Transform(String),

    /// The live schema does not line up with the configured table spec.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// The database collaborator rejected a statement.
    #[error("Database error: {0}")]
    Database(String),

    /// Staging or merging a table failed.
    #[error("Load error: {0}")]
    Loading(String),

    /// Underlying IO failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(e.to_string())
    }
}
