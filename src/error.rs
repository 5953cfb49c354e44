//! Error types surfaced by the session.
//!
//! Three caller-visible kinds, none retried or recovered locally:
//! database rejections, import failures, and spatialization failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("import error: {0}")]
    Import(#[from] ImportError),
    #[error("spatialization error: {0}")]
    Spatialize(#[from] SpatializeError),
}

/// Failures while loading an external tabular source into a table.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("source has no columns")]
    EmptySource,
    #[error("failed to read delimited source: {0}")]
    Csv(#[from] csv::Error),
    #[error("row has {got} values but the table has {expected} columns")]
    RowArity { expected: usize, got: usize },
    #[error("table {table} already exists")]
    TableExists { table: String },
    #[error("table {table} exists with columns [{existing}] but the source has [{incoming}]")]
    SchemaMismatch {
        table: String,
        existing: String,
        incoming: String,
    },
    #[error("column name {0} is reserved for the geometry column")]
    ReservedColumn(String),
}

/// Failures while turning coordinate columns into point geometries.
#[derive(Debug, Error)]
pub enum SpatializeError {
    #[error("table {table} does not exist")]
    MissingTable { table: String },
    #[error("coordinate column {column} not found")]
    MissingColumn { column: String },
    #[error("coordinate column {column} holds a non-numeric value")]
    NonNumericColumn { column: String },
    #[error("{count} row(s) have null coordinates; delete or fill them before spatializing")]
    NullCoordinates { count: i64 },
    #[error("geometry count {geometries} does not match attribute row count {rows}")]
    LengthMismatch { rows: usize, geometries: usize },
    #[error("table {table} has no registered geometry column")]
    NotSpatial { table: String },
    #[error("invalid geometry value: {detail}")]
    InvalidGeometry { detail: String },
}
