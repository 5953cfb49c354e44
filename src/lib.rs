pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod import;
pub mod table;

pub use config::{ConnectionProfile, Verbosity};
pub use db::{init_db, Session};
pub use error::{Error, ImportError, SpatializeError};
pub use geo::{spatialize_point_table, GeoTable, GEOMETRY_COLUMN};
pub use import::ImportMode;
pub use table::{Table, Value};
