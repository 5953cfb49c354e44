//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and pragma configuration
//! - The bundled geometry registry schema
//! - The session helper exposing the public call surface

pub mod migrations;
pub mod session;

pub use migrations::init_db;
pub use session::Session;
