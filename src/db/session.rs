//! The database session helper.
//!
//! One [`Session`] owns one connection pool and the profile it was built
//! from. Every operation is a stateless request/response against the
//! backing database: nothing is cached, nothing is retried, and each call
//! either fully succeeds or fully fails (bulk writes run in a single
//! transaction). A session is meant for one caller at a time; open one
//! session per concurrent user.

use std::collections::BTreeMap;
use std::path::Path;

use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use tracing::{debug, info};
use wkt::{ToWkt, TryFromWkt};

use crate::config::{ConnectionProfile, Verbosity};
use crate::db::migrations::init_db;
use crate::error::{Error, ImportError, SpatializeError};
use crate::geo::{GeoTable, GEOMETRY_COLUMN};
use crate::import::{infer_column_types, read_csv_table, sanitize_column_name, ImportMode};
use crate::table::{Table, Value};

/// Helper over one spatial database: raw execution, tabular queries,
/// bulk imports, and point spatialization.
pub struct Session {
    pool: SqlitePool,
    profile: ConnectionProfile,
}

impl Session {
    /// Open the database named by the profile and build a session on it.
    pub async fn connect(profile: ConnectionProfile) -> Result<Self, Error> {
        let pool = init_db(&profile).await?;
        if profile.verbosity >= Verbosity::Full {
            info!("Opened session for {}", profile.database);
        }
        Ok(Session { pool, profile })
    }

    /// Wrap an already initialized pool.
    pub fn from_pool(pool: SqlitePool, profile: ConnectionProfile) -> Self {
        Session { pool, profile }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    /// Send a statement for side effect (DDL/DML). Multi-statement
    /// scripts are allowed. Errors are surfaced verbatim.
    pub async fn execute(&self, sql: &str) -> Result<(), Error> {
        if self.profile.verbosity >= Verbosity::Full {
            debug!(sql, "execute");
        }
        self.pool.execute(sql).await?;
        Ok(())
    }

    /// Run a read query and materialize the result as a [`Table`].
    ///
    /// Column order matches the statement's selected order, rows come back
    /// in server-returned order. The statement is prepared first so a
    /// zero-row result still carries its column headers.
    pub async fn query_as_table(&self, sql: &str) -> Result<Table, Error> {
        if self.profile.verbosity >= Verbosity::Full {
            debug!(sql, "query_as_table");
        }
        let statement = self.pool.prepare(sql).await?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let rows = statement.query().fetch_all(&self.pool).await?;

        let mut table = Table::new(columns);
        for row in &rows {
            let mut values = Vec::with_capacity(row.len());
            for idx in 0..row.len() {
                values.push(decode_value(row, idx)?);
            }
            table.push_row(values)?;
        }
        Ok(table)
    }

    /// Run a query and return the first column of the first row.
    ///
    /// # Errors
    /// Returns `Error::Database` if the query fails or returns no rows.
    pub async fn query_item(&self, sql: &str) -> Result<Value, Error> {
        let row = sqlx::query(sql).fetch_one(&self.pool).await?;
        Ok(decode_value(&row, 0)?)
    }

    /// Names of all user tables, alphabetical. The crate's own geometry
    /// registry is bookkeeping and is not listed.
    pub async fn table_list(&self) -> Result<Vec<String>, Error> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
               AND name != 'geometry_columns'
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
    }

    pub async fn table_exists(&self, table_name: &str) -> Result<bool, Error> {
        let row = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Load a delimited file into a table. Headers are sanitized and
    /// column types inferred from the whole source.
    pub async fn import_csv(
        &self,
        path: impl AsRef<Path>,
        table_name: &str,
        mode: ImportMode,
    ) -> Result<u64, Error> {
        let source = read_csv_table(path.as_ref()).map_err(Error::Import)?;
        self.import_table(&source, table_name, mode).await
    }

    /// Load an in-memory [`Table`] into a database table.
    ///
    /// The whole import runs in one transaction. Appending into an
    /// existing table requires its column set to match the (sanitized)
    /// source columns exactly.
    pub async fn import_table(
        &self,
        source: &Table,
        table_name: &str,
        mode: ImportMode,
    ) -> Result<u64, Error> {
        if source.columns().is_empty() {
            return Err(ImportError::EmptySource.into());
        }
        let columns: Vec<String> = source
            .columns()
            .iter()
            .map(|c| sanitize_column_name(c))
            .collect();

        let exists = self.table_exists(table_name).await?;
        match mode {
            ImportMode::Fail if exists => {
                return Err(ImportError::TableExists {
                    table: table_name.to_string(),
                }
                .into());
            }
            ImportMode::Replace if exists => {
                self.pool
                    .execute(format!("DROP TABLE {}", quote_ident(table_name)).as_str())
                    .await?;
            }
            ImportMode::Append if exists => {
                let existing = self.column_names(table_name).await?;
                if existing != columns {
                    return Err(ImportError::SchemaMismatch {
                        table: table_name.to_string(),
                        existing: existing.join(", "),
                        incoming: columns.join(", "),
                    }
                    .into());
                }
            }
            _ => {}
        }

        let appending = exists && mode == ImportMode::Append;
        if !appending {
            let types = infer_column_types(source);
            let column_sql: Vec<String> = columns
                .iter()
                .zip(types.iter())
                .map(|(name, ty)| format!("{} {}", quote_ident(name), ty))
                .collect();
            self.pool
                .execute(
                    format!(
                        "CREATE TABLE {} ({})",
                        quote_ident(table_name),
                        column_sql.join(", ")
                    )
                    .as_str(),
                )
                .await?;
        }

        let written = self.insert_rows(table_name, &columns, source.rows(), None).await?;

        if self.profile.verbosity >= Verbosity::Minimal {
            info!(table = table_name, rows = written, "Imported table");
        }
        Ok(written)
    }

    /// Load a [`GeoTable`] into a database table, replacing any existing
    /// table of that name. Attribute columns are written alongside a WKT
    /// `geom` column; the table is registered in `geometry_columns` with
    /// the frame's SRID and indexed on the geometry column.
    pub async fn import_geo_table(
        &self,
        source: &GeoTable,
        table_name: &str,
    ) -> Result<u64, Error> {
        let attributes = source.attributes();
        if attributes.columns().is_empty() {
            return Err(ImportError::EmptySource.into());
        }
        let columns: Vec<String> = attributes
            .columns()
            .iter()
            .map(|c| sanitize_column_name(c))
            .collect();
        if let Some(reserved) = columns.iter().find(|c| c.as_str() == GEOMETRY_COLUMN) {
            return Err(ImportError::ReservedColumn(reserved.clone()).into());
        }

        self.pool
            .execute(format!("DROP TABLE IF EXISTS {}", quote_ident(table_name)).as_str())
            .await?;

        let types = infer_column_types(attributes);
        let mut column_sql: Vec<String> = columns
            .iter()
            .zip(types.iter())
            .map(|(name, ty)| format!("{} {}", quote_ident(name), ty))
            .collect();
        column_sql.push(format!("{} TEXT", quote_ident(GEOMETRY_COLUMN)));
        self.pool
            .execute(
                format!(
                    "CREATE TABLE {} ({})",
                    quote_ident(table_name),
                    column_sql.join(", ")
                )
                .as_str(),
            )
            .await?;

        let geometry_wkt: Vec<String> = source
            .geometry()
            .iter()
            .map(|g| g.wkt_string())
            .collect();
        let written = self
            .insert_rows(table_name, &columns, attributes.rows(), Some(&geometry_wkt))
            .await?;

        self.register_geometry_column(
            table_name,
            GEOMETRY_COLUMN,
            source.geometry_type(),
            source.epsg(),
        )
        .await?;
        self.add_spatial_index(table_name).await?;

        if self.profile.verbosity >= Verbosity::Minimal {
            info!(
                table = table_name,
                rows = written,
                srid = source.epsg(),
                "Imported geospatial table"
            );
        }
        Ok(written)
    }

    /// Combine two numeric columns of an existing table into a WKT point
    /// `geom` column tagged with the given EPSG code.
    ///
    /// Coordinates must be non-null and numeric in every row; offending
    /// tables are rejected before anything is written. The geometry
    /// updates run in a single transaction, then the table is registered
    /// in `geometry_columns` and indexed on the geometry column.
    pub async fn spatialize_points(
        &self,
        table_name: &str,
        x_column: &str,
        y_column: &str,
        epsg: i32,
    ) -> Result<u64, Error> {
        if !self.table_exists(table_name).await? {
            return Err(SpatializeError::MissingTable {
                table: table_name.to_string(),
            }
            .into());
        }
        let existing = self.column_names(table_name).await?;
        for column in [x_column, y_column] {
            if !existing.iter().any(|c| c == column) {
                return Err(SpatializeError::MissingColumn {
                    column: column.to_string(),
                }
                .into());
            }
        }

        let select_sql = format!(
            "SELECT rowid, {}, {} FROM {}",
            quote_ident(x_column),
            quote_ident(y_column),
            quote_ident(table_name)
        );
        let rows = sqlx::query(&select_sql).fetch_all(&self.pool).await?;

        let mut points: Vec<(i64, String)> = Vec::with_capacity(rows.len());
        let mut nulls = 0i64;
        for row in &rows {
            let rowid: i64 = row.try_get(0).map_err(Error::Database)?;
            let x_cell = decode_value(row, 1)?;
            let y_cell = decode_value(row, 2)?;
            if x_cell.is_null() || y_cell.is_null() {
                nulls += 1;
                continue;
            }
            let x = x_cell
                .as_f64()
                .ok_or_else(|| SpatializeError::NonNumericColumn {
                    column: x_column.to_string(),
                })?;
            let y = y_cell
                .as_f64()
                .ok_or_else(|| SpatializeError::NonNumericColumn {
                    column: y_column.to_string(),
                })?;
            points.push((rowid, geo_types::Point::new(x, y).wkt_string()));
        }
        if nulls > 0 {
            return Err(SpatializeError::NullCoordinates { count: nulls }.into());
        }

        if !existing.iter().any(|c| c == GEOMETRY_COLUMN) {
            self.pool
                .execute(
                    format!(
                        "ALTER TABLE {} ADD COLUMN {} TEXT",
                        quote_ident(table_name),
                        quote_ident(GEOMETRY_COLUMN)
                    )
                    .as_str(),
                )
                .await?;
        }

        let update_sql = format!(
            "UPDATE {} SET {} = ? WHERE rowid = ?",
            quote_ident(table_name),
            quote_ident(GEOMETRY_COLUMN)
        );
        let mut tx = self.pool.begin().await?;
        for (rowid, wkt) in &points {
            sqlx::query(&update_sql)
                .bind(wkt.as_str())
                .bind(rowid)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        self.register_geometry_column(table_name, GEOMETRY_COLUMN, "POINT", epsg)
            .await?;
        self.add_spatial_index(table_name).await?;

        if self.profile.verbosity >= Verbosity::Minimal {
            info!(
                table = table_name,
                rows = points.len(),
                srid = epsg,
                "Spatialized point table"
            );
        }
        Ok(points.len() as u64)
    }

    /// Run a read query over a registered spatial table and materialize
    /// the result as a [`GeoTable`], parsing the WKT geometry column back
    /// into geometry values.
    ///
    /// The geometry column name and SRID come from the table's
    /// `geometry_columns` entry; the query must select that column, and
    /// every other selected column becomes an attribute of the frame.
    pub async fn query_geo_table(
        &self,
        sql: &str,
        table_name: &str,
    ) -> Result<GeoTable, Error> {
        let (geometry_column, srid) = self
            .registered_geometry(table_name)
            .await?
            .ok_or_else(|| SpatializeError::NotSpatial {
                table: table_name.to_string(),
            })?;

        let full = self.query_as_table(sql).await?;
        let geom_idx = full
            .column_index(&geometry_column)
            .ok_or_else(|| SpatializeError::MissingColumn {
                column: geometry_column.clone(),
            })?;

        let attribute_columns: Vec<String> = full
            .columns()
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != geom_idx)
            .map(|(_, name)| name.clone())
            .collect();
        let mut attributes = Table::new(attribute_columns);
        let mut geometry = Vec::with_capacity(full.len());
        for row in full.rows() {
            let text = match &row[geom_idx] {
                Value::Text(s) => s,
                other => {
                    return Err(SpatializeError::InvalidGeometry {
                        detail: format!("expected WKT text, got {}", other),
                    }
                    .into())
                }
            };
            let geom = geo_types::Geometry::<f64>::try_from_wkt_str(text).map_err(|e| {
                SpatializeError::InvalidGeometry {
                    detail: e.to_string(),
                }
            })?;
            geometry.push(geom);

            let values: Vec<Value> = row
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != geom_idx)
                .map(|(_, value)| value.clone())
                .collect();
            attributes.push_row(values)?;
        }

        Ok(GeoTable::new(attributes, geometry, srid)?)
    }

    /// Map every registered spatial table to its SRID. Empty when the
    /// database carries no recognized geometry columns.
    pub async fn list_spatial_tables(&self) -> Result<BTreeMap<String, i32>, Error> {
        // A database created outside this crate may lack the registry.
        if !self.table_exists("geometry_columns").await? {
            return Ok(BTreeMap::new());
        }
        let rows =
            sqlx::query("SELECT f_table_name, srid FROM geometry_columns ORDER BY f_table_name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("f_table_name"), r.get::<i32, _>("srid")))
            .collect())
    }

    /// Index the geometry column of a table. Idempotent.
    pub async fn add_spatial_index(&self, table_name: &str) -> Result<(), Error> {
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&format!("gix_{}", table_name)),
            quote_ident(table_name),
            quote_ident(GEOMETRY_COLUMN)
        );
        self.pool.execute(sql.as_str()).await?;
        Ok(())
    }

    async fn insert_rows(
        &self,
        table_name: &str,
        columns: &[String],
        rows: &[Vec<Value>],
        geometry_wkt: Option<&[String]>,
    ) -> Result<u64, Error> {
        let mut insert_columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let mut placeholders = vec!["?"; columns.len()];
        if geometry_wkt.is_some() {
            insert_columns.push(quote_ident(GEOMETRY_COLUMN));
            placeholders.push("?");
        }
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table_name),
            insert_columns.join(", "),
            placeholders.join(", ")
        );

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for (idx, row) in rows.iter().enumerate() {
            let mut query = sqlx::query(&insert_sql);
            for value in row {
                query = bind_value(query, value);
            }
            if let Some(wkt) = geometry_wkt {
                query = query.bind(wkt[idx].as_str());
            }
            query.execute(&mut *tx).await?;
            written += 1;
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn register_geometry_column(
        &self,
        table_name: &str,
        column: &str,
        geometry_type: &str,
        srid: i32,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO geometry_columns (f_table_name, f_geometry_column, geometry_type, srid)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(f_table_name) DO UPDATE SET
                f_geometry_column = excluded.f_geometry_column,
                geometry_type = excluded.geometry_type,
                srid = excluded.srid
            "#,
        )
        .bind(table_name)
        .bind(column)
        .bind(geometry_type)
        .bind(srid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn registered_geometry(
        &self,
        table_name: &str,
    ) -> Result<Option<(String, i32)>, Error> {
        if !self.table_exists("geometry_columns").await? {
            return Ok(None);
        }
        let row = sqlx::query(
            "SELECT f_geometry_column, srid FROM geometry_columns WHERE f_table_name = ?",
        )
        .bind(table_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| (r.get::<String, _>(0), r.get::<i32, _>(1))))
    }

    async fn column_names(&self, table_name: &str) -> Result<Vec<String>, Error> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table_name));
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
    }
}

/// Quote an identifier for interpolation into SQL. Names are otherwise
/// passed through for the database itself to validate.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn decode_value(row: &SqliteRow, idx: usize) -> Result<Value, sqlx::Error> {
    use sqlx::Decode;

    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();
    let column_decode = |source: sqlx::error::BoxDynError| sqlx::Error::ColumnDecode {
        index: idx.to_string(),
        source,
    };

    // Rows written by this crate carry plain storage classes; the extra
    // names cover declared types on tables created elsewhere. Anything
    // unrecognized decodes as text, which SQLite can always produce.
    match type_name.as_str() {
        "INTEGER" | "INT" | "BOOLEAN" => Ok(Value::Integer(
            <i64 as Decode<'_, Sqlite>>::decode(raw).map_err(column_decode)?,
        )),
        "REAL" | "NUMERIC" | "FLOAT" | "DOUBLE" => Ok(Value::Real(
            <f64 as Decode<'_, Sqlite>>::decode(raw).map_err(column_decode)?,
        )),
        "BLOB" => Ok(Value::Blob(
            <Vec<u8> as Decode<'_, Sqlite>>::decode(raw).map_err(column_decode)?,
        )),
        _ => Ok(Value::Text(
            <String as Decode<'_, Sqlite>>::decode(raw).map_err(column_decode)?,
        )),
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Integer(i) => query.bind(*i),
        Value::Real(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Blob(b) => query.bind(b.as_slice()),
    }
}
