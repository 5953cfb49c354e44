//! In-memory geospatial frames and point construction.
//!
//! Geometries are `geo-types` values; the database stores them as WKT
//! text tagged with an EPSG code in the `geometry_columns` registry.

use geo_types::{Geometry, Point};

use crate::error::SpatializeError;
use crate::table::Table;

/// Name of the geometry column written by the session.
pub const GEOMETRY_COLUMN: &str = "geom";

/// An attribute [`Table`] with one geometry per row and a spatial
/// reference. The geospatial counterpart of an in-memory frame.
#[derive(Debug, Clone)]
pub struct GeoTable {
    attributes: Table,
    geometry: Vec<Geometry<f64>>,
    epsg: i32,
}

impl GeoTable {
    /// Pair attribute rows with geometries. Fails if the counts differ.
    pub fn new(
        attributes: Table,
        geometry: Vec<Geometry<f64>>,
        epsg: i32,
    ) -> Result<Self, SpatializeError> {
        if attributes.len() != geometry.len() {
            return Err(SpatializeError::LengthMismatch {
                rows: attributes.len(),
                geometries: geometry.len(),
            });
        }
        Ok(GeoTable {
            attributes,
            geometry,
            epsg,
        })
    }

    pub fn attributes(&self) -> &Table {
        &self.attributes
    }

    pub fn geometry(&self) -> &[Geometry<f64>] {
        &self.geometry
    }

    pub fn epsg(&self) -> i32 {
        self.epsg
    }

    /// WKT type name for the registry, e.g. `POINT` or `MULTIPOLYGON`.
    ///
    /// Mixed single/multi frames report the MULTI variant, matching how
    /// mixed shapes usually arrive from upstream sources.
    pub fn geometry_type(&self) -> &'static str {
        self.geometry
            .iter()
            .map(geometry_type_name)
            .max_by_key(|name| name.len())
            .unwrap_or("GEOMETRY")
    }
}

pub(crate) fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "POINT",
        Geometry::Line(_) | Geometry::LineString(_) => "LINESTRING",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "POLYGON",
        Geometry::MultiPoint(_) => "MULTIPOINT",
        Geometry::MultiLineString(_) => "MULTILINESTRING",
        Geometry::MultiPolygon(_) => "MULTIPOLYGON",
        Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
    }
}

/// Build a point [`GeoTable`] from two coordinate columns of a plain
/// table. The in-memory counterpart of `Session::spatialize_points`.
///
/// Coordinates are coerced to float (text cells are parsed). Fails if a
/// column is missing, holds a non-numeric value, or any row has a null
/// coordinate.
pub fn spatialize_point_table(
    table: &Table,
    x_column: &str,
    y_column: &str,
    epsg: i32,
) -> Result<GeoTable, SpatializeError> {
    let x_idx = table
        .column_index(x_column)
        .ok_or_else(|| SpatializeError::MissingColumn {
            column: x_column.to_string(),
        })?;
    let y_idx = table
        .column_index(y_column)
        .ok_or_else(|| SpatializeError::MissingColumn {
            column: y_column.to_string(),
        })?;

    let mut geometry = Vec::with_capacity(table.len());
    let mut nulls = 0i64;
    for row in table.rows() {
        let x_cell = &row[x_idx];
        let y_cell = &row[y_idx];
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
        geometry.push(Geometry::Point(Point::new(x, y)));
    }

    if nulls > 0 {
        return Err(SpatializeError::NullCoordinates { count: nulls });
    }

    GeoTable::new(table.clone(), geometry, epsg)
}
