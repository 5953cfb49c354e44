//! Reading delimited sources into [`Table`]s, plus the column-name
//! sanitization and type inference the import operations rely on.

use std::path::Path;

use crate::error::ImportError;
use crate::table::{Table, Value};

/// What to do when the target table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Refuse the import.
    Fail,
    /// Append rows; the existing column set must match the source exactly.
    Append,
    /// Drop the existing table and recreate it from the source.
    Replace,
}

/// Normalize a header into a safe lowercase column name.
///
/// Spaces become underscores; `.`, `-`, `(`, `)` and `+` are stripped,
/// so `geo.display-label` becomes `geodisplaylabel`.
pub fn sanitize_column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        match ch {
            ' ' => out.push('_'),
            '.' | '-' | '(' | ')' | '+' => {}
            c => out.extend(c.to_lowercase()),
        }
    }
    out
}

/// Read a delimited file with a header row into a [`Table`].
///
/// Cells are typed individually: empty cells become NULL, integers and
/// floats are parsed, everything else stays text. Column typing for the
/// target table is decided afterwards over whole columns by
/// [`infer_column_types`].
pub fn read_csv_table(path: &Path) -> Result<Table, ImportError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(sanitize_column_name)
        .collect();
    if headers.is_empty() {
        return Err(ImportError::EmptySource);
    }

    let mut table = Table::new(headers);
    for record in reader.records() {
        let record = record?;
        let row: Vec<Value> = record.iter().map(parse_cell).collect();
        table.push_row(row)?;
    }

    Ok(table)
}

fn parse_cell(raw: &str) -> Value {
    if raw.is_empty() {
        Value::Null
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Value::Real(f)
    } else {
        Value::Text(raw.to_string())
    }
}

/// Pick a SQL storage type per column.
///
/// All-integer columns map to INTEGER, numeric mixes to REAL, anything
/// else to TEXT. NULL cells never veto a type; an all-NULL column falls
/// back to TEXT.
pub fn infer_column_types(table: &Table) -> Vec<&'static str> {
    (0..table.columns().len())
        .map(|i| {
            let mut saw_value = false;
            let mut all_integer = true;
            let mut all_numeric = true;
            for row in table.rows() {
                match &row[i] {
                    Value::Null => {}
                    Value::Integer(_) => saw_value = true,
                    Value::Real(_) => {
                        saw_value = true;
                        all_integer = false;
                    }
                    Value::Text(_) | Value::Blob(_) => {
                        saw_value = true;
                        all_integer = false;
                        all_numeric = false;
                    }
                }
            }
            if !saw_value {
                "TEXT"
            } else if all_integer {
                "INTEGER"
            } else if all_numeric {
                "REAL"
            } else {
                "TEXT"
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_column_name() {
        assert_eq!(sanitize_column_name("Column Name"), "column_name");
        assert_eq!(sanitize_column_name("geo.display-label"), "geodisplaylabel");
        assert_eq!(sanitize_column_name("Pop (2020)+"), "pop_2020");
        assert_eq!(sanitize_column_name("lat"), "lat");
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(parse_cell(""), Value::Null);
        assert_eq!(parse_cell("42"), Value::Integer(42));
        assert_eq!(parse_cell("-75.16"), Value::Real(-75.16));
        assert_eq!(parse_cell("Philadelphia"), Value::Text("Philadelphia".to_string()));
    }

    #[test]
    fn test_infer_column_types() {
        let mut table = Table::new(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
            "d".to_string(),
        ]);
        table
            .push_row(vec![
                Value::Integer(1),
                Value::Integer(2),
                Value::Text("x".to_string()),
                Value::Null,
            ])
            .unwrap();
        table
            .push_row(vec![
                Value::Integer(3),
                Value::Real(2.5),
                Value::Text("y".to_string()),
                Value::Null,
            ])
            .unwrap();

        assert_eq!(
            infer_column_types(&table),
            vec!["INTEGER", "REAL", "TEXT", "TEXT"]
        );
    }

    #[test]
    fn test_null_cells_do_not_veto_a_numeric_type() {
        let mut table = Table::new(vec!["v".to_string()]);
        table.push_row(vec![Value::Null]).unwrap();
        table.push_row(vec![Value::Integer(9)]).unwrap();

        assert_eq!(infer_column_types(&table), vec!["INTEGER"]);
    }

    #[test]
    fn test_read_csv_table() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("stations.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Station Name,long_,lat,riders").unwrap();
        writeln!(file, "15th St,-75.1652,39.9526,1200").unwrap();
        writeln!(file, "Spring Garden,-75.1418,,").unwrap();
        drop(file);

        let table = read_csv_table(&path).expect("read failed");
        assert_eq!(
            table.columns(),
            &["station_name", "long_", "lat", "riders"]
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "riders"), Some(&Value::Integer(1200)));
        assert_eq!(table.get(1, "lat"), Some(&Value::Null));
        assert_eq!(table.get(0, "long_"), Some(&Value::Real(-75.1652)));
    }

    #[test]
    fn test_read_csv_table_ragged_row_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "a,b").unwrap();
        writeln!(file, "1,2,3").unwrap();
        drop(file);

        let result = read_csv_table(&path);
        assert!(matches!(result, Err(ImportError::Csv(_))));
    }
}
