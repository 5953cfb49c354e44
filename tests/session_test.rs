use std::io::Write;

use geosession::{
    ConnectionProfile, Error, ImportMode, Session, SpatializeError, Value, Verbosity,
};
use tempfile::TempDir;

async fn setup_session() -> (Session, TempDir) {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let session = Session::connect(ConnectionProfile::new(db_path))
        .await
        .expect("connect failed");
    (session, temp_dir)
}

fn write_stations_csv(temp_dir: &TempDir) -> std::path::PathBuf {
    let path = temp_dir.path().join("stations.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "Station Name,long_,lat").unwrap();
    writeln!(file, "15th St,-75.1652,39.9526").unwrap();
    writeln!(file, "Spring Garden,-75.1418,39.9612").unwrap();
    writeln!(file, "Girard,-75.1203,39.9707").unwrap();
    writeln!(file, "Unknown,-75.0000,").unwrap();
    drop(file);
    path
}

#[tokio::test]
async fn test_query_column_order_matches_statement() {
    let (session, _temp) = setup_session().await;
    session
        .execute("CREATE TABLE t (a INTEGER, b TEXT, c REAL)")
        .await
        .unwrap();
    session
        .execute("INSERT INTO t VALUES (1, 'x', 2.5)")
        .await
        .unwrap();

    let table = session.query_as_table("SELECT c, a, b FROM t").await.unwrap();
    assert_eq!(table.columns(), &["c", "a", "b"]);

    let table = session.query_as_table("SELECT b, c FROM t").await.unwrap();
    assert_eq!(table.columns(), &["b", "c"]);
}

#[tokio::test]
async fn test_delete_by_predicate_then_query_returns_no_rows() {
    let (session, temp_dir) = setup_session().await;
    let csv_path = write_stations_csv(&temp_dir);

    session
        .import_csv(&csv_path, "stations", ImportMode::Fail)
        .await
        .expect("import failed");

    session
        .execute("DELETE FROM stations WHERE lat IS NULL")
        .await
        .expect("delete failed");

    let leftover = session
        .query_as_table("SELECT * FROM stations WHERE lat IS NULL")
        .await
        .expect("query failed");
    assert!(leftover.is_empty());
}

#[tokio::test]
async fn test_import_row_count_matches_source() {
    let (session, temp_dir) = setup_session().await;
    let csv_path = write_stations_csv(&temp_dir);

    let written = session
        .import_csv(&csv_path, "stations", ImportMode::Fail)
        .await
        .expect("import failed");
    assert_eq!(written, 4);

    let count = session
        .query_item("SELECT COUNT(*) FROM stations")
        .await
        .expect("count failed");
    assert_eq!(count, Value::Integer(4));
}

#[tokio::test]
async fn test_notebook_flow_spatialize_and_list() {
    let (session, temp_dir) = setup_session().await;
    let csv_path = write_stations_csv(&temp_dir);

    session
        .import_csv(&csv_path, "stations", ImportMode::Fail)
        .await
        .unwrap();

    // A null latitude is rejected outright.
    let result = session.spatialize_points("stations", "long_", "lat", 4326).await;
    match result {
        Err(Error::Spatialize(SpatializeError::NullCoordinates { count })) => {
            assert_eq!(count, 1)
        }
        other => panic!("Expected NullCoordinates, got {:?}", other.err()),
    }

    // Pre-filter nulls the way the notebook does, then spatialize.
    session
        .execute("DELETE FROM stations WHERE lat IS NULL")
        .await
        .unwrap();
    let spatialized = session
        .spatialize_points("stations", "long_", "lat", 4326)
        .await
        .expect("spatialize failed");
    assert_eq!(spatialized, 3);

    let spatial = session.list_spatial_tables().await.expect("list failed");
    assert_eq!(spatial.get("stations"), Some(&4326));

    let geoms = session
        .query_as_table("SELECT geom FROM stations ORDER BY station_name")
        .await
        .unwrap();
    assert_eq!(geoms.len(), 3);
    for row in geoms.rows() {
        let wkt = row[0].as_str().expect("geom should be text");
        assert!(wkt.starts_with("POINT("), "unexpected geometry: {}", wkt);
    }
}

#[tokio::test]
async fn test_list_spatial_tables_empty_without_geometry() {
    let (session, _temp) = setup_session().await;
    session
        .execute("CREATE TABLE plain (a INTEGER)")
        .await
        .unwrap();

    let spatial = session.list_spatial_tables().await.expect("list failed");
    assert!(spatial.is_empty());
}

#[tokio::test]
async fn test_geo_table_round_trip() {
    let (session, temp_dir) = setup_session().await;
    let csv_path = write_stations_csv(&temp_dir);

    session
        .import_csv(&csv_path, "raw_stations", ImportMode::Fail)
        .await
        .unwrap();
    session
        .execute("DELETE FROM raw_stations WHERE lat IS NULL")
        .await
        .unwrap();

    let raw = session
        .query_as_table("SELECT station_name, long_, lat FROM raw_stations")
        .await
        .unwrap();
    let geo = geosession::spatialize_point_table(&raw, "long_", "lat", 4326)
        .expect("spatialize failed");

    session
        .import_geo_table(&geo, "stations_geo")
        .await
        .expect("geo import failed");

    let spatial = session.list_spatial_tables().await.unwrap();
    assert_eq!(spatial.get("stations_geo"), Some(&4326));

    let count = session
        .query_item("SELECT COUNT(*) FROM stations_geo WHERE geom LIKE 'POINT(%'")
        .await
        .unwrap();
    assert_eq!(count, Value::Integer(3));

    // And back out of the database into a frame.
    let read = session
        .query_geo_table("SELECT * FROM stations_geo", "stations_geo")
        .await
        .expect("read back failed");
    assert_eq!(read.epsg(), 4326);
    assert_eq!(read.geometry().len(), 3);
    assert_eq!(read.geometry_type(), "POINT");
    assert_eq!(
        read.attributes().columns(),
        &["station_name", "long_", "lat"]
    );
}

#[tokio::test]
async fn test_verbosity_from_env_profile() {
    let mut env = std::collections::HashMap::new();
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("env.db")
        .to_string_lossy()
        .to_string();
    env.insert("GEOSESSION_DATABASE".to_string(), db_path);
    env.insert("GEOSESSION_VERBOSITY".to_string(), "errors".to_string());

    let profile = ConnectionProfile::from_env_map(env).expect("profile failed");
    assert_eq!(profile.verbosity, Verbosity::Errors);

    let session = Session::connect(profile).await.expect("connect failed");
    let item = session.query_item("SELECT 1").await.unwrap();
    assert_eq!(item, Value::Integer(1));
}
