//! Table statistics reported by the store
//!
//! Only the row count is required. Column statistics, spatial index presence
//! and the layer extent are best-effort: a store that cannot report them
//! (missing catalog tables, SpatiaLite not loaded, no ANALYZE yet) degrades
//! to heuristics instead of failing the filter.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::TableRef;
use crate::data::{Backend, DataError, QueryConnection, SqlValue};
use crate::domain::expression::BoundingBox;

const DEFAULT_PG_SCHEMA: &str = "public";

/// Planner statistics for one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColumnStats {
    /// Distinct values; negative values are a fraction of the row count
    pub n_distinct: f64,
    pub null_fraction: f64,
}

/// Statistics for one layer table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerStatistics {
    pub table: String,
    pub estimated_row_count: u64,
    pub has_spatial_index: bool,
    pub column_stats: HashMap<String, ColumnStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

impl LayerStatistics {
    pub fn new(table: impl Into<String>, estimated_row_count: u64) -> Self {
        Self {
            table: table.into(),
            estimated_row_count,
            has_spatial_index: false,
            column_stats: HashMap::new(),
            bounding_box: None,
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStats) -> Self {
        self.column_stats.insert(name.into().to_lowercase(), stats);
        self
    }

    pub fn with_bounding_box(mut self, bbox: BoundingBox) -> Self {
        self.bounding_box = Some(bbox);
        self
    }

    pub fn with_spatial_index(mut self, has_spatial_index: bool) -> Self {
        self.has_spatial_index = has_spatial_index;
        self
    }

    /// Column statistics by name, ignoring case and surrounding quotes
    pub fn column(&self, name: &str) -> Option<&ColumnStats> {
        let name = name.trim().trim_matches('"').to_lowercase();
        self.column_stats.get(&name)
    }
}

/// Collect statistics for `table`
///
/// Fails only when the row count itself cannot be obtained.
pub async fn fetch_statistics(
    conn: &dyn QueryConnection,
    table: &TableRef,
) -> Result<LayerStatistics, DataError> {
    let stats = match conn.backend() {
        Backend::Postgres => fetch_postgres(conn, table).await?,
        Backend::Sqlite => fetch_sqlite(conn, table).await?,
    };
    tracing::debug!(
        table = %table,
        rows = stats.estimated_row_count,
        spatial_index = stats.has_spatial_index,
        columns = stats.column_stats.len(),
        has_extent = stats.bounding_box.is_some(),
        "Layer statistics fetched"
    );
    Ok(stats)
}

// =============================================================================
// PostgreSQL / PostGIS
// =============================================================================

async fn fetch_postgres(
    conn: &dyn QueryConnection,
    table: &TableRef,
) -> Result<LayerStatistics, DataError> {
    let dialect = Backend::Postgres.dialect();
    let schema = table.schema.as_deref().unwrap_or(DEFAULT_PG_SCHEMA);
    let ident_params = [SqlValue::from(schema), SqlValue::from(table.table.as_str())];

    // reltuples is -1 (PG14+) or 0 before the first ANALYZE
    let reltuples = conn
        .fetch_all(
            "SELECT c.reltuples::float8 FROM pg_class c \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = $1 AND c.relname = $2",
            &ident_params,
        )
        .await?
        .first()
        .and_then(|row| row.first())
        .and_then(SqlValue::as_f64)
        .unwrap_or(0.0);

    let row_count = if reltuples > 0.0 {
        reltuples as u64
    } else {
        let sql = format!("SELECT COUNT(*) FROM {}", table.qualified_name(dialect));
        conn.fetch_scalar_i64(&sql, &[])
            .await?
            .unwrap_or(0)
            .max(0) as u64
    };

    let mut stats = LayerStatistics::new(table.to_string(), row_count);

    match conn
        .fetch_all(
            "SELECT attname::text, n_distinct::float8, null_frac::float8 FROM pg_stats \
             WHERE schemaname = $1 AND tablename = $2",
            &ident_params,
        )
        .await
    {
        Ok(rows) => {
            for row in rows {
                if let [name, n_distinct, null_frac, ..] = row.as_slice()
                    && let (Some(name), Some(n_distinct), Some(null_fraction)) =
                        (name.as_str(), n_distinct.as_f64(), null_frac.as_f64())
                {
                    stats = stats.with_column(
                        name,
                        ColumnStats {
                            n_distinct,
                            null_fraction,
                        },
                    );
                }
            }
        }
        Err(e) => tracing::warn!(table = %table, error = %e, "Column statistics unavailable"),
    }

    match conn
        .fetch_scalar_i64(
            "SELECT COUNT(*) FROM pg_indexes \
             WHERE schemaname = $1 AND tablename = $2 AND indexdef ILIKE '%USING gist%'",
            &ident_params,
        )
        .await
    {
        Ok(count) => stats.has_spatial_index = count.unwrap_or(0) > 0,
        Err(e) => tracing::warn!(table = %table, error = %e, "Spatial index lookup failed"),
    }

    let geom_params = [
        SqlValue::from(schema),
        SqlValue::from(table.table.as_str()),
        SqlValue::from(table.geometry_column.as_str()),
    ];
    match conn
        .fetch_all(
            "SELECT ST_XMin(e)::float8, ST_YMin(e)::float8, ST_XMax(e)::float8, \
             ST_YMax(e)::float8, Find_SRID($1, $2, $3) \
             FROM (SELECT ST_EstimatedExtent($1, $2, $3) AS e) s",
            &geom_params,
        )
        .await
    {
        Ok(rows) => {
            if let Some(bbox) = rows.first().and_then(|row| extent_from_row(row)) {
                stats.bounding_box = Some(bbox);
            }
        }
        Err(e) => tracing::warn!(table = %table, error = %e, "Layer extent unavailable"),
    }

    Ok(stats)
}

// =============================================================================
// SQLite / SpatiaLite / GeoPackage
// =============================================================================

async fn fetch_sqlite(
    conn: &dyn QueryConnection,
    table: &TableRef,
) -> Result<LayerStatistics, DataError> {
    let dialect = Backend::Sqlite.dialect();
    let qualified = table.qualified_name(dialect);

    let count_sql = format!("SELECT COUNT(*) FROM {}", qualified);
    let row_count = conn
        .fetch_scalar_i64(&count_sql, &[])
        .await?
        .unwrap_or(0)
        .max(0) as u64;

    let mut stats = LayerStatistics::new(table.to_string(), row_count);
    let mut srid = None;

    let geom_params = [
        SqlValue::from(table.table.as_str()),
        SqlValue::from(table.geometry_column.as_str()),
    ];
    match conn
        .fetch_all(
            "SELECT spatial_index_enabled, srid FROM geometry_columns \
             WHERE lower(f_table_name) = lower(?) AND lower(f_geometry_column) = lower(?)",
            &geom_params,
        )
        .await
    {
        Ok(rows) => {
            if let Some(row) = rows.first() {
                stats.has_spatial_index = row.first().and_then(SqlValue::as_i64).unwrap_or(0) > 0;
                srid = row.get(1).and_then(SqlValue::as_i64).map(|v| v as i32);
            }
        }
        Err(_) => {
            // GeoPackage keeps its R-tree registrations in gpkg_extensions
            match conn
                .fetch_scalar_i64(
                    "SELECT COUNT(*) FROM gpkg_extensions \
                     WHERE lower(table_name) = lower(?) AND lower(column_name) = lower(?) \
                     AND extension_name = 'gpkg_rtree_index'",
                    &geom_params,
                )
                .await
            {
                Ok(count) => stats.has_spatial_index = count.unwrap_or(0) > 0,
                Err(e) => tracing::debug!(table = %table, error = %e, "No spatial metadata tables"),
            }
        }
    }

    let geom = table.quoted_geometry_column(dialect);
    let extent_sql = format!(
        "SELECT MIN(MbrMinX({g})), MIN(MbrMinY({g})), \
         MAX(MbrMaxX({g})), MAX(MbrMaxY({g})) FROM {t}",
        g = geom,
        t = qualified
    );
    match conn.fetch_all(&extent_sql, &[]).await {
        Ok(rows) => {
            if let Some(bbox) = rows.first().and_then(|row| extent_from_row(row)) {
                stats.bounding_box = Some(match srid {
                    Some(srid) => bbox.with_srid(srid),
                    None => bbox,
                });
            }
        }
        Err(e) => tracing::warn!(table = %table, error = %e, "Layer extent unavailable"),
    }

    Ok(stats)
}

/// Column names of a SQLite table, lowercased
///
/// Empty when the table does not exist.
pub(super) async fn sqlite_columns(
    conn: &dyn QueryConnection,
    table: &TableRef,
) -> Result<HashSet<String>, DataError> {
    let rows = match &table.schema {
        Some(schema) => {
            conn.fetch_all(
                "SELECT name FROM pragma_table_info(?, ?)",
                &[
                    SqlValue::from(table.table.as_str()),
                    SqlValue::from(schema.as_str()),
                ],
            )
            .await?
        }
        None => {
            conn.fetch_all(
                "SELECT name FROM pragma_table_info(?)",
                &[SqlValue::from(table.table.as_str())],
            )
            .await?
        }
    };
    Ok(rows
        .iter()
        .filter_map(|row| row.first().and_then(SqlValue::as_str))
        .map(str::to_lowercase)
        .collect())
}

/// Four coordinates and an optional srid; `None` when any coordinate is null
fn extent_from_row(row: &[SqlValue]) -> Option<BoundingBox> {
    let coord = |idx: usize| row.get(idx).and_then(SqlValue::as_f64);
    let bbox = BoundingBox::new(coord(0)?, coord(1)?, coord(2)?, coord(3)?);
    let bbox = match row.get(4).and_then(SqlValue::as_i64) {
        Some(srid) if srid > 0 => bbox.with_srid(srid as i32),
        _ => bbox,
    };
    (!bbox.is_empty()).then_some(bbox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SqliteConnection;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> SqliteConnection {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE parcels (id INTEGER PRIMARY KEY, geom BLOB, landuse TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        for i in 1..=25 {
            sqlx::query("INSERT INTO parcels (id, landuse) VALUES (?, ?)")
                .bind(i)
                .bind(if i % 2 == 0 { "residential" } else { "farm" })
                .execute(&pool)
                .await
                .unwrap();
        }
        SqliteConnection::from_pool(pool)
    }

    #[tokio::test]
    async fn test_sqlite_row_count_without_spatial_metadata() {
        let conn = setup().await;
        let table = TableRef::new("parcels", "geom", "id");
        let stats = fetch_statistics(&conn, &table).await.unwrap();
        assert_eq!(stats.estimated_row_count, 25);
        assert!(!stats.has_spatial_index);
        assert!(stats.bounding_box.is_none());
        assert!(stats.column_stats.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_spatial_index_from_geometry_columns() {
        let conn = setup().await;
        sqlx::query(
            "CREATE TABLE geometry_columns (f_table_name TEXT, f_geometry_column TEXT, \
             srid INTEGER, spatial_index_enabled INTEGER)",
        )
        .execute(conn.pool())
        .await
        .unwrap();
        sqlx::query("INSERT INTO geometry_columns VALUES ('Parcels', 'GEOM', 4326, 1)")
            .execute(conn.pool())
            .await
            .unwrap();

        let table = TableRef::new("parcels", "geom", "id");
        let stats = fetch_statistics(&conn, &table).await.unwrap();
        assert!(stats.has_spatial_index);
    }

    #[tokio::test]
    async fn test_sqlite_missing_table_fails() {
        let conn = setup().await;
        let table = TableRef::new("missing", "geom", "id");
        assert!(fetch_statistics(&conn, &table).await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_columns() {
        let conn = setup().await;
        let columns = sqlite_columns(&conn, &TableRef::new("Parcels", "geom", "id"))
            .await
            .unwrap();
        let mut names: Vec<&str> = columns.iter().map(String::as_str).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["geom", "id", "landuse"]);

        let missing = sqlite_columns(&conn, &TableRef::new("nowhere", "geom", "id"))
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_column_lookup_ignores_case_and_quotes() {
        let stats = LayerStatistics::new("t", 100).with_column(
            "Landuse",
            ColumnStats {
                n_distinct: 4.0,
                null_fraction: 0.1,
            },
        );
        assert!(stats.column("\"landuse\"").is_some());
        assert!(stats.column("LANDUSE").is_some());
        assert!(stats.column("other").is_none());
    }

    #[test]
    fn test_extent_from_row() {
        let row = vec![
            SqlValue::Real(0.0),
            SqlValue::Real(1.0),
            SqlValue::Real(10.0),
            SqlValue::Real(11.0),
            SqlValue::Integer(2154),
        ];
        let bbox = extent_from_row(&row).unwrap();
        assert_eq!(bbox.srid, Some(2154));
        assert_eq!(bbox.area(), 100.0);

        let nulls = vec![SqlValue::Null; 4];
        assert!(extent_from_row(&nulls).is_none());
    }
}
