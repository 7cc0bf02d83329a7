//! SQLite/SpatiaLite SQL dialect implementation

use super::dialect::{GeometryToken, SqlDialect, format_number, quote_literal};
use crate::domain::expression::{BoundingBox, SpatialPredicate};

/// Provider-neutral → SpatiaLite function names
///
/// SpatiaLite renames a few functions: `length` is `GLength` and `union`
/// is `GUnion`.
static SPATIALITE_FUNCTIONS: &[(&str, &str)] = &[
    ("intersects", "ST_Intersects"),
    ("contains", "ST_Contains"),
    ("within", "ST_Within"),
    ("crosses", "ST_Crosses"),
    ("touches", "ST_Touches"),
    ("overlaps", "ST_Overlaps"),
    ("disjoint", "ST_Disjoint"),
    ("equals", "ST_Equals"),
    ("dwithin", "PtDistWithin"),
    ("buffer", "ST_Buffer"),
    ("centroid", "ST_Centroid"),
    ("area", "ST_Area"),
    ("length", "GLength"),
    ("perimeter", "ST_Perimeter"),
    ("distance", "ST_Distance"),
    ("geom_from_wkt", "GeomFromText"),
    ("geom_to_wkt", "AsText"),
    ("union", "GUnion"),
    ("intersection", "ST_Intersection"),
    ("difference", "ST_Difference"),
    ("convex_hull", "ST_ConvexHull"),
    ("bounds", "ST_Envelope"),
    ("transform", "ST_Transform"),
    ("make_point", "MakePoint"),
    ("num_points", "ST_NPoints"),
    ("is_valid", "ST_IsValid"),
    ("make_valid", "MakeValid"),
    ("simplify", "ST_Simplify"),
    ("x", "ST_X"),
    ("y", "ST_Y"),
];

/// SQLite SQL dialect (SpatiaLite functions)
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn function_map(&self) -> &'static [(&'static str, &'static str)] {
        SPATIALITE_FUNCTIONS
    }

    fn geometry_token(&self, token: GeometryToken, geom: &str) -> String {
        match token {
            GeometryToken::Area => format!("ST_Area({})", geom),
            GeometryToken::Length => format!("GLength({})", geom),
            GeometryToken::Perimeter => format!("ST_Perimeter({})", geom),
            GeometryToken::X => format!("ST_X({})", geom),
            GeometryToken::Y => format!("ST_Y({})", geom),
            GeometryToken::Geometry => geom.to_string(),
        }
    }

    fn buffer(&self, geom: &str, distance: f64, _segments: u32) -> String {
        format!("ST_Buffer({}, {})", geom, format_number(distance))
    }

    fn envelope(&self, bbox: &BoundingBox) -> String {
        match bbox.srid {
            Some(srid) => format!(
                "BuildMbr({}, {}, {}, {}, {})",
                format_number(bbox.xmin),
                format_number(bbox.ymin),
                format_number(bbox.xmax),
                format_number(bbox.ymax),
                srid
            ),
            None => format!(
                "BuildMbr({}, {}, {}, {})",
                format_number(bbox.xmin),
                format_number(bbox.ymin),
                format_number(bbox.xmax),
                format_number(bbox.ymax)
            ),
        }
    }

    fn bbox_filter(&self, geom_col: &str, bbox: &BoundingBox) -> String {
        format!("MbrIntersects({}, {})", geom_col, self.envelope(bbox))
    }

    fn geom_from_wkt(&self, wkt: &str, srid: Option<i32>) -> String {
        match srid {
            Some(srid) => format!("GeomFromText({}, {})", quote_literal(wkt), srid),
            None => format!("GeomFromText({})", quote_literal(wkt)),
        }
    }

    fn spatial_predicate(
        &self,
        predicate: SpatialPredicate,
        geom: &str,
        other: &str,
        distance: f64,
    ) -> String {
        match predicate {
            // SpatiaLite has no ST_DWithin; distance comparison is equivalent
            SpatialPredicate::Dwithin => {
                format!("ST_Distance({}, {}) <= {}", geom, other, format_number(distance))
            }
            SpatialPredicate::Intersects => format!("ST_Intersects({}, {}) = 1", geom, other),
            SpatialPredicate::Contains => format!("ST_Contains({}, {}) = 1", geom, other),
            SpatialPredicate::Within => format!("ST_Within({}, {}) = 1", geom, other),
            SpatialPredicate::Crosses => format!("ST_Crosses({}, {}) = 1", geom, other),
            SpatialPredicate::Touches => format!("ST_Touches({}, {}) = 1", geom, other),
            SpatialPredicate::Overlaps => format!("ST_Overlaps({}, {}) = 1", geom, other),
            SpatialPredicate::Disjoint => format!("ST_Disjoint({}, {}) = 1", geom, other),
            SpatialPredicate::Equals => format!("ST_Equals({}, {}) = 1", geom, other),
        }
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn cast(&self, expr: &str, sql_type: &str) -> String {
        format!("CAST({} AS {})", expr, sqlite_type(sql_type))
    }
}

/// Map a PostgreSQL-style type name onto SQLite storage classes
pub(crate) fn sqlite_type(sql_type: &str) -> &'static str {
    match sql_type.to_ascii_lowercase().as_str() {
        "int" | "int2" | "int4" | "int8" | "integer" | "bigint" | "smallint" | "bool"
        | "boolean" => "INTEGER",
        "numeric" | "real" | "float" | "float4" | "float8" | "double" | "decimal" => "REAL",
        "blob" | "bytea" => "BLOB",
        _ => "TEXT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_keeps_target_only() {
        assert_eq!(
            SqliteDialect.transform("GeomFromText('POINT(1 2)', 4326)", 4326, 2154),
            "ST_Transform(GeomFromText('POINT(1 2)', 4326), 2154)"
        );
    }

    #[test]
    fn test_length_is_renamed() {
        let dialect = SqliteDialect;
        assert_eq!(
            dialect.geometry_token(GeometryToken::Length, "\"geom\""),
            "GLength(\"geom\")"
        );
        assert!(
            dialect
                .function_map()
                .iter()
                .any(|(from, to)| *from == "union" && *to == "GUnion")
        );
    }

    #[test]
    fn test_bbox_filter_without_srid() {
        let dialect = SqliteDialect;
        let bbox = BoundingBox::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(
            dialect.bbox_filter("\"geom\"", &bbox),
            "MbrIntersects(\"geom\", BuildMbr(1, 2, 3, 4))"
        );
    }

    #[test]
    fn test_cast_uses_cast_function() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.cast("\"pop\"", "numeric"), "CAST(\"pop\" AS REAL)");
        assert_eq!(dialect.cast("\"code\"", "varchar"), "CAST(\"code\" AS TEXT)");
        assert_eq!(dialect.cast("\"n\"", "bigint"), "CAST(\"n\" AS INTEGER)");
    }

    #[test]
    fn test_booleans_are_integers() {
        let dialect = SqliteDialect;
        assert_eq!(dialect.bool_literal(true), "1");
        assert_eq!(dialect.bool_literal(false), "0");
    }
}
