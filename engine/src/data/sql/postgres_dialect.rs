//! PostgreSQL/PostGIS SQL dialect implementation

use super::dialect::{GeometryToken, SqlDialect, format_number, quote_literal};
use crate::domain::expression::{BoundingBox, SpatialPredicate};

/// Provider-neutral → PostGIS function names
static POSTGIS_FUNCTIONS: &[(&str, &str)] = &[
    ("intersects", "ST_Intersects"),
    ("contains", "ST_Contains"),
    ("within", "ST_Within"),
    ("crosses", "ST_Crosses"),
    ("touches", "ST_Touches"),
    ("overlaps", "ST_Overlaps"),
    ("disjoint", "ST_Disjoint"),
    ("equals", "ST_Equals"),
    ("dwithin", "ST_DWithin"),
    ("buffer", "ST_Buffer"),
    ("centroid", "ST_Centroid"),
    ("area", "ST_Area"),
    ("length", "ST_Length"),
    ("perimeter", "ST_Perimeter"),
    ("distance", "ST_Distance"),
    ("geom_from_wkt", "ST_GeomFromText"),
    ("geom_to_wkt", "ST_AsText"),
    ("union", "ST_Union"),
    ("intersection", "ST_Intersection"),
    ("difference", "ST_Difference"),
    ("convex_hull", "ST_ConvexHull"),
    ("bounds", "ST_Envelope"),
    ("transform", "ST_Transform"),
    ("make_point", "ST_MakePoint"),
    ("num_points", "ST_NPoints"),
    ("is_valid", "ST_IsValid"),
    ("make_valid", "ST_MakeValid"),
    ("simplify", "ST_Simplify"),
    ("x", "ST_X"),
    ("y", "ST_Y"),
];

/// PostgreSQL SQL dialect (PostGIS functions)
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn function_map(&self) -> &'static [(&'static str, &'static str)] {
        POSTGIS_FUNCTIONS
    }

    fn geometry_token(&self, token: GeometryToken, geom: &str) -> String {
        match token {
            GeometryToken::Area => format!("ST_Area({})", geom),
            GeometryToken::Length => format!("ST_Length({})", geom),
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
        format!(
            "ST_MakeEnvelope({}, {}, {}, {}, {})",
            format_number(bbox.xmin),
            format_number(bbox.ymin),
            format_number(bbox.xmax),
            format_number(bbox.ymax),
            bbox.srid.unwrap_or(0)
        )
    }

    fn bbox_filter(&self, geom_col: &str, bbox: &BoundingBox) -> String {
        format!("{} && {}", geom_col, self.envelope(bbox))
    }

    fn geom_from_wkt(&self, wkt: &str, srid: Option<i32>) -> String {
        match srid {
            Some(srid) => format!("ST_GeomFromText({}, {})", quote_literal(wkt), srid),
            None => format!("ST_GeomFromText({})", quote_literal(wkt)),
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
            SpatialPredicate::Dwithin => {
                format!("ST_DWithin({}, {}, {})", geom, other, format_number(distance))
            }
            SpatialPredicate::Intersects => format!("ST_Intersects({}, {})", geom, other),
            SpatialPredicate::Contains => format!("ST_Contains({}, {})", geom, other),
            SpatialPredicate::Within => format!("ST_Within({}, {})", geom, other),
            SpatialPredicate::Crosses => format!("ST_Crosses({}, {})", geom, other),
            SpatialPredicate::Touches => format!("ST_Touches({}, {})", geom, other),
            SpatialPredicate::Overlaps => format!("ST_Overlaps({}, {})", geom, other),
            SpatialPredicate::Disjoint => format!("ST_Disjoint({}, {})", geom, other),
            SpatialPredicate::Equals => format!("ST_Equals({}, {})", geom, other),
        }
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    fn cast(&self, expr: &str, sql_type: &str) -> String {
        format!("{}::{}", expr, sql_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_token() {
        let dialect = PostgresDialect;
        assert_eq!(
            dialect.geometry_token(GeometryToken::Area, "\"geom\""),
            "ST_Area(\"geom\")"
        );
        assert_eq!(
            dialect.geometry_token(GeometryToken::Geometry, "\"geom\""),
            "\"geom\""
        );
    }

    #[test]
    fn test_bbox_filter() {
        let dialect = PostgresDialect;
        let bbox = BoundingBox::new(0.0, 1.0, 10.0, 11.5).with_srid(2154);
        assert_eq!(
            dialect.bbox_filter("\"geom\"", &bbox),
            "\"geom\" && ST_MakeEnvelope(0, 1, 10, 11.5, 2154)"
        );
    }

    #[test]
    fn test_buffer_ignores_segments() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.buffer("\"geom\"", 25.0, 8), "ST_Buffer(\"geom\", 25)");
    }

    #[test]
    fn test_dwithin_carries_distance() {
        let dialect = PostgresDialect;
        assert_eq!(
            dialect.spatial_predicate(SpatialPredicate::Dwithin, "\"geom\"", "g", 100.0),
            "ST_DWithin(\"geom\", g, 100)"
        );
    }

    #[test]
    fn test_geom_from_wkt_escapes() {
        let dialect = PostgresDialect;
        assert_eq!(
            dialect.geom_from_wkt("POINT(1 2)", Some(4326)),
            "ST_GeomFromText('POINT(1 2)', 4326)"
        );
    }

    #[test]
    fn test_cast() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.cast("\"pop\"", "numeric"), "\"pop\"::numeric");
    }
}
