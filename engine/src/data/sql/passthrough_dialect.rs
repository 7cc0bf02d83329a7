//! Pass-through dialect for file-backed and in-memory providers
//!
//! These providers evaluate the provider-neutral expression language
//! themselves, so expressions are emitted unchanged and helpers render
//! provider-neutral function calls.

use super::dialect::{GeometryToken, SqlDialect, format_number, quote_literal};
use crate::domain::expression::{BoundingBox, SpatialPredicate};

pub struct PassthroughDialect;

impl SqlDialect for PassthroughDialect {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn function_map(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    fn geometry_token(&self, token: GeometryToken, _geom: &str) -> String {
        format!("${}", token.as_str())
    }

    fn buffer(&self, geom: &str, distance: f64, segments: u32) -> String {
        format!("buffer({}, {}, {})", geom, format_number(distance), segments)
    }

    fn envelope(&self, bbox: &BoundingBox) -> String {
        let (x1, y1, x2, y2) = (
            format_number(bbox.xmin),
            format_number(bbox.ymin),
            format_number(bbox.xmax),
            format_number(bbox.ymax),
        );
        let wkt = format!(
            "POLYGON(({x1} {y1}, {x2} {y1}, {x2} {y2}, {x1} {y2}, {x1} {y1}))"
        );
        format!("geom_from_wkt({})", quote_literal(&wkt))
    }

    fn bbox_filter(&self, geom_col: &str, bbox: &BoundingBox) -> String {
        format!("bbox({}, {})", geom_col, self.envelope(bbox))
    }

    fn geom_from_wkt(&self, wkt: &str, _srid: Option<i32>) -> String {
        format!("geom_from_wkt({})", quote_literal(wkt))
    }

    fn transform(&self, geom: &str, source_srid: i32, target_srid: i32) -> String {
        format!("transform({}, 'EPSG:{}', 'EPSG:{}')", geom, source_srid, target_srid)
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
                format!("distance({}, {}) <= {}", geom, other, format_number(distance))
            }
            _ => format!("{}({}, {})", predicate.as_str(), geom, other),
        }
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    fn cast(&self, expr: &str, sql_type: &str) -> String {
        match sql_type.to_ascii_lowercase().as_str() {
            "int" | "integer" | "bigint" => format!("to_int({})", expr),
            "numeric" | "real" | "float" | "double" => format!("to_real({})", expr),
            _ => format!("to_string({})", expr),
        }
    }
}
