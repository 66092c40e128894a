//! Export of points and geometries in the canonical WGS84 system
//!
//! Whatever base map the user draws on, exported coordinates are always true GPS
//! coordinates. Plain text output has one `lng,lat` pair per line with six decimals.

use crate::{CoordSystem, Point, Result};
use geo::{Coord, Geometry, MapCoords};
use std::fmt::Write;

/// Format a coordinate pair as `lng,lat` with six decimals
pub fn format_coordinate(lng: f64, lat: f64) -> String {
    format!("{lng:.6},{lat:.6}")
}

/// Map a geometry drawn in `from` coordinates back to WGS84
pub fn to_canonical(geometry: &Geometry<f64>, from: CoordSystem) -> Geometry<f64> {
    if from == CoordSystem::Wgs84 {
        return geometry.clone();
    }
    geometry.map_coords(|coord| {
        let (x, y) = from.convert(CoordSystem::Wgs84, coord.x, coord.y);
        Coord { x, y }
    })
}

/// Collect the coordinate runs of a geometry; each run becomes a block of lines
fn runs(geometry: &Geometry<f64>, out: &mut Vec<Vec<Coord<f64>>>) {
    match geometry {
        Geometry::Point(point) => out.push(vec![point.0]),
        Geometry::Line(line) => out.push(vec![line.start, line.end]),
        Geometry::LineString(line) => out.push(line.0.clone()),
        Geometry::Polygon(polygon) => {
            out.push(polygon.exterior().0.clone());
            out.extend(polygon.interiors().iter().map(|ring| ring.0.clone()));
        }
        Geometry::MultiPoint(points) => out.extend(points.iter().map(|p| vec![p.0])),
        Geometry::MultiLineString(lines) => out.extend(lines.iter().map(|l| l.0.clone())),
        Geometry::MultiPolygon(polygons) => {
            for polygon in polygons {
                runs(&Geometry::Polygon(polygon.clone()), out);
            }
        }
        Geometry::GeometryCollection(collection) => {
            for geometry in collection {
                runs(geometry, out);
            }
        }
        Geometry::Rect(rect) => runs(&Geometry::Polygon(rect.to_polygon()), out),
        Geometry::Triangle(triangle) => runs(&Geometry::Polygon(triangle.to_polygon()), out),
    }
}

/// One `lng,lat` pair per line
///
/// Polygons list their exterior ring first, then each interior ring; separate rings
/// and parts of multi-geometries are separated by a blank line.
pub fn to_plain_text(geometry: &Geometry<f64>) -> String {
    let mut blocks = Vec::new();
    runs(geometry, &mut blocks);
    blocks
        .iter()
        .map(|block| {
            block
                .iter()
                .map(|c| format_coordinate(c.x, c.y))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Plain text of a geometry drawn in `from` coordinates, exported as WGS84
pub fn export_geometry(geometry: &Geometry<f64>, from: CoordSystem) -> String {
    to_plain_text(&to_canonical(geometry, from))
}

/// `id,lng,lat` lines from the true coordinates of each point
pub fn export_points(points: &[Point]) -> String {
    let mut out = String::with_capacity(points.len() * 32);
    for point in points {
        // Writing into a String cannot fail
        let _ = writeln!(
            out,
            "{},{}",
            point.id,
            format_coordinate(point.lng(), point.lat())
        );
    }
    out
}

/// Points as a JSON array in their input record shape
pub fn export_points_json(points: &[Point]) -> Result<String> {
    Ok(serde_json::to_string_pretty(points)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PointKind, coords};
    use geo::{LineString, MultiPoint, Polygon, point};

    #[test]
    fn test_format_coordinate() {
        assert_eq!(format_coordinate(121.4737, 31.2304), "121.473700,31.230400");
        assert_eq!(format_coordinate(-0.1234567, 51.5), "-0.123457,51.500000");
    }

    #[test]
    fn test_wgs84_geometry_is_unchanged() {
        let geometry = Geometry::Point(point!(x: 121.4737, y: 31.2304));
        assert_eq!(to_canonical(&geometry, CoordSystem::Wgs84), geometry);
    }

    #[test]
    fn test_drawn_geometry_exports_true_coordinates() {
        let truth = (121.4737, 31.2304);
        let (x, y) = coords::wgs84_to_gcj02(truth.0, truth.1);
        let drawn = Geometry::Point(point!(x: x, y: y));

        let Geometry::Point(canonical) = to_canonical(&drawn, CoordSystem::Gcj02) else {
            panic!("expected a point");
        };
        assert!((canonical.x() - truth.0).abs() < 1e-4);
        assert!((canonical.y() - truth.1).abs() < 1e-4);

        let (x, y) = coords::wgs84_to_bd09(truth.0, truth.1);
        let text = export_geometry(&Geometry::Point(point!(x: x, y: y)), CoordSystem::Bd09);
        let (lng, lat) = text.split_once(',').unwrap();
        assert!((lng.parse::<f64>().unwrap() - truth.0).abs() < 1e-4);
        assert!((lat.parse::<f64>().unwrap() - truth.1).abs() < 1e-4);
    }

    #[test]
    fn test_polygon_plain_text() {
        let exterior = LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 0.0)]);
        let interior = LineString::from(vec![(1.0, 1.0), (2.0, 1.0), (1.0, 2.0), (1.0, 1.0)]);
        let polygon = Polygon::new(exterior, vec![interior]);

        let text = to_plain_text(&Geometry::Polygon(polygon));
        let blocks: Vec<&str> = text.split("\n\n").collect();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lines().count(), 4);
        assert_eq!(blocks[0].lines().next(), Some("0.000000,0.000000"));
        assert_eq!(blocks[1].lines().nth(1), Some("2.000000,1.000000"));
    }

    #[test]
    fn test_line_and_multipoint_plain_text() {
        let line = LineString::from(vec![(121.0, 31.0), (121.5, 31.5)]);
        assert_eq!(
            to_plain_text(&Geometry::LineString(line)),
            "121.000000,31.000000\n121.500000,31.500000"
        );

        let points = MultiPoint::from(vec![(1.0, 2.0), (3.0, 4.0)]);
        assert_eq!(
            to_plain_text(&Geometry::MultiPoint(points)),
            "1.000000,2.000000\n\n3.000000,4.000000"
        );
    }

    #[test]
    fn test_export_points() {
        let points = vec![
            Point::new(1, PointKind::Video, 31.2304, 121.4737),
            Point::new("pano-2", PointKind::Panorama, 39.9, 116.4),
        ];
        assert_eq!(
            export_points(&points),
            "1,121.473700,31.230400\npano-2,116.400000,39.900000\n"
        );

        let json = export_points_json(&points).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[1]["id"], "pano-2");
        assert_eq!(value[0]["lat"], 31.2304);
    }
}
