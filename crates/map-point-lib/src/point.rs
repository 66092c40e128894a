//! Point storage and record parsing module
//!
//! This module provides the [`Point`] struct, the atomic renderable unit, together with
//! lenient parsing of the host's point records. Records with unusable coordinates are
//! skipped and reported as [`Diagnostic`]s instead of failing the whole batch.

use crate::coords::CoordSystem;
use crate::style::StyleOverride;
use crate::{DataError, Result, utils};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Record lists shorter than this are validated on the calling thread
const PARALLEL_PARSE_THRESHOLD: usize = 4096;

/// Stable identity of a point within its kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointId {
    Int(i64),
    Str(String),
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for PointId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for PointId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_string())
    }
}

impl From<String> for PointId {
    fn from(id: String) -> Self {
        Self::Str(id)
    }
}

/// Categorical tag of a point; each kind gets its own marker layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PointKind {
    #[serde(rename = "panorama", alias = "pano")]
    Panorama,
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "image-set", alias = "imageset", alias = "image_set")]
    ImageSet,
    #[serde(rename = "overlay-point", alias = "overlay", alias = "kml")]
    OverlayPoint,
}

impl PointKind {
    pub fn all() -> &'static [Self] {
        &[Self::Panorama, Self::Video, Self::ImageSet, Self::OverlayPoint]
    }

    /// Name used in serialized records
    pub fn name(&self) -> &'static str {
        match self {
            Self::Panorama => "panorama",
            Self::Video => "video",
            Self::ImageSet => "image-set",
            Self::OverlayPoint => "overlay-point",
        }
    }
}

impl fmt::Display for PointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single map point with its canonical WGS84 position
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Identity, unique within `kind`
    pub id: PointId,
    /// Categorical tag
    pub kind: PointKind,
    /// True position in WGS84 (x = longitude, y = latitude)
    pub position: geo::Point<f64>,
    /// Optional per-point style override
    pub style: Option<StyleOverride>,
    /// Every other field of the source record, kept verbatim
    pub attributes: Map<String, Value>,
}

// Serialized back into the record shape it was parsed from.
impl Serialize for Point {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("type", &self.kind)?;
        map.serialize_entry("lat", &self.lat())?;
        map.serialize_entry("lng", &self.lng())?;
        if let Some(style) = &self.style {
            map.serialize_entry("styleConfig", style)?;
        }
        for (key, value) in &self.attributes {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Point {
    /// Create a point from a WGS84 position
    pub fn new(id: impl Into<PointId>, kind: PointKind, lat: f64, lng: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            position: geo::Point::new(lng, lat),
            style: None,
            attributes: Map::new(),
        }
    }

    /// Attach a per-point style override
    pub fn with_style(mut self, style: StyleOverride) -> Self {
        self.style = Some(style);
        self
    }

    /// Attach an extra attribute that travels with the point
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// True latitude (WGS84)
    #[inline]
    pub fn lat(&self) -> f64 {
        self.position.y()
    }

    /// True longitude (WGS84)
    #[inline]
    pub fn lng(&self) -> f64 {
        self.position.x()
    }

    /// Check that the stored position is finite and within `[-90,90]×[-180,180]`
    pub fn validate(&self) -> Result<()> {
        if utils::is_valid_lat_lng(self.lat(), self.lng()) {
            Ok(())
        } else {
            Err(DataError::InvalidCoordinate {
                id: self.id.to_string(),
                reason: format!("({}, {}) is not a valid lat/lng", self.lat(), self.lng()),
            })
        }
    }

    /// Position in the coordinate system of the active map provider
    ///
    /// Derived deterministically from the true position; never stored.
    pub fn display_position(&self, system: CoordSystem) -> Result<geo::Point<f64>> {
        self.validate()?;
        let (lng, lat) = CoordSystem::Wgs84.convert(system, self.lng(), self.lat());
        Ok(geo::Point::new(lng, lat))
    }
}

/// A record that was skipped while parsing or rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Identity of the offending record, when it could be read
    pub id: Option<String>,
    /// Human readable reason
    pub reason: String,
}

impl Diagnostic {
    pub fn new(id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

impl From<&DataError> for Diagnostic {
    fn from(err: &DataError) -> Self {
        match err {
            DataError::InvalidCoordinate { id, reason } => {
                Diagnostic::new(Some(id.clone()), reason.clone())
            }
            other => Diagnostic::new(None, other.to_string()),
        }
    }
}

/// Wire shape of a point record
///
/// Coordinates are kept as raw JSON values so that a non-numeric coordinate rejects
/// only its own record.
#[derive(Deserialize)]
struct PointRecord {
    id: PointId,
    #[serde(rename = "type")]
    kind: PointKind,
    #[serde(default, alias = "latitude")]
    lat: Option<Value>,
    #[serde(default, alias = "longitude")]
    lng: Option<Value>,
    #[serde(default, rename = "styleConfig", alias = "style_config")]
    style: Option<Value>,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

fn coordinate(value: Option<&Value>, name: &str, id: &PointId) -> Result<f64> {
    let invalid = |reason: String| DataError::InvalidCoordinate {
        id: id.to_string(),
        reason,
    };
    match value {
        None | Some(Value::Null) => Err(invalid(format!("missing {name}"))),
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid(format!("{name} is not a finite number"))),
        Some(other) => Err(invalid(format!("{name} is not numeric: {other}"))),
    }
}

fn point_from_value(value: Value) -> Result<Point> {
    let record: PointRecord = serde_json::from_value(value)
        .map_err(|e| DataError::InvalidRecord(e.to_string()))?;

    let lat = coordinate(record.lat.as_ref(), "lat", &record.id)?;
    let lng = coordinate(record.lng.as_ref(), "lng", &record.id)?;

    let point = Point {
        id: record.id,
        kind: record.kind,
        position: geo::Point::new(lng, lat),
        style: record.style.as_ref().map(StyleOverride::from_value),
        attributes: record.attributes,
    };
    point.validate()?;
    Ok(point)
}

/// Convert raw JSON records into points, skipping invalid ones
///
/// Output order matches input order. Every skipped record yields one [`Diagnostic`]
/// and a warning in the log.
pub fn points_from_values(values: Vec<Value>) -> (Vec<Point>, Vec<Diagnostic>) {
    #[cfg(feature = "profiling")]
    profiling::scope!("point::points_from_values");

    let results: Vec<(Option<String>, Result<Point>)> = if values.len() >= PARALLEL_PARSE_THRESHOLD
    {
        values
            .into_par_iter()
            .map(|v| (record_id(&v), point_from_value(v)))
            .collect()
    } else {
        values
            .into_iter()
            .map(|v| (record_id(&v), point_from_value(v)))
            .collect()
    };

    let mut points = Vec::with_capacity(results.len());
    let mut diagnostics = Vec::new();
    for (id, result) in results {
        match result {
            Ok(point) => points.push(point),
            Err(err) => {
                tracing::warn!("Skipping point record {:?}: {}", id, err);
                let mut diagnostic = Diagnostic::from(&err);
                if diagnostic.id.is_none() {
                    diagnostic.id = id;
                }
                diagnostics.push(diagnostic);
            }
        }
    }
    (points, diagnostics)
}

/// Parse a JSON array of point records
///
/// Fails only when the document itself is not a JSON array.
pub fn parse_points(json: &str) -> Result<(Vec<Point>, Vec<Diagnostic>)> {
    let values: Vec<Value> = serde_json::from_str(json)?;
    Ok(points_from_values(values))
}

fn record_id(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
