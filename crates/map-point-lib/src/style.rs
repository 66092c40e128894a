//! Style configuration for point kinds
//!
//! Styles are configured per [`PointKind`] and may be overridden per point. Every field
//! has a default; malformed or out-of-range values fall back to it instead of failing.

use crate::PointKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const DEFAULT_POINT_COLOR: &str = "#1890ff";
pub const DEFAULT_POINT_SIZE: f64 = 12.0;
pub const DEFAULT_POINT_OPACITY: f64 = 1.0;
pub const DEFAULT_LABEL_SIZE: f64 = 12.0;
pub const DEFAULT_LABEL_COLOR: &str = "#333333";
pub const DEFAULT_CLUSTER_RADIUS: f64 = 50.0;
pub const DEFAULT_CLUSTER_MIN_POINTS: usize = 2;
pub const DEFAULT_CLUSTER_MAX_ZOOM: f64 = 16.0;
pub const DEFAULT_CLUSTER_ICON_COLOR: &str = "#1890ff";
pub const DEFAULT_CLUSTER_TEXT_COLOR: &str = "#ffffff";

/// Highest zoom level accepted for `cluster_max_zoom`
const MAX_ZOOM_LIMIT: f64 = 30.0;

/// Full style of a point kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    pub point_color: String,
    pub point_size: f64,
    pub point_opacity: f64,
    pub point_label_size: f64,
    pub point_label_color: String,
    pub cluster_enabled: bool,
    pub cluster_radius: f64,
    pub cluster_min_points: usize,
    pub cluster_max_zoom: f64,
    pub cluster_icon_color: String,
    pub cluster_text_color: String,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            point_color: DEFAULT_POINT_COLOR.to_string(),
            point_size: DEFAULT_POINT_SIZE,
            point_opacity: DEFAULT_POINT_OPACITY,
            point_label_size: DEFAULT_LABEL_SIZE,
            point_label_color: DEFAULT_LABEL_COLOR.to_string(),
            cluster_enabled: false,
            cluster_radius: DEFAULT_CLUSTER_RADIUS,
            cluster_min_points: DEFAULT_CLUSTER_MIN_POINTS,
            cluster_max_zoom: DEFAULT_CLUSTER_MAX_ZOOM,
            cluster_icon_color: DEFAULT_CLUSTER_ICON_COLOR.to_string(),
            cluster_text_color: DEFAULT_CLUSTER_TEXT_COLOR.to_string(),
        }
    }
}

/// Partial style attached to a single point; unset fields inherit from the kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_label_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_label_color: Option<String>,
}

/// Clustering parameters of a kind, already clamped to usable values
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub enabled: bool,
    /// Merge radius in screen pixels
    pub radius: f64,
    /// Smallest group rendered as a cluster
    pub min_points: usize,
    /// Above this zoom level points are never clustered
    pub max_zoom: f64,
    pub icon_color: String,
    pub text_color: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        StyleConfig::default().cluster_config()
    }
}

impl ClusterConfig {
    /// Clustering enabled with default parameters
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Clamp out-of-range values to their defaults
    ///
    /// Negative or non-finite radii, fewer than two points per cluster and non-finite
    /// zoom limits are replaced; a finite zoom limit is clamped to `[0, 30]`.
    pub fn sanitized(mut self) -> Self {
        if !self.radius.is_finite() || self.radius < 0.0 {
            tracing::warn!("Invalid cluster radius {}, using default", self.radius);
            self.radius = DEFAULT_CLUSTER_RADIUS;
        }
        if self.min_points < 2 {
            tracing::warn!(
                "Invalid cluster min points {}, using default",
                self.min_points
            );
            self.min_points = DEFAULT_CLUSTER_MIN_POINTS;
        }
        if !self.max_zoom.is_finite() {
            self.max_zoom = DEFAULT_CLUSTER_MAX_ZOOM;
        }
        self.max_zoom = self.max_zoom.clamp(0.0, MAX_ZOOM_LIMIT);
        self
    }
}

fn read_string(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Null => None,
        other => {
            tracing::warn!("Ignoring malformed style field {}: {}", key, other);
            None
        }
    }
}

fn read_f64(map: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = map.get(key)?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        // Hosts sometimes store numeric settings as strings
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null => return None,
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Some(v),
        _ => {
            tracing::warn!("Ignoring malformed style field {}: {}", key, value);
            None
        }
    }
}

fn read_bool(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl StyleConfig {
    /// Build a style from an arbitrary JSON value, defaulting every missing or
    /// malformed field
    pub fn from_value(value: &Value) -> Self {
        let mut style = Self::default();
        let Some(map) = value.as_object() else {
            if !value.is_null() {
                tracing::warn!("Style config is not an object, using defaults");
            }
            return style;
        };

        if let Some(v) = read_string(map, "point_color") {
            style.point_color = v;
        }
        if let Some(v) = read_f64(map, "point_size").filter(|v| *v > 0.0) {
            style.point_size = v;
        }
        if let Some(v) = read_f64(map, "point_opacity") {
            style.point_opacity = v.clamp(0.0, 1.0);
        }
        if let Some(v) = read_f64(map, "point_label_size").filter(|v| *v > 0.0) {
            style.point_label_size = v;
        }
        if let Some(v) = read_string(map, "point_label_color") {
            style.point_label_color = v;
        }
        if let Some(v) = read_bool(map, "cluster_enabled") {
            style.cluster_enabled = v;
        }
        if let Some(v) = read_f64(map, "cluster_radius") {
            style.cluster_radius = v;
        }
        if let Some(v) = read_f64(map, "cluster_min_points") {
            // Negative counts saturate to zero and are clamped later
            style.cluster_min_points = v.max(0.0) as usize;
        }
        if let Some(v) = read_f64(map, "cluster_max_zoom") {
            style.cluster_max_zoom = v;
        }
        if let Some(v) = read_string(map, "cluster_icon_color") {
            style.cluster_icon_color = v;
        }
        if let Some(v) = read_string(map, "cluster_text_color") {
            style.cluster_text_color = v;
        }
        style
    }

    /// Merge a per-point override on top of this kind-level style
    pub fn merged(&self, style_override: Option<&StyleOverride>) -> StyleConfig {
        let mut style = self.clone();
        let Some(o) = style_override else {
            return style;
        };
        if let Some(color) = &o.point_color {
            style.point_color = color.clone();
        }
        if let Some(size) = o.point_size.filter(|v| v.is_finite() && *v > 0.0) {
            style.point_size = size;
        }
        if let Some(opacity) = o.point_opacity.filter(|v| v.is_finite()) {
            style.point_opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(size) = o.point_label_size.filter(|v| v.is_finite() && *v > 0.0) {
            style.point_label_size = size;
        }
        if let Some(color) = &o.point_label_color {
            style.point_label_color = color.clone();
        }
        style
    }

    /// Clustering parameters of this style, clamped
    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            enabled: self.cluster_enabled,
            radius: self.cluster_radius,
            min_points: self.cluster_min_points,
            max_zoom: self.cluster_max_zoom,
            icon_color: self.cluster_icon_color.clone(),
            text_color: self.cluster_text_color.clone(),
        }
        .sanitized()
    }
}

impl StyleOverride {
    /// Build an override from an arbitrary JSON value, ignoring malformed fields
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        Self {
            point_color: read_string(map, "point_color"),
            point_size: read_f64(map, "point_size"),
            point_opacity: read_f64(map, "point_opacity"),
            point_label_size: read_f64(map, "point_label_size"),
            point_label_color: read_string(map, "point_label_color"),
        }
    }
}

/// Source of kind-level styles
pub trait StyleLookup {
    fn style_for(&self, kind: PointKind) -> StyleConfig;
}

impl<F> StyleLookup for F
where
    F: Fn(PointKind) -> StyleConfig,
{
    fn style_for(&self, kind: PointKind) -> StyleConfig {
        self(kind)
    }
}

/// Kind-level style table; kinds without an entry use [`StyleConfig::default`]
#[derive(Debug, Clone, Default)]
pub struct StyleTable {
    styles: HashMap<PointKind, StyleConfig>,
}

impl StyleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the style of a kind
    pub fn with_style(mut self, kind: PointKind, style: StyleConfig) -> Self {
        self.styles.insert(kind, style);
        self
    }

    pub fn insert(&mut self, kind: PointKind, style: StyleConfig) {
        self.styles.insert(kind, style);
    }

    /// Build a table from a JSON object keyed by kind name
    ///
    /// Unknown kind names are skipped with a warning.
    pub fn from_value(value: &Value) -> Self {
        let mut table = Self::new();
        let Some(map) = value.as_object() else {
            tracing::warn!("Style table is not an object, using defaults");
            return table;
        };
        for (name, style) in map {
            match serde_json::from_value::<PointKind>(Value::String(name.clone())) {
                Ok(kind) => table.insert(kind, StyleConfig::from_value(style)),
                Err(_) => tracing::warn!("Skipping style for unknown point type {}", name),
            }
        }
        table
    }

    /// Parse a JSON style table
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Ok(Self::from_value(&value))
    }
}

impl StyleLookup for StyleTable {
    fn style_for(&self, kind: PointKind) -> StyleConfig {
        self.styles.get(&kind).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_style_defaults() {
        let style = StyleConfig::default();
        assert!(!style.cluster_enabled);
        assert_eq!(style.cluster_radius, 50.0);
        assert_eq!(style.cluster_min_points, 2);
        assert_eq!(style.cluster_max_zoom, 16.0);
    }

    #[test]
    fn test_missing_fields_fall_back() {
        let style = StyleConfig::from_value(&json!({
            "point_color": "#ff0000",
            "cluster_enabled": true
        }));
        assert_eq!(style.point_color, "#ff0000");
        assert!(style.cluster_enabled);
        assert_eq!(style.point_size, DEFAULT_POINT_SIZE);
        assert_eq!(style.cluster_text_color, DEFAULT_CLUSTER_TEXT_COLOR);
    }

    #[test]
    fn test_malformed_fields_fall_back() {
        let style = StyleConfig::from_value(&json!({
            "point_color": 42,
            "point_size": "big",
            "point_opacity": 3.5,
            "cluster_radius": "80",
            "cluster_enabled": "1"
        }));
        assert_eq!(style.point_color, DEFAULT_POINT_COLOR);
        assert_eq!(style.point_size, DEFAULT_POINT_SIZE);
        assert_eq!(style.point_opacity, 1.0);
        assert_eq!(style.cluster_radius, 80.0);
        assert!(style.cluster_enabled);

        assert_eq!(StyleConfig::from_value(&json!("nope")), StyleConfig::default());
    }

    #[test]
    fn test_cluster_config_clamping() {
        let style = StyleConfig::from_value(&json!({
            "cluster_radius": -10,
            "cluster_min_points": 0,
            "cluster_max_zoom": 99
        }));
        let config = style.cluster_config();
        assert_eq!(config.radius, DEFAULT_CLUSTER_RADIUS);
        assert_eq!(config.min_points, DEFAULT_CLUSTER_MIN_POINTS);
        assert_eq!(config.max_zoom, 30.0);

        let config = ClusterConfig {
            radius: f64::NAN,
            min_points: 1,
            max_zoom: f64::INFINITY,
            ..ClusterConfig::enabled()
        }
        .sanitized();
        assert_eq!(config.radius, DEFAULT_CLUSTER_RADIUS);
        assert_eq!(config.min_points, 2);
        assert_eq!(config.max_zoom, DEFAULT_CLUSTER_MAX_ZOOM);
    }

    #[test]
    fn test_merge_override() {
        let base = StyleConfig::default();
        let o = StyleOverride {
            point_color: Some("#00ff00".to_string()),
            point_opacity: Some(-1.0),
            point_size: Some(0.0),
            ..Default::default()
        };
        let merged = base.merged(Some(&o));
        assert_eq!(merged.point_color, "#00ff00");
        assert_eq!(merged.point_opacity, 0.0);
        assert_eq!(merged.point_size, DEFAULT_POINT_SIZE);
        assert_eq!(base.merged(None), base);
    }

    #[test]
    fn test_style_table_lookup() {
        let table = StyleTable::from_value(&json!({
            "video": {"cluster_enabled": true, "cluster_radius": 80},
            "pano": {"point_color": "#abcdef"},
            "spaceship": {"point_color": "#000000"}
        }));
        assert!(table.style_for(PointKind::Video).cluster_enabled);
        assert_eq!(table.style_for(PointKind::Video).cluster_radius, 80.0);
        assert_eq!(table.style_for(PointKind::Panorama).point_color, "#abcdef");
        assert_eq!(
            table.style_for(PointKind::ImageSet),
            StyleConfig::default()
        );
    }

    #[test]
    fn test_closure_lookup() {
        let lookup = |kind: PointKind| StyleConfig {
            cluster_enabled: kind == PointKind::Video,
            ..StyleConfig::default()
        };
        assert!(lookup.style_for(PointKind::Video).cluster_enabled);
        assert!(!lookup.style_for(PointKind::Panorama).cluster_enabled);
    }
}
