//! Conversions between the geographic coordinate systems used by map providers
//!
//! Three systems are involved:
//!
//! - **WGS84**: the GPS reference system. Stored and exported coordinates always use it.
//! - **GCJ-02**: the national offset system applied by Amap/Tencent tiles inside China.
//! - **BD-09**: a second offset applied on top of GCJ-02 by Baidu tiles.
//!
//! All functions take and return `(lng, lat)` in degrees and are pure. The WGS84 ↔ GCJ-02
//! offset is only defined inside the region box checked by [`is_in_region`]; outside it
//! both directions are the identity.

use crate::{DataError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Semi-major axis of the Krasovsky 1940 ellipsoid used by the offset model
const KRASOVSKY_A: f64 = 6378245.0;

/// First eccentricity squared of the Krasovsky 1940 ellipsoid
const KRASOVSKY_EE: f64 = 0.00669342162296594323;

/// Angular scale of the BD-09 polar offset
const X_PI: f64 = PI * 3000.0 / 180.0;

/// Longitude shift applied by BD-09
const BD_LNG_SHIFT: f64 = 0.0065;

/// Latitude shift applied by BD-09
const BD_LAT_SHIFT: f64 = 0.006;

/// Longitude range of the offset region
pub const REGION_LNG: (f64, f64) = (72.004, 137.8347);

/// Latitude range of the offset region
pub const REGION_LAT: (f64, f64) = (0.8293, 55.8271);

/// A geographic coordinate reference system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordSystem {
    /// GPS reference system, used for storage and export
    #[default]
    Wgs84,
    /// National offset system
    Gcj02,
    /// Offset applied on top of GCJ-02
    Bd09,
}

impl CoordSystem {
    /// Convert a `(lng, lat)` pair from this system into `target`
    pub fn convert(self, target: CoordSystem, lng: f64, lat: f64) -> (f64, f64) {
        use CoordSystem::*;
        match (self, target) {
            (Wgs84, Wgs84) | (Gcj02, Gcj02) | (Bd09, Bd09) => (lng, lat),
            (Wgs84, Gcj02) => wgs84_to_gcj02(lng, lat),
            (Gcj02, Wgs84) => gcj02_to_wgs84(lng, lat),
            (Gcj02, Bd09) => gcj02_to_bd09(lng, lat),
            (Bd09, Gcj02) => bd09_to_gcj02(lng, lat),
            (Wgs84, Bd09) => wgs84_to_bd09(lng, lat),
            (Bd09, Wgs84) => bd09_to_wgs84(lng, lat),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Wgs84 => "WGS84",
            Self::Gcj02 => "GCJ-02",
            Self::Bd09 => "BD-09",
        }
    }
}

/// Map tile providers and the coordinate system their tiles are drawn in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapProvider {
    #[default]
    OpenStreetMap,
    Tianditu,
    Amap,
    Tencent,
    Baidu,
}

impl MapProvider {
    /// The coordinate system in which markers must be placed for this provider
    pub fn coord_system(&self) -> CoordSystem {
        match self {
            Self::OpenStreetMap | Self::Tianditu => CoordSystem::Wgs84,
            Self::Amap | Self::Tencent => CoordSystem::Gcj02,
            Self::Baidu => CoordSystem::Bd09,
        }
    }

    pub fn all() -> &'static [Self] {
        &[
            Self::OpenStreetMap,
            Self::Tianditu,
            Self::Amap,
            Self::Tencent,
            Self::Baidu,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenStreetMap => "OpenStreetMap",
            Self::Tianditu => "Tianditu",
            Self::Amap => "Amap",
            Self::Tencent => "Tencent",
            Self::Baidu => "Baidu",
        }
    }
}

/// Whether the GCJ-02 offset applies at this position
///
/// Callers outside the region get the identity transform from every WGS84 ↔ GCJ-02
/// conversion.
#[inline]
pub fn is_in_region(lng: f64, lat: f64) -> bool {
    (REGION_LNG.0..=REGION_LNG.1).contains(&lng) && (REGION_LAT.0..=REGION_LAT.1).contains(&lat)
}

/// Latitude component of the empirical offset polynomial
fn transform_lat(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

/// Longitude component of the empirical offset polynomial
fn transform_lng(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

/// Offset in degrees `(d_lng, d_lat)` that GCJ-02 adds to a WGS84 position
fn gcj02_delta(lng: f64, lat: f64) -> (f64, f64) {
    let d_lat = transform_lat(lng - 105.0, lat - 35.0);
    let d_lng = transform_lng(lng - 105.0, lat - 35.0);

    let rad_lat = lat / 180.0 * PI;
    let magic = 1.0 - KRASOVSKY_EE * rad_lat.sin() * rad_lat.sin();
    let sqrt_magic = magic.sqrt();

    let d_lat = (d_lat * 180.0) / ((KRASOVSKY_A * (1.0 - KRASOVSKY_EE)) / (magic * sqrt_magic) * PI);
    let d_lng = (d_lng * 180.0) / (KRASOVSKY_A / sqrt_magic * rad_lat.cos() * PI);
    (d_lng, d_lat)
}

/// WGS84 → GCJ-02
pub fn wgs84_to_gcj02(lng: f64, lat: f64) -> (f64, f64) {
    if !is_in_region(lng, lat) {
        return (lng, lat);
    }
    let (d_lng, d_lat) = gcj02_delta(lng, lat);
    (lng + d_lng, lat + d_lat)
}

/// GCJ-02 → WGS84
///
/// First-order inverse `2·p − wgs84_to_gcj02(p)`; accurate to roughly 1–2 meters inside
/// the region. Outside the region the input is returned unchanged.
pub fn gcj02_to_wgs84(lng: f64, lat: f64) -> (f64, f64) {
    if !is_in_region(lng, lat) {
        return (lng, lat);
    }
    let (g_lng, g_lat) = wgs84_to_gcj02(lng, lat);
    (lng * 2.0 - g_lng, lat * 2.0 - g_lat)
}

/// GCJ-02 → WGS84, rejecting positions outside the region
pub fn try_gcj02_to_wgs84(lng: f64, lat: f64) -> Result<(f64, f64)> {
    if !is_in_region(lng, lat) {
        return Err(DataError::OutsideRegion { lng, lat });
    }
    Ok(gcj02_to_wgs84(lng, lat))
}

/// GCJ-02 → BD-09
pub fn gcj02_to_bd09(lng: f64, lat: f64) -> (f64, f64) {
    let z = (lng * lng + lat * lat).sqrt() + 0.00002 * (lat * X_PI).sin();
    let theta = lat.atan2(lng) + 0.000003 * (lng * X_PI).cos();
    (z * theta.cos() + BD_LNG_SHIFT, z * theta.sin() + BD_LAT_SHIFT)
}

/// BD-09 → GCJ-02
pub fn bd09_to_gcj02(lng: f64, lat: f64) -> (f64, f64) {
    let x = lng - BD_LNG_SHIFT;
    let y = lat - BD_LAT_SHIFT;
    let z = (x * x + y * y).sqrt() - 0.00002 * (y * X_PI).sin();
    let theta = y.atan2(x) - 0.000003 * (x * X_PI).cos();
    (z * theta.cos(), z * theta.sin())
}

/// WGS84 → BD-09
pub fn wgs84_to_bd09(lng: f64, lat: f64) -> (f64, f64) {
    let (g_lng, g_lat) = wgs84_to_gcj02(lng, lat);
    gcj02_to_bd09(g_lng, g_lat)
}

/// BD-09 → WGS84
pub fn bd09_to_wgs84(lng: f64, lat: f64) -> (f64, f64) {
    let (g_lng, g_lat) = bd09_to_gcj02(lng, lat);
    gcj02_to_wgs84(g_lng, g_lat)
}
