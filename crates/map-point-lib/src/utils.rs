//! Utility functions for projections and distances on the map

use geo::Point;

/// Web Mercator bounds in meters (EPSG:3857)
pub const EARTH_MERCATOR_MAX: f64 = 20037508.34;
pub const EARTH_MERCATOR_MIN: f64 = -20037508.34;
pub const EARTH_SIZE_METERS: f64 = EARTH_MERCATOR_MAX - EARTH_MERCATOR_MIN;

/// Maximum latitude that can be represented in Web Mercator
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Mean Earth radius in meters used by the haversine formula
pub const EARTH_RADIUS_M: f64 = 6371000.0;

/// Ground resolution at the equator for zoom 0 of a 256px tile pyramid, in meters per pixel
pub const METERS_PER_PIXEL_Z0: f64 = 156412.0;

/// Tile edge length in pixels
pub const TILE_SIZE_PX: f64 = 256.0;

/// Precomputed constant: EARTH_MERCATOR_MAX / 180.0
const LON_TO_X_FACTOR: f64 = EARTH_MERCATOR_MAX / 180.0;

/// Precomputed constant: EARTH_MERCATOR_MAX / PI
const Y_FACTOR: f64 = EARTH_MERCATOR_MAX / std::f64::consts::PI;

/// Precomputed constant: 180.0 / EARTH_MERCATOR_MAX
const X_TO_LON_FACTOR: f64 = 180.0 / EARTH_MERCATOR_MAX;

/// Precomputed constant: PI / EARTH_MERCATOR_MAX
const Y_TO_LAT_FACTOR: f64 = std::f64::consts::PI / EARTH_MERCATOR_MAX;

/// Convert (lat, lon) to Web Mercator (x, y) in meters
///
/// Works for any of the geographic systems handled by [`crate::coords`], since they
/// all share the degree-based lat/lon layout.
///
/// # Arguments
/// * `lat` - Latitude in degrees (-85.05 to 85.05)
/// * `lon` - Longitude in degrees (-180 to 180)
///
/// # Returns
/// A `Point<f64>` with x (easting) and y (northing) in meters
#[inline(always)]
pub fn wgs84_to_mercator(lat: f64, lon: f64) -> Point<f64> {
    // Clamp latitude to valid Web Mercator range
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);

    let x = lon * LON_TO_X_FACTOR;

    let lat_rad = lat.to_radians();
    let y = (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() * Y_FACTOR;

    Point::new(x, y)
}

/// Convert Web Mercator (x, y) in meters to (lat, lon)
///
/// # Returns
/// A tuple of (latitude, longitude) in degrees
#[inline(always)]
pub fn mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = x * X_TO_LON_FACTOR;
    let lat =
        (std::f64::consts::PI / 2.0 - 2.0 * ((-y * Y_TO_LAT_FACTOR).exp()).atan()).to_degrees();
    (lat, lon)
}

/// Check if a point is within Web Mercator bounds
#[inline(always)]
pub fn is_valid_mercator(point: &Point<f64>) -> bool {
    let x = point.x();
    let y = point.y();
    x >= EARTH_MERCATOR_MIN
        && x <= EARTH_MERCATOR_MAX
        && y >= EARTH_MERCATOR_MIN
        && y <= EARTH_MERCATOR_MAX
}

/// Check that a latitude/longitude pair is finite and within `[-90,90]×[-180,180]`
#[inline]
pub fn is_valid_lat_lng(lat: f64, lng: f64) -> bool {
    lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng)
}

/// Calculate the Haversine great-circle distance between two positions in meters
///
/// Both points use x = longitude and y = latitude, in degrees.
#[inline]
pub fn haversine_distance(p1: Point<f64>, p2: Point<f64>) -> f64 {
    let lat1 = p1.y().to_radians();
    let lat2 = p2.y().to_radians();
    let delta_lat = (p2.y() - p1.y()).to_radians();
    let delta_lon = (p2.x() - p1.x()).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Approximate ground resolution in meters per screen pixel
///
/// Uses the Mercator estimate `156412·cos(lat)/2^zoom`. Fractional zoom levels are
/// supported.
#[inline]
pub fn meters_per_pixel(lat: f64, zoom: f64) -> f64 {
    METERS_PER_PIXEL_Z0 * lat.to_radians().cos() / 2f64.powf(zoom)
}

/// Approximate screen distance in pixels between two positions at a zoom level
///
/// The ground resolution is taken at the latitude of `from`.
#[inline]
pub fn pixel_distance(from: Point<f64>, to: Point<f64>, zoom: f64) -> f64 {
    let resolution = meters_per_pixel(from.y(), zoom);
    // At the poles the resolution collapses to zero; treat everything as far apart.
    if resolution <= f64::EPSILON {
        return f64::INFINITY;
    }
    haversine_distance(from, to) / resolution
}

/// Web Mercator meters covered by a single screen pixel at the given zoom
#[inline]
pub fn mercator_meters_per_pixel(zoom: f64) -> f64 {
    EARTH_SIZE_METERS / (TILE_SIZE_PX * 2f64.powf(zoom))
}
