//! Viewport description and update throttling

use crate::utils;
use geo::{Coord, Rect};
use instant::Instant;
use std::time::Duration;

/// Visible map area in display coordinates (x = longitude, y = latitude) plus zoom
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub bounds: Rect<f64>,
    pub zoom: f64,
}

impl Viewport {
    /// Create a viewport from its corner coordinates
    pub fn new(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64, zoom: f64) -> Self {
        Self {
            bounds: Rect::new(
                Coord {
                    x: min_lng,
                    y: min_lat,
                },
                Coord {
                    x: max_lng,
                    y: max_lat,
                },
            ),
            zoom,
        }
    }

    /// Viewport of a screen of `screen_size` pixels centered on (lat, lng)
    ///
    /// Uses a 256px Web Mercator tile pyramid, like the map widgets that drive this
    /// library.
    pub fn from_center(lat: f64, lng: f64, zoom: f64, screen_size: (f64, f64)) -> Self {
        let center = utils::wgs84_to_mercator(lat, lng);
        let resolution = utils::mercator_meters_per_pixel(zoom);
        let half_w = screen_size.0 * resolution / 2.0;
        let half_h = screen_size.1 * resolution / 2.0;

        let (min_lat, min_lng) = utils::mercator_to_wgs84(center.x() - half_w, center.y() - half_h);
        let (max_lat, max_lng) = utils::mercator_to_wgs84(center.x() + half_w, center.y() + half_h);
        Self::new(
            min_lng.max(-180.0),
            min_lat,
            max_lng.min(180.0),
            max_lat,
            zoom,
        )
    }

    /// Bounds grown by `ratio` of their width/height on every side
    ///
    /// The padding is proportional, so a smaller viewport always yields smaller
    /// padded bounds.
    pub fn padded_bounds(&self, ratio: f64) -> Rect<f64> {
        let ratio = if ratio.is_finite() { ratio.max(0.0) } else { 0.0 };
        let dx = self.bounds.width() * ratio;
        let dy = self.bounds.height() * ratio;
        Rect::new(
            Coord {
                x: self.bounds.min().x - dx,
                y: (self.bounds.min().y - dy).max(-90.0),
            },
            Coord {
                x: self.bounds.max().x + dx,
                y: (self.bounds.max().y + dy).min(90.0),
            },
        )
    }

    /// Whether the bounds are finite and non-degenerate
    pub fn is_valid(&self) -> bool {
        let min = self.bounds.min();
        let max = self.bounds.max();
        [min.x, min.y, max.x, max.y, self.zoom]
            .iter()
            .all(|v| v.is_finite())
            && self.bounds.width() > 0.0
            && self.bounds.height() > 0.0
    }
}

/// Trailing-edge debouncer holding the newest pending value
///
/// A value is released once `interval` has passed since the most recent request.
/// Each request replaces the pending value, so stale requests are dropped.
#[derive(Debug, Clone)]
pub struct Throttle<T> {
    interval: Duration,
    pending: Option<T>,
    last_request: Option<Instant>,
}

impl<T> Throttle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            last_request: None,
        }
    }

    /// Record a new value, superseding any pending one
    pub fn request(&mut self, value: T, now: Instant) {
        if self.pending.is_some() {
            tracing::trace!("Superseding pending viewport request");
        }
        self.pending = Some(value);
        self.last_request = Some(now);
    }

    /// Release the pending value if the interval has elapsed since the last request
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        let last = self.last_request?;
        let elapsed = if now > last {
            now.duration_since(last)
        } else {
            Duration::ZERO
        };
        if elapsed >= self.interval {
            self.last_request = None;
            self.pending.take()
        } else {
            None
        }
    }

    /// Release the pending value immediately
    pub fn flush(&mut self) -> Option<T> {
        self.last_request = None;
        self.pending.take()
    }

    /// Drop the pending value
    pub fn cancel(&mut self) {
        self.last_request = None;
        self.pending = None;
    }

    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_from_center() {
        let viewport = Viewport::from_center(31.2304, 121.4737, 12.0, (1024.0, 768.0));
        assert!(viewport.is_valid());
        let center = viewport.bounds.center();
        assert!((center.x - 121.4737).abs() < 1e-6);
        assert!((center.y - 31.2304).abs() < 0.01);
        // Higher zoom shows a smaller area
        let closer = Viewport::from_center(31.2304, 121.4737, 13.0, (1024.0, 768.0));
        assert!(closer.bounds.width() < viewport.bounds.width());
        assert!((viewport.bounds.width() / closer.bounds.width() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_padded_bounds() {
        let viewport = Viewport::new(121.0, 31.0, 122.0, 32.0, 10.0);
        let padded = viewport.padded_bounds(0.25);
        assert_eq!(padded.min().x, 120.75);
        assert_eq!(padded.max().y, 32.25);
        assert_eq!(viewport.padded_bounds(f64::NAN), viewport.bounds);
        assert_eq!(viewport.padded_bounds(-1.0), viewport.bounds);
    }

    #[test]
    fn test_invalid_viewport() {
        assert!(!Viewport::new(121.0, 31.0, 121.0, 32.0, 10.0).is_valid());
        assert!(!Viewport::new(121.0, f64::NAN, 122.0, 32.0, 10.0).is_valid());
        assert!(!Viewport::new(121.0, 31.0, 122.0, 32.0, f64::NAN).is_valid());
    }

    #[test]
    fn test_throttle_waits_for_quiet_period() {
        let mut throttle = Throttle::new(Duration::from_millis(100));
        let t0 = Instant::now();

        throttle.request(1, t0);
        assert_eq!(throttle.poll(t0 + Duration::from_millis(50)), None);

        // A new request restarts the quiet period and supersedes the old value
        throttle.request(2, t0 + Duration::from_millis(60));
        assert_eq!(throttle.poll(t0 + Duration::from_millis(120)), None);
        assert_eq!(throttle.poll(t0 + Duration::from_millis(160)), Some(2));
        assert_eq!(throttle.poll(t0 + Duration::from_millis(500)), None);
    }

    #[test]
    fn test_throttle_flush_and_cancel() {
        let mut throttle = Throttle::new(Duration::from_secs(10));
        let t0 = Instant::now();
        throttle.request("a", t0);
        assert!(throttle.is_pending());
        assert_eq!(throttle.flush(), Some("a"));
        assert!(!throttle.is_pending());

        throttle.request("b", t0);
        throttle.cancel();
        assert_eq!(throttle.poll(t0 + Duration::from_secs(60)), None);
    }
}
