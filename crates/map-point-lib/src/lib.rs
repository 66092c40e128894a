//! Map Point Library - Geospatial Core for Map Point Layers
//!
//! This library turns large sets of map points (panoramas, videos, image sets and
//! overlay-derived points) into the markers a map view actually needs to draw.
//! It reconciles the coordinate systems used by different tile providers, collapses
//! nearby points into cluster markers per zoom level, and keeps the set of on-screen
//! markers in sync with the viewport without rebuilding it on every pan.
//!
//! # Architecture
//!
//! - **[`coords`]**: Pure conversions between WGS84, GCJ-02 and BD-09
//! - **[`cluster_points`]**: Greedy pixel-distance clustering into [`RenderItem`]s
//! - **[`MarkerManager`]**: Per-session owner of the point → marker mapping
//! - **[`PointIndex`]**: Quadtree used to cull points to the viewport
//! - **[`export`]**: Canonical-coordinate export formats
//!
//! # Performance Characteristics
//!
//! - **Clustering**: O(n²) worst case over the culled working set
//! - **Culling query**: O(log D + K) where D=depth, K=results
//! - **Viewport update**: O(K + changed markers), debounced

pub mod coords;
pub mod export;
mod cluster;
mod manager;
mod point;
mod quadtree;
mod style;
pub mod utils;
mod viewport;

// Public API exports
pub use cluster::{
    Cluster, ClusterId, ClusterStats, RenderItem, cluster_points, cluster_points_for_display,
};
pub use coords::{CoordSystem, MapProvider};
pub use manager::{
    ClickTarget, HostError, HostHandle, KindStats, ManagerConfig, MarkerBatches,
    MarkerDescriptor, MarkerHandle, MarkerHost, MarkerKey, MarkerManager, MarkerReport,
    MarkerStyle,
};
pub use point::{Diagnostic, Point, PointId, PointKind, parse_points, points_from_values};
pub use quadtree::PointIndex;
pub use style::{ClusterConfig, StyleConfig, StyleLookup, StyleOverride, StyleTable};
pub use viewport::{Throttle, Viewport};

/// Error types for the point core
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid coordinate for point {id}: {reason}")]
    InvalidCoordinate { id: String, reason: String },

    #[error("Coordinate ({lng}, {lat}) is outside the offset region")]
    OutsideRegion { lng: f64, lat: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DataError>;
