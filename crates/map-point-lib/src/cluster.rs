//! Pixel-distance clustering of points for a single zoom level
//!
//! The algorithm is a greedy single pass: each unprocessed point seeds a group and
//! absorbs every later unprocessed point within `radius` screen pixels of the seed.
//! Groups smaller than `min_points` are dissolved back into singletons.
//!
//! The result depends on input order (the first group that reaches a point keeps it).
//! This is relied upon for stable visuals and must not be "fixed".

use crate::style::ClusterConfig;
use crate::{CoordSystem, Point, Result, utils};
use geo::Point as GeoPoint;
use serde::Serialize;
use smallvec::SmallVec;

/// Identity of a cluster within one clustering pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClusterId(pub u64);

/// An aggregate of nearby points
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Unique within the pass that produced it; not stable across passes
    pub id: ClusterId,
    /// Arithmetic mean of member positions (x = longitude, y = latitude)
    pub center: GeoPoint<f64>,
    /// Members in discovery order
    pub members: Vec<Point>,
    pub icon_color: String,
    pub text_color: String,
}

impl Cluster {
    /// Number of member points
    #[inline]
    pub fn size(&self) -> usize {
        self.members.len()
    }
}

/// One renderable output of a clustering pass
#[derive(Debug, Clone, PartialEq)]
pub enum RenderItem {
    /// A point rendered on its own, unchanged
    Singleton(Point),
    /// A cluster marker standing in for its members
    Aggregate(Cluster),
}

impl RenderItem {
    #[inline]
    pub fn is_cluster(&self) -> bool {
        matches!(self, Self::Aggregate(_))
    }

    /// Number of points represented by this item
    #[inline]
    pub fn size(&self) -> usize {
        match self {
            Self::Singleton(_) => 1,
            Self::Aggregate(cluster) => cluster.size(),
        }
    }

    /// Member position or cluster center
    ///
    /// For items from [`cluster_points_for_display`] a singleton reports its true
    /// position while a cluster center is in display coordinates.
    pub fn position(&self) -> GeoPoint<f64> {
        match self {
            Self::Singleton(point) => point.position,
            Self::Aggregate(cluster) => cluster.center,
        }
    }

    /// All points represented by this item
    pub fn points(&self) -> &[Point] {
        match self {
            Self::Singleton(point) => std::slice::from_ref(point),
            Self::Aggregate(cluster) => &cluster.members,
        }
    }
}

/// Summary of a clustering pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterStats {
    pub clusters: usize,
    pub singletons: usize,
    pub largest: usize,
}

impl ClusterStats {
    pub fn from_items(items: &[RenderItem]) -> Self {
        let mut stats = Self::default();
        for item in items {
            match item {
                RenderItem::Singleton(_) => stats.singletons += 1,
                RenderItem::Aggregate(cluster) => {
                    stats.clusters += 1;
                    stats.largest = stats.largest.max(cluster.size());
                }
            }
        }
        stats
    }
}

/// A group of input indices produced by [`group_positions`]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Group {
    /// Index of a point rendered alone
    Single(usize),
    /// Indices of clustered points (discovery order) and their centroid
    Cluster {
        members: SmallVec<[usize; 8]>,
        center: GeoPoint<f64>,
    },
}

/// Whether a pass at this zoom level can produce clusters
#[inline]
pub(crate) fn clustering_active(zoom: f64, config: &ClusterConfig) -> bool {
    config.enabled && zoom <= config.max_zoom
}

/// Group positions by pixel distance
///
/// Works on indices so callers can cluster any point container. The config is
/// expected to be sanitized.
pub(crate) fn group_positions(
    positions: &[GeoPoint<f64>],
    zoom: f64,
    config: &ClusterConfig,
) -> Vec<Group> {
    #[cfg(feature = "profiling")]
    profiling::scope!("cluster::group_positions");

    if !clustering_active(zoom, config) {
        return (0..positions.len()).map(Group::Single).collect();
    }

    let mut processed = vec![false; positions.len()];
    let mut groups = Vec::with_capacity(positions.len());

    for seed in 0..positions.len() {
        if processed[seed] {
            continue;
        }
        processed[seed] = true;

        let mut members: SmallVec<[usize; 8]> = SmallVec::new();
        members.push(seed);

        let seed_position = positions[seed];
        for candidate in (seed + 1)..positions.len() {
            if processed[candidate] {
                continue;
            }
            let distance = utils::pixel_distance(seed_position, positions[candidate], zoom);
            if distance <= config.radius {
                processed[candidate] = true;
                members.push(candidate);
            }
        }

        if members.len() >= config.min_points {
            let count = members.len() as f64;
            let (sum_x, sum_y) = members.iter().fold((0.0, 0.0), |(x, y), &i| {
                (x + positions[i].x(), y + positions[i].y())
            });
            groups.push(Group::Cluster {
                members,
                center: GeoPoint::new(sum_x / count, sum_y / count),
            });
        } else {
            // Too small: every member keeps rendering as itself
            groups.extend(members.into_iter().map(Group::Single));
        }
    }

    groups
}

/// Cluster points for the given zoom level
///
/// Returns one [`RenderItem`] per singleton or cluster. With clustering disabled, or
/// above `max_zoom`, every point comes back as a singleton. Empty input gives empty
/// output.
pub fn cluster_points(points: &[Point], zoom: f64, config: &ClusterConfig) -> Vec<RenderItem> {
    let positions: Vec<GeoPoint<f64>> = points.iter().map(|p| p.position).collect();
    items_from_positions(points, &positions, zoom, config)
}

/// Cluster points as they are drawn on a map in `system`
///
/// Distances and cluster centers use display positions; the points themselves are
/// returned untouched, so singletons and cluster members keep their true WGS84
/// position. Fails on the first point with an unusable coordinate.
pub fn cluster_points_for_display(
    points: &[Point],
    system: CoordSystem,
    zoom: f64,
    config: &ClusterConfig,
) -> Result<Vec<RenderItem>> {
    let positions = points
        .iter()
        .map(|p| p.display_position(system))
        .collect::<Result<Vec<_>>>()?;
    Ok(items_from_positions(points, &positions, zoom, config))
}

fn items_from_positions(
    points: &[Point],
    positions: &[GeoPoint<f64>],
    zoom: f64,
    config: &ClusterConfig,
) -> Vec<RenderItem> {
    let config = config.clone().sanitized();
    let mut next_id = 0u64;
    let items: Vec<RenderItem> = group_positions(positions, zoom, &config)
        .into_iter()
        .map(|group| match group {
            Group::Single(i) => RenderItem::Singleton(points[i].clone()),
            Group::Cluster { members, center } => {
                next_id += 1;
                RenderItem::Aggregate(Cluster {
                    id: ClusterId(next_id),
                    center,
                    members: members.iter().map(|&i| points[i].clone()).collect(),
                    icon_color: config.icon_color.clone(),
                    text_color: config.text_color.clone(),
                })
            }
        })
        .collect();

    let stats = ClusterStats::from_items(&items);
    tracing::debug!(
        "Clustered {} points at zoom {:.1}: {} clusters, {} singletons (largest {})",
        points.len(),
        zoom,
        stats.clusters,
        stats.singletons,
        stats.largest
    );

    items
}
