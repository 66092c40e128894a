//! Quadtree spatial index for viewport culling of points
//!
//! Points are stored by their index in the caller's point list, in Web Mercator space.
//! Leaves split once they hold more than `max_points_per_node` entries, so dense areas
//! get deep subtrees while sparse areas stay shallow.

use crate::utils;
use geo::{Coord, Point, Rect};
use smallvec::SmallVec;

/// Maximum depth of the quadtree to prevent infinite recursion on duplicate positions
const MAX_DEPTH: u32 = 20;

/// Default leaf capacity before a node subdivides
pub const DEFAULT_MAX_POINTS_PER_NODE: usize = 64;

/// A point stored in the index
#[derive(Debug, Clone, Copy)]
struct Entry {
    /// Index in the caller's point list
    index: usize,
    /// Web Mercator position in meters
    mercator: Point<f64>,
}

/// Spatial index over point positions
#[derive(Debug, Clone)]
pub struct PointIndex {
    /// Root node covering the entire Earth in Web Mercator coordinates
    root: QuadtreeNode,
    /// Leaf capacity before subdivision
    max_points_per_node: usize,
    /// Number of indexed points
    len: usize,
}

/// A single node in the quadtree
#[derive(Debug, Clone)]
struct QuadtreeNode {
    /// Bounding box in Web Mercator meters
    bounding_box: Rect<f64>,
    /// Depth level in the tree (0 = root)
    level: u32,
    /// Entries stored at this node (leaves only, or any node at MAX_DEPTH)
    entries: SmallVec<[Entry; 8]>,
    /// Child nodes (NW, NE, SW, SE) if subdivided
    children: Option<Box<[QuadtreeNode; 4]>>,
}

impl Default for PointIndex {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POINTS_PER_NODE)
    }
}

impl PointIndex {
    /// Create an empty index
    pub fn new(max_points_per_node: usize) -> Self {
        Self {
            root: QuadtreeNode::new_root(),
            max_points_per_node: max_points_per_node.max(1),
            len: 0,
        }
    }

    /// Build an index over positions (x = longitude, y = latitude)
    ///
    /// Entry `i` refers to `positions[i]`.
    pub fn build(positions: &[Point<f64>], max_points_per_node: usize) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("quadtree::build");

        let mut index = Self::new(max_points_per_node);
        for (i, position) in positions.iter().enumerate() {
            index.insert(i, position.x(), position.y());
        }
        index
    }

    /// Insert the point at `index` located at (lng, lat)
    ///
    /// Positions just past the antimeridian (offset display coordinates can reach
    /// beyond 180°) are clamped onto the world edge. Returns `false` when the
    /// position cannot be projected at all.
    pub fn insert(&mut self, index: usize, lng: f64, lat: f64) -> bool {
        let projected = utils::wgs84_to_mercator(lat, lng);
        if !projected.x().is_finite() || !projected.y().is_finite() {
            tracing::warn!("Cannot index point at ({}, {})", lat, lng);
            return false;
        }
        let mercator = Point::new(
            projected
                .x()
                .clamp(utils::EARTH_MERCATOR_MIN, utils::EARTH_MERCATOR_MAX),
            projected
                .y()
                .clamp(utils::EARTH_MERCATOR_MIN, utils::EARTH_MERCATOR_MAX),
        );
        if mercator != projected {
            tracing::trace!("Clamped point ({}, {}) onto the Mercator world", lat, lng);
        }
        debug_assert!(utils::is_valid_mercator(&mercator));
        self.root
            .insert(Entry { index, mercator }, self.max_points_per_node);
        self.len += 1;
        true
    }

    /// Indices of all points inside `bounds` (x = longitude, y = latitude)
    ///
    /// Results are sorted ascending, i.e. in the caller's original point order.
    pub fn query(&self, bounds: Rect<f64>) -> Vec<usize> {
        #[cfg(feature = "profiling")]
        profiling::scope!("quadtree::query");

        let min = utils::wgs84_to_mercator(bounds.min().y, bounds.min().x);
        let max = utils::wgs84_to_mercator(bounds.max().y, bounds.max().x);
        let viewport = Rect::new(
            Coord {
                x: min.x(),
                y: min.y(),
            },
            Coord {
                x: max.x(),
                y: max.y(),
            },
        );

        let mut results = Vec::new();
        self.root.query(viewport, &mut results);
        results.sort_unstable();
        results
    }

    /// Number of indexed points
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Depth of the deepest node, useful for diagnostics
    pub fn depth(&self) -> u32 {
        self.root.depth()
    }
}

impl QuadtreeNode {
    /// Create a root node covering the entire Earth in Web Mercator
    fn new_root() -> Self {
        let bounding_box = Rect::new(
            Coord {
                x: utils::EARTH_MERCATOR_MIN,
                y: utils::EARTH_MERCATOR_MIN,
            },
            Coord {
                x: utils::EARTH_MERCATOR_MAX,
                y: utils::EARTH_MERCATOR_MAX,
            },
        );
        Self::new_child(bounding_box, 0)
    }

    fn new_child(bounding_box: Rect<f64>, level: u32) -> Self {
        Self {
            bounding_box,
            level,
            entries: SmallVec::new(),
            children: None,
        }
    }

    /// Subdivide this node into 4 children
    fn subdivide(&mut self) {
        if self.children.is_some() {
            return; // Already subdivided
        }

        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let mid_x = (min.x + max.x) / 2.0;
        let mid_y = (min.y + max.y) / 2.0;
        let child_level = self.level + 1;

        // Create 4 children: NW, NE, SW, SE
        let nw = Self::new_child(
            Rect::new(Coord { x: min.x, y: mid_y }, Coord { x: mid_x, y: max.y }),
            child_level,
        );
        let ne = Self::new_child(
            Rect::new(Coord { x: mid_x, y: mid_y }, Coord { x: max.x, y: max.y }),
            child_level,
        );
        let sw = Self::new_child(
            Rect::new(Coord { x: min.x, y: min.y }, Coord { x: mid_x, y: mid_y }),
            child_level,
        );
        let se = Self::new_child(
            Rect::new(Coord { x: mid_x, y: min.y }, Coord { x: max.x, y: mid_y }),
            child_level,
        );

        self.children = Some(Box::new([nw, ne, sw, se]));
    }

    /// Index of the child quadrant containing a position
    fn child_slot(&self, position: Point<f64>) -> usize {
        let center = self.bounding_box.center();
        let east = position.x() >= center.x;
        let north = position.y() >= center.y;
        match (north, east) {
            (true, false) => 0,
            (true, true) => 1,
            (false, false) => 2,
            (false, true) => 3,
        }
    }

    fn insert(&mut self, entry: Entry, max_points_per_node: usize) {
        if self.children.is_some() {
            let slot = self.child_slot(entry.mercator);
            if let Some(children) = &mut self.children {
                children[slot].insert(entry, max_points_per_node);
            }
            return;
        }

        self.entries.push(entry);

        if self.entries.len() > max_points_per_node && self.level < MAX_DEPTH {
            self.subdivide();
            let entries = std::mem::take(&mut self.entries);
            for entry in entries {
                let slot = self.child_slot(entry.mercator);
                if let Some(children) = &mut self.children {
                    children[slot].insert(entry, max_points_per_node);
                }
            }
        }
    }

    fn query(&self, viewport: Rect<f64>, results: &mut Vec<usize>) {
        if !self.intersects_viewport(viewport) {
            return;
        }

        results.extend(
            self.entries
                .iter()
                .filter(|e| contains(viewport, e.mercator))
                .map(|e| e.index),
        );

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query(viewport, results);
            }
        }
    }

    /// Check if this node's bounding box intersects the viewport
    fn intersects_viewport(&self, viewport: Rect<f64>) -> bool {
        let a = self.bounding_box;
        !(a.max().x < viewport.min().x
            || a.min().x > viewport.max().x
            || a.max().y < viewport.min().y
            || a.min().y > viewport.max().y)
    }

    fn depth(&self) -> u32 {
        match &self.children {
            Some(children) => children.iter().map(|c| c.depth()).max().unwrap_or(self.level),
            None => self.level,
        }
    }
}

#[inline]
fn contains(rect: Rect<f64>, point: Point<f64>) -> bool {
    point.x() >= rect.min().x
        && point.x() <= rect.max().x
        && point.y() >= rect.min().y
        && point.y() <= rect.max().y
}
