//! Per-kind viewport state and aggregation layer bookkeeping

use super::ClickTarget;
use super::host::{HostHandle, MarkerDescriptor, MarkerHandle, MarkerHost, MarkerKey, MarkerReport, MarkerStyle};
use super::KindStats;
use crate::cluster::{self, Group};
use crate::{
    ClusterConfig, ClusterId, CoordSystem, Diagnostic, Point, PointId, PointIndex, PointKind,
    Result, StyleConfig, Viewport,
};
use geo::Point as GeoPoint;
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Attribute names used as a marker label, in order of preference
const LABEL_ATTRIBUTES: [&str; 2] = ["name", "title"];

/// Identity of a drawn marker, stable across clustering passes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) enum RenderKey {
    Point(PointId),
    /// Member ids in discovery order
    Cluster(Vec<PointId>),
}

/// A materialized point
#[derive(Debug, Clone)]
struct MarkerEntry {
    handle: MarkerHandle,
    point: Arc<Point>,
    /// Position in the active provider's system
    display: GeoPoint<f64>,
    /// Insertion order, which is the order clustering sees
    seq: u64,
    /// Materialized by viewport reconciliation rather than added directly
    managed: bool,
}

pub(super) enum Insert {
    Present,
    Added(MarkerHandle),
    Skipped(Diagnostic),
}

/// A marker the host currently draws, with what it was drawn from
#[derive(Debug, Clone)]
struct DrawnMarker {
    drawn: HostHandle,
    descriptor: MarkerDescriptor,
}

impl DrawnMarker {
    /// Whether the host already shows `descriptor`; cluster ids are per pass and ignored
    fn shows(&self, descriptor: &MarkerDescriptor) -> bool {
        self.descriptor.position == descriptor.position
            && self.descriptor.style == descriptor.style
            && self.descriptor.label == descriptor.label
    }
}

/// Cached display position, valid only for the true position it was derived from
#[derive(Debug, Clone, Copy)]
struct CachedPosition {
    truth: GeoPoint<f64>,
    display: GeoPoint<f64>,
}

/// Everything the manager tracks for one point kind
pub(super) struct KindLayer {
    kind: PointKind,
    style: StyleConfig,
    cluster: ClusterConfig,
    /// Only points near the viewport are materialized
    culled: bool,
    /// Full point set supplied for this kind
    source: Vec<Arc<Point>>,
    /// Index over the display positions of `source`
    index: PointIndex,
    max_points_per_node: usize,
    markers: HashMap<PointId, MarkerEntry>,
    by_handle: HashMap<MarkerHandle, PointId>,
    coord_cache: LruCache<PointId, CachedPosition>,
    /// What the host currently draws for this kind
    rendered: HashMap<RenderKey, DrawnMarker>,
    drawn: HashMap<HostHandle, RenderKey>,
    next_seq: u64,
    /// Zoom of the last clustering pass
    clustered_at: Option<f64>,
    /// Membership changed since the last clustering pass
    dirty: bool,
}

impl KindLayer {
    pub fn new(
        kind: PointKind,
        style: StyleConfig,
        cache_capacity: NonZeroUsize,
        max_points_per_node: usize,
    ) -> Self {
        Self {
            kind,
            cluster: style.cluster_config(),
            style,
            culled: false,
            source: Vec::new(),
            index: PointIndex::new(max_points_per_node),
            max_points_per_node,
            markers: HashMap::new(),
            by_handle: HashMap::new(),
            coord_cache: LruCache::new(cache_capacity),
            rendered: HashMap::new(),
            drawn: HashMap::new(),
            next_seq: 0,
            clustered_at: None,
            dirty: false,
        }
    }

    #[inline]
    fn clusters(&self) -> bool {
        self.cluster.enabled
    }

    #[inline]
    pub fn is_culled(&self) -> bool {
        self.culled
    }

    #[inline]
    pub fn source_len(&self) -> usize {
        self.source.len()
    }

    pub fn contains(&self, id: &PointId) -> bool {
        self.markers.contains_key(id)
    }

    /// Replace the kind style; the caller redraws the layer afterwards
    pub fn set_style(&mut self, style: StyleConfig) {
        self.cluster = style.cluster_config();
        self.style = style;
    }

    /// Display position of a point, through the coordinate cache
    fn display_position(&mut self, point: &Point, system: CoordSystem) -> Result<GeoPoint<f64>> {
        if let Some(cached) = self.coord_cache.get(&point.id) {
            if cached.truth == point.position {
                return Ok(cached.display);
            }
        }
        let display = point.display_position(system)?;
        self.coord_cache.put(
            point.id.clone(),
            CachedPosition {
                truth: point.position,
                display,
            },
        );
        Ok(display)
    }

    /// Replace the source set and rebuild the index
    ///
    /// Points with duplicate ids or unusable coordinates are left out and reported.
    pub fn set_source(
        &mut self,
        points: Vec<Arc<Point>>,
        system: CoordSystem,
        culling_threshold: usize,
    ) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut seen = HashSet::with_capacity(points.len());
        let mut source = Vec::with_capacity(points.len());
        let mut index = PointIndex::new(self.max_points_per_node);

        for point in points {
            if !seen.insert(point.id.clone()) {
                tracing::warn!("Skipping duplicate {} point {}", self.kind, point.id);
                diagnostics.push(Diagnostic::new(
                    Some(point.id.to_string()),
                    format!("duplicate {} id", self.kind),
                ));
                continue;
            }
            match self.display_position(&point, system) {
                Ok(display) => {
                    if index.insert(source.len(), display.x(), display.y()) {
                        source.push(point);
                    } else {
                        tracing::warn!("Skipping unindexable {} point {}", self.kind, point.id);
                        diagnostics.push(Diagnostic::new(
                            Some(point.id.to_string()),
                            format!(
                                "display position ({}, {}) cannot be indexed",
                                display.x(),
                                display.y()
                            ),
                        ));
                    }
                }
                Err(e) => {
                    tracing::warn!("Skipping {} point: {}", self.kind, e);
                    diagnostics.push((&e).into());
                }
            }
        }

        self.index = index;
        self.source = source;

        let culled = self.source.len() > culling_threshold;
        if culled != self.culled {
            tracing::info!(
                "Viewport culling {} for {} ({} points)",
                if culled { "enabled" } else { "disabled" },
                self.kind,
                self.source.len()
            );
        }
        self.culled = culled;
        diagnostics
    }

    /// Indices into `source` that should be materialized
    fn visible_indices(&self, viewport: Option<&Viewport>, padding: f64) -> Vec<usize> {
        if !self.culled {
            return (0..self.source.len()).collect();
        }
        match viewport {
            Some(viewport) => self.index.query(viewport.padded_bounds(padding)),
            // Nothing is known to be on screen yet
            None => Vec::new(),
        }
    }

    /// Bring the materialized set in line with the source and the viewport
    #[allow(clippy::too_many_arguments)]
    pub fn reconcile<H: MarkerHost>(
        &mut self,
        host: &mut H,
        viewport: Option<&Viewport>,
        padding: f64,
        system: CoordSystem,
        zoom: f64,
        next_handle: &mut u64,
    ) -> MarkerReport {
        let mut report = MarkerReport::default();
        let desired: Vec<Arc<Point>> = self
            .visible_indices(viewport, padding)
            .into_iter()
            .map(|i| self.source[i].clone())
            .collect();

        // Snapshot the stale set before touching the maps
        let stale: Vec<PointId> = {
            let wanted: HashMap<&PointId, &Arc<Point>> =
                desired.iter().map(|p| (&p.id, p)).collect();
            let mut stale: Vec<&MarkerEntry> = self
                .markers
                .values()
                .filter(|entry| match wanted.get(&entry.point.id) {
                    Some(point) => **point != entry.point,
                    None => entry.managed,
                })
                .collect();
            stale.sort_unstable_by_key(|entry| entry.seq);
            stale.into_iter().map(|entry| entry.point.id.clone()).collect()
        };

        for id in &stale {
            if let Some(handle) = self.remove(host, id) {
                report.removed.push(self.kind, handle);
            }
        }

        for point in desired {
            match self.insert(host, point, system, next_handle, true) {
                Insert::Added(handle) => report.added.push(self.kind, handle),
                Insert::Skipped(diagnostic) => report.diagnostics.push(diagnostic),
                Insert::Present => {}
            }
        }

        self.refresh(host, zoom);

        if !report.is_empty() {
            tracing::debug!(
                "Reconciled {} layer: +{} -{} ({} materialized of {})",
                self.kind,
                report.added.len(),
                report.removed.len(),
                self.markers.len(),
                self.source.len()
            );
        }
        report
    }

    /// Materialize a point unless its id is already present
    pub fn insert<H: MarkerHost>(
        &mut self,
        host: &mut H,
        point: Arc<Point>,
        system: CoordSystem,
        next_handle: &mut u64,
        managed: bool,
    ) -> Insert {
        if let Some(entry) = self.markers.get_mut(&point.id) {
            entry.managed |= managed;
            return Insert::Present;
        }

        let display = match self.display_position(&point, system) {
            Ok(display) => display,
            Err(e) => {
                tracing::warn!("Skipping {} point: {}", self.kind, e);
                return Insert::Skipped((&e).into());
            }
        };

        let id = point.id.clone();
        let entry = MarkerEntry {
            handle: MarkerHandle(*next_handle),
            point,
            display,
            seq: self.next_seq,
            managed,
        };

        if self.clusters() {
            self.dirty = true;
        } else {
            let descriptor = self.point_descriptor(&entry);
            match host.attach(&descriptor) {
                Ok(drawn) => self.track(RenderKey::Point(id.clone()), drawn, descriptor),
                Err(e) => {
                    tracing::warn!("Host refused {} marker {}: {}", self.kind, id, e);
                    return Insert::Skipped(Diagnostic::new(
                        Some(id.to_string()),
                        format!("host refused marker: {e}"),
                    ));
                }
            }
        }

        *next_handle += 1;
        self.next_seq += 1;
        let handle = entry.handle;
        self.by_handle.insert(handle, id.clone());
        self.markers.insert(id, entry);
        Insert::Added(handle)
    }

    /// Stop materializing a point
    pub fn remove<H: MarkerHost>(&mut self, host: &mut H, id: &PointId) -> Option<MarkerHandle> {
        let entry = self.markers.remove(id)?;
        self.by_handle.remove(&entry.handle);
        if self.clusters() {
            self.dirty = true;
        } else {
            self.detach_key(host, &RenderKey::Point(id.clone()));
        }
        Some(entry.handle)
    }

    /// Stop materializing the point behind a manager handle
    pub fn remove_handle<H: MarkerHost>(
        &mut self,
        host: &mut H,
        handle: MarkerHandle,
    ) -> Option<MarkerHandle> {
        let id = self.by_handle.get(&handle)?.clone();
        self.remove(host, &id)
    }

    /// Re-cluster and draw only the differences from the previous pass
    pub fn refresh<H: MarkerHost>(&mut self, host: &mut H, zoom: f64) {
        if !self.clusters() || (!self.dirty && self.clustered_at == Some(zoom)) {
            return;
        }

        #[cfg(feature = "profiling")]
        profiling::scope!("manager::refresh");

        let desired: Vec<(RenderKey, MarkerDescriptor)> = {
            let mut entries: Vec<&MarkerEntry> = self.markers.values().collect();
            entries.sort_unstable_by_key(|entry| entry.seq);
            let positions: Vec<GeoPoint<f64>> = entries.iter().map(|e| e.display).collect();

            let mut next_cluster = 0u64;
            cluster::group_positions(&positions, zoom, &self.cluster)
                .into_iter()
                .map(|group| match group {
                    Group::Single(i) => {
                        let key = RenderKey::Point(entries[i].point.id.clone());
                        (key, self.point_descriptor(entries[i]))
                    }
                    Group::Cluster { members, center } => {
                        next_cluster += 1;
                        let key = RenderKey::Cluster(
                            members.iter().map(|&i| entries[i].point.id.clone()).collect(),
                        );
                        let descriptor =
                            self.cluster_descriptor(ClusterId(next_cluster), members.len(), center);
                        (key, descriptor)
                    }
                })
                .collect()
        };

        // Keys that disappeared, or whose marker moved or changed style
        let stale: Vec<RenderKey> = {
            let wanted: HashMap<&RenderKey, &MarkerDescriptor> =
                desired.iter().map(|(key, descriptor)| (key, descriptor)).collect();
            let mut stale: Vec<(HostHandle, &RenderKey)> = self
                .rendered
                .iter()
                .filter(|(key, marker)| {
                    wanted
                        .get(*key)
                        .is_none_or(|descriptor| !marker.shows(descriptor))
                })
                .map(|(key, marker)| (marker.drawn, key))
                .collect();
            stale.sort_unstable_by_key(|(drawn, _)| *drawn);
            stale.into_iter().map(|(_, key)| key.clone()).collect()
        };

        let detached = stale.len();
        for key in &stale {
            self.detach_key(host, key);
        }

        let mut attached = 0;
        for (key, descriptor) in desired {
            if self.rendered.contains_key(&key) {
                continue;
            }
            match host.attach(&descriptor) {
                Ok(drawn) => {
                    self.track(key, drawn, descriptor);
                    attached += 1;
                }
                Err(e) => tracing::warn!("Host refused {} marker: {}", self.kind, e),
            }
        }

        tracing::debug!(
            "Re-clustered {} layer at zoom {:.1}: {} detached, {} attached, {} drawn",
            self.kind,
            zoom,
            detached,
            attached,
            self.rendered.len()
        );
        self.dirty = false;
        self.clustered_at = Some(zoom);
    }

    /// Draw every materialized point from scratch
    pub fn render_all<H: MarkerHost>(&mut self, host: &mut H, zoom: f64) {
        if self.clusters() {
            self.dirty = true;
            self.refresh(host, zoom);
            return;
        }

        let mut entries: Vec<&MarkerEntry> = self.markers.values().collect();
        entries.sort_unstable_by_key(|entry| entry.seq);
        let descriptors: Vec<(RenderKey, MarkerDescriptor)> = entries
            .into_iter()
            .filter(|entry| !self.rendered.contains_key(&RenderKey::Point(entry.point.id.clone())))
            .map(|entry| {
                (
                    RenderKey::Point(entry.point.id.clone()),
                    self.point_descriptor(entry),
                )
            })
            .collect();

        for (key, descriptor) in descriptors {
            match host.attach(&descriptor) {
                Ok(drawn) => self.track(key, drawn, descriptor),
                Err(e) => tracing::warn!("Host refused {} marker: {}", self.kind, e),
            }
        }
    }

    /// Remove everything the host draws for this kind, keeping the materialized set
    pub fn detach_all<H: MarkerHost>(&mut self, host: &mut H) {
        let mut drawn: Vec<HostHandle> = self.drawn.keys().copied().collect();
        drawn.sort_unstable();
        for handle in drawn {
            if let Err(e) = host.detach(self.kind, handle) {
                tracing::warn!("Failed to detach {} marker: {}", self.kind, e);
            }
        }
        self.rendered.clear();
        self.drawn.clear();
        self.dirty = true;
        self.clustered_at = None;
    }

    /// Move every position to a new coordinate system and redraw
    ///
    /// Returns the source points that could not be re-indexed in `system`.
    pub fn set_system<H: MarkerHost>(
        &mut self,
        host: &mut H,
        system: CoordSystem,
        culling_threshold: usize,
        zoom: f64,
    ) -> Vec<Diagnostic> {
        self.detach_all(host);
        self.coord_cache.clear();

        let points: Vec<Arc<Point>> = self.markers.values().map(|e| e.point.clone()).collect();
        for point in points {
            match self.display_position(&point, system) {
                Ok(display) => {
                    if let Some(entry) = self.markers.get_mut(&point.id) {
                        entry.display = display;
                    }
                }
                Err(e) => tracing::warn!("Cannot move {} point: {}", self.kind, e),
            }
        }

        let source = std::mem::take(&mut self.source);
        let diagnostics = self.set_source(source, system, culling_threshold);
        self.render_all(host, zoom);
        diagnostics
    }

    /// Detach everything and forget all state
    pub fn clear<H: MarkerHost>(&mut self, host: &mut H) {
        self.detach_all(host);
        self.markers.clear();
        self.by_handle.clear();
        self.source.clear();
        self.index = PointIndex::new(self.max_points_per_node);
        self.coord_cache.clear();
        self.culled = false;
        self.dirty = false;
    }

    /// What a host marker stands for
    pub fn click(&self, drawn: HostHandle) -> Option<ClickTarget> {
        match self.drawn.get(&drawn)? {
            RenderKey::Point(id) => self
                .markers
                .get(id)
                .map(|entry| ClickTarget::Point(entry.point.clone())),
            RenderKey::Cluster(ids) => Some(ClickTarget::Cluster(
                ids.iter()
                    .filter_map(|id| self.markers.get(id))
                    .map(|entry| entry.point.clone())
                    .collect(),
            )),
        }
    }

    /// Point behind a manager handle
    pub fn point(&self, handle: MarkerHandle) -> Option<Arc<Point>> {
        let id = self.by_handle.get(&handle)?;
        self.markers.get(id).map(|entry| entry.point.clone())
    }

    pub fn stats(&self) -> KindStats {
        KindStats {
            kind: self.kind,
            source_points: self.source.len(),
            materialized: self.markers.len(),
            drawn: self.rendered.len(),
            clusters: self
                .rendered
                .keys()
                .filter(|key| matches!(key, RenderKey::Cluster(_)))
                .count(),
            culled: self.culled,
            cached_positions: self.coord_cache.len(),
        }
    }

    fn track(&mut self, key: RenderKey, drawn: HostHandle, descriptor: MarkerDescriptor) {
        self.rendered
            .insert(key.clone(), DrawnMarker { drawn, descriptor });
        self.drawn.insert(drawn, key);
    }

    fn detach_key<H: MarkerHost>(&mut self, host: &mut H, key: &RenderKey) {
        let Some(marker) = self.rendered.remove(key) else {
            return;
        };
        self.drawn.remove(&marker.drawn);
        if let Err(e) = host.detach(self.kind, marker.drawn) {
            tracing::warn!("Failed to detach {} marker: {}", self.kind, e);
        }
    }

    fn point_descriptor(&self, entry: &MarkerEntry) -> MarkerDescriptor {
        let style = self.style.merged(entry.point.style.as_ref());
        MarkerDescriptor {
            kind: self.kind,
            key: MarkerKey::Point {
                id: entry.point.id.clone(),
            },
            position: entry.display,
            style: MarkerStyle::for_point(&style),
            label: LABEL_ATTRIBUTES
                .iter()
                .find_map(|name| entry.point.attributes.get(*name)?.as_str())
                .map(str::to_string),
        }
    }

    fn cluster_descriptor(&self, id: ClusterId, size: usize, center: GeoPoint<f64>) -> MarkerDescriptor {
        MarkerDescriptor {
            kind: self.kind,
            key: MarkerKey::Cluster { id, size },
            position: center,
            style: MarkerStyle::for_cluster(&self.style),
            label: Some(size.to_string()),
        }
    }
}
