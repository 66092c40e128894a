//! Viewport marker manager
//!
//! Owns the markers of one map session. Each point kind gets its own aggregation
//! layer on the host. A kind starts unculled (every point is materialized) and
//! switches to viewport culling once its point set grows past
//! [`ManagerConfig::culling_threshold`]; from then on only points in or near the
//! viewport are materialized, and viewport changes are debounced.
//!
//! Kinds with clustering enabled are re-clustered whenever their membership or the
//! zoom changes; only the differences from the previous pass are sent to the host.

mod host;
mod layer;

pub use host::{
    HostError, HostHandle, MarkerBatches, MarkerDescriptor, MarkerHandle, MarkerHost, MarkerKey,
    MarkerReport, MarkerStyle,
};

use crate::{
    CoordSystem, MapProvider, Point, PointId, PointKind, StyleLookup, Throttle, Viewport,
};
use instant::Instant;
use layer::{Insert, KindLayer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

/// Tuning knobs of a [`MarkerManager`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// A kind with more points than this is culled to the viewport
    pub culling_threshold: usize,
    /// Extra margin around the viewport, as a fraction of its size per side
    pub viewport_padding: f64,
    /// Quiet period before a requested viewport is applied
    pub throttle_ms: u64,
    /// Display positions cached per kind
    pub coord_cache_capacity: usize,
    /// Leaf capacity of the per-kind spatial index
    pub max_points_per_node: usize,
    /// Base map the session starts with
    pub provider: MapProvider,
    /// Zoom used for clustering until a viewport is known
    pub initial_zoom: f64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            culling_threshold: 500,
            viewport_padding: 0.2,
            throttle_ms: 150,
            coord_cache_capacity: 50_000,
            max_points_per_node: crate::quadtree::DEFAULT_MAX_POINTS_PER_NODE,
            provider: MapProvider::default(),
            initial_zoom: 12.0,
        }
    }
}

impl ManagerConfig {
    fn cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.coord_cache_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

/// What a clicked host marker stands for
#[derive(Debug, Clone, PartialEq)]
pub enum ClickTarget {
    Point(Arc<Point>),
    /// Members in discovery order
    Cluster(Vec<Arc<Point>>),
}

impl ClickTarget {
    /// Every point behind the marker
    pub fn points(&self) -> &[Arc<Point>] {
        match self {
            Self::Point(point) => std::slice::from_ref(point),
            Self::Cluster(points) => points,
        }
    }
}

/// Per-kind counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindStats {
    pub kind: PointKind,
    pub source_points: usize,
    pub materialized: usize,
    /// Markers currently drawn by the host (clusters count once)
    pub drawn: usize,
    pub clusters: usize,
    pub culled: bool,
    pub cached_positions: usize,
}

/// Session context tying points, viewport and host layers together
pub struct MarkerManager<H: MarkerHost> {
    host: H,
    styles: Box<dyn StyleLookup>,
    config: ManagerConfig,
    system: CoordSystem,
    layers: BTreeMap<PointKind, KindLayer>,
    viewport: Option<Viewport>,
    throttle: Throttle<Viewport>,
    next_handle: u64,
}

/// Layer of `kind`, created with the kind's style on first use
fn layer_entry<'a>(
    layers: &'a mut BTreeMap<PointKind, KindLayer>,
    styles: &dyn StyleLookup,
    config: &ManagerConfig,
    kind: PointKind,
) -> &'a mut KindLayer {
    layers.entry(kind).or_insert_with(|| {
        KindLayer::new(
            kind,
            styles.style_for(kind),
            config.cache_capacity(),
            config.max_points_per_node,
        )
    })
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<H: MarkerHost> MarkerManager<H> {
    pub fn new(host: H, styles: impl StyleLookup + 'static, config: ManagerConfig) -> Self {
        tracing::info!(
            "Starting marker session on {} (culling above {} points)",
            config.provider.name(),
            config.culling_threshold
        );
        Self {
            host,
            styles: Box::new(styles),
            system: config.provider.coord_system(),
            throttle: Throttle::new(Duration::from_millis(config.throttle_ms)),
            config,
            layers: BTreeMap::new(),
            viewport: None,
            next_handle: 1,
        }
    }

    /// Zoom for clustering passes
    fn zoom(&self) -> f64 {
        self.viewport
            .map(|viewport| viewport.zoom)
            .unwrap_or(self.config.initial_zoom)
    }

    /// Materialize points directly
    ///
    /// Ids already present in their kind are skipped, so repeating a call changes
    /// nothing. Points with unusable coordinates are skipped with a diagnostic.
    pub fn add_point_markers(&mut self, points: &[Point]) -> MarkerReport {
        let mut report = MarkerReport::default();
        let mut touched = BTreeSet::new();

        for point in points {
            let layer = layer_entry(&mut self.layers, self.styles.as_ref(), &self.config, point.kind);
            if layer.contains(&point.id) {
                continue;
            }
            let inserted = layer.insert(
                &mut self.host,
                Arc::new(point.clone()),
                self.system,
                &mut self.next_handle,
                false,
            );
            match inserted {
                Insert::Added(handle) => report.added.push(point.kind, handle),
                Insert::Skipped(diagnostic) => report.diagnostics.push(diagnostic),
                Insert::Present => {}
            }
            touched.insert(point.kind);
        }

        self.refresh(touched);
        report
    }

    /// Remove previously returned markers from their layers
    ///
    /// Handles that are unknown or already removed are ignored.
    pub fn remove_batches(&mut self, batches: &MarkerBatches) -> MarkerReport {
        let mut report = MarkerReport::default();
        let mut touched = BTreeSet::new();

        for (kind, handles) in batches.iter() {
            let Some(layer) = self.layers.get_mut(&kind) else {
                tracing::trace!("Ignoring {} handles for empty kind {}", handles.len(), kind);
                continue;
            };
            for &handle in handles {
                match layer.remove_handle(&mut self.host, handle) {
                    Some(removed) => report.removed.push(kind, removed),
                    None => tracing::trace!("Ignoring unknown {} marker {:?}", kind, handle),
                }
            }
            touched.insert(kind);
        }

        self.refresh(touched);
        report
    }

    /// Replace the point set of every kind
    ///
    /// Kinds absent from `points` are emptied.
    pub fn set_points(&mut self, points: Vec<Point>) -> MarkerReport {
        let total = points.len();
        let mut by_kind: BTreeMap<PointKind, Vec<Arc<Point>>> = BTreeMap::new();
        for point in points {
            by_kind.entry(point.kind).or_default().push(Arc::new(point));
        }
        for kind in self.layers.keys() {
            by_kind.entry(*kind).or_default();
        }

        let zoom = self.zoom();
        let mut report = MarkerReport::default();
        for (kind, points) in by_kind {
            let layer = layer_entry(&mut self.layers, self.styles.as_ref(), &self.config, kind);
            report
                .diagnostics
                .extend(layer.set_source(points, self.system, self.config.culling_threshold));
            report.merge(layer.reconcile(
                &mut self.host,
                self.viewport.as_ref(),
                self.config.viewport_padding,
                self.system,
                zoom,
                &mut self.next_handle,
            ));
        }

        tracing::info!(
            "Loaded {} points: {} materialized, {} skipped",
            total,
            report.added.len(),
            report.diagnostics.len()
        );
        report
    }

    /// Apply a viewport immediately, dropping any pending request
    pub fn set_viewport(&mut self, viewport: Viewport) -> MarkerReport {
        if !viewport.is_valid() {
            tracing::warn!("Ignoring invalid viewport {:?}", viewport);
            return MarkerReport::default();
        }
        self.throttle.cancel();
        self.apply_viewport(viewport)
    }

    /// Record a viewport change; it is applied by [`Self::poll`] once the map is quiet
    pub fn request_viewport(&mut self, viewport: Viewport, now: Instant) {
        if !viewport.is_valid() {
            tracing::warn!("Ignoring invalid viewport {:?}", viewport);
            return;
        }
        self.throttle.request(viewport, now);
    }

    /// Apply the pending viewport if the throttle interval has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<MarkerReport> {
        let viewport = self.throttle.poll(now)?;
        Some(self.apply_viewport(viewport))
    }

    /// Apply the pending viewport now
    pub fn flush(&mut self) -> Option<MarkerReport> {
        let viewport = self.throttle.flush()?;
        Some(self.apply_viewport(viewport))
    }

    fn apply_viewport(&mut self, viewport: Viewport) -> MarkerReport {
        self.viewport = Some(viewport);
        let mut report = MarkerReport::default();
        for layer in self.layers.values_mut() {
            report.merge(layer.reconcile(
                &mut self.host,
                self.viewport.as_ref(),
                self.config.viewport_padding,
                self.system,
                viewport.zoom,
                &mut self.next_handle,
            ));
        }
        report
    }

    /// Switch base map, moving every marker to the new coordinate system
    pub fn set_provider(&mut self, provider: MapProvider) -> MarkerReport {
        let system = provider.coord_system();
        self.config.provider = provider;
        if system == self.system {
            tracing::debug!("Provider {} keeps {}", provider.name(), system.name());
            return MarkerReport::default();
        }

        tracing::info!(
            "Switching to {} ({} -> {})",
            provider.name(),
            self.system.name(),
            system.name()
        );
        self.system = system;

        let zoom = self.zoom();
        let mut report = MarkerReport::default();
        for layer in self.layers.values_mut() {
            report.diagnostics.extend(layer.set_system(
                &mut self.host,
                system,
                self.config.culling_threshold,
                zoom,
            ));
            report.merge(layer.reconcile(
                &mut self.host,
                self.viewport.as_ref(),
                self.config.viewport_padding,
                system,
                zoom,
                &mut self.next_handle,
            ));
        }
        report
    }

    /// Replace the style source and redraw every layer
    pub fn set_styles(&mut self, styles: impl StyleLookup + 'static) {
        self.styles = Box::new(styles);
        let zoom = self.zoom();
        for (kind, layer) in self.layers.iter_mut() {
            layer.detach_all(&mut self.host);
            layer.set_style(self.styles.style_for(*kind));
            layer.render_all(&mut self.host, zoom);
        }
    }

    /// Resolve a host marker of `kind` back to its points
    pub fn resolve_click(&self, kind: PointKind, handle: HostHandle) -> Option<ClickTarget> {
        let target = self.layers.get(&kind)?.click(handle);
        if target.is_none() {
            tracing::debug!("Click on unknown {} marker {:?}", kind, handle);
        }
        target
    }

    /// Point behind a handle returned by an add operation
    pub fn point(&self, kind: PointKind, handle: MarkerHandle) -> Option<Arc<Point>> {
        self.layers.get(&kind)?.point(handle)
    }

    /// Whether a point is currently materialized
    pub fn contains(&self, kind: PointKind, id: &PointId) -> bool {
        self.layers
            .get(&kind)
            .is_some_and(|layer| layer.contains(id))
    }

    pub fn stats(&self) -> Vec<KindStats> {
        self.layers.values().map(KindLayer::stats).collect()
    }

    /// Detach every marker and forget all session state
    pub fn end_session(&mut self) {
        for layer in self.layers.values_mut() {
            layer.clear(&mut self.host);
        }
        self.layers.clear();
        self.viewport = None;
        self.throttle.cancel();
        tracing::info!("Marker session ended");
    }

    fn refresh(&mut self, kinds: BTreeSet<PointKind>) {
        let zoom = self.zoom();
        for kind in kinds {
            if let Some(layer) = self.layers.get_mut(&kind) {
                layer.refresh(&mut self.host, zoom);
            }
        }
    }

    #[inline]
    pub fn coord_system(&self) -> CoordSystem {
        self.system
    }

    #[inline]
    pub fn provider(&self) -> MapProvider {
        self.config.provider
    }

    #[inline]
    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    #[inline]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn into_host(self) -> H {
        self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StyleConfig, StyleOverride, StyleTable, coords};
    use std::collections::HashSet;

    /// Host that keeps every drawn marker in memory
    #[derive(Debug, Default)]
    struct RecordingHost {
        next: u64,
        drawn: BTreeMap<u64, MarkerDescriptor>,
        attaches: usize,
        detaches: usize,
        /// Detaching these handles reports an error
        broken: HashSet<u64>,
        refuse: bool,
    }

    impl MarkerHost for RecordingHost {
        fn attach(&mut self, marker: &MarkerDescriptor) -> Result<HostHandle, HostError> {
            if self.refuse {
                return Err(HostError::MapUnavailable);
            }
            self.next += 1;
            self.attaches += 1;
            self.drawn.insert(self.next, marker.clone());
            Ok(HostHandle(self.next))
        }

        fn detach(&mut self, _kind: PointKind, handle: HostHandle) -> Result<(), HostError> {
            self.detaches += 1;
            let removed = self.drawn.remove(&handle.0);
            if self.broken.contains(&handle.0) || removed.is_none() {
                return Err(HostError::Detached(handle));
            }
            Ok(())
        }
    }

    impl RecordingHost {
        fn count(&self, kind: PointKind) -> usize {
            self.drawn.values().filter(|d| d.kind == kind).count()
        }

        fn point_ids(&self, kind: PointKind) -> HashSet<PointId> {
            self.drawn
                .values()
                .filter(|d| d.kind == kind)
                .filter_map(|d| match &d.key {
                    MarkerKey::Point { id } => Some(id.clone()),
                    MarkerKey::Cluster { .. } => None,
                })
                .collect()
        }

        fn find(&self, predicate: impl Fn(&MarkerDescriptor) -> bool) -> Option<HostHandle> {
            self.drawn
                .iter()
                .find(|(_, d)| predicate(d))
                .map(|(handle, _)| HostHandle(*handle))
        }
    }

    fn manager() -> MarkerManager<RecordingHost> {
        MarkerManager::new(
            RecordingHost::default(),
            StyleTable::new(),
            ManagerConfig::default(),
        )
    }

    fn clustered_manager() -> MarkerManager<RecordingHost> {
        let styles = StyleTable::new().with_style(
            PointKind::Video,
            StyleConfig {
                cluster_enabled: true,
                ..StyleConfig::default()
            },
        );
        let mut manager =
            MarkerManager::new(RecordingHost::default(), styles, ManagerConfig::default());
        manager.set_viewport(Viewport::from_center(31.2304, 121.4737, 15.0, (800.0, 600.0)));
        manager
    }

    /// Pair about 15m apart plus a distant point
    fn scenario() -> Vec<Point> {
        vec![
            Point::new(1, PointKind::Video, 31.2304, 121.4737),
            Point::new(2, PointKind::Video, 31.2305, 121.4738),
            Point::new(3, PointKind::Video, 31.3, 121.6),
        ]
    }

    /// 100 columns by `n / 100` rows, 0.01° apart, starting at (31.0, 121.0)
    fn grid(kind: PointKind, n: usize) -> Vec<Point> {
        (0..n)
            .map(|i| {
                Point::new(
                    i as i64,
                    kind,
                    31.0 + (i / 100) as f64 * 0.01,
                    121.0 + (i % 100) as f64 * 0.01,
                )
            })
            .collect()
    }

    fn materialized(manager: &MarkerManager<RecordingHost>, kind: PointKind) -> usize {
        manager
            .stats()
            .iter()
            .find(|s| s.kind == kind)
            .map_or(0, |s| s.materialized)
    }

    #[test]
    fn test_manager_config_defaults() {
        let config: ManagerConfig = serde_json::from_str(r#"{"culling_threshold": 10}"#).unwrap();
        assert_eq!(config.culling_threshold, 10);
        assert_eq!(config.viewport_padding, 0.2);
        assert_eq!(config.throttle_ms, 150);
        assert_eq!(config.coord_cache_capacity, 50_000);
        assert_eq!(config.provider, MapProvider::OpenStreetMap);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut manager = manager();
        let points = scenario();

        let report = manager.add_point_markers(&points);
        assert_eq!(report.added.get(PointKind::Video).len(), 3);
        assert_eq!(manager.host().count(PointKind::Video), 3);

        let again = manager.add_point_markers(&points);
        assert!(again.is_empty());
        assert_eq!(manager.host().count(PointKind::Video), 3);
        assert_eq!(manager.host().attaches, 3);
    }

    #[test]
    fn test_remove_batches_tolerates_repeats() {
        let mut manager = manager();
        let report = manager.add_point_markers(&scenario());

        let removed = manager.remove_batches(&report.added);
        assert_eq!(removed.removed.len(), 3);
        assert_eq!(manager.host().count(PointKind::Video), 0);

        let again = manager.remove_batches(&report.added);
        assert!(again.removed.is_empty());
        assert_eq!(manager.host().detaches, 3);
    }

    #[test]
    fn test_kinds_are_isolated() {
        let mut manager = manager();
        let video = manager.add_point_markers(&scenario());
        let pano = manager.add_point_markers(&[
            Point::new(1, PointKind::Panorama, 31.2304, 121.4737),
            Point::new(2, PointKind::Panorama, 39.9, 116.4),
        ]);
        assert_eq!(pano.added.len(), 2);

        // Same ids under another kind are separate points
        assert!(manager.contains(PointKind::Panorama, &PointId::Int(1)));
        assert!(manager.contains(PointKind::Video, &PointId::Int(1)));

        // Video handles filed under the wrong kind are ignored
        let mut misfiled = MarkerBatches::new();
        for &handle in video.added.get(PointKind::Video) {
            misfiled.push(PointKind::Panorama, handle);
        }
        assert!(manager.remove_batches(&misfiled).removed.is_empty());

        manager.remove_batches(&video.added);
        assert_eq!(manager.host().count(PointKind::Video), 0);
        assert_eq!(manager.host().count(PointKind::Panorama), 2);
    }

    #[test]
    fn test_bad_coordinate_skips_only_that_point() {
        let mut manager = manager();
        let report = manager.add_point_markers(&[
            Point::new(1, PointKind::Video, 31.2, 121.4),
            Point::new(2, PointKind::Video, f64::NAN, 121.4),
            Point::new(3, PointKind::Video, 95.0, 121.4),
            Point::new(4, PointKind::Video, 31.3, 121.5),
        ]);

        assert_eq!(report.added.len(), 2);
        assert_eq!(report.diagnostics.len(), 2);
        assert_eq!(report.diagnostics[0].id.as_deref(), Some("2"));
        assert_eq!(report.diagnostics[1].id.as_deref(), Some("3"));
        assert!(!manager.contains(PointKind::Video, &PointId::Int(2)));
    }

    #[test]
    fn test_point_style_and_label() {
        let mut manager = manager();
        let point = Point::new("p", PointKind::ImageSet, 31.2, 121.4)
            .with_style(StyleOverride {
                point_color: Some("#ff0000".to_string()),
                ..StyleOverride::default()
            })
            .with_attribute("name", serde_json::json!("Bund"));
        manager.add_point_markers(&[point]);

        let descriptor = manager.host().drawn.values().next().unwrap();
        assert_eq!(descriptor.style.color, "#ff0000");
        assert_eq!(descriptor.style.size, 12.0);
        assert_eq!(descriptor.label.as_deref(), Some("Bund"));
        assert_eq!(
            descriptor.key,
            MarkerKey::Point {
                id: PointId::from("p")
            }
        );
    }

    #[test]
    fn test_small_sets_are_not_culled() {
        let mut manager = manager();
        let report = manager.set_points(grid(PointKind::Panorama, 50));
        assert_eq!(report.added.len(), 50);
        let stats = manager.stats();
        assert_eq!(stats.len(), 1);
        assert!(!stats[0].culled);
        assert_eq!(stats[0].source_points, 50);
    }

    #[test]
    fn test_culling_materializes_only_the_viewport() {
        let mut manager = MarkerManager::new(
            RecordingHost::default(),
            StyleTable::new(),
            ManagerConfig {
                culling_threshold: 100,
                ..ManagerConfig::default()
            },
        );

        // Nothing is on screen before the first viewport
        let report = manager.set_points(grid(PointKind::Video, 1000));
        assert!(report.added.is_empty());
        assert!(manager.stats()[0].culled);

        // Padded by 20% per side: columns 121.08..=121.22, rows 31.01..=31.05
        let report = manager.set_viewport(Viewport::new(121.095, 31.015, 121.205, 31.045, 14.0));
        assert_eq!(report.added.len(), 75);
        assert_eq!(manager.host().count(PointKind::Video), 75);
        assert!(manager.contains(PointKind::Video, &PointId::Int(108)));
        assert!(!manager.contains(PointKind::Video, &PointId::Int(107)));
    }

    #[test]
    fn test_shrinking_viewport_never_grows_markers() {
        let mut manager = MarkerManager::new(
            RecordingHost::default(),
            StyleTable::new(),
            ManagerConfig {
                culling_threshold: 100,
                ..ManagerConfig::default()
            },
        );
        manager.set_points(grid(PointKind::Video, 1000));

        let mut half_width = 0.5;
        let mut previous: Option<HashSet<PointId>> = None;
        for _ in 0..6 {
            manager.set_viewport(Viewport::new(
                121.5 - half_width,
                31.05 - half_width / 10.0,
                121.5 + half_width,
                31.05 + half_width / 10.0,
                14.0,
            ));
            let current = manager.host().point_ids(PointKind::Video);
            if let Some(previous) = &previous {
                assert!(current.is_subset(previous));
            }
            previous = Some(current);
            half_width /= 2.0;
        }
    }

    #[test]
    fn test_panning_adds_and_removes() {
        let mut manager = MarkerManager::new(
            RecordingHost::default(),
            StyleTable::new(),
            ManagerConfig {
                culling_threshold: 100,
                ..ManagerConfig::default()
            },
        );
        manager.set_points(grid(PointKind::Video, 1000));

        let first = manager.set_viewport(Viewport::new(121.1, 31.0, 121.2, 31.05, 14.0));
        let second = manager.set_viewport(Viewport::new(121.7, 31.0, 121.8, 31.05, 14.0));
        assert_eq!(second.removed.len(), first.added.len());
        assert!(!second.added.is_empty());
        assert_eq!(
            manager.host().count(PointKind::Video),
            materialized(&manager, PointKind::Video)
        );
    }

    #[test]
    fn test_viewport_requests_are_debounced() {
        let mut manager = manager();
        manager.set_points(scenario());
        let t0 = Instant::now();
        let first = Viewport::new(121.0, 31.0, 122.0, 32.0, 10.0);
        let second = Viewport::new(121.2, 31.1, 121.8, 31.5, 11.0);

        manager.request_viewport(first, t0);
        manager.request_viewport(second, t0 + Duration::from_millis(50));
        assert!(manager.poll(t0 + Duration::from_millis(100)).is_none());
        assert!(manager.viewport().is_none());

        assert!(manager.poll(t0 + Duration::from_millis(250)).is_some());
        assert_eq!(manager.viewport(), Some(&second));
        assert!(manager.poll(t0 + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_flush_and_invalid_viewports() {
        let mut manager = manager();
        assert!(manager.flush().is_none());

        let invalid = Viewport::new(121.0, f64::NAN, 122.0, 32.0, 10.0);
        manager.request_viewport(invalid, Instant::now());
        assert!(manager.flush().is_none());
        assert!(manager.set_viewport(invalid).is_empty());

        let viewport = Viewport::new(121.0, 31.0, 122.0, 32.0, 10.0);
        manager.request_viewport(viewport, Instant::now());
        assert!(manager.flush().is_some());
        assert_eq!(manager.viewport(), Some(&viewport));
    }

    #[test]
    fn test_provider_change_moves_markers() {
        let mut manager = manager();
        let report = manager.add_point_markers(&[Point::new(1, PointKind::Video, 31.2304, 121.4737)]);
        let handle = report.added.get(PointKind::Video)[0];
        let position = manager.host().drawn.values().next().unwrap().position;
        assert_eq!((position.x(), position.y()), (121.4737, 31.2304));

        manager.set_provider(MapProvider::Amap);
        assert_eq!(manager.coord_system(), CoordSystem::Gcj02);
        assert_eq!(manager.host().drawn.len(), 1);
        let position = manager.host().drawn.values().next().unwrap().position;
        assert_eq!(
            (position.x(), position.y()),
            coords::wgs84_to_gcj02(121.4737, 31.2304)
        );

        // Handles survive the move
        assert_eq!(manager.point(PointKind::Video, handle).unwrap().id, PointId::Int(1));

        // Same coordinate system: nothing to redraw
        let attaches = manager.host().attaches;
        manager.set_provider(MapProvider::Tencent);
        assert_eq!(manager.host().attaches, attaches);
        assert_eq!(manager.provider(), MapProvider::Tencent);
    }

    #[test]
    fn test_moved_point_is_redrawn() {
        let mut manager = manager();
        manager.set_points(vec![Point::new(1, PointKind::Video, 31.2, 121.4)]);
        let report = manager.set_points(vec![Point::new(1, PointKind::Video, 31.3, 121.5)]);
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.added.len(), 1);
        let position = manager.host().drawn.values().next().unwrap().position;
        assert_eq!((position.x(), position.y()), (121.5, 31.3));
    }

    #[test]
    fn test_moved_point_is_redrawn_when_clustered() {
        let mut manager = clustered_manager();
        manager.set_points(vec![Point::new(1, PointKind::Video, 31.2, 121.4)]);
        let report = manager.set_points(vec![Point::new(1, PointKind::Video, 31.3, 121.5)]);
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.added.len(), 1);
        assert_eq!(manager.host().drawn.len(), 1);
        let position = manager.host().drawn.values().next().unwrap().position;
        assert_eq!((position.x(), position.y()), (121.5, 31.3));

        // Restyled in place: same id and position, new color
        let restyled = Point::new(1, PointKind::Video, 31.3, 121.5).with_style(StyleOverride {
            point_color: Some("#00ff00".to_string()),
            ..StyleOverride::default()
        });
        manager.set_points(vec![restyled]);
        assert_eq!(manager.host().drawn.len(), 1);
        let descriptor = manager.host().drawn.values().next().unwrap();
        assert_eq!(descriptor.style.color, "#00ff00");
    }

    #[test]
    fn test_moved_member_moves_its_cluster() {
        let mut manager = clustered_manager();
        let mut points = scenario();
        manager.set_points(points.clone());
        let before = manager
            .host()
            .drawn
            .values()
            .find(|d| matches!(d.key, MarkerKey::Cluster { .. }))
            .unwrap()
            .position;

        // Still within the cluster radius of point 1, so the members are unchanged
        points[1] = Point::new(2, PointKind::Video, 31.2306, 121.4739);
        manager.set_points(points);

        let clusters: Vec<&MarkerDescriptor> = manager
            .host()
            .drawn
            .values()
            .filter(|d| matches!(d.key, MarkerKey::Cluster { size: 2, .. }))
            .collect();
        assert_eq!(clusters.len(), 1);
        assert_ne!(clusters[0].position, before);
        assert_eq!(manager.host().count(PointKind::Video), 2);
    }

    #[test]
    fn test_points_past_the_antimeridian_stay_visible() {
        let mut manager = MarkerManager::new(
            RecordingHost::default(),
            StyleTable::new(),
            ManagerConfig {
                culling_threshold: 0,
                provider: MapProvider::Baidu,
                ..ManagerConfig::default()
            },
        );
        manager.set_viewport(Viewport::new(179.9, 9.9, 180.1, 10.1, 14.0));
        let report = manager.set_points(vec![Point::new(1, PointKind::Video, 10.0, 179.999)]);

        assert!(report.diagnostics.is_empty());
        assert_eq!(report.added.len(), 1);
        let stats = &manager.stats()[0];
        assert!(stats.culled);
        assert_eq!((stats.source_points, stats.materialized), (1, 1));
        let position = manager.host().drawn.values().next().unwrap().position;
        assert!(position.x() > 180.0);
    }

    #[test]
    fn test_provider_change_reports_no_diagnostics_for_valid_points() {
        let mut manager = MarkerManager::new(
            RecordingHost::default(),
            StyleTable::new(),
            ManagerConfig {
                culling_threshold: 0,
                ..ManagerConfig::default()
            },
        );
        manager.set_viewport(Viewport::new(179.9, 9.9, 180.1, 10.1, 14.0));
        manager.set_points(vec![Point::new(1, PointKind::Video, 10.0, 179.999)]);

        let report = manager.set_provider(MapProvider::Baidu);
        assert!(report.diagnostics.is_empty());
        assert_eq!(manager.host().count(PointKind::Video), 1);
        assert_eq!(manager.stats()[0].materialized, 1);
    }

    #[test]
    fn test_set_points_empties_missing_kinds() {
        let mut manager = manager();
        manager.set_points(grid(PointKind::Video, 10));
        let report = manager.set_points(grid(PointKind::Video, 5));
        assert_eq!(report.removed.len(), 5);
        assert_eq!(manager.host().count(PointKind::Video), 5);

        manager.set_points(grid(PointKind::Panorama, 3));
        assert_eq!(manager.host().count(PointKind::Video), 0);
        assert_eq!(manager.host().count(PointKind::Panorama), 3);
    }

    #[test]
    fn test_click_resolves_points_and_clusters() {
        let mut manager = clustered_manager();
        manager.add_point_markers(&scenario());
        assert_eq!(manager.host().count(PointKind::Video), 2);

        let cluster = manager
            .host()
            .find(|d| matches!(d.key, MarkerKey::Cluster { size: 2, .. }))
            .unwrap();
        let Some(ClickTarget::Cluster(members)) = manager.resolve_click(PointKind::Video, cluster)
        else {
            panic!("expected a cluster");
        };
        let ids: Vec<PointId> = members.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec![PointId::Int(1), PointId::Int(2)]);

        let single = manager
            .host()
            .find(|d| matches!(&d.key, MarkerKey::Point { id } if *id == PointId::Int(3)))
            .unwrap();
        match manager.resolve_click(PointKind::Video, single) {
            Some(ClickTarget::Point(point)) => assert_eq!(point.id, PointId::Int(3)),
            other => panic!("unexpected {other:?}"),
        }

        assert!(manager.resolve_click(PointKind::Panorama, single).is_none());
        assert!(manager.resolve_click(PointKind::Video, HostHandle(999)).is_none());
    }

    #[test]
    fn test_zoom_change_only_redraws_differences() {
        let mut manager = clustered_manager();
        manager.add_point_markers(&scenario());
        assert_eq!(manager.host().attaches, 2);

        // Above max zoom the pair splits; the distant singleton is kept
        manager.set_viewport(Viewport::from_center(31.2304, 121.4737, 17.0, (800.0, 600.0)));
        assert_eq!(manager.host().count(PointKind::Video), 3);
        assert_eq!(manager.host().attaches, 4);
        assert_eq!(manager.host().detaches, 1);

        manager.set_viewport(Viewport::from_center(31.2304, 121.4737, 15.0, (800.0, 600.0)));
        assert_eq!(manager.host().count(PointKind::Video), 2);
        assert_eq!(manager.host().attaches, 5);
        assert_eq!(manager.host().detaches, 3);
    }

    #[test]
    fn test_removing_a_member_dissolves_the_cluster() {
        let mut manager = clustered_manager();
        let report = manager.add_point_markers(&scenario());
        let second = report.added.get(PointKind::Video)[1];

        let mut batch = MarkerBatches::new();
        batch.push(PointKind::Video, second);
        manager.remove_batches(&batch);

        assert_eq!(
            manager.host().point_ids(PointKind::Video),
            HashSet::from([PointId::Int(1), PointId::Int(3)])
        );
        assert_eq!(manager.stats()[0].clusters, 0);
    }

    #[test]
    fn test_enabling_clusters_redraws() {
        let mut manager = manager();
        manager.set_viewport(Viewport::from_center(31.2304, 121.4737, 15.0, (800.0, 600.0)));
        manager.add_point_markers(&scenario());
        assert_eq!(manager.host().count(PointKind::Video), 3);

        manager.set_styles(|kind: PointKind| StyleConfig {
            cluster_enabled: kind == PointKind::Video,
            ..StyleConfig::default()
        });
        assert_eq!(manager.host().count(PointKind::Video), 2);
        assert_eq!(manager.stats()[0].clusters, 1);
    }

    #[test]
    fn test_host_failures_are_swallowed() {
        let mut manager = manager();
        let report = manager.add_point_markers(&scenario());

        // Host already lost marker 1
        manager.host_mut().broken.insert(1);
        let removed = manager.remove_batches(&report.added);
        assert_eq!(removed.removed.len(), 3);
        assert!(!manager.contains(PointKind::Video, &PointId::Int(1)));

        // A refusing host leaves the point unmaterialized so it can be retried
        manager.host_mut().refuse = true;
        let refused = manager.add_point_markers(&scenario());
        assert!(refused.added.is_empty());
        assert_eq!(refused.diagnostics.len(), 3);

        manager.host_mut().refuse = false;
        let retried = manager.add_point_markers(&scenario());
        assert_eq!(retried.added.len(), 3);
    }

    #[test]
    fn test_end_session_clears_everything() {
        let mut manager = manager();
        manager.set_points(grid(PointKind::Video, 20));
        manager.add_point_markers(&[Point::new(1, PointKind::Panorama, 31.2, 121.4)]);
        manager.request_viewport(
            Viewport::new(121.0, 31.0, 122.0, 32.0, 10.0),
            Instant::now(),
        );

        manager.end_session();
        assert!(manager.host().drawn.is_empty());
        assert!(manager.stats().is_empty());
        assert!(manager.flush().is_none());
    }
}
