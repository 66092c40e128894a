use crate::settings::{Command, ExportFormat, Settings};
use map_point_lib::{
    ClusterConfig, CoordSystem, DataError, HostError, HostHandle, ManagerConfig, MapProvider,
    MarkerDescriptor, MarkerHost, MarkerManager, Point, PointKind, RenderItem, StyleTable,
    Viewport, cluster_points_for_display, coords, export, parse_points,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Host that keeps the markers it is asked to draw
#[derive(Debug, Default)]
pub struct CollectingHost {
    next: u64,
    markers: BTreeMap<HostHandle, MarkerDescriptor>,
}

impl MarkerHost for CollectingHost {
    fn attach(&mut self, marker: &MarkerDescriptor) -> std::result::Result<HostHandle, HostError> {
        self.next += 1;
        let handle = HostHandle(self.next);
        tracing::trace!("Attach {:?} as {:?}", marker.key, handle);
        self.markers.insert(handle, marker.clone());
        Ok(handle)
    }

    fn detach(&mut self, _kind: PointKind, handle: HostHandle) -> std::result::Result<(), HostError> {
        tracing::trace!("Detach {:?}", handle);
        self.markers
            .remove(&handle)
            .map(|_| ())
            .ok_or(HostError::Detached(handle))
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a point file, logging every skipped record
fn load_points(path: &Path) -> Result<Vec<Point>> {
    let (points, diagnostics) = parse_points(&read_file(path)?)?;
    if !diagnostics.is_empty() {
        tracing::warn!(
            "Skipped {} invalid records in {}",
            diagnostics.len(),
            path.display()
        );
    }
    tracing::info!("Loaded {} points from {}", points.len(), path.display());
    Ok(points)
}

/// Run a command and return what it prints
pub fn run(settings: &Settings) -> Result<String> {
    let provider = MapProvider::from(settings.provider);
    match &settings.command {
        Command::Convert {
            from,
            to,
            lng,
            lat,
            strict,
        } => convert((*from).into(), (*to).into(), *lng, *lat, *strict),
        Command::Cluster {
            file,
            zoom,
            radius,
            min_points,
            max_zoom,
        } => {
            let config = ClusterConfig {
                radius: *radius,
                min_points: *min_points,
                max_zoom: *max_zoom,
                ..ClusterConfig::enabled()
            };
            cluster(&load_points(file)?, *zoom, &config, provider.coord_system())
        }
        Command::Render {
            file,
            styles,
            lat,
            lng,
            zoom,
            width,
            height,
            culling_threshold,
            padding,
        } => {
            let styles = match styles {
                Some(path) => StyleTable::from_json(&read_file(path)?)?,
                None => StyleTable::new(),
            };
            let config = ManagerConfig {
                culling_threshold: *culling_threshold,
                viewport_padding: *padding,
                provider,
                ..ManagerConfig::default()
            };
            let viewport = display_viewport(
                provider.coord_system(),
                *lat,
                *lng,
                *zoom,
                (*width as f64, *height as f64),
            )?;
            render(load_points(file)?, styles, config, viewport)
        }
        Command::Export { file, format } => {
            let points = load_points(file)?;
            match format {
                ExportFormat::Text => Ok(export::export_points(&points)),
                ExportFormat::Json => Ok(export::export_points_json(&points)?),
            }
        }
    }
}

fn convert(from: CoordSystem, to: CoordSystem, lng: f64, lat: f64, strict: bool) -> Result<String> {
    if !lng.is_finite() || !lat.is_finite() {
        return Err(CliError::InvalidArgument(format!(
            "coordinate ({lng}, {lat}) is not finite"
        )));
    }
    if strict && from != to && !coords::is_in_region(lng, lat) {
        return Err(DataError::OutsideRegion { lng, lat }.into());
    }
    let (x, y) = from.convert(to, lng, lat);
    tracing::debug!("{} -> {}: ({}, {}) -> ({}, {})", from.name(), to.name(), lng, lat, x, y);
    Ok(export::format_coordinate(x, y))
}

/// Viewport around a WGS84 center, in the provider's display coordinates
fn display_viewport(
    system: CoordSystem,
    lat: f64,
    lng: f64,
    zoom: f64,
    screen_size: (f64, f64),
) -> Result<Viewport> {
    let (lng, lat) = CoordSystem::Wgs84.convert(system, lng, lat);
    let viewport = Viewport::from_center(lat, lng, zoom, screen_size);
    if !viewport.is_valid() {
        return Err(CliError::InvalidArgument(format!(
            "empty viewport at ({lat}, {lng}) zoom {zoom} size {screen_size:?}"
        )));
    }
    Ok(viewport)
}

/// Display position as `{lng, lat}`
fn position_json((lng, lat): (f64, f64)) -> Value {
    json!({"lng": lng, "lat": lat})
}

fn cluster(points: &[Point], zoom: f64, config: &ClusterConfig, system: CoordSystem) -> Result<String> {
    let mut items = Vec::new();
    for item in cluster_points_for_display(points, system, zoom, config)? {
        items.push(match item {
            RenderItem::Singleton(point) => {
                let display = point.display_position(system)?;
                json!({
                    "type": "point",
                    "display": position_json((display.x(), display.y())),
                    "point": point,
                })
            }
            RenderItem::Aggregate(cluster) => json!({
                "type": "cluster",
                "id": cluster.id,
                "size": cluster.size(),
                "display": position_json((cluster.center.x(), cluster.center.y())),
                "members": cluster.members,
            }),
        });
    }
    Ok(serde_json::to_string_pretty(&items)?)
}

fn render(
    points: Vec<Point>,
    styles: StyleTable,
    config: ManagerConfig,
    viewport: Viewport,
) -> Result<String> {
    let mut manager = MarkerManager::new(CollectingHost::default(), styles, config);
    manager.set_viewport(viewport);
    let report = manager.set_points(points);
    let stats = manager.stats();

    let markers: Vec<&MarkerDescriptor> = manager.host().markers.values().collect();
    let output = json!({
        "markers": markers,
        "stats": stats,
        "diagnostics": report.diagnostics,
    });
    let rendered = serde_json::to_string_pretty(&output)?;
    manager.end_session();
    Ok(rendered)
}
