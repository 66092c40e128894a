use clap::{Parser, Subcommand, ValueEnum};
use map_point_lib::{CoordSystem, MapProvider};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Map Point - convert, cluster, render and export map point layers
pub struct Settings {
    #[clap(subcommand)]
    pub command: Command,

    /// Base map whose coordinate system markers are drawn in
    #[clap(short, long, value_enum, default_value = "osm", global = true)]
    pub provider: ProviderArg,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Convert one coordinate pair between coordinate systems
    #[clap(allow_negative_numbers = true)]
    Convert {
        /// Source coordinate system
        #[clap(long, value_enum, default_value = "wgs84")]
        from: SystemArg,

        /// Target coordinate system
        #[clap(long, value_enum)]
        to: SystemArg,

        /// Longitude in the source system
        lng: f64,

        /// Latitude in the source system
        lat: f64,

        /// Fail instead of passing through coordinates outside the offset region
        #[clap(long, default_value = "false")]
        strict: bool,
    },

    /// Cluster a JSON point file for one zoom level
    Cluster {
        /// JSON array of point records
        #[clap(value_name = "FILE")]
        file: PathBuf,

        /// Map zoom level
        #[clap(short, long, default_value = "15")]
        zoom: f64,

        /// Merge radius in screen pixels
        #[clap(long, default_value = "50")]
        radius: f64,

        /// Smallest group rendered as a cluster
        #[clap(long, default_value = "2")]
        min_points: usize,

        /// Zoom level above which points are never clustered
        #[clap(long, default_value = "16")]
        max_zoom: f64,
    },

    /// Run a marker session over one viewport and print what would be drawn
    #[clap(allow_negative_numbers = true)]
    Render {
        /// JSON array of point records
        #[clap(value_name = "FILE")]
        file: PathBuf,

        /// JSON object of styles keyed by point type
        #[clap(short, long, value_name = "FILE")]
        styles: Option<PathBuf>,

        /// Latitude of the viewport center (WGS84)
        #[clap(long)]
        lat: f64,

        /// Longitude of the viewport center (WGS84)
        #[clap(long)]
        lng: f64,

        /// Map zoom level
        #[clap(short, long, default_value = "15")]
        zoom: f64,

        /// Viewport width in pixels
        #[clap(long, default_value = "1920")]
        width: u32,

        /// Viewport height in pixels
        #[clap(long, default_value = "1080")]
        height: u32,

        /// Point count per type above which markers are culled to the viewport
        #[clap(long, default_value = "500")]
        culling_threshold: usize,

        /// Viewport padding as a fraction of its size per side
        #[clap(long, default_value = "0.2")]
        padding: f64,
    },

    /// Export a JSON point file with canonical GPS coordinates
    Export {
        /// JSON array of point records
        #[clap(value_name = "FILE")]
        file: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value = "text")]
        format: ExportFormat,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemArg {
    Wgs84,
    Gcj02,
    Bd09,
}

impl From<SystemArg> for CoordSystem {
    fn from(arg: SystemArg) -> Self {
        match arg {
            SystemArg::Wgs84 => CoordSystem::Wgs84,
            SystemArg::Gcj02 => CoordSystem::Gcj02,
            SystemArg::Bd09 => CoordSystem::Bd09,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderArg {
    Osm,
    Tianditu,
    Amap,
    Tencent,
    Baidu,
}

impl From<ProviderArg> for MapProvider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Osm => MapProvider::OpenStreetMap,
            ProviderArg::Tianditu => MapProvider::Tianditu,
            ProviderArg::Amap => MapProvider::Amap,
            ProviderArg::Tencent => MapProvider::Tencent,
            ProviderArg::Baidu => MapProvider::Baidu,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// `id,lng,lat` lines
    Text,
    /// Point records as a JSON array
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_convert() {
        let settings =
            Settings::try_parse_from(["map-point", "convert", "--to", "gcj02", "121.47", "31.23"])
                .unwrap();
        assert_eq!(settings.provider, ProviderArg::Osm);
        let Command::Convert {
            from,
            to,
            lng,
            lat,
            strict,
        } = settings.command
        else {
            panic!("expected convert");
        };
        assert_eq!(from, SystemArg::Wgs84);
        assert_eq!(to, SystemArg::Gcj02);
        assert_eq!((lng, lat), (121.47, 31.23));
        assert!(!strict);
    }

    #[test]
    fn test_parse_negative_coordinates() {
        let settings =
            Settings::try_parse_from(["map-point", "convert", "--to", "bd09", "-0.12", "51.5"])
                .unwrap();
        assert!(matches!(settings.command, Command::Convert { lng, .. } if lng == -0.12));
    }

    #[test]
    fn test_parse_render_with_provider() {
        let settings = Settings::try_parse_from([
            "map-point",
            "render",
            "points.json",
            "--lat",
            "31.2",
            "--lng",
            "121.5",
            "--provider",
            "amap",
        ])
        .unwrap();
        assert_eq!(MapProvider::from(settings.provider), MapProvider::Amap);
        let Command::Render {
            zoom,
            width,
            culling_threshold,
            styles,
            ..
        } = settings.command
        else {
            panic!("expected render");
        };
        assert_eq!(zoom, 15.0);
        assert_eq!(width, 1920);
        assert_eq!(culling_threshold, 500);
        assert!(styles.is_none());
    }

    #[test]
    fn test_missing_subcommand_fails() {
        assert!(Settings::try_parse_from(["map-point"]).is_err());
        assert!(Settings::try_parse_from(["map-point", "convert", "--to", "mars", "1", "2"]).is_err());
    }
}
