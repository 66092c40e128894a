//! Types exchanged with the host rendering layer

use crate::{ClusterId, Diagnostic, PointId, PointKind, StyleConfig};
use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};
use std::collections::BTreeMap;

/// Handle of a materialized point, issued by the manager
///
/// Stays valid while the point is materialized, including across re-clustering and
/// provider changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MarkerHandle(pub u64);

/// Handle of a marker drawn by the host, issued by [`MarkerHost::attach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HostHandle(pub u64);

/// Errors reported by the host rendering layer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HostError {
    #[error("Marker {0:?} is already detached")]
    Detached(HostHandle),

    #[error("Map instance is not available")]
    MapUnavailable,

    #[error("Host rejected marker: {0}")]
    Rejected(String),
}

/// What a drawn marker stands for
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerKey {
    Point { id: PointId },
    Cluster { id: ClusterId, size: usize },
}

/// Visual attributes of a drawn marker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerStyle {
    pub color: String,
    pub size: f64,
    pub opacity: f64,
    pub label_size: f64,
    pub label_color: String,
}

impl MarkerStyle {
    /// Style of a single point
    pub fn for_point(style: &StyleConfig) -> Self {
        Self {
            color: style.point_color.clone(),
            size: style.point_size,
            opacity: style.point_opacity,
            label_size: style.point_label_size,
            label_color: style.point_label_color.clone(),
        }
    }

    /// Style of a cluster marker
    pub fn for_cluster(style: &StyleConfig) -> Self {
        Self {
            color: style.cluster_icon_color.clone(),
            size: style.point_size,
            opacity: 1.0,
            label_size: style.point_label_size,
            label_color: style.cluster_text_color.clone(),
        }
    }
}

/// Everything the host needs to draw one marker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerDescriptor {
    #[serde(rename = "type")]
    pub kind: PointKind,
    pub key: MarkerKey,
    /// Display position (x = longitude, y = latitude) in the provider's system
    #[serde(serialize_with = "serialize_position")]
    pub position: geo::Point<f64>,
    pub style: MarkerStyle,
    /// Text drawn on the marker (cluster size, or the point's name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

fn serialize_position<S: Serializer>(
    position: &geo::Point<f64>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut state = serializer.serialize_struct("Position", 2)?;
    state.serialize_field("lng", &position.x())?;
    state.serialize_field("lat", &position.y())?;
    state.end()
}

/// The host rendering layer
///
/// Each [`PointKind`] is drawn on its own aggregation layer; `kind` identifies it.
pub trait MarkerHost {
    /// Draw a marker and return the host's handle for it
    fn attach(&mut self, marker: &MarkerDescriptor) -> Result<HostHandle, HostError>;

    /// Remove a previously drawn marker
    fn detach(&mut self, kind: PointKind, handle: HostHandle) -> Result<(), HostError>;
}

impl<T: MarkerHost + ?Sized> MarkerHost for Box<T> {
    fn attach(&mut self, marker: &MarkerDescriptor) -> Result<HostHandle, HostError> {
        (**self).attach(marker)
    }

    fn detach(&mut self, kind: PointKind, handle: HostHandle) -> Result<(), HostError> {
        (**self).detach(kind, handle)
    }
}

/// Marker handles grouped by point kind
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MarkerBatches {
    batches: BTreeMap<PointKind, Vec<MarkerHandle>>,
}

impl MarkerBatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: PointKind, handle: MarkerHandle) {
        self.batches.entry(kind).or_default().push(handle);
    }

    /// Handles of one kind
    pub fn get(&self, kind: PointKind) -> &[MarkerHandle] {
        self.batches.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append every handle of `other`
    pub fn extend(&mut self, other: MarkerBatches) {
        for (kind, handles) in other.batches {
            self.batches.entry(kind).or_default().extend(handles);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (PointKind, &[MarkerHandle])> {
        self.batches.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Total number of handles
    pub fn len(&self) -> usize {
        self.batches.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of a manager operation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarkerReport {
    /// Points that became materialized
    pub added: MarkerBatches,
    /// Points that stopped being materialized
    pub removed: MarkerBatches,
    /// Points that were skipped
    pub diagnostics: Vec<Diagnostic>,
}

impl MarkerReport {
    pub fn merge(&mut self, other: MarkerReport) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.diagnostics.extend(other.diagnostics);
    }

    /// Whether the operation changed nothing and skipped nothing
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.diagnostics.is_empty()
    }
}
