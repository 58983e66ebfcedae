//! The datastore seam: everything the engine needs from a spatial database.

mod cluster;
mod memory;
#[cfg(feature = "postgis")]
mod postgis;
mod vector_tile;

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::AttributeQuery;
use crate::geom::{Bounds, TileCoord};
use crate::model::{Cluster, FeatureId, FeatureRow, LayerId, LayerRecord, MapId, NewLayer, StoredFeature};

pub use memory::MemoryStore;
#[cfg(feature = "postgis")]
pub use postgis::PostgisStore;

/// Spatial predicate target for intersection queries.
#[derive(Debug, Clone)]
pub enum SpatialFilter {
    Envelope(Bounds),
    /// Caller geometry, in WKT.
    Wkt(String),
}

/// Everything a datastore needs to render one vector tile.
#[derive(Debug, Clone)]
pub struct TileRequest {
    pub coord: TileCoord,
    pub envelope: Bounds,
    /// Simplification tolerance in degrees; zero disables it.
    pub tolerance: f64,
    pub extent: u32,
    pub buffer: u32,
    pub layer_name: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ClusterParams {
    pub max_clusters: usize,
    pub points_per_cluster: usize,
    /// Clusters wider than this (degrees) are split while the count is below the cap.
    /// PostGIS ignores it and runs plain k-means at the cap.
    pub max_radius: f64,
}

impl ClusterParams {
    /// Cluster count for `points` inputs: one per `points_per_cluster`, capped.
    pub fn cluster_count(&self, points: usize) -> usize {
        if points == 0 { return 0 }
        (points / self.points_per_cluster.max(1)).clamp(1, self.max_clusters.max(1))
    }
}

/// Buffers applied to a degenerate layer envelope.
#[derive(Debug, Clone, Copy)]
pub struct BboxBuffers {
    pub line: f64,
    pub point: f64,
}

/// Read side of a spatial datastore. Every call is an I/O boundary.
#[async_trait]
pub trait SpatialStore: Send + Sync {
    /// Start the unit of work used by one ingestion.
    async fn begin(&self) -> Result<Box<dyn LayerTransaction>>;

    async fn layer(&self, id: LayerId) -> Result<Option<LayerRecord>>;

    /// Records for the ids that exist, in the order requested.
    async fn layers(&self, ids: &[LayerId]) -> Result<Vec<LayerRecord>>;

    async fn count_intersecting(&self, layer: LayerId, filter: &SpatialFilter) -> Result<usize>;

    /// Features intersecting `filter`, ordered by feature index.
    async fn features_intersecting(
        &self,
        layer: LayerId,
        filter: &SpatialFilter,
        limit: Option<usize>,
        simplify: Option<f64>,
    ) -> Result<Vec<StoredFeature>>;

    /// Encoded vector tile; empty when nothing intersects the tile.
    async fn render_tile(&self, layer: LayerId, request: &TileRequest) -> Result<Vec<u8>>;

    async fn cluster_points(&self, layer: LayerId, bounds: &Bounds, params: &ClusterParams) -> Result<Vec<Cluster>>;

    /// A superset of the features matching `query`, ordered by feature index.
    async fn candidate_features(&self, layer: LayerId, query: &AttributeQuery) -> Result<Vec<StoredFeature>>;

    /// The given features (all when `ids` is `None`), ordered by feature index.
    async fn features(&self, layer: LayerId, ids: Option<&[FeatureId]>) -> Result<Vec<StoredFeature>>;
}

/// Write side of one ingestion. Nothing is visible to readers before `commit`;
/// dropping an uncommitted transaction discards it.
#[async_trait]
pub trait LayerTransaction: Send {
    async fn create_layer(&mut self, layer: NewLayer) -> Result<LayerId>;

    /// One multi-row insert.
    async fn insert_features(&mut self, layer: LayerId, rows: &[FeatureRow]) -> Result<()>;

    /// Drop the feature spatial and layer indexes ahead of a bulk load.
    async fn suspend_feature_indexes(&mut self) -> Result<()>;

    /// Recreate the indexes dropped by `suspend_feature_indexes` and refresh statistics.
    async fn rebuild_feature_indexes(&mut self) -> Result<()>;

    /// Compute and persist the layer envelope from its features.
    async fn update_layer_bbox(&mut self, layer: LayerId, buffers: &BboxBuffers) -> Result<Option<Bounds>>;

    async fn attach_to_map(&mut self, map: MapId, layer: LayerId, display_order: i32) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
