//! Read paths over persisted layers: viewport, intersection, tiles, clusters.

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use flate2::{write::GzEncoder, Compression};
use geo::Geometry;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::QueryConfig;
use crate::error::{GeoError, Result};
use crate::geom::{cluster_radius_for_zoom, to_wkt, tolerance_for_zoom, Bounds, TileCoord, MAX_ZOOM};
use crate::model::{Cluster, LayerId, LayerRecord, StoredFeature};
use crate::store::{ClusterParams, SpatialFilter, SpatialStore, TileRequest};

/// Name of the single layer inside every rendered tile.
pub const TILE_LAYER_NAME: &str = "layer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Viewport,
    Intersection,
}

/// Caller knobs for viewport and intersection queries.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    /// Falls back to the configured default.
    pub max_features: Option<usize>,
    pub simplify: bool,
}

impl QueryOptions {
    /// Viewport defaults: configured cap, simplified geometries.
    pub fn viewport() -> Self { Self { max_features: None, simplify: true } }

    /// Intersection defaults: configured cap, full-resolution geometries.
    pub fn intersection() -> Self { Self { max_features: None, simplify: false } }

    pub fn max_features(mut self, max: usize) -> Self {
        self.max_features = Some(max);
        self
    }
}

/// Counts attached to every viewport/intersection response.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMetadata {
    pub kind: QueryKind,
    pub total: usize,
    pub returned: usize,
    pub limited: bool,
    /// Present only when the result was truncated.
    pub message: Option<String>,
}

impl QueryMetadata {
    fn new(kind: QueryKind, total: usize, returned: usize, max_features: usize) -> Self {
        let limited = total > max_features;
        let message = limited.then(|| match kind {
            QueryKind::Viewport => format!("Showing {returned} of {total} features. Zoom in to see more detail."),
            QueryKind::Intersection => format!("Showing {returned} of {total} features intersecting the geometry."),
        });
        Self { kind, total, returned, limited, message }
    }

    pub fn to_json(&self) -> Value {
        let total_key = match self.kind {
            QueryKind::Viewport => "totalInBounds",
            QueryKind::Intersection => "totalIntersecting",
        };
        let mut out = Map::new();
        out.insert(total_key.to_string(), json!(self.total));
        out.insert("returned".to_string(), json!(self.returned));
        out.insert("limited".to_string(), json!(self.limited));
        if let Some(message) = &self.message {
            out.insert("message".to_string(), json!(message));
        }
        Value::Object(out)
    }
}

#[derive(Debug, Clone)]
pub struct FeatureResponse {
    pub features: Vec<StoredFeature>,
    pub metadata: QueryMetadata,
}

impl FeatureResponse {
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "FeatureCollection",
            "features": self.features.iter().map(StoredFeature::to_geojson).collect::<Vec<_>>(),
            "metadata": self.metadata.to_json(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClusterCollection {
    pub zoom: u8,
    pub clusters: Vec<Cluster>,
}

impl ClusterCollection {
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "FeatureCollection",
            "features": self.clusters.iter().map(Cluster::to_geojson).collect::<Vec<_>>(),
        })
    }
}

/// Whole-layer export, ordered by feature index.
#[derive(Debug, Clone)]
pub struct LayerExport {
    pub layer: LayerRecord,
    pub features: Vec<StoredFeature>,
}

impl LayerExport {
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "FeatureCollection",
            "features": self.features.iter().map(StoredFeature::to_geojson).collect::<Vec<_>>(),
            "metadata": {
                "layerId": self.layer.id,
                "layerName": self.layer.name,
                "layerType": self.layer.kind,
                "totalFeatures": self.features.len(),
                "bbox": self.layer.bbox,
            },
        })
    }
}

/// Gzip a tile payload for transfer with `Content-Encoding: gzip`.
pub fn compress_tile(tile: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(tile).context("[compress_tile] gzip write failed")?;
    Ok(encoder.finish().context("[compress_tile] gzip finish failed")?)
}

/// Read-only spatial query engine.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn SpatialStore>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn SpatialStore>, config: QueryConfig) -> Self {
        Self { store, config }
    }

    #[inline]
    pub fn config(&self) -> &QueryConfig { &self.config }

    /// Existence and active-flag check run before any spatial work.
    pub async fn require_layer(&self, layer: LayerId) -> Result<LayerRecord> {
        let record = self.store.layer(layer).await?
            .ok_or_else(|| GeoError::not_found(format!("layer {layer}")))?;
        if !record.active {
            return Err(GeoError::domain(format!("layer {layer} is not active")));
        }
        Ok(record)
    }

    async fn run(&self, layer: LayerId, kind: QueryKind, filter: SpatialFilter, options: QueryOptions) -> Result<FeatureResponse> {
        self.require_layer(layer).await?;
        let max_features = options.max_features.unwrap_or(self.config.default_max_features);
        let tolerance = options.simplify.then_some(self.config.viewport_tolerance);

        let total = self.store.count_intersecting(layer, &filter).await?;
        let features = self.store.features_intersecting(layer, &filter, Some(max_features), tolerance).await?;
        let metadata = QueryMetadata::new(kind, total, features.len(), max_features);
        if metadata.limited {
            warn!("[query] layer {layer}: {kind:?} query truncated to {} of {total} features", features.len());
        } else {
            debug!("[query] layer {layer}: {kind:?} query returned {total} features");
        }
        Ok(FeatureResponse { features, metadata })
    }

    /// Features intersecting a lon/lat rectangle.
    pub async fn features_in_bbox(&self, layer: LayerId, bounds: Bounds, options: QueryOptions) -> Result<FeatureResponse> {
        self.run(layer, QueryKind::Viewport, SpatialFilter::Envelope(bounds), options).await
    }

    /// Features intersecting an arbitrary caller geometry.
    pub async fn features_intersecting(&self, layer: LayerId, geometry: &Geometry<f64>, options: QueryOptions) -> Result<FeatureResponse> {
        let wkt = to_wkt(geometry)?;
        self.run(layer, QueryKind::Intersection, SpatialFilter::Wkt(wkt), options).await
    }

    /// Binary vector tile for (z, x, y); empty when no feature intersects it.
    pub async fn tile(&self, layer: LayerId, z: u8, x: u32, y: u32) -> Result<Vec<u8>> {
        let coord = TileCoord::new(z, x, y)?;
        self.require_layer(layer).await?;
        let request = TileRequest {
            coord,
            envelope: coord.envelope(),
            tolerance: tolerance_for_zoom(z),
            extent: self.config.tile_extent,
            buffer: self.config.tile_buffer,
            layer_name: TILE_LAYER_NAME.to_string(),
        };
        self.store.render_tile(layer, &request).await
    }

    /// Point clusters for features intersecting `bounds`.
    pub async fn clusters(&self, layer: LayerId, bounds: Bounds, zoom: u8) -> Result<ClusterCollection> {
        if zoom > MAX_ZOOM {
            return Err(GeoError::validation(format!("zoom {zoom} outside 0..={MAX_ZOOM}")));
        }
        self.require_layer(layer).await?;
        let params = ClusterParams {
            max_clusters: self.config.max_clusters,
            points_per_cluster: self.config.points_per_cluster,
            max_radius: cluster_radius_for_zoom(zoom),
        };
        let clusters = self.store.cluster_points(layer, &bounds, &params).await?;
        debug!("[query] layer {layer}: {} clusters at zoom {zoom}", clusters.len());
        Ok(ClusterCollection { zoom, clusters })
    }

    /// Every feature of a layer.
    pub async fn export_layer(&self, layer: LayerId) -> Result<LayerExport> {
        let record = self.require_layer(layer).await?;
        let features = self.store.features(layer, None).await?;
        Ok(LayerExport { layer: record, features })
    }
}
