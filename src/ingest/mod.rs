//! Transactional persistence of a normalized collection as a new layer.

use std::sync::Arc;

use geo::Point;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{IngestConfig, NormalizerConfig};
use crate::error::{GeoError, Result};
use crate::geom::{geometry_to_geojson, simplify_preserving, to_wkt, vertex_count, Bounds, GeometryKind, LayerKind};
use crate::model::{FeatureRow, LayerId, MapId, NewLayer};
use crate::normalize::{NormalizedCollection, NormalizedFeature, Normalizer};
use crate::store::{BboxBuffers, LayerTransaction, SpatialStore};

/// Layer-level inputs of an ingestion.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
    /// Style document; the layer kind's default is used when absent.
    pub style: Option<Value>,
    pub original_filename: Option<String>,
    pub file_size_bytes: Option<u64>,
    /// Map to attach the new layer to, with its display order.
    pub map: Option<(MapId, Option<i32>)>,
}

impl IngestRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }
}

/// What an ingestion produced.
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub layer_id: LayerId,
    pub name: String,
    pub description: Option<String>,
    pub layer_kind: LayerKind,
    pub total_features: usize,
    pub centroid: Point<f64>,
    pub bbox: Option<Bounds>,
    pub geometry_kinds: Vec<GeometryKind>,
    pub property_keys: Vec<String>,
    pub summary: String,
    pub map_id: Option<MapId>,
    /// Features simplified at ingest for exceeding the vertex threshold.
    pub simplified_features: usize,
}

impl IngestSummary {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.layer_id,
            "name": self.name,
            "description": self.description,
            "layerType": self.layer_kind,
            "totalFeatures": self.total_features,
            "centroid": geometry_to_geojson(&self.centroid.into()),
            "bbox": self.bbox,
            "geometryTypes": self.geometry_kinds.iter().map(GeometryKind::to_str).collect::<Vec<_>>(),
            "properties": self.property_keys,
            "summary": self.summary,
            "mapId": self.map_id,
            "simplifiedFeatures": self.simplified_features,
        })
    }
}

/// Style applied to a new layer that was uploaded without one.
pub fn default_style(kind: LayerKind) -> Value {
    match kind {
        LayerKind::Point | LayerKind::MultiPoint => json!({
            "iconUrl": "/icons/marker-default.png",
            "iconSize": [25, 41],
            "iconAnchor": [12, 41],
            "color": "#3388ff",
        }),
        LayerKind::LineString | LayerKind::MultiLineString => json!({
            "color": "#3388ff",
            "weight": 3,
            "opacity": 0.8,
        }),
        LayerKind::Polygon | LayerKind::MultiPolygon => json!({
            "fillColor": "#3388ff",
            "fillOpacity": 0.2,
            "color": "#3388ff",
            "weight": 2,
        }),
        LayerKind::Mixed => json!({
            "color": "#3388ff",
            "weight": 2,
            "fillOpacity": 0.2,
        }),
    }
}

/// Writes normalized collections into a spatial datastore.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn SpatialStore>,
    config: IngestConfig,
    normalizer: Normalizer,
}

impl Ingestor {
    pub fn new(store: Arc<dyn SpatialStore>, config: IngestConfig) -> Self {
        Self::with_normalizer(store, config, NormalizerConfig::default())
    }

    pub fn with_normalizer(store: Arc<dyn SpatialStore>, config: IngestConfig, normalizer: NormalizerConfig) -> Self {
        Self { store, config, normalizer: Normalizer::new(normalizer) }
    }

    /// Normalize raw GeoJSON and ingest it as a new layer.
    pub async fn upload(&self, raw: &[u8], mut request: IngestRequest) -> Result<IngestSummary> {
        let collection = self.normalizer.normalize(raw)?;
        request.file_size_bytes.get_or_insert(raw.len() as u64);
        self.ingest(request, &collection).await
    }

    /// Persist `collection` as a new layer in one transaction. Any failure
    /// rolls everything back.
    pub async fn ingest(&self, request: IngestRequest, collection: &NormalizedCollection) -> Result<IngestSummary> {
        if request.name.trim().is_empty() {
            return Err(GeoError::validation("layer name must not be blank"));
        }
        if collection.is_empty() {
            return Err(GeoError::validation("collection has no features"));
        }

        let mut tx = self.store.begin().await?;
        match self.write(tx.as_mut(), &request, collection).await {
            Ok(summary) => {
                tx.commit().await?;
                info!(
                    "[ingest] layer {} '{}' committed with {} features",
                    summary.layer_id, summary.name, summary.total_features
                );
                Ok(summary)
            }
            Err(err) => {
                warn!("[ingest] rolling back layer '{}': {err}", request.name);
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("[ingest] rollback failed: {rollback_err}");
                }
                Err(err)
            }
        }
    }

    async fn write(
        &self,
        tx: &mut dyn LayerTransaction,
        request: &IngestRequest,
        collection: &NormalizedCollection,
    ) -> Result<IngestSummary> {
        let config = &self.config;
        let metadata = &collection.metadata;
        let total = collection.len();

        let layer_id = tx.create_layer(NewLayer {
            name: request.name.trim().to_string(),
            description: request.description.clone(),
            kind: metadata.layer_kind,
            feature_count: total,
            style: request.style.clone().unwrap_or_else(|| default_style(metadata.layer_kind)),
            is_public: request.is_public,
            original_filename: request.original_filename.clone(),
            file_size_bytes: request.file_size_bytes,
        }).await?;

        let large = config.is_large(total);
        let batch_size = config.batch_size_for(total);
        if large {
            info!("[ingest] large layer ({total} features): suspending feature indexes, batches of {batch_size}");
            tx.suspend_feature_indexes().await?;
        }

        let mut simplified_features = 0;
        let mut written = 0;
        for (batch_idx, batch) in collection.features.chunks(batch_size).enumerate() {
            let offset = batch_idx * batch_size;
            let mut rows = Vec::with_capacity(batch.len());
            for (i, feature) in batch.iter().enumerate() {
                let (row, simplified) = self.feature_row(offset + i, feature)?;
                simplified_features += usize::from(simplified);
                rows.push(row);
            }
            tx.insert_features(layer_id, &rows).await?;

            let before = written;
            written += rows.len();
            if written / config.progress_interval.max(1) > before / config.progress_interval.max(1) {
                info!("[ingest] layer {layer_id}: {written}/{total} features written");
            }
        }

        if large {
            tx.rebuild_feature_indexes().await?;
        }

        let bbox = tx.update_layer_bbox(layer_id, &BboxBuffers {
            line: config.line_bbox_buffer,
            point: config.point_bbox_buffer,
        }).await?;

        let map_id = match request.map {
            Some((map, order)) => {
                tx.attach_to_map(map, layer_id, order.unwrap_or(0)).await?;
                Some(map)
            }
            None => None,
        };

        Ok(IngestSummary {
            layer_id,
            name: request.name.trim().to_string(),
            description: request.description.clone(),
            layer_kind: metadata.layer_kind,
            total_features: total,
            centroid: metadata.centroid,
            bbox,
            geometry_kinds: metadata.geometry_kinds.clone(),
            property_keys: metadata.property_keys.clone(),
            summary: metadata.summary(),
            map_id,
            simplified_features,
        })
    }

    /// Datastore row for one feature; dense shapes are simplified first.
    fn feature_row(&self, index: usize, feature: &NormalizedFeature) -> Result<(FeatureRow, bool)> {
        let dense = feature.kind.is_simplifiable()
            && vertex_count(&feature.geometry) > self.config.simplify_vertex_threshold;
        let wkt = if dense {
            to_wkt(&simplify_preserving(&feature.geometry, self.config.simplify_tolerance))
        } else {
            to_wkt(&feature.geometry)
        }.map_err(|e| match e {
            GeoError::Validation { message, .. } => GeoError::at_feature(index, message),
            other => other,
        })?;
        let properties = serde_json::to_string(&feature.properties)
            .map_err(|e| anyhow::anyhow!("[ingest] failed to serialize properties of feature {index}: {e}"))?;
        Ok((FeatureRow { index, wkt, properties }, dense))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_styles_by_kind() {
        assert_eq!(default_style(LayerKind::Point)["iconSize"], json!([25, 41]));
        assert_eq!(default_style(LayerKind::MultiLineString)["weight"], 3);
        assert_eq!(default_style(LayerKind::MultiPolygon)["fillOpacity"], 0.2);
        assert_eq!(default_style(LayerKind::Mixed)["weight"], 2);
    }
}
