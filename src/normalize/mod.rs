//! Untrusted GeoJSON in, validated lon/lat features and metadata out.

mod axis;
mod crs;
mod metadata;
mod parse;
mod validate;

use geo::Geometry;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::NormalizerConfig;
use crate::error::{GeoError, Result};
use crate::geom::{geometry_to_geojson, GeometryKind};

pub use axis::AxisVote;
pub use metadata::CollectionMetadata;
pub use parse::parse_geometry;

/// A validated feature in the geographic frame.
#[derive(Debug, Clone)]
pub struct NormalizedFeature {
    pub geometry: Geometry<f64>,
    pub kind: GeometryKind,
    pub properties: Map<String, Value>,
}

impl NormalizedFeature {
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "Feature",
            "geometry": geometry_to_geojson(&self.geometry),
            "properties": self.properties,
        })
    }
}

/// What the normalizer changed, or could not fix, on the way through.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationReport {
    /// Code of the projected system the collection was reprojected from.
    pub reprojected_from: Option<String>,
    /// Coordinates looked projected but matched no candidate zone.
    pub unmatched_projection: bool,
    pub axis_vote: AxisVote,
    pub axis_swapped: bool,
    pub clamped_coordinates: usize,
}

#[derive(Debug, Clone)]
pub struct NormalizedCollection {
    pub features: Vec<NormalizedFeature>,
    pub metadata: CollectionMetadata,
    pub report: NormalizationReport,
}

impl NormalizedCollection {
    #[inline] pub fn len(&self) -> usize { self.features.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.features.is_empty() }

    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "FeatureCollection",
            "features": self.features.iter().map(NormalizedFeature::to_geojson).collect::<Vec<_>>(),
        })
    }
}

/// Stateless GeoJSON normalizer.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self { Self { config } }

    #[inline]
    pub fn config(&self) -> &NormalizerConfig { &self.config }

    /// Normalize raw GeoJSON bytes.
    pub fn normalize(&self, raw: &[u8]) -> Result<NormalizedCollection> {
        let root: Value = serde_json::from_slice(raw)?;
        self.normalize_inner(root, raw.len())
    }

    /// Normalize an already-decoded GeoJSON document.
    pub fn normalize_value(&self, root: Value) -> Result<NormalizedCollection> {
        let size = serde_json::to_vec(&root).map(|v| v.len()).unwrap_or_default();
        self.normalize_inner(root, size)
    }

    fn normalize_inner(&self, root: Value, size_bytes: usize) -> Result<NormalizedCollection> {
        let config = &self.config;
        let raw_features = parse::collection_features(root)?;

        if raw_features.len() > config.max_features {
            return Err(GeoError::validation(format!(
                "collection has {} features, exceeding the limit of {}",
                raw_features.len(), config.max_features
            )));
        }

        let mut features = Vec::with_capacity(raw_features.len());
        for (idx, raw) in raw_features.into_iter().enumerate() {
            let feature = parse::parse_feature(idx, raw)?;
            validate::check_vertex_budget(idx, &feature.geometry, config.max_vertices_per_feature)?;
            features.push(feature);
        }

        let mut report = NormalizationReport::default();
        let sample = features.first().and_then(|f| crs::first_coord(&f.geometry));
        let projected = sample.filter(|c| crs::is_projected(*c, config.projected_threshold));

        if let Some(c) = projected {
            match crs::match_zone(&config.projected_zones, c) {
                Some(zone) => {
                    info!("[normalize] reprojecting {} features from {}", features.len(), zone.code);
                    crs::reproject(&mut features, zone)?;
                    report.reprojected_from = Some(zone.code.clone());
                }
                None => {
                    warn!("[normalize] coordinates ({}, {}) look projected but match no candidate zone", c.x, c.y);
                    report.unmatched_projection = true;
                }
            }
        }

        if report.reprojected_from.is_none() {
            report.axis_vote = axis::vote(&features, config.axis_sample_size, config.projected_threshold);
            if report.axis_vote.should_swap() {
                warn!(
                    "[normalize] {} of {} sampled features look latitude-first, swapping axes on the whole collection",
                    report.axis_vote.needs_swap, report.axis_vote.sampled
                );
                axis::swap_all(&mut features);
                report.axis_swapped = true;
            }
        }

        for (idx, feature) in features.iter_mut().enumerate() {
            report.clamped_coordinates +=
                validate::check_coordinates(idx, &mut feature.geometry, config.coordinate_tolerance)?;
        }
        if report.clamped_coordinates > 0 {
            debug!("[normalize] clamped {} coordinates into range", report.clamped_coordinates);
        }

        let features: Vec<NormalizedFeature> = features.into_iter()
            .map(|f| NormalizedFeature { geometry: f.geometry, kind: f.kind, properties: f.properties })
            .collect();
        let metadata = metadata::extract(&features, size_bytes)?;

        Ok(NormalizedCollection { features, metadata, report })
    }
}

/// Normalize raw GeoJSON bytes with the default configuration.
pub fn normalize(raw: &[u8]) -> Result<NormalizedCollection> {
    Normalizer::default().normalize(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::LayerKind;

    #[test]
    fn metadata_of_mixed_collection() {
        let raw = br#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [-99.1, 19.4]}, "properties": {"name": "a"}},
            {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[-99.0, 19.0], [-98.0, 20.0]]},
             "properties": {"name": "b", "lanes": 2}}
        ]}"#;
        let collection = normalize(raw).unwrap();
        let meta = &collection.metadata;
        assert_eq!(meta.layer_kind, LayerKind::Mixed);
        assert_eq!(meta.property_keys, vec!["name", "lanes"]);
        assert_eq!(meta.bbox.to_array(), [-99.1, 19.0, -98.0, 20.0]);
        assert_eq!(meta.summary(), "2 features with mixed types: Point, LineString");
        assert_eq!(meta.size_bytes, raw.len());
        assert!(!collection.report.axis_swapped);
    }

    #[test]
    fn single_feature_summary() {
        let raw = br#"{"type": "Feature", "geometry": {"type": "Point", "coordinates": [1, 2]}, "properties": null}"#;
        let collection = normalize(raw).unwrap();
        assert_eq!(collection.metadata.summary(), "1 feature of type Point");
        assert_eq!(collection.metadata.sample_feature["properties"], json!({}));
    }

    #[test]
    fn invalid_json_is_validation() {
        assert!(matches!(normalize(b"{not json"), Err(GeoError::Validation { .. })));
    }

    #[test]
    fn unmatched_projection_is_rejected_downstream() {
        let raw = br#"{"type": "Feature", "geometry": {"type": "Point", "coordinates": [2500000, 9000000]}}"#;
        let err = normalize(raw).unwrap_err();
        assert_eq!(err.feature(), Some(0));
    }
}
