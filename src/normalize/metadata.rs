use ahash::AHashSet;
use geo::{Point, Polygon};
use serde_json::{json, Value};

use crate::error::{GeoError, Result};
use crate::geom::{geometry_to_geojson, Bounds, GeometryKind, LayerKind};
use super::NormalizedFeature;

/// Descriptive metadata of a normalized collection.
#[derive(Debug, Clone)]
pub struct CollectionMetadata {
    pub feature_count: usize,
    pub bbox: Bounds,
    /// Center of the bounding box.
    pub centroid: Point<f64>,
    /// Kinds present, in canonical order.
    pub geometry_kinds: Vec<GeometryKind>,
    pub layer_kind: LayerKind,
    /// Union of attribute keys, in order of first appearance.
    pub property_keys: Vec<String>,
    pub sample_feature: Value,
    /// Size of the upload in bytes.
    pub size_bytes: usize,
}

impl CollectionMetadata {
    #[inline]
    pub fn bbox_polygon(&self) -> Polygon<f64> { self.bbox.to_polygon() }

    /// One-line human description, e.g. "12 features of type MultiPolygon".
    pub fn summary(&self) -> String {
        let n = self.feature_count;
        let noun = if n == 1 { "feature" } else { "features" };
        match self.geometry_kinds.as_slice() {
            [kind] => format!("{n} {noun} of type {kind}"),
            kinds => {
                let names: Vec<&str> = kinds.iter().map(GeometryKind::to_str).collect();
                format!("{n} {noun} with mixed types: {}", names.join(", "))
            }
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "totalFeatures": self.feature_count,
            "layerType": self.layer_kind,
            "bbox": self.bbox,
            "bboxPolygon": geometry_to_geojson(&self.bbox_polygon().into()),
            "centroid": geometry_to_geojson(&self.centroid.into()),
            "geometryTypes": self.geometry_kinds.iter().map(GeometryKind::to_str).collect::<Vec<_>>(),
            "properties": self.property_keys,
            "sampleFeature": self.sample_feature,
            "summary": self.summary(),
            "sizeBytes": self.size_bytes,
        })
    }
}

pub(super) fn extract(features: &[NormalizedFeature], size_bytes: usize) -> Result<CollectionMetadata> {
    let bbox = Bounds::union_all(features.iter().map(|f| &f.geometry))
        .ok_or_else(|| GeoError::validation("collection has no coordinates"))?;

    let mut geometry_kinds: Vec<GeometryKind> = features.iter().map(|f| f.kind).collect();
    geometry_kinds.sort();
    geometry_kinds.dedup();

    let mut seen = AHashSet::new();
    let mut property_keys = Vec::new();
    for key in features.iter().flat_map(|f| f.properties.keys()) {
        if seen.insert(key.as_str()) { property_keys.push(key.clone()) }
    }

    Ok(CollectionMetadata {
        feature_count: features.len(),
        bbox,
        centroid: bbox.center(),
        layer_kind: LayerKind::from_kinds(&geometry_kinds),
        geometry_kinds,
        property_keys,
        sample_feature: features.first().map(NormalizedFeature::to_geojson).unwrap_or(Value::Null),
        size_bytes,
    })
}
