//! Alias-aware attribute filtering over multipolygon layers.

mod alias;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ahash::AHashSet;
use geo::{Centroid, ChamberlainDuquetteArea, Geometry, Point};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::AliasRules;
use crate::error::{GeoError, Result};
use crate::geom::{geometry_to_geojson, Bounds, GeometryKind};
use crate::model::{FeatureId, LayerId, LayerRecord, StoredFeature};
use crate::store::SpatialStore;

pub use alias::{keys_equivalent, normalize_key, AliasKey};

/// Attribute key to candidate values (OR within a key, AND across keys),
/// plus an optional feature-id allow-list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub filters: BTreeMap<String, Vec<String>>,
    pub feature_ids: Option<Vec<FeatureId>>,
}

impl FilterSpec {
    pub fn new() -> Self { Self::default() }

    /// Add candidate values for a key; values are trimmed and blanks dropped.
    pub fn with(mut self, key: impl Into<String>, values: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let values = values.into_iter()
            .map(|v| v.as_ref().trim().to_string())
            .filter(|v| !v.is_empty());
        self.filters.entry(key.into()).or_default().extend(values);
        self
    }

    pub fn with_feature_ids(mut self, ids: impl IntoIterator<Item = FeatureId>) -> Self {
        self.feature_ids = Some(ids.into_iter().collect());
        self
    }

    /// Build from query-string pairs. Values may be comma-joined; the
    /// `featureIds` key carries the id allow-list.
    pub fn from_query_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut spec = FilterSpec::new();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref().trim(), value.as_ref());
            if key.is_empty() { continue }
            if key == "featureIds" {
                let ids = value.split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| v.parse::<i64>().map(FeatureId)
                        .map_err(|_| GeoError::validation(format!("invalid feature id {v:?}"))))
                    .collect::<Result<Vec<_>>>()?;
                spec.feature_ids.get_or_insert_with(Vec::new).extend(ids);
            } else {
                spec = spec.with(key, value.split(','));
            }
        }
        spec.filters.retain(|_, values| !values.is_empty());
        Ok(spec)
    }
}

#[derive(Debug, Clone)]
struct Term {
    key: AliasKey,
    values: BTreeSet<String>,
}

/// A filter specification compiled against a set of alias rules.
#[derive(Debug, Clone)]
pub struct AttributeQuery {
    terms: Vec<Term>,
    feature_ids: Option<BTreeSet<FeatureId>>,
    rules: AliasRules,
}

/// Text form of a scalar attribute value, for equality against filter values.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl AttributeQuery {
    pub fn new(spec: &FilterSpec, rules: &AliasRules) -> Self {
        let terms = spec.filters.iter()
            .map(|(key, values)| Term {
                key: AliasKey::new(key, rules),
                values: values.iter().map(|v| v.trim().to_string()).collect(),
            })
            .collect();
        Self {
            terms,
            feature_ids: spec.feature_ids.as_ref().map(|ids| ids.iter().copied().collect()),
            rules: rules.clone(),
        }
    }

    /// Every candidate value across all keys.
    pub fn candidate_values(&self) -> Vec<String> {
        let all: BTreeSet<&String> = self.terms.iter().flat_map(|t| &t.values).collect();
        all.into_iter().cloned().collect()
    }

    #[inline]
    pub fn has_terms(&self) -> bool { !self.terms.is_empty() }

    pub fn feature_ids(&self) -> Option<Vec<FeatureId>> {
        self.feature_ids.as_ref().map(|ids| ids.iter().copied().collect())
    }

    fn term_matches(&self, term: &Term, properties: &Map<String, Value>) -> bool {
        properties.iter().any(|(key, value)| {
            term.key.is_equivalent(&AliasKey::new(key, &self.rules))
                && scalar_text(value).is_some_and(|text| term.values.contains(&text))
        })
    }

    /// Whether a feature passes every term and the id allow-list.
    pub fn matches(&self, feature: &StoredFeature) -> bool {
        if let Some(ids) = &self.feature_ids {
            if !ids.contains(&feature.id) { return false }
        }
        self.terms.iter().all(|term| self.term_matches(term, &feature.properties))
    }
}

/// A matched feature tagged with its source layer.
#[derive(Debug, Clone)]
pub struct FilteredFeature {
    pub layer_id: LayerId,
    pub layer_name: String,
    pub feature: StoredFeature,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerMatch {
    pub layer_id: LayerId,
    pub layer_name: String,
    pub features_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterMetadata {
    pub total_layers: usize,
    pub total_features: usize,
    pub applied_filters: BTreeMap<String, Vec<String>>,
    pub selected_feature_ids: Option<Vec<FeatureId>>,
    pub bbox: Option<Bounds>,
    pub layers: Vec<LayerMatch>,
}

#[derive(Debug, Clone)]
pub struct FilterResult {
    pub features: Vec<FilteredFeature>,
    pub metadata: FilterMetadata,
    /// Set by multi-layer filtering: features carry `layerId` and `layerName`.
    pub tag_layers: bool,
}

impl FilterResult {
    pub fn to_geojson(&self) -> Value {
        let features: Vec<Value> = self.features.iter()
            .map(|f| {
                let mut extra = vec![
                    ("featureIndex".to_string(), json!(f.feature.index)),
                    ("featureId".to_string(), json!(f.feature.id)),
                ];
                if self.tag_layers {
                    extra.push(("layerId".to_string(), json!(f.layer_id)));
                    extra.push(("layerName".to_string(), json!(f.layer_name)));
                }
                f.feature.to_geojson_with(extra)
            })
            .collect();
        json!({ "type": "FeatureCollection", "features": features, "metadata": self.metadata })
    }
}

/// One row of a layer's features catalog.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub id: FeatureId,
    pub feature_index: usize,
    pub properties: Map<String, Value>,
    pub bbox: Option<Bounds>,
    pub centroid: Option<Point<f64>>,
    pub area_km2: f64,
    pub geometry_type: Option<GeometryKind>,
}

impl CatalogEntry {
    fn from_feature(feature: StoredFeature) -> Self {
        let area_m2 = match &feature.geometry {
            Geometry::Polygon(poly) => poly.chamberlain_duquette_unsigned_area(),
            Geometry::MultiPolygon(mp) => mp.chamberlain_duquette_unsigned_area(),
            _ => 0.0,
        };
        Self {
            id: feature.id,
            feature_index: feature.index,
            bbox: Bounds::of_geometry(&feature.geometry),
            centroid: feature.geometry.centroid(),
            area_km2: area_m2 / 1e6,
            geometry_type: GeometryKind::of(&feature.geometry),
            properties: feature.properties,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "featureIndex": self.feature_index,
            "properties": self.properties,
            "bbox": self.bbox.map(|b| geometry_to_geojson(&b.to_polygon().into())),
            "centroid": self.centroid.map(|c| geometry_to_geojson(&c.into())),
            "areaKm2": self.area_km2,
            "geometryType": self.geometry_type.map(|k| k.to_str()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FeatureCatalog {
    pub layer_id: LayerId,
    pub layer_name: String,
    pub entries: Vec<CatalogEntry>,
}

impl FeatureCatalog {
    pub fn to_json(&self) -> Value {
        json!({
            "layerId": self.layer_id,
            "layerName": self.layer_name,
            "totalFeatures": self.entries.len(),
            "features": self.entries.iter().map(CatalogEntry::to_json).collect::<Vec<_>>(),
        })
    }
}

/// Chosen features of a layer, with the envelope of the selection.
#[derive(Debug, Clone)]
pub struct SelectedFeatures {
    pub layer_id: LayerId,
    pub layer_name: String,
    pub features: Vec<StoredFeature>,
    pub bbox: Option<Bounds>,
}

impl SelectedFeatures {
    pub fn to_geojson(&self) -> Value {
        let features: Vec<Value> = self.features.iter()
            .map(|f| f.to_geojson_with([
                ("featureIndex".to_string(), json!(f.index)),
                ("featureId".to_string(), json!(f.id)),
            ]))
            .collect();
        json!({
            "type": "FeatureCollection",
            "features": features,
            "metadata": {
                "layerId": self.layer_id,
                "layerName": self.layer_name,
                "totalFeatures": self.features.len(),
                "bbox": self.bbox,
            },
        })
    }
}

/// Read-only property filter engine.
#[derive(Clone)]
pub struct PropertyFilter {
    store: Arc<dyn SpatialStore>,
    rules: AliasRules,
}

impl PropertyFilter {
    pub fn new(store: Arc<dyn SpatialStore>, rules: AliasRules) -> Self {
        Self { store, rules }
    }

    /// Check that a layer exists, is active and holds multipolygons.
    fn check_layer(id: LayerId, record: Option<LayerRecord>) -> Result<LayerRecord> {
        let record = record.ok_or_else(|| GeoError::not_found(format!("layer {id}")))?;
        if !record.active {
            return Err(GeoError::domain(format!("layer {id} is not active")));
        }
        if !record.kind.is_multipolygon() {
            return Err(GeoError::domain(format!(
                "layer '{}' has kind {}; this operation requires a multipolygon layer",
                record.name, record.kind
            )));
        }
        Ok(record)
    }

    async fn matching(&self, layer: &LayerRecord, query: &AttributeQuery) -> Result<Vec<StoredFeature>> {
        let mut features = self.store.candidate_features(layer.id, query).await?;
        features.retain(|f| query.matches(f));
        debug!("[filter] layer {}: {} features match", layer.id, features.len());
        Ok(features)
    }

    /// Filter a single multipolygon layer.
    pub async fn filter(&self, layer: LayerId, spec: &FilterSpec) -> Result<FilterResult> {
        let record = Self::check_layer(layer, self.store.layer(layer).await?)?;
        self.filter_records(vec![record], spec, false).await
    }

    /// Apply one filter to several multipolygon layers and union the matches.
    /// Repeated ids count once, at their first position.
    pub async fn filter_many(&self, layers: &[LayerId], spec: &FilterSpec) -> Result<FilterResult> {
        if layers.is_empty() {
            return Err(GeoError::validation("at least one layer id is required"));
        }
        let mut seen = AHashSet::with_capacity(layers.len());
        let layers: Vec<LayerId> = layers.iter().copied().filter(|id| seen.insert(*id)).collect();
        let layers = layers.as_slice();
        let records = self.store.layers(layers).await?;
        if records.is_empty() {
            return Err(GeoError::not_found(format!("layers {layers:?}")));
        }
        let missing: Vec<LayerId> = layers.iter()
            .filter(|id| !records.iter().any(|r| r.id == **id))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(GeoError::not_found(format!("layers {missing:?}")));
        }
        if let Some(inactive) = records.iter().find(|r| !r.active) {
            return Err(GeoError::domain(format!("layer {} is not active", inactive.id)));
        }
        let wrong_kind: Vec<&str> = records.iter()
            .filter(|r| !r.kind.is_multipolygon())
            .map(|r| r.name.as_str())
            .collect();
        if !wrong_kind.is_empty() {
            return Err(GeoError::domain(format!(
                "property filtering requires multipolygon layers; not multipolygon: {}",
                wrong_kind.join(", ")
            )));
        }
        self.filter_records(records, spec, true).await
    }

    async fn filter_records(&self, records: Vec<LayerRecord>, spec: &FilterSpec, tag_layers: bool) -> Result<FilterResult> {
        let query = AttributeQuery::new(spec, &self.rules);
        let mut features = Vec::new();
        let mut layers = Vec::with_capacity(records.len());

        for record in &records {
            let matched = self.matching(record, &query).await?;
            layers.push(LayerMatch {
                layer_id: record.id,
                layer_name: record.name.clone(),
                features_count: matched.len(),
            });
            features.extend(matched.into_iter().map(|feature| FilteredFeature {
                layer_id: record.id,
                layer_name: record.name.clone(),
                feature,
            }));
        }

        let bbox = Bounds::union_all(features.iter().map(|f| &f.feature.geometry));
        Ok(FilterResult {
            metadata: FilterMetadata {
                total_layers: records.len(),
                total_features: features.len(),
                applied_filters: spec.filters.clone(),
                selected_feature_ids: spec.feature_ids.clone(),
                bbox,
                layers,
            },
            features,
            tag_layers,
        })
    }

    /// Per-feature catalog of a multipolygon layer.
    pub async fn catalog(&self, layer: LayerId) -> Result<FeatureCatalog> {
        let record = Self::check_layer(layer, self.store.layer(layer).await?)?;
        let features = self.store.features(layer, None).await?;
        Ok(FeatureCatalog {
            layer_id: record.id,
            layer_name: record.name,
            entries: features.into_iter().map(CatalogEntry::from_feature).collect(),
        })
    }

    /// Chosen features of a multipolygon layer, or all of them when `ids` is `None`.
    pub async fn selected(&self, layer: LayerId, ids: Option<&[FeatureId]>) -> Result<SelectedFeatures> {
        let record = Self::check_layer(layer, self.store.layer(layer).await?)?;
        let features = self.store.features(layer, ids).await?;
        let bbox = Bounds::union_all(features.iter().map(|f| &f.geometry));
        Ok(SelectedFeatures { layer_id: record.id, layer_name: record.name, features, bbox })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;

    fn feature(id: i64, properties: Value) -> StoredFeature {
        StoredFeature {
            id: FeatureId(id),
            layer: LayerId(1),
            index: id as usize,
            geometry: Geometry::Point(point!(x: 0.0, y: 0.0)),
            properties: properties.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn query_pairs_split_and_trim() {
        let spec = FilterSpec::from_query_pairs([("CODDISTRITO", "5, 10,"), ("featureIds", "3,4")]).unwrap();
        assert_eq!(spec.filters["CODDISTRITO"], vec!["5", "10"]);
        assert_eq!(spec.feature_ids, Some(vec![FeatureId(3), FeatureId(4)]));
        assert!(FilterSpec::from_query_pairs([("featureIds", "x")]).is_err());
    }

    #[test]
    fn values_or_within_key_and_across_keys() {
        let spec = FilterSpec::new().with("CODDISTRITO", ["5", "6"]).with("tipo", ["urbano"]);
        let query = AttributeQuery::new(&spec, &AliasRules::default());
        assert!(query.matches(&feature(1, json!({"NO_DISTRIT": " 6 ", "TIPO": "urbano"}))));
        assert!(!query.matches(&feature(2, json!({"NO_DISTRIT": "6", "TIPO": "rural"}))));
        assert!(!query.matches(&feature(3, json!({"TIPO": "urbano"}))));
    }

    #[test]
    fn numeric_values_compare_as_text() {
        let spec = FilterSpec::new().with("Cod_Distrito", ["5"]);
        let query = AttributeQuery::new(&spec, &AliasRules::default());
        assert!(query.matches(&feature(1, json!({"CODDISTRITO": 5}))));
    }

    #[test]
    fn id_allow_list_intersects() {
        let spec = FilterSpec::new().with("a", ["1"]).with_feature_ids([FeatureId(2)]);
        let query = AttributeQuery::new(&spec, &AliasRules::default());
        assert!(!query.matches(&feature(1, json!({"a": "1"}))));
        assert!(query.matches(&feature(2, json!({"a": "1"}))));
    }
}
