use std::fmt;

use geo::{Geometry, Point};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::geom::{geometry_to_geojson, Bounds, LayerKind};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }
    };
}

id_type!(
    /// Datastore identifier of a layer.
    LayerId
);
id_type!(
    /// Datastore identifier of a persisted feature row.
    FeatureId
);
id_type!(
    /// Identifier of a map a layer can be attached to.
    MapId
);

/// Persisted layer metadata.
#[derive(Debug, Clone)]
pub struct LayerRecord {
    pub id: LayerId,
    pub name: String,
    pub description: Option<String>,
    pub kind: LayerKind,
    pub feature_count: usize,
    pub bbox: Option<Bounds>,
    pub active: bool,
    pub is_public: bool,
    pub style: Value,
    pub original_filename: Option<String>,
    pub file_size_bytes: Option<u64>,
}

/// Layer row as created at the start of an ingestion.
#[derive(Debug, Clone)]
pub struct NewLayer {
    pub name: String,
    pub description: Option<String>,
    pub kind: LayerKind,
    pub feature_count: usize,
    pub style: Value,
    pub is_public: bool,
    pub original_filename: Option<String>,
    pub file_size_bytes: Option<u64>,
}

/// One feature as handed to the datastore.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub index: usize,
    pub wkt: String,
    /// Attribute map serialized as a JSON object.
    pub properties: String,
}

/// A feature read back from the datastore.
#[derive(Debug, Clone)]
pub struct StoredFeature {
    pub id: FeatureId,
    pub layer: LayerId,
    pub index: usize,
    pub geometry: Geometry<f64>,
    pub properties: Map<String, Value>,
}

impl StoredFeature {
    /// GeoJSON Feature carrying `extra` merged over the stored attributes.
    pub fn to_geojson_with(&self, extra: impl IntoIterator<Item = (String, Value)>) -> Value {
        let mut properties = self.properties.clone();
        properties.extend(extra);
        json!({
            "type": "Feature",
            "id": self.id,
            "geometry": geometry_to_geojson(&self.geometry),
            "properties": properties,
        })
    }

    pub fn to_geojson(&self) -> Value { self.to_geojson_with([]) }
}

/// A synthetic cluster point. Not persisted.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub centroid: Point<f64>,
    pub point_count: usize,
    pub sample_properties: Map<String, Value>,
}

impl Cluster {
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "Feature",
            "geometry": geometry_to_geojson(&Geometry::Point(self.centroid)),
            "properties": {
                "cluster": true,
                "point_count": self.point_count,
                "sample_properties": self.sample_properties,
            },
        })
    }
}
