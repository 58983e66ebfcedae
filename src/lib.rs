#![doc = "Geolayer public API"]
mod config;
mod error;
mod filter;
mod geom;
mod ingest;
mod model;
mod normalize;
mod query;
mod store;

#[doc(inline)]
pub use config::{AliasRules, EngineConfig, IngestConfig, NormalizerConfig, ProjectedZone, QueryConfig};

#[doc(inline)]
pub use error::{GeoError, Result};

#[doc(inline)]
pub use geom::{
    cluster_radius_for_zoom, geometry_to_geojson, parse_wkt, simplify_preserving, to_wkt,
    tolerance_for_zoom, vertex_count, Bounds, GeometryKind, LayerKind, TileCoord, MAX_ZOOM,
};

#[doc(inline)]
pub use model::{Cluster, FeatureId, FeatureRow, LayerId, LayerRecord, MapId, NewLayer, StoredFeature};

#[doc(inline)]
pub use normalize::{
    normalize, parse_geometry, AxisVote, CollectionMetadata, NormalizationReport, NormalizedCollection,
    NormalizedFeature, Normalizer,
};

#[doc(inline)]
pub use ingest::{default_style, IngestRequest, IngestSummary, Ingestor};

#[doc(inline)]
pub use query::{
    compress_tile, ClusterCollection, FeatureResponse, LayerExport, QueryEngine, QueryKind, QueryMetadata,
    QueryOptions, TILE_LAYER_NAME,
};

#[doc(inline)]
pub use filter::{
    keys_equivalent, normalize_key, AliasKey, AttributeQuery, CatalogEntry, FeatureCatalog, FilterMetadata,
    FilterResult, FilterSpec, FilteredFeature, LayerMatch, PropertyFilter, SelectedFeatures,
};

#[doc(inline)]
pub use store::{BboxBuffers, ClusterParams, LayerTransaction, MemoryStore, SpatialFilter, SpatialStore, TileRequest};

#[cfg(feature = "postgis")]
#[doc(inline)]
pub use store::PostgisStore;
