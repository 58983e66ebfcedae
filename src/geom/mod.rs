mod bbox;
mod geojson;
mod kind;
mod simplify;
mod tile;
mod wkt;

pub use bbox::Bounds;
pub(crate) use bbox::FeatureEnvelope;
pub use geojson::geometry_to_geojson;
pub use kind::{GeometryKind, LayerKind};
pub use simplify::{simplify_preserving, vertex_count};
pub use tile::{cluster_radius_for_zoom, tolerance_for_zoom, TileCoord, MAX_ZOOM};
pub use self::wkt::{parse_wkt, to_wkt};
