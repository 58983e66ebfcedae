use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use geo::{BoundingRect, Centroid, Geometry, Intersects};
use rstar::RTree;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{GeoError, Result};
use crate::filter::AttributeQuery;
use crate::geom::{parse_wkt, simplify_preserving, Bounds, FeatureEnvelope, GeometryKind};
use crate::model::{Cluster, FeatureId, FeatureRow, LayerId, LayerRecord, MapId, NewLayer, StoredFeature};
use super::cluster::{cluster, ClusterInput};
use super::vector_tile::encode_tile;
use super::{BboxBuffers, ClusterParams, LayerTransaction, SpatialFilter, SpatialStore, TileRequest};

/// Features of one layer plus their envelope index.
#[derive(Debug)]
struct LayerData {
    record: LayerRecord,
    features: Vec<StoredFeature>,
    tree: RTree<FeatureEnvelope>,
}

impl LayerData {
    fn new(record: LayerRecord) -> Self {
        Self { record, features: Vec::new(), tree: RTree::new() }
    }

    fn envelopes(&self) -> Vec<FeatureEnvelope> {
        self.features.iter().enumerate()
            .filter_map(|(pos, f)| f.geometry.bounding_rect().map(|rect| FeatureEnvelope::new(pos, rect)))
            .collect()
    }

    fn reindex(&mut self) { self.tree = RTree::bulk_load(self.envelopes()) }

    /// Features whose geometry intersects `target`, ordered by feature index.
    fn intersecting(&self, target: &Target) -> Vec<&StoredFeature> {
        let mut hits: Vec<&StoredFeature> = self.tree
            .locate_in_envelope_intersecting(&target.bounds.to_aabb())
            .map(|env| &self.features[env.pos()])
            .filter(|f| f.geometry.intersects(&target.geometry))
            .collect();
        hits.sort_by_key(|f| f.index);
        hits
    }
}

/// A spatial filter resolved to a geometry and its envelope.
struct Target {
    bounds: Bounds,
    geometry: Geometry<f64>,
}

impl Target {
    fn resolve(filter: &SpatialFilter) -> Result<Option<Self>> {
        match filter {
            SpatialFilter::Envelope(bounds) => {
                Ok(Some(Target { bounds: *bounds, geometry: Geometry::Polygon(bounds.to_polygon()) }))
            }
            SpatialFilter::Wkt(text) => {
                let geometry = parse_wkt(text).map_err(|e| GeoError::validation(e.to_string()))?;
                Ok(Bounds::of_geometry(&geometry).map(|bounds| Target { bounds, geometry }))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MapEntry {
    active: bool,
}

#[derive(Debug, Default)]
struct Inner {
    layers: BTreeMap<LayerId, LayerData>,
    maps: BTreeMap<MapId, MapEntry>,
    map_layers: Vec<(MapId, LayerId, i32)>,
}

#[derive(Debug, Default)]
struct Sequences {
    layer: AtomicI64,
    feature: AtomicI64,
    map: AtomicI64,
}

impl Sequences {
    #[inline]
    fn next(counter: &AtomicI64) -> i64 { counter.fetch_add(1, Ordering::Relaxed) + 1 }
}

/// In-process datastore backed by `geo` predicates and an R-tree per layer.
/// Clones share the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    ids: Arc<Sequences>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        Ok(self.inner.read().map_err(|_| anyhow!("[memory] store lock poisoned"))?)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        Ok(self.inner.write().map_err(|_| anyhow!("[memory] store lock poisoned"))?)
    }

    fn with_layer<T>(&self, id: LayerId, f: impl FnOnce(&LayerData) -> Result<T>) -> Result<T> {
        let inner = self.read()?;
        let data = inner.layers.get(&id).ok_or_else(|| GeoError::not_found(format!("layer {id}")))?;
        f(data)
    }

    /// Register a map that layers can be attached to.
    pub fn register_map(&self, active: bool) -> Result<MapId> {
        let id = MapId(Sequences::next(&self.ids.map));
        self.write()?.maps.insert(id, MapEntry { active });
        Ok(id)
    }

    pub fn set_layer_active(&self, id: LayerId, active: bool) -> Result<()> {
        let mut inner = self.write()?;
        let data = inner.layers.get_mut(&id).ok_or_else(|| GeoError::not_found(format!("layer {id}")))?;
        data.record.active = active;
        Ok(())
    }

    /// Number of committed layers.
    pub fn layer_count(&self) -> Result<usize> { Ok(self.read()?.layers.len()) }

    /// Layers attached to a map with their display order.
    pub fn map_layers(&self, map: MapId) -> Result<Vec<(LayerId, i32)>> {
        Ok(self.read()?.map_layers.iter()
            .filter(|(m, _, _)| *m == map)
            .map(|(_, layer, order)| (*layer, *order))
            .collect())
    }
}

#[async_trait]
impl SpatialStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LayerTransaction>> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: Vec::new(),
            map_links: Vec::new(),
            indexes_suspended: false,
        }))
    }

    async fn layer(&self, id: LayerId) -> Result<Option<LayerRecord>> {
        Ok(self.read()?.layers.get(&id).map(|data| data.record.clone()))
    }

    async fn layers(&self, ids: &[LayerId]) -> Result<Vec<LayerRecord>> {
        let inner = self.read()?;
        Ok(ids.iter().filter_map(|id| inner.layers.get(id)).map(|data| data.record.clone()).collect())
    }

    async fn count_intersecting(&self, layer: LayerId, filter: &SpatialFilter) -> Result<usize> {
        let Some(target) = Target::resolve(filter)? else { return Ok(0) };
        self.with_layer(layer, |data| Ok(data.intersecting(&target).len()))
    }

    async fn features_intersecting(
        &self,
        layer: LayerId,
        filter: &SpatialFilter,
        limit: Option<usize>,
        simplify: Option<f64>,
    ) -> Result<Vec<StoredFeature>> {
        let Some(target) = Target::resolve(filter)? else { return Ok(Vec::new()) };
        self.with_layer(layer, |data| {
            Ok(data.intersecting(&target).into_iter()
                .take(limit.unwrap_or(usize::MAX))
                .map(|f| simplified(f, simplify.unwrap_or(0.0)))
                .collect())
        })
    }

    async fn render_tile(&self, layer: LayerId, request: &TileRequest) -> Result<Vec<u8>> {
        let target = Target {
            bounds: request.envelope,
            geometry: Geometry::Polygon(request.envelope.to_polygon()),
        };
        let features: Vec<StoredFeature> = self.with_layer(layer, |data| {
            Ok(data.intersecting(&target).into_iter().map(|f| simplified(f, request.tolerance)).collect())
        })?;
        debug!("[memory] tile {:?} of layer {layer}: {} features", request.coord, features.len());
        Ok(encode_tile(&features, request)
            .with_context(|| format!("[memory] failed to encode tile {:?}", request.coord))?)
    }

    async fn cluster_points(&self, layer: LayerId, bounds: &Bounds, params: &ClusterParams) -> Result<Vec<Cluster>> {
        let target = Target { bounds: *bounds, geometry: Geometry::Polygon(bounds.to_polygon()) };
        self.with_layer(layer, |data| {
            let inputs: Vec<ClusterInput<'_>> = data.intersecting(&target).into_iter()
                .filter_map(|f| {
                    let point = f.geometry.centroid()?;
                    Some(ClusterInput { point: point.0, properties: &f.properties })
                })
                .collect();
            Ok(cluster(&inputs, params))
        })
    }

    async fn candidate_features(&self, layer: LayerId, query: &AttributeQuery) -> Result<Vec<StoredFeature>> {
        self.with_layer(layer, |data| {
            Ok(data.features.iter().filter(|f| query.matches(f)).cloned().collect())
        })
    }

    async fn features(&self, layer: LayerId, ids: Option<&[FeatureId]>) -> Result<Vec<StoredFeature>> {
        let wanted: Option<BTreeSet<FeatureId>> = ids.map(|ids| ids.iter().copied().collect());
        self.with_layer(layer, |data| {
            Ok(data.features.iter()
                .filter(|f| wanted.as_ref().is_none_or(|w| w.contains(&f.id)))
                .cloned()
                .collect())
        })
    }
}

fn simplified(feature: &StoredFeature, tolerance: f64) -> StoredFeature {
    let simplifiable = GeometryKind::of(&feature.geometry).is_some_and(|k| k.is_simplifiable());
    if tolerance <= 0.0 || !simplifiable { return feature.clone() }
    StoredFeature { geometry: simplify_preserving(&feature.geometry, tolerance), ..feature.clone() }
}

/// Staged writes of one ingestion, published atomically on commit.
struct MemoryTransaction {
    store: MemoryStore,
    staged: Vec<LayerData>,
    map_links: Vec<(MapId, LayerId, i32)>,
    indexes_suspended: bool,
}

impl MemoryTransaction {
    fn staged_mut(&mut self, id: LayerId) -> Result<&mut LayerData> {
        self.staged.iter_mut()
            .find(|data| data.record.id == id)
            .ok_or_else(|| GeoError::not_found(format!("layer {id} in this transaction")))
    }
}

#[async_trait]
impl LayerTransaction for MemoryTransaction {
    async fn create_layer(&mut self, layer: NewLayer) -> Result<LayerId> {
        let id = LayerId(Sequences::next(&self.store.ids.layer));
        self.staged.push(LayerData::new(LayerRecord {
            id,
            name: layer.name,
            description: layer.description,
            kind: layer.kind,
            feature_count: layer.feature_count,
            bbox: None,
            active: true,
            is_public: layer.is_public,
            style: layer.style,
            original_filename: layer.original_filename,
            file_size_bytes: layer.file_size_bytes,
        }));
        Ok(id)
    }

    async fn insert_features(&mut self, layer: LayerId, rows: &[FeatureRow]) -> Result<()> {
        let ids = Arc::clone(&self.store.ids);
        let indexed = !self.indexes_suspended;
        let data = self.staged_mut(layer)?;
        for row in rows {
            let geometry = parse_wkt(&row.wkt)
                .with_context(|| format!("[memory] feature {} of layer {layer}", row.index))?;
            let properties: Map<String, Value> = serde_json::from_str(&row.properties)
                .with_context(|| format!("[memory] properties of feature {} of layer {layer}", row.index))?;
            let pos = data.features.len();
            if indexed {
                if let Some(rect) = geometry.bounding_rect() {
                    data.tree.insert(FeatureEnvelope::new(pos, rect));
                }
            }
            data.features.push(StoredFeature {
                id: FeatureId(Sequences::next(&ids.feature)),
                layer,
                index: row.index,
                geometry,
                properties,
            });
        }
        Ok(())
    }

    async fn suspend_feature_indexes(&mut self) -> Result<()> {
        self.indexes_suspended = true;
        for data in &mut self.staged { data.tree = RTree::new() }
        Ok(())
    }

    async fn rebuild_feature_indexes(&mut self) -> Result<()> {
        for data in &mut self.staged { data.reindex() }
        self.indexes_suspended = false;
        Ok(())
    }

    async fn update_layer_bbox(&mut self, layer: LayerId, buffers: &BboxBuffers) -> Result<Option<Bounds>> {
        let data = self.staged_mut(layer)?;
        let bbox = Bounds::union_all(data.features.iter().map(|f| &f.geometry))
            .map(|b| b.with_area(buffers.line, buffers.point));
        data.record.bbox = bbox;
        Ok(bbox)
    }

    async fn attach_to_map(&mut self, map: MapId, layer: LayerId, display_order: i32) -> Result<()> {
        let active = self.store.read()?.maps.get(&map).map(|m| m.active);
        if active != Some(true) {
            return Err(GeoError::not_found(format!("map {map}")));
        }
        self.staged_mut(layer)?;
        self.map_links.push((map, layer, display_order));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if self.indexes_suspended {
            for data in &mut self.staged { data.reindex() }
        }
        let mut inner = self.store.write()?;
        for data in self.staged.drain(..) {
            inner.layers.insert(data.record.id, data);
        }
        inner.map_layers.extend(self.map_links.drain(..));
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!("[memory] discarding {} staged layers", self.staged.len());
        Ok(())
    }
}
