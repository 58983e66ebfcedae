//! PostGIS-backed datastore. Spatial predicates, tiles and clustering run in
//! the database; geometries travel as WKT in both directions.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{debug, info};

use crate::error::{GeoError, Result};
use crate::filter::AttributeQuery;
use crate::geom::{parse_wkt, Bounds, LayerKind};
use crate::model::{Cluster, FeatureId, FeatureRow, LayerId, LayerRecord, MapId, NewLayer, StoredFeature};
use super::{BboxBuffers, ClusterParams, LayerTransaction, SpatialFilter, SpatialStore, TileRequest};

const SCHEMA: &[&str] = &[
    "CREATE EXTENSION IF NOT EXISTS postgis",
    "CREATE TABLE IF NOT EXISTS layer (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        layer_type TEXT NOT NULL,
        feature_count BIGINT NOT NULL DEFAULT 0,
        bbox geometry(Polygon, 4326),
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        is_public BOOLEAN NOT NULL DEFAULT FALSE,
        style JSONB NOT NULL DEFAULT '{}'::jsonb,
        original_filename TEXT,
        file_size_bytes BIGINT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS map (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL DEFAULT '',
        is_active BOOLEAN NOT NULL DEFAULT TRUE
    )",
    "CREATE TABLE IF NOT EXISTS map_layer (
        map_id BIGINT NOT NULL REFERENCES map(id) ON DELETE CASCADE,
        layer_id BIGINT NOT NULL REFERENCES layer(id) ON DELETE CASCADE,
        display_order INTEGER NOT NULL DEFAULT 0,
        is_visible BOOLEAN NOT NULL DEFAULT TRUE,
        PRIMARY KEY (map_id, layer_id)
    )",
    "CREATE TABLE IF NOT EXISTS layer_feature (
        id BIGSERIAL PRIMARY KEY,
        layer_id BIGINT NOT NULL REFERENCES layer(id) ON DELETE CASCADE,
        feature_index INTEGER NOT NULL,
        geometry geometry(Geometry, 4326) NOT NULL,
        properties JSONB NOT NULL DEFAULT '{}'::jsonb
    )",
    "CREATE INDEX IF NOT EXISTS idx_layer_feature_properties ON layer_feature USING GIN (properties)",
    "CREATE INDEX IF NOT EXISTS idx_layer_feature_order ON layer_feature (layer_id, feature_index)",
];

/// Indexes dropped for bulk loads and recreated afterwards.
const BULK_INDEXES: &[(&str, &str)] = &[
    ("idx_layer_feature_layer_id", "CREATE INDEX IF NOT EXISTS idx_layer_feature_layer_id ON layer_feature (layer_id)"),
    ("idx_layer_feature_geometry", "CREATE INDEX IF NOT EXISTS idx_layer_feature_geometry ON layer_feature USING GIST (geometry)"),
];

const LAYER_COLUMNS: &str = "id, name, description, layer_type, feature_count, \
    ST_XMin(bbox) AS min_lon, ST_YMin(bbox) AS min_lat, ST_XMax(bbox) AS max_lon, ST_YMax(bbox) AS max_lat, \
    is_active, is_public, style, original_filename, file_size_bytes";

/// PostGIS datastore over a fixed-size connection pool.
#[derive(Clone)]
pub struct PostgisStore {
    pool: PgPool,
}

impl PostgisStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(max_connections.min(2))
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .context("[postgis] failed to connect")?;
        info!("[postgis] connected with a pool of {max_connections}");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self { Self { pool } }

    #[inline]
    pub fn pool(&self) -> &PgPool { &self.pool }

    /// Create the tables and indexes if they are missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        for (_, create) in BULK_INDEXES {
            sqlx::query(create).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Feature rows of `layer` with geometries optionally simplified by `tolerance`.
    fn feature_select(layer: LayerId, tolerance: f64) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new("SELECT f.id, f.layer_id, f.feature_index, ST_AsText(");
        if tolerance > 0.0 {
            qb.push("CASE WHEN GeometryType(f.geometry) IN ('POINT', 'MULTIPOINT') THEN f.geometry ELSE ST_SimplifyPreserveTopology(f.geometry, ")
                .push_bind(tolerance)
                .push(") END");
        } else {
            qb.push("f.geometry");
        }
        qb.push(") AS wkt, f.properties FROM layer_feature f WHERE f.layer_id = ")
            .push_bind(layer.0);
        qb
    }
}

/// Append `AND ST_Intersects(f.geometry, <filter>)`.
fn push_spatial_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &SpatialFilter) -> Result<()> {
    qb.push(" AND ST_Intersects(f.geometry, ");
    match filter {
        SpatialFilter::Envelope(b) => {
            qb.push("ST_MakeEnvelope(")
                .push_bind(b.min_lon).push(", ")
                .push_bind(b.min_lat).push(", ")
                .push_bind(b.max_lon).push(", ")
                .push_bind(b.max_lat).push(", 4326)");
        }
        SpatialFilter::Wkt(wkt) => {
            parse_wkt(wkt).map_err(|e| GeoError::validation(format!("invalid geometry: {e}")))?;
            qb.push("ST_SetSRID(ST_GeomFromText(").push_bind(wkt.clone()).push("), 4326)");
        }
    }
    qb.push(")");
    Ok(())
}

fn feature_from_row(row: &PgRow) -> Result<StoredFeature> {
    let id: i64 = row.try_get("id")?;
    let wkt: String = row.try_get("wkt")?;
    let geometry = parse_wkt(&wkt).with_context(|| format!("[postgis] feature {id}"))?;
    let properties = match row.try_get::<Value, _>("properties")? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Ok(StoredFeature {
        id: FeatureId(id),
        layer: LayerId(row.try_get("layer_id")?),
        index: usize::try_from(row.try_get::<i32, _>("feature_index")?).unwrap_or_default(),
        geometry,
        properties,
    })
}

fn layer_from_row(row: &PgRow) -> Result<LayerRecord> {
    let kind: String = row.try_get("layer_type")?;
    let corners: [Option<f64>; 4] = [
        row.try_get("min_lon")?,
        row.try_get("min_lat")?,
        row.try_get("max_lon")?,
        row.try_get("max_lat")?,
    ];
    let bbox = match corners {
        [Some(a), Some(b), Some(c), Some(d)] => Some(Bounds::from_corners(a, b, c, d)),
        _ => None,
    };
    Ok(LayerRecord {
        id: LayerId(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        kind: LayerKind::parse(&kind)
            .with_context(|| format!("[postgis] unknown layer type '{kind}'"))?,
        feature_count: usize::try_from(row.try_get::<i64, _>("feature_count")?).unwrap_or_default(),
        bbox,
        active: row.try_get("is_active")?,
        is_public: row.try_get("is_public")?,
        style: row.try_get("style")?,
        original_filename: row.try_get("original_filename")?,
        file_size_bytes: row.try_get::<Option<i64>, _>("file_size_bytes")?
            .and_then(|b| u64::try_from(b).ok()),
    })
}

#[async_trait]
impl SpatialStore for PostgisStore {
    async fn begin(&self) -> Result<Box<dyn LayerTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgisTransaction { tx }))
    }

    async fn layer(&self, id: LayerId) -> Result<Option<LayerRecord>> {
        let row = sqlx::query(&format!("SELECT {LAYER_COLUMNS} FROM layer WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(layer_from_row).transpose()
    }

    async fn layers(&self, ids: &[LayerId]) -> Result<Vec<LayerRecord>> {
        let raw: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let rows = sqlx::query(&format!(
            "SELECT {LAYER_COLUMNS} FROM layer WHERE id = ANY($1) ORDER BY array_position($1, id)"
        ))
            .bind(&raw)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(layer_from_row).collect()
    }

    async fn count_intersecting(&self, layer: LayerId, filter: &SpatialFilter) -> Result<usize> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM layer_feature f WHERE f.layer_id = ");
        qb.push_bind(layer.0);
        push_spatial_filter(&mut qb, filter)?;
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn features_intersecting(
        &self,
        layer: LayerId,
        filter: &SpatialFilter,
        limit: Option<usize>,
        simplify: Option<f64>,
    ) -> Result<Vec<StoredFeature>> {
        let mut qb = Self::feature_select(layer, simplify.unwrap_or(0.0));
        push_spatial_filter(&mut qb, filter)?;
        qb.push(" ORDER BY f.feature_index");
        if let Some(limit) = limit {
            qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(feature_from_row).collect()
    }

    async fn render_tile(&self, layer: LayerId, request: &TileRequest) -> Result<Vec<u8>> {
        let (z, x, y) = (request.coord.z(), request.coord.x(), request.coord.y());
        let tile: Option<Vec<u8>> = sqlx::query_scalar(
            "WITH bounds AS (
                SELECT ST_TileEnvelope($1, $2, $3) AS merc
            ), mvtgeom AS (
                SELECT ST_AsMVTGeom(
                        ST_Transform(
                            CASE WHEN $4 > 0 AND GeometryType(f.geometry) NOT IN ('POINT', 'MULTIPOINT')
                                THEN ST_SimplifyPreserveTopology(f.geometry, $4)
                                ELSE f.geometry END,
                            3857),
                        bounds.merc, $5, $6, true) AS geom,
                    f.feature_index, f.properties
                FROM layer_feature f, bounds
                WHERE f.layer_id = $7
                    AND ST_Intersects(f.geometry, ST_Transform(bounds.merc, 4326))
            )
            SELECT ST_AsMVT(mvtgeom.*, $8, $5, 'geom', 'feature_index')
            FROM mvtgeom WHERE geom IS NOT NULL",
        )
            .bind(i32::from(z))
            .bind(i32::try_from(x).unwrap_or(i32::MAX))
            .bind(i32::try_from(y).unwrap_or(i32::MAX))
            .bind(request.tolerance)
            .bind(i32::try_from(request.extent).unwrap_or(4096))
            .bind(i32::try_from(request.buffer).unwrap_or(256))
            .bind(layer.0)
            .bind(&request.layer_name)
            .fetch_one(&self.pool)
            .await?;
        let tile = tile.unwrap_or_default();
        debug!("[postgis] tile {z}/{x}/{y} of layer {layer}: {} bytes", tile.len());
        Ok(tile)
    }

    async fn cluster_points(&self, layer: LayerId, bounds: &Bounds, params: &ClusterParams) -> Result<Vec<Cluster>> {
        let points = self.count_intersecting(layer, &SpatialFilter::Envelope(*bounds)).await?;
        let k = params.cluster_count(points);
        if k == 0 { return Ok(Vec::new()) }

        let rows = sqlx::query(
            "SELECT ST_X(centroid) AS lon, ST_Y(centroid) AS lat, point_count, sample_properties
            FROM (
                SELECT ST_Centroid(ST_Collect(pt)) AS centroid,
                    COUNT(*) AS point_count,
                    (array_agg(properties ORDER BY feature_index))[1] AS sample_properties,
                    MIN(feature_index) AS first_index
                FROM (
                    SELECT ST_ClusterKMeans(pt, $6) OVER () AS cid, pt, properties, feature_index
                    FROM (
                        SELECT ST_Centroid(f.geometry) AS pt, f.properties, f.feature_index
                        FROM layer_feature f
                        WHERE f.layer_id = $1
                            AND ST_Intersects(f.geometry, ST_MakeEnvelope($2, $3, $4, $5, 4326))
                    ) candidates
                ) assigned
                GROUP BY cid
            ) grouped
            ORDER BY first_index",
        )
            .bind(layer.0)
            .bind(bounds.min_lon)
            .bind(bounds.min_lat)
            .bind(bounds.max_lon)
            .bind(bounds.max_lat)
            .bind(i32::try_from(k).unwrap_or(i32::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let sample_properties = match row.try_get::<Option<Value>, _>("sample_properties")? {
                    Some(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                Ok(Cluster {
                    centroid: geo::Point::new(row.try_get("lon")?, row.try_get("lat")?),
                    point_count: usize::try_from(row.try_get::<i64, _>("point_count")?).unwrap_or_default(),
                    sample_properties,
                })
            })
            .collect()
    }

    async fn candidate_features(&self, layer: LayerId, query: &AttributeQuery) -> Result<Vec<StoredFeature>> {
        let mut qb = Self::feature_select(layer, 0.0);
        if query.has_terms() {
            qb.push(" AND EXISTS (SELECT 1 FROM jsonb_each_text(f.properties) AS p(key, value) WHERE TRIM(p.value) = ANY(")
                .push_bind(query.candidate_values())
                .push("))");
        }
        if let Some(ids) = query.feature_ids() {
            qb.push(" AND f.id = ANY(")
                .push_bind(ids.iter().map(|id| id.0).collect::<Vec<i64>>())
                .push(")");
        }
        qb.push(" ORDER BY f.feature_index");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(feature_from_row).collect()
    }

    async fn features(&self, layer: LayerId, ids: Option<&[FeatureId]>) -> Result<Vec<StoredFeature>> {
        let mut qb = Self::feature_select(layer, 0.0);
        if let Some(ids) = ids {
            qb.push(" AND f.id = ANY(")
                .push_bind(ids.iter().map(|id| id.0).collect::<Vec<i64>>())
                .push(")");
        }
        qb.push(" ORDER BY f.feature_index");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(feature_from_row).collect()
    }
}

/// One ingestion inside a database transaction.
struct PostgisTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LayerTransaction for PostgisTransaction {
    async fn create_layer(&mut self, layer: NewLayer) -> Result<LayerId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO layer (name, description, layer_type, feature_count, is_active, is_public, style, original_filename, file_size_bytes)
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7, $8)
            RETURNING id",
        )
            .bind(&layer.name)
            .bind(&layer.description)
            .bind(layer.kind.to_str())
            .bind(i64::try_from(layer.feature_count).unwrap_or(i64::MAX))
            .bind(layer.is_public)
            .bind(&layer.style)
            .bind(&layer.original_filename)
            .bind(layer.file_size_bytes.and_then(|b| i64::try_from(b).ok()))
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(LayerId(id))
    }

    async fn insert_features(&mut self, layer: LayerId, rows: &[FeatureRow]) -> Result<()> {
        if rows.is_empty() { return Ok(()) }
        let mut qb = QueryBuilder::new("INSERT INTO layer_feature (layer_id, feature_index, geometry, properties) ");
        qb.push_values(rows, |mut b, row| {
            b.push_bind(layer.0)
                .push_bind(i32::try_from(row.index).unwrap_or(i32::MAX))
                .push("ST_SetSRID(ST_GeomFromText(")
                .push_bind_unseparated(&row.wkt)
                .push_unseparated("), 4326)")
                .push_bind(&row.properties)
                .push_unseparated("::jsonb");
        });
        qb.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn suspend_feature_indexes(&mut self) -> Result<()> {
        for (name, _) in BULK_INDEXES {
            sqlx::query(&format!("DROP INDEX IF EXISTS {name}")).execute(&mut *self.tx).await?;
        }
        Ok(())
    }

    async fn rebuild_feature_indexes(&mut self) -> Result<()> {
        for (_, create) in BULK_INDEXES {
            sqlx::query(create).execute(&mut *self.tx).await?;
        }
        sqlx::query("ANALYZE layer_feature").execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn update_layer_bbox(&mut self, layer: LayerId, buffers: &BboxBuffers) -> Result<Option<Bounds>> {
        let row = sqlx::query(
            "SELECT ST_XMin(e) AS min_lon, ST_YMin(e) AS min_lat, ST_XMax(e) AS max_lon, ST_YMax(e) AS max_lat
            FROM (SELECT ST_Extent(geometry) AS e FROM layer_feature WHERE layer_id = $1) extent",
        )
            .bind(layer.0)
            .fetch_one(&mut *self.tx)
            .await?;
        let corners: [Option<f64>; 4] = [
            row.try_get("min_lon")?,
            row.try_get("min_lat")?,
            row.try_get("max_lon")?,
            row.try_get("max_lat")?,
        ];
        let [Some(a), Some(b), Some(c), Some(d)] = corners else { return Ok(None) };
        let bbox = Bounds::from_corners(a, b, c, d).with_area(buffers.line, buffers.point);

        sqlx::query("UPDATE layer SET bbox = ST_MakeEnvelope($2, $3, $4, $5, 4326) WHERE id = $1")
            .bind(layer.0)
            .bind(bbox.min_lon)
            .bind(bbox.min_lat)
            .bind(bbox.max_lon)
            .bind(bbox.max_lat)
            .execute(&mut *self.tx)
            .await?;
        Ok(Some(bbox))
    }

    async fn attach_to_map(&mut self, map: MapId, layer: LayerId, display_order: i32) -> Result<()> {
        let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM map WHERE id = $1")
            .bind(map.0)
            .fetch_optional(&mut *self.tx)
            .await?;
        if active != Some(true) {
            return Err(GeoError::not_found(format!("map {map}")));
        }
        sqlx::query("INSERT INTO map_layer (map_id, layer_id, display_order, is_visible) VALUES ($1, $2, $3, TRUE)")
            .bind(map.0)
            .bind(layer.0)
            .bind(display_order)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
