use std::sync::Arc;

use geo::{polygon, CoordsIter, Geometry};
use geolayer::{
    compress_tile, Bounds, GeoError, IngestConfig, IngestRequest, Ingestor, LayerId, MemoryStore, QueryConfig,
    QueryEngine, QueryOptions, TILE_LAYER_NAME,
};
use mvt_reader::Reader;
use serde_json::{json, Value};

fn point(x: f64, y: f64, n: usize) -> Value {
    json!({
        "type": "Feature",
        "geometry": { "type": "Point", "coordinates": [x, y] },
        "properties": { "n": n, "name": format!("p{n}") }
    })
}

/// `count` points on a grid inside [0, 1] x [0, 1].
fn grid(count: usize) -> Vec<Value> {
    let side = (count as f64).sqrt().ceil() as usize;
    (0..count)
        .map(|i| {
            let (col, row) = (i % side, i / side);
            point(0.05 + 0.9 * col as f64 / side as f64, 0.05 + 0.9 * row as f64 / side as f64, i)
        })
        .collect()
}

async fn load(features: Vec<Value>) -> (Arc<MemoryStore>, LayerId, QueryEngine) {
    let store = Arc::new(MemoryStore::new());
    let raw = serde_json::to_vec(&json!({ "type": "FeatureCollection", "features": features })).unwrap();
    let summary = Ingestor::new(store.clone(), IngestConfig::default())
        .upload(&raw, IngestRequest::named("points"))
        .await
        .unwrap();
    let engine = QueryEngine::new(store.clone(), QueryConfig::default());
    (store, summary.layer_id, engine)
}

fn unit() -> Bounds { Bounds::new(0.0, 0.0, 1.0, 1.0).unwrap() }

#[tokio::test]
async fn viewport_is_capped_with_a_message() {
    let (_, layer, engine) = load(grid(8543)).await;
    let response = engine.features_in_bbox(layer, unit(), QueryOptions::viewport()).await.unwrap();

    assert_eq!(response.features.len(), 5000);
    assert_eq!(response.metadata.total, 8543);
    assert!(response.metadata.limited);
    assert_eq!(
        response.metadata.message.as_deref(),
        Some("Showing 5000 of 8543 features. Zoom in to see more detail.")
    );
    // Lowest feature indexes come first.
    assert!(response.features.iter().enumerate().all(|(i, f)| f.index == i));

    let json = response.to_geojson();
    assert_eq!(json["metadata"]["totalInBounds"], 8543);
    assert_eq!(json["features"].as_array().unwrap().len(), 5000);
}

#[tokio::test]
async fn small_viewport_is_complete() {
    let (_, layer, engine) = load(grid(42)).await;
    let response = engine.features_in_bbox(layer, unit(), QueryOptions::viewport()).await.unwrap();
    assert_eq!(response.features.len(), 42);
    assert!(!response.metadata.limited);
    assert!(response.metadata.message.is_none());
    assert!(response.to_geojson()["metadata"].get("message").is_none());

    let capped = engine
        .features_in_bbox(layer, unit(), QueryOptions::viewport().max_features(10))
        .await
        .unwrap();
    assert_eq!(capped.features.len(), 10);
    assert!(capped.metadata.limited);

    let outside = Bounds::new(10.0, 10.0, 11.0, 11.0).unwrap();
    let empty = engine.features_in_bbox(layer, outside, QueryOptions::viewport()).await.unwrap();
    assert!(empty.features.is_empty());
    assert_eq!(empty.metadata.total, 0);
}

#[tokio::test]
async fn intersection_with_a_polygon() {
    let features = vec![point(0.1, 0.1, 0), point(0.9, 0.9, 1), point(0.2, 0.15, 2), point(0.5, 0.5, 3)];
    let (_, layer, engine) = load(features).await;

    // Triangle covering the lower-left corner only.
    let triangle = Geometry::Polygon(polygon![(x: 0.0, y: 0.0), (x: 0.6, y: 0.0), (x: 0.0, y: 0.6), (x: 0.0, y: 0.0)]);
    let response = engine.features_intersecting(layer, &triangle, QueryOptions::intersection()).await.unwrap();

    let found: Vec<usize> = response.features.iter().map(|f| f.index).collect();
    assert_eq!(found, vec![0, 2]);
    assert_eq!(response.to_geojson()["metadata"]["totalIntersecting"], 2);
    assert_eq!(response.features[1].properties["name"], "p2");
}

#[tokio::test]
async fn tiles_are_rendered_and_decodable() {
    let (_, layer, engine) = load(grid(42)).await;

    // z8 tile 128/127 spans lon [0, 1.40625] and lat [0, ~1.406].
    let bytes = engine.tile(layer, 8, 128, 127).await.unwrap();
    assert!(!bytes.is_empty());

    let reader = Reader::new(bytes.clone()).unwrap();
    assert_eq!(reader.get_layer_names().unwrap(), vec![TILE_LAYER_NAME.to_string()]);
    let features = reader.get_features(0).unwrap();
    assert_eq!(features.len(), 42);
    let properties = features[0].properties.as_ref().unwrap();
    assert!(properties.contains_key("name"));
    assert!(properties.contains_key("feature_index"));

    let gzipped = compress_tile(&bytes).unwrap();
    assert_eq!(&gzipped[..2], &[0x1f, 0x8b]);

    // Far side of the world.
    assert!(engine.tile(layer, 8, 10, 10).await.unwrap().is_empty());
}

/// Pixel coordinates of each decoded feature, keyed by feature index.
fn decoded(bytes: Vec<u8>) -> Vec<(u64, Geometry<f32>)> {
    let reader = Reader::new(bytes).unwrap();
    reader.get_features(0).unwrap()
        .into_iter()
        .map(|f| (f.id.unwrap(), f.get_geometry().clone()))
        .collect()
}

fn x_range(geometry: &Geometry<f32>) -> (f32, f32) {
    geometry.coords_iter().fold((f32::MAX, f32::MIN), |(lo, hi), c| (lo.min(c.x), hi.max(c.x)))
}

#[tokio::test]
async fn tile_geometries_are_clipped_to_the_buffered_extent() {
    let features = vec![
        // Square reaching a degree west of the tile.
        json!({
            "type": "Feature",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[-1.0, 0.2], [0.7, 0.2], [0.7, 0.7], [-1.0, 0.7], [-1.0, 0.2]]]
            },
            "properties": { "kind": "polygon" }
        }),
        // Line running well past the east edge.
        json!({
            "type": "Feature",
            "geometry": { "type": "LineString", "coordinates": [[0.5, 0.5], [3.0, 0.5]] },
            "properties": { "kind": "line" }
        }),
        // Inside, inside the buffer, and far outside.
        json!({
            "type": "Feature",
            "geometry": { "type": "MultiPoint", "coordinates": [[0.3, 0.3], [1.45, 0.3], [2.0, 0.3]] },
            "properties": { "kind": "points" }
        }),
    ];
    let (_, layer, engine) = load(features).await;

    // z8 tile 128/127: lon [0, 1.40625] maps to pixels [0, 4096], buffer 256.
    let tile = decoded(engine.tile(layer, 8, 128, 127).await.unwrap());
    assert_eq!(tile.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![0, 1, 2]);

    let (polygon, line, points) = (&tile[0].1, &tile[1].1, &tile[2].1);
    assert!(matches!(polygon, Geometry::Polygon(_) | Geometry::MultiPolygon(_)), "{polygon:?}");
    let (west, east) = x_range(polygon);
    assert_eq!(west, -256.0);
    assert!((east - 2039.0).abs() <= 1.0, "{east}");
    assert!(polygon.coords_iter().all(|c| (-256.0..=4352.0).contains(&c.y)));

    assert!(matches!(line, Geometry::LineString(_) | Geometry::MultiLineString(_)), "{line:?}");
    let (start, end) = x_range(line);
    assert!((start - 1456.0).abs() <= 1.0, "{start}");
    assert_eq!(end, 4352.0);

    // The far point is dropped; the buffered one stays.
    assert_eq!(points.coords_count(), 2);
    let (_, far) = x_range(points);
    assert!(far > 4096.0 && far <= 4352.0, "{far}");
}

#[tokio::test]
async fn out_of_grid_tiles_rejected() {
    let (_, layer, engine) = load(grid(4)).await;
    assert!(matches!(engine.tile(layer, 3, 8, 0).await, Err(GeoError::Validation { .. })));
    assert!(matches!(engine.tile(layer, 3, 0, 8).await, Err(GeoError::Validation { .. })));
    assert!(matches!(engine.tile(layer, 30, 0, 0).await, Err(GeoError::Validation { .. })));
    assert!(engine.tile(layer, 0, 0, 0).await.is_ok());
}

#[tokio::test]
async fn clusters_cover_every_point() {
    let mut features = Vec::new();
    for i in 0..60 {
        let offset = i as f64 * 1e-4;
        features.push(point(0.1 + offset, 0.1, i));
        features.push(point(0.8 + offset, 0.8, 100 + i));
    }
    let (_, layer, engine) = load(features).await;

    let clusters = engine.clusters(layer, unit(), 10).await.unwrap();
    assert!(clusters.clusters.len() >= 2);
    assert!(clusters.clusters.len() <= 50);
    assert_eq!(clusters.clusters.iter().map(|c| c.point_count).sum::<usize>(), 120);
    assert_eq!(clusters.clusters[0].sample_properties["n"], 0);

    let json = clusters.to_geojson();
    assert_eq!(json["features"][0]["properties"]["cluster"], true);

    let outside = Bounds::new(40.0, 40.0, 41.0, 41.0).unwrap();
    assert!(engine.clusters(layer, outside, 10).await.unwrap().clusters.is_empty());
}

#[tokio::test]
async fn cluster_count_is_capped_at_every_zoom() {
    // 1000 points 0.02 degrees apart.
    let features = (0..1000)
        .map(|i| point(0.01 + (i % 32) as f64 * 0.02, 0.01 + (i / 32) as f64 * 0.02, i))
        .collect();
    let (_, layer, engine) = load(features).await;

    let mut previous = 0;
    for zoom in [0, 2, 5, 8, 10, 12, 16, 22] {
        let clusters = engine.clusters(layer, unit(), zoom).await.unwrap().clusters;
        assert!(clusters.len() <= 50, "zoom {zoom}: {} clusters", clusters.len());
        assert!(clusters.len() >= previous, "zoom {zoom} is coarser than the zoom before it");
        assert_eq!(clusters.iter().map(|c| c.point_count).sum::<usize>(), 1000);
        previous = clusters.len();
    }
    assert_eq!(previous, 50);

    // Fewer points lower the cap.
    let (_, small, engine) = load(grid(42)).await;
    assert!(engine.clusters(small, unit(), 22).await.unwrap().clusters.len() <= 4);
}

#[tokio::test]
async fn inactive_and_missing_layers() {
    let (store, layer, engine) = load(grid(4)).await;
    assert!(matches!(
        engine.features_in_bbox(LayerId(9999), unit(), QueryOptions::viewport()).await,
        Err(GeoError::NotFound(_))
    ));

    store.set_layer_active(layer, false).unwrap();
    assert!(matches!(
        engine.features_in_bbox(layer, unit(), QueryOptions::viewport()).await,
        Err(GeoError::Domain(_))
    ));
    assert!(matches!(engine.tile(layer, 0, 0, 0).await, Err(GeoError::Domain(_))));
}
