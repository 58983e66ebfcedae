use geo::{Coord, CoordsIter};
use geolayer::{normalize, GeoError, GeometryKind, LayerKind, Normalizer, NormalizerConfig};
use serde_json::{json, Value};

fn point_feature(x: f64, y: f64, props: Value) -> Value {
    json!({ "type": "Feature", "geometry": { "type": "Point", "coordinates": [x, y] }, "properties": props })
}

fn collection(features: Vec<Value>) -> Vec<u8> {
    serde_json::to_vec(&json!({ "type": "FeatureCollection", "features": features })).unwrap()
}

fn first(geometry: &geo::Geometry<f64>) -> Coord<f64> {
    geometry.coords_iter().next().unwrap()
}

#[test]
fn mixed_collection_metadata() {
    let raw = collection(vec![
        point_feature(-97.0, 30.0, json!({ "name": "a" })),
        json!({
            "type": "Feature",
            "geometry": { "type": "LineString", "coordinates": [[-96.0, 31.0], [-95.0, 32.0]] },
            "properties": { "name": "b", "lanes": 2 }
        }),
    ]);
    let collection = normalize(&raw).unwrap();

    let meta = &collection.metadata;
    assert_eq!(meta.feature_count, 2);
    assert_eq!(meta.layer_kind, LayerKind::Mixed);
    assert_eq!(meta.geometry_kinds, vec![GeometryKind::Point, GeometryKind::LineString]);
    assert_eq!(meta.property_keys, vec!["name", "lanes"]);
    assert_eq!(meta.bbox.to_array(), [-97.0, 30.0, -95.0, 32.0]);
    assert_eq!(meta.summary(), "2 features with mixed types: Point, LineString");
    assert_eq!(meta.size_bytes, raw.len());
}

#[test]
fn bare_feature_is_wrapped() {
    let raw = serde_json::to_vec(&point_feature(10.0, 20.0, Value::Null)).unwrap();
    let collection = normalize(&raw).unwrap();
    assert_eq!(collection.len(), 1);
    assert!(collection.features[0].properties.is_empty());
    assert_eq!(collection.metadata.summary(), "1 feature of type Point");
}

#[test]
fn latitude_first_collection_is_swapped_as_a_whole() {
    // Texas points written as [lat, lon]; the last one is ambiguous and valid either way.
    let mut features: Vec<Value> = (0..5)
        .map(|i| point_feature(30.0 + i as f64 * 0.1, -97.0, json!({})))
        .collect();
    features.push(point_feature(10.0, 20.0, json!({})));
    let collection = normalize(&collection(features)).unwrap();

    assert!(collection.report.axis_swapped);
    assert_eq!(collection.report.axis_vote.needs_swap, 5);
    assert_eq!(collection.report.axis_vote.valid_as_is, 1);
    for feature in &collection.features[..5] {
        let c = first(&feature.geometry);
        assert_eq!(c.x, -97.0);
        assert!(c.y >= 30.0 && c.y < 31.0);
    }
    // Swapped too, even though it was valid as given.
    assert_eq!(first(&collection.features[5].geometry), Coord { x: 20.0, y: 10.0 });
}

#[test]
fn no_swap_without_a_majority() {
    let features = vec![
        point_feature(30.0, -97.0, json!({})),
        point_feature(-97.0, 30.0, json!({})),
        point_feature(-96.0, 31.0, json!({})),
    ];
    let err = normalize(&collection(features)).unwrap_err();
    // The unswapped latitude-first feature is out of range and rejected.
    assert!(matches!(err, GeoError::Validation { feature: Some(0), .. }), "{err}");
}

#[test]
fn utm_collection_is_reprojected() {
    let features = vec![
        json!({
            "type": "Feature",
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [400_000.0, 3_300_000.0], [410_000.0, 3_300_000.0],
                    [410_000.0, 3_310_000.0], [400_000.0, 3_300_000.0]
                ]]
            },
            "properties": { "zone": 15 }
        }),
    ];
    let collection = normalize(&collection(features)).unwrap();

    assert_eq!(collection.report.reprojected_from.as_deref(), Some("EPSG:32615"));
    assert!(!collection.report.axis_swapped);
    let bbox = collection.metadata.bbox;
    assert!(bbox.min_lon > -95.0 && bbox.max_lon < -93.0, "{bbox:?}");
    assert!(bbox.min_lat > 29.0 && bbox.max_lat < 31.0, "{bbox:?}");
}

#[test]
fn unmatched_projection_is_reported() {
    let features = vec![point_feature(2_000_000.0, 3_500_000.0, json!({}))];
    let err = normalize(&collection(features)).unwrap_err();
    assert!(matches!(err, GeoError::Validation { feature: Some(0), .. }));

    let config = NormalizerConfig { projected_zones: Vec::new(), ..NormalizerConfig::default() };
    let features = vec![point_feature(400_000.0, 3_300_000.0, json!({}))];
    assert!(Normalizer::new(config).normalize(&collection(features)).is_err());
}

#[test]
fn too_many_features_rejected() {
    let features: Vec<Value> = (0..150_001).map(|_| point_feature(1.0, 1.0, json!({}))).collect();
    let err = normalize(&collection(features)).unwrap_err();
    match err {
        GeoError::Validation { feature, message } => {
            assert_eq!(feature, None);
            assert!(message.contains("150001"), "{message}");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn too_many_vertices_rejected() {
    let coords: Vec<[f64; 2]> = (0..100_001).map(|i| [(i % 360) as f64 - 180.0, 0.0]).collect();
    let features = vec![
        point_feature(1.0, 1.0, json!({})),
        json!({ "type": "Feature", "geometry": { "type": "LineString", "coordinates": coords }, "properties": {} }),
    ];
    let err = normalize(&collection(features)).unwrap_err();
    assert_eq!(err.feature(), Some(1));
}

#[test]
fn unsupported_inputs_rejected() {
    let gc = json!({
        "type": "Feature",
        "geometry": { "type": "GeometryCollection", "geometries": [] },
        "properties": {}
    });
    let err = normalize(&collection(vec![gc])).unwrap_err();
    assert_eq!(err.feature(), Some(0));

    let no_geometry = json!({ "type": "Feature", "properties": {} });
    assert_eq!(normalize(&collection(vec![no_geometry])).unwrap_err().feature(), Some(0));

    let empty = collection(Vec::new());
    assert!(matches!(normalize(&empty), Err(GeoError::Validation { .. })));

    assert!(matches!(normalize(b"{not json"), Err(GeoError::Validation { .. })));
    assert!(matches!(normalize(br#"{"type":"Point","coordinates":[0,0]}"#), Err(GeoError::Validation { .. })));
}

#[test]
fn near_range_coordinates_are_clamped() {
    let features = vec![point_feature(180.0004, 45.0, json!({}))];
    let collection = normalize(&collection(features)).unwrap();
    assert_eq!(collection.report.clamped_coordinates, 1);
    assert_eq!(first(&collection.features[0].geometry).x, 180.0);
}

#[test]
fn geometry_collection_among_valid_features_is_refused() {
    let features = vec![
        point_feature(-97.0, 30.0, json!({})),
        json!({
            "type": "Feature",
            "geometry": {
                "type": "GeometryCollection",
                "geometries": [
                    { "type": "Point", "coordinates": [-97.0, 30.0] },
                    { "type": "LineString", "coordinates": [[-97.0, 30.0], [-96.0, 31.0]] }
                ]
            },
            "properties": {}
        }),
    ];
    let err = normalize(&collection(features)).unwrap_err();
    assert!(matches!(err, GeoError::Validation { feature: Some(1), .. }), "{err}");
    assert!(err.to_string().contains("GeometryCollection"), "{err}");
}

#[test]
fn projected_multipolygon_with_hole_is_reprojected_everywhere() {
    let ring = |x0: f64, y0: f64, size: f64| {
        json!([[x0, y0], [x0 + size, y0], [x0 + size, y0 + size], [x0, y0 + size], [x0, y0]])
    };
    let features = vec![json!({
        "type": "Feature",
        "geometry": {
            "type": "MultiPolygon",
            "coordinates": [
                [ring(400_000.0, 3_300_000.0, 10_000.0), ring(402_000.0, 3_302_000.0, 1_000.0)],
                [ring(420_000.0, 3_320_000.0, 5_000.0)]
            ]
        },
        "properties": {}
    })];
    let collection = normalize(&collection(features)).unwrap();
    assert_eq!(collection.report.reprojected_from.as_deref(), Some("EPSG:32615"));
    // Holes and later parts are reprojected, not only the first exterior ring.
    assert!(collection.features[0].geometry.coords_iter().all(|c| c.x.abs() <= 180.0 && c.y.abs() <= 90.0));
}

#[test]
fn out_of_range_line_part_is_rejected_with_its_feature() {
    let features = vec![
        point_feature(-97.0, 30.0, json!({})),
        json!({
            "type": "Feature",
            "geometry": {
                "type": "MultiLineString",
                "coordinates": [[[-97.0, 30.0], [-96.0, 31.0]], [[-96.0, 31.0], [-96.0, 95.0]]]
            },
            "properties": {}
        }),
    ];
    match normalize(&collection(features)).unwrap_err() {
        GeoError::Validation { feature, message } => {
            assert_eq!(feature, Some(1));
            assert!(message.contains("latitude 95"), "{message}");
        }
        other => panic!("unexpected error {other}"),
    }
}
