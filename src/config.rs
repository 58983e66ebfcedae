use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Engine-wide tuning, loadable from a JSON document. Missing sections and
/// fields fall back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub normalizer: NormalizerConfig,
    pub ingest: IngestConfig,
    pub query: QueryConfig,
    pub aliases: AliasRules,
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("[config] failed to read {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("[config] failed to parse {}", path.display()))
    }
}

/// A candidate projected coordinate system, matched by coordinate magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedZone {
    pub code: String,
    pub proj4: String,
    /// Inclusive x (easting) band.
    pub x_range: (f64, f64),
    /// Inclusive y (northing) band.
    pub y_range: (f64, f64),
}

impl ProjectedZone {
    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_range.0 && x <= self.x_range.1 && y >= self.y_range.0 && y <= self.y_range.1
    }

    fn utm_north(zone: u8, x_range: (f64, f64)) -> Self {
        Self {
            code: format!("EPSG:326{zone:02}"),
            proj4: format!("+proj=utm +zone={zone} +datum=WGS84 +units=m +no_defs +type=crs"),
            x_range,
            y_range: (0.0, 10_000_000.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub max_features: usize,
    pub max_vertices_per_feature: usize,
    /// Component magnitude above which a collection is treated as projected.
    pub projected_threshold: f64,
    pub axis_sample_size: usize,
    /// Degrees tolerated beyond [-180,180]x[-90,90]; such values are clamped.
    pub coordinate_tolerance: f64,
    /// Checked in order; the first zone containing the sample wins.
    pub projected_zones: Vec<ProjectedZone>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_features: 150_000,
            max_vertices_per_feature: 100_000,
            projected_threshold: 200.0,
            axis_sample_size: 20,
            coordinate_tolerance: 1e-3,
            projected_zones: vec![
                ProjectedZone::utm_north(15, (166_000.0, 500_000.0)),
                ProjectedZone::utm_north(16, (500_000.0, 834_000.0)),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub large_batch_size: usize,
    /// Collections with more features than this load with indexes suspended.
    pub large_layer_threshold: usize,
    pub simplify_vertex_threshold: usize,
    pub simplify_tolerance: f64,
    pub line_bbox_buffer: f64,
    pub point_bbox_buffer: f64,
    pub progress_interval: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            large_batch_size: 1000,
            large_layer_threshold: 10_000,
            simplify_vertex_threshold: 1000,
            simplify_tolerance: 1e-4,
            line_bbox_buffer: 1e-4,
            point_bbox_buffer: 1e-3,
            progress_interval: 5000,
        }
    }
}

impl IngestConfig {
    #[inline]
    pub fn is_large(&self, features: usize) -> bool { features > self.large_layer_threshold }

    #[inline]
    pub fn batch_size_for(&self, features: usize) -> usize {
        if self.is_large(features) { self.large_batch_size } else { self.batch_size }.max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_max_features: usize,
    pub viewport_tolerance: f64,
    pub tile_extent: u32,
    pub tile_buffer: u32,
    pub max_clusters: usize,
    pub points_per_cluster: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_max_features: 5000,
            viewport_tolerance: 1e-4,
            tile_extent: 4096,
            tile_buffer: 256,
            max_clusters: 50,
            points_per_cluster: 10,
        }
    }
}

/// Key normalization rules used by alias-aware property filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AliasRules {
    /// Substring rewrites applied after lower-casing and separator removal.
    pub rewrites: Vec<(String, String)>,
    /// Raw key length that marks a key as possibly truncated (dBase field names).
    pub truncated_key_length: Option<usize>,
}

impl Default for AliasRules {
    fn default() -> Self {
        Self {
            rewrites: vec![
                ("no".to_string(), "cod".to_string()),
                ("región".to_string(), "region".to_string()),
            ],
            truncated_key_length: Some(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"query": {"default_max_features": 100}}"#).unwrap();
        assert_eq!(config.query.default_max_features, 100);
        assert_eq!(config.query.tile_extent, 4096);
        assert_eq!(config.normalizer.max_features, 150_000);
        assert_eq!(config.normalizer.projected_zones.len(), 2);
    }

    #[test]
    fn batch_size_switches_above_threshold() {
        let config = IngestConfig::default();
        assert_eq!(config.batch_size_for(10_000), 500);
        assert_eq!(config.batch_size_for(10_001), 1000);
    }

    #[test]
    fn default_zones_split_at_central_meridian() {
        let zones = NormalizerConfig::default().projected_zones;
        assert!(zones[0].contains(400_000.0, 3_000_000.0));
        assert!(!zones[0].contains(600_000.0, 3_000_000.0));
        assert!(zones[1].contains(600_000.0, 3_000_000.0));
        assert_eq!(zones[1].code, "EPSG:32616");
    }
}
