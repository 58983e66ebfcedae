pub mod bbox;
pub mod clusters;
pub mod filter;
pub mod inspect;
pub mod tile;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use geolayer::{EngineConfig, IngestRequest, IngestSummary, Ingestor, MemoryStore};

use crate::cli::Cli;

pub fn load_config(cli: &Cli) -> Result<EngineConfig> {
    match &cli.config {
        Some(path) => EngineConfig::from_json_file(path),
        None => Ok(EngineConfig::default()),
    }
}

/// Ingest a GeoJSON file into a fresh in-memory store.
pub async fn load_layer(path: &Path, config: &EngineConfig) -> Result<(Arc<MemoryStore>, IngestSummary)> {
    let raw = std::fs::read(path).with_context(|| format!("[load] failed to read {}", path.display()))?;
    let store = Arc::new(MemoryStore::new());
    let ingestor = Ingestor::with_normalizer(store.clone(), config.ingest.clone(), config.normalizer.clone());

    let name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "layer".into());
    let request = IngestRequest {
        original_filename: path.file_name().map(|s| s.to_string_lossy().into_owned()),
        ..IngestRequest::named(name)
    };
    let summary = ingestor.upload(&raw, request).await
        .with_context(|| format!("[load] failed to ingest {}", path.display()))?;
    tracing::info!("[load] {}", summary.summary);
    Ok((store, summary))
}

pub fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
