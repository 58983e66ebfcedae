use anyhow::Result;
use geolayer::{QueryEngine, QueryOptions};

use super::{load_config, load_layer, print_json};

pub async fn run(cli: &crate::cli::Cli, args: &crate::cli::BboxArgs) -> Result<()> {
    let config = load_config(cli)?;
    let (store, layer) = load_layer(&args.input, &config).await?;
    let engine = QueryEngine::new(store, config.query);

    let mut options = if args.no_simplify { QueryOptions::intersection() } else { QueryOptions::viewport() };
    if let Some(max) = args.max_features {
        options = options.max_features(max);
    }
    let response = engine.features_in_bbox(layer.layer_id, args.bbox.bounds()?, options).await?;
    if let Some(message) = &response.metadata.message {
        tracing::warn!("[bbox] {message}");
    }
    print_json(&response.to_geojson())
}
