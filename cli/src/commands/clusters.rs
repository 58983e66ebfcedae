use anyhow::Result;
use geolayer::QueryEngine;

use super::{load_config, load_layer, print_json};

pub async fn run(cli: &crate::cli::Cli, args: &crate::cli::ClustersArgs) -> Result<()> {
    let config = load_config(cli)?;
    let (store, layer) = load_layer(&args.input, &config).await?;
    let engine = QueryEngine::new(store, config.query);

    let clusters = engine.clusters(layer.layer_id, args.bbox.bounds()?, args.zoom).await?;
    print_json(&clusters.to_geojson())
}
