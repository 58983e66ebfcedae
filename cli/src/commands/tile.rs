use anyhow::{Context, Result};
use geolayer::{compress_tile, QueryEngine};

use super::{load_config, load_layer};

pub async fn run(cli: &crate::cli::Cli, args: &crate::cli::TileArgs) -> Result<()> {
    let config = load_config(cli)?;
    let (store, layer) = load_layer(&args.input, &config).await?;
    let engine = QueryEngine::new(store, config.query);

    let mut tile = engine.tile(layer.layer_id, args.z, args.x, args.y).await?;
    if tile.is_empty() {
        tracing::warn!("[tile] {}/{}/{} is empty", args.z, args.x, args.y);
    }
    if args.gzip {
        tile = compress_tile(&tile)?;
    }

    let out_path = &args.output;
    std::fs::write(out_path, &tile)
        .with_context(|| format!("[tile] failed to write {}", out_path.display()))?;
    eprintln!("[tile] wrote {} bytes to {}", tile.len(), out_path.display());
    Ok(())
}
