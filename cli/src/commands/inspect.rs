use anyhow::{Context, Result};
use geolayer::Normalizer;
use serde_json::json;

use super::{load_config, print_json};

pub fn run(cli: &crate::cli::Cli, args: &crate::cli::InspectArgs) -> Result<()> {
    let config = load_config(cli)?;
    let raw = std::fs::read(&args.input)
        .with_context(|| format!("[inspect] failed to read {}", args.input.display()))?;
    let collection = Normalizer::new(config.normalizer).normalize(&raw)?;

    let mut out = json!({
        "summary": collection.metadata.summary(),
        "metadata": collection.metadata.to_json(),
        "report": serde_json::to_value(&collection.report)?,
    });
    if args.features {
        out["features"] = collection.to_geojson();
    }
    print_json(&out)
}
