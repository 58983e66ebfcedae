use anyhow::Result;
use geolayer::{FeatureId, FilterSpec, PropertyFilter};

use super::{load_config, load_layer, print_json};

pub async fn run(cli: &crate::cli::Cli, args: &crate::cli::FilterArgs) -> Result<()> {
    let config = load_config(cli)?;
    let (store, layer) = load_layer(&args.input, &config).await?;
    let engine = PropertyFilter::new(store, config.aliases);

    let mut spec = FilterSpec::from_query_pairs(args.filters.iter().map(|(k, v)| (k, v)))?;
    if !args.feature_ids.is_empty() {
        spec = spec.with_feature_ids(args.feature_ids.iter().copied().map(FeatureId));
    }
    let result = engine.filter(layer.layer_id, &spec).await?;
    print_json(&result.to_geojson())
}
