use std::path::PathBuf;

use geolayer::Bounds;

/// GeoJSON layer CLI (argument schema only)
#[derive(clap::Parser, Debug)]
#[command(name = "geolayer", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine configuration (JSON); defaults apply when omitted
    #[arg(short, long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Normalize a GeoJSON file and print its metadata and normalization report
    Inspect(InspectArgs),

    /// Features of a GeoJSON file intersecting a bounding box
    Bbox(BboxArgs),

    /// Render one vector tile of a GeoJSON file
    Tile(TileArgs),

    /// Cluster the features of a GeoJSON file inside a bounding box
    Clusters(ClustersArgs),

    /// Filter a multipolygon GeoJSON file by property values
    Filter(FilterArgs),
}

#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    /// Input GeoJSON file (Feature or FeatureCollection)
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub input: PathBuf,

    /// Also print the normalized collection
    #[arg(long)]
    pub features: bool,
}

/// Positional bounding box, west/south/east/north in degrees.
#[derive(clap::Args, Debug, Clone, Copy)]
pub struct BoundsArgs {
    #[arg(allow_negative_numbers = true)]
    pub min_lon: f64,
    #[arg(allow_negative_numbers = true)]
    pub min_lat: f64,
    #[arg(allow_negative_numbers = true)]
    pub max_lon: f64,
    #[arg(allow_negative_numbers = true)]
    pub max_lat: f64,
}

impl BoundsArgs {
    pub fn bounds(&self) -> geolayer::Result<Bounds> {
        Bounds::new(self.min_lon, self.min_lat, self.max_lon, self.max_lat)
    }
}

#[derive(clap::Args, Debug)]
pub struct BboxArgs {
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub input: PathBuf,

    #[command(flatten)]
    pub bbox: BoundsArgs,

    /// Cap on returned features, defaults to the configured maximum
    #[arg(short, long)]
    pub max_features: Option<usize>,

    /// Return full-resolution geometries instead of simplified ones
    #[arg(long)]
    pub no_simplify: bool,
}

#[derive(clap::Args, Debug)]
pub struct TileArgs {
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub input: PathBuf,

    pub z: u8,
    pub x: u32,
    pub y: u32,

    /// Output tile file
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub output: PathBuf,

    /// Gzip the tile payload
    #[arg(long)]
    pub gzip: bool,
}

#[derive(clap::Args, Debug)]
pub struct ClustersArgs {
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub input: PathBuf,

    #[command(flatten)]
    pub bbox: BoundsArgs,

    /// Map zoom level, controls the cluster radius
    #[arg(short, long)]
    pub zoom: u8,
}

#[derive(clap::Args, Debug)]
pub struct FilterArgs {
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub input: PathBuf,

    /// Property filters as KEY=V1,V2 (values OR-ed, keys AND-ed)
    #[arg(value_parser = parse_filter)]
    pub filters: Vec<(String, String)>,

    /// Restrict to these feature ids
    #[arg(long = "feature-id")]
    pub feature_ids: Vec<i64>,
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    let (key, values) = s.split_once('=').ok_or_else(|| format!("expected KEY=VALUES, got {s:?}"))?;
    Ok((key.to_string(), values.to_string()))
}
