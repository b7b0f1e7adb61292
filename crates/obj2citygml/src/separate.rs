use std::{fmt, path::PathBuf, time::Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use citymesh::{
    join::match_all, CentroidStrategy, ExportSummary, FootprintSet, HolePolicy, JoinOptions, Origin,
    Partition, TileIndex,
};
use log::{info, warn};

use crate::input::load_mesh;

/// Whether hole rings exclude points from their footprint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum HoleArg {
    /// Holes are carried but a point inside one still matches.
    Ignore,
    /// A point inside a hole does not match that footprint part.
    Subtract,
}

impl fmt::Display for HoleArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HoleArg::Ignore => "ignore",
            HoleArg::Subtract => "subtract",
        })
    }
}

impl From<HoleArg> for HolePolicy {
    fn from(arg: HoleArg) -> Self {
        match arg {
            HoleArg::Ignore => HolePolicy::Ignore,
            HoleArg::Subtract => HolePolicy::Subtract,
        }
    }
}

/// Which points represent a mesh group during the join.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CentroidArg {
    /// First vertex of every face.
    FirstVertex,
    /// Every distinct vertex of the group.
    AllVertices,
}

impl fmt::Display for CentroidArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CentroidArg::FirstVertex => "first-vertex",
            CentroidArg::AllVertices => "all-vertices",
        })
    }
}

impl From<CentroidArg> for CentroidStrategy {
    fn from(arg: CentroidArg) -> Self {
        match arg {
            CentroidArg::FirstVertex => CentroidStrategy::FirstVertex,
            CentroidArg::AllVertices => CentroidStrategy::AllVertices,
        }
    }
}

/// Split one mesh into per-building meshes by footprint.
#[derive(Args, Debug, Clone)]
pub struct SeparateArgs {
    /// Mesh to split: a .obj file or a .zip containing one
    #[arg(long)]
    pub obj: PathBuf,

    /// GeoJSON FeatureCollection of building footprints (Polygon / MultiPolygon)
    #[arg(long)]
    pub footprints: PathBuf,

    #[arg(long, default_value = "buildings")]
    pub output_dir: PathBuf,

    /// X of the local frame origin, subtracted from footprint coordinates
    #[arg(long, default_value_t = 692827.46065, allow_negative_numbers = true)]
    pub cx: f64,

    /// Y of the local frame origin, subtracted from footprint coordinates
    #[arg(long, default_value_t = 9326588.60235, allow_negative_numbers = true)]
    pub cy: f64,

    /// Edge length of the spatial grid cells, in mesh units
    #[arg(long, default_value_t = 500.0)]
    pub tile_size: f64,

    /// Feature property carried as the footprint key
    #[arg(long, default_value = "id")]
    pub id_property: String,

    #[arg(long, value_enum, default_value_t = HoleArg::Ignore)]
    pub hole_policy: HoleArg,

    #[arg(long, value_enum, default_value_t = CentroidArg::FirstVertex)]
    pub centroid: CentroidArg,

    /// Centroid registry CSV (default: the mesh path with a .csv extension)
    #[arg(long)]
    pub registry: Option<PathBuf>,

    /// Prefix of the output file names (default: the mesh file stem)
    #[arg(long)]
    pub base_name: Option<String>,
}

pub fn run(args: &SeparateArgs) -> Result<ExportSummary> {
    let started = Instant::now();

    info!("Loading mesh {}", args.obj.display());
    let (mesh, report) = load_mesh(&args.obj).with_context(|| format!("loading {}", args.obj.display()))?;
    info!(
        "Mesh: {} vertices, {} normals, {} groups, {} faces ({} lines)",
        mesh.vertices.len(),
        mesh.normals.len(),
        mesh.groups.len(),
        mesh.face_count(),
        report.lines
    );

    let origin = Origin::new(args.cx, args.cy);
    let footprints = FootprintSet::from_path(&args.footprints, origin, &args.id_property)
        .with_context(|| format!("loading footprints {}", args.footprints.display()))?;
    if footprints.extent().is_empty() {
        bail!("{}: no footprint has usable geometry", args.footprints.display());
    }

    let tiles = TileIndex::build(footprints.extent(), args.tile_size, &footprints)
        .context("building the tile index")?;
    info!("Tile grid: {} x {} cells of {}", tiles.cols(), tiles.rows(), tiles.tile_size());

    let options = JoinOptions {
        centroid: args.centroid.into(),
        holes: args.hole_policy.into(),
    };
    let matches = match_all(&mesh.groups, &mesh.vertices, &tiles, &footprints, options);
    let partition = Partition::new(&matches, origin);

    let base = match &args.base_name {
        Some(base) => base.clone(),
        None => args
            .obj
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .context("mesh path has no file name")?,
    };
    let summary = partition.export(&mesh, &base, &args.output_dir)?;

    let registry = args
        .registry
        .clone()
        .unwrap_or_else(|| args.obj.with_extension("csv"));
    partition
        .write_registry(&registry)
        .with_context(|| format!("writing registry {}", registry.display()))?;

    info!(
        "Split {} groups into {} buildings ({} unmatched) in {:.2?}; registry {}",
        summary.total_groups,
        summary.buildings(),
        summary.unmatched,
        started.elapsed(),
        registry.display()
    );

    for path in &summary.failed {
        warn!("Not written: {}", path.display());
    }
    if !summary.failed.is_empty() {
        bail!("{} building file(s) could not be written", summary.failed.len());
    }

    Ok(summary)
}
