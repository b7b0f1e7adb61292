use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use citymesh::builder::{
    Code, CLASS_CODE_SPACE, FUNCTION_CODE_SPACE, ROOF_TYPE_CODE_SPACE, USAGE_CODE_SPACE,
};
use citymesh::{BuildOptions, BuildingAttributes, CityModel, LodMode, ModelBuilder};
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::input::{discover_meshes, load_mesh};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LodArg {
    /// One block solid per building.
    Lod1,
    /// Solid plus Roof / Wall / Ground surfaces.
    Lod2,
    /// As lod2, written with LOD3 geometry properties.
    Lod3,
}

impl fmt::Display for LodArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LodArg::Lod1 => "lod1",
            LodArg::Lod2 => "lod2",
            LodArg::Lod3 => "lod3",
        })
    }
}

impl From<LodArg> for LodMode {
    fn from(arg: LodArg) -> Self {
        match arg {
            LodArg::Lod1 => LodMode::Lod1,
            LodArg::Lod2 => LodMode::Lod2,
            LodArg::Lod3 => LodMode::Lod3,
        }
    }
}

/// Convert every per-building mesh in a directory into a CityGML document.
#[derive(Args, Debug, Clone)]
pub struct ConvertArgs {
    #[arg(long, default_value = "buildings")]
    pub input_dir: PathBuf,

    #[arg(long, default_value = "citygml")]
    pub output_dir: PathBuf,

    /// CRS label: an EPSG code or a full srsName URI
    #[arg(long, default_value = "32748")]
    pub epsg: String,

    #[arg(long, value_enum, default_value_t = LodArg::Lod2)]
    pub lod: LodArg,

    /// Classify by face normal only, ignoring Roof/Wall/Ground in material names
    #[arg(long, default_value_t = false)]
    pub no_material_hints: bool,

    /// One surface per orientation (normal rounded to 0.1) instead of one per class
    #[arg(long, default_value_t = false)]
    pub group_orientation: bool,

    /// Reverse faces whose normal points down
    #[arg(long, default_value_t = false)]
    pub normalize_winding: bool,

    #[arg(long, default_value_t = false)]
    pub overwrite: bool,

    /// Prefix of the building name (the building id is the file stem)
    #[arg(long, default_value = "")]
    pub name_prefix: String,

    /// core:creationDate, e.g. 2024-05-01
    #[arg(long)]
    pub creation_date: Option<String>,

    /// bldg:yearOfConstruction
    #[arg(long)]
    pub year: Option<i32>,

    /// bldg:class code (sig3d code list)
    #[arg(long)]
    pub class: Option<String>,

    /// bldg:function code (sig3d code list)
    #[arg(long)]
    pub function: Option<String>,

    /// bldg:usage code (sig3d code list)
    #[arg(long)]
    pub usage: Option<String>,

    /// bldg:roofType code (sig3d code list), e.g. 1030
    #[arg(long)]
    pub roof_type: Option<String>,

    #[arg(long)]
    pub storeys_above_ground: Option<u32>,

    #[arg(long)]
    pub storeys_below_ground: Option<u32>,

    /// Generic string attribute as NAME=VALUE; repeatable
    #[arg(long = "attribute", value_name = "NAME=VALUE", value_parser = parse_key_value)]
    pub attributes: Vec<(String, String)>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_owned(), v.to_owned())),
        _ => Err(format!("expected NAME=VALUE, got {s:?}")),
    }
}

impl ConvertArgs {
    fn build_options(&self) -> BuildOptions {
        BuildOptions {
            material_hints: !self.no_material_hints,
            orientation_grouping: self.group_orientation,
            winding_normalization: self.normalize_winding,
        }
    }

    fn attributes(&self, id: &str) -> BuildingAttributes {
        let code = |value: &Option<String>, space: &str| value.as_ref().map(|v| Code::new(v.as_str(), space));

        BuildingAttributes {
            name: Some(format!("{}{}", self.name_prefix, id)),
            description: Some(format!("{id}, created by converter")),
            creation_date: self.creation_date.clone(),
            relative_to_terrain: Some("entirelyAboveTerrain".to_owned()),
            class: code(&self.class, CLASS_CODE_SPACE),
            function: code(&self.function, FUNCTION_CODE_SPACE),
            usage: code(&self.usage, USAGE_CODE_SPACE),
            year_of_construction: self.year,
            roof_type: code(&self.roof_type, ROOF_TYPE_CODE_SPACE),
            storeys_above_ground: self.storeys_above_ground,
            storeys_below_ground: self.storeys_below_ground,
            strings: self.attributes.clone(),
            measures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Written,
    Skipped,
}

/// Per-run tally of the batch.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub written: usize,
    pub skipped: usize,
    pub failed: Vec<PathBuf>,
}

fn convert_one(path: &Path, args: &ConvertArgs, builder: &ModelBuilder) -> Result<Outcome> {
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .context("mesh path has no file name")?;
    let out_path = args.output_dir.join(format!("{id}.gml"));

    if out_path.exists() && !args.overwrite {
        debug!("Skipping existing file: {}", out_path.display());
        return Ok(Outcome::Skipped);
    }

    let (mesh, _report) = load_mesh(path)?;
    let building = builder.build(&id, &mesh, args.attributes(&id))?;
    let polygons = building.polygons.len();

    CityModel::new(args.epsg.as_str())
        .with_building(building)
        .write_file(&out_path)?;

    info!(
        "OK {} -> {} ({} polygons, {})",
        path.display(),
        out_path.display(),
        polygons,
        builder.lod()
    );
    Ok(Outcome::Written)
}

pub fn run(args: &ConvertArgs) -> Result<BatchSummary> {
    let started = Instant::now();
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let inputs = discover_meshes(&args.input_dir);
    if inputs.is_empty() {
        bail!("no .obj or .zip files found under {}", args.input_dir.display());
    }

    let builder = ModelBuilder::new(args.lod.into(), args.build_options());
    info!("Converting {} mesh(es) at {}...", inputs.len(), builder.lod());

    let outcomes: Vec<(&PathBuf, Result<Outcome>)> = inputs
        .par_iter()
        .map(|path| (path, convert_one(path, args, &builder)))
        .collect();

    let mut summary = BatchSummary::default();
    for (path, outcome) in outcomes {
        match outcome {
            Ok(Outcome::Written) => summary.written += 1,
            Ok(Outcome::Skipped) => summary.skipped += 1,
            Err(err) => {
                warn!("Error processing {}: {:#}", path.display(), err);
                summary.failed.push(path.clone());
            }
        }
    }

    info!(
        "Done in {:.2?}: {} converted, {} skipped, {} failed",
        started.elapsed(),
        summary.written,
        summary.skipped,
        summary.failed.len()
    );
    for path in &summary.failed {
        warn!("Failed: {}", path.display());
    }

    Ok(summary)
}
