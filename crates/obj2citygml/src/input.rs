use std::{
    collections::{btree_map::Entry, BTreeMap},
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use citymesh::{obj, Mesh, ParseReport};
use log::{debug, warn};
use walkdir::WalkDir;

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// Load a mesh from a plain `.obj` or from the first `.obj` inside a `.zip`.
pub fn load_mesh(path: &Path) -> Result<(Mesh, ParseReport)> {
    if has_extension(path, "zip") {
        debug!("Opening ZIP archive {}", path.display());
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut archive = zip::ZipArchive::new(file)
            .with_context(|| format!("reading zip archive {}", path.display()))?;

        let obj_name = archive
            .file_names()
            .find(|n| n.to_ascii_lowercase().ends_with(".obj"))
            .context("No .obj file found in zip archive")?
            .to_owned();

        debug!("Found OBJ file in ZIP: {}", obj_name);
        let entry = archive.by_name(&obj_name)?;
        Ok(obj::read_mesh(entry)?)
    } else {
        Ok(obj::read_mesh_file(path)?)
    }
}

/// Every `.obj`/`.zip` below `input_dir`, one per file stem (a `.zip` wins over an
/// `.obj` of the same stem), sorted by stem. Among files of the same kind the first
/// in walk order is kept and the rest are reported.
pub fn discover_meshes(input_dir: &Path) -> Vec<PathBuf> {
    let mut by_stem: BTreeMap<String, PathBuf> = BTreeMap::new();

    for entry in WalkDir::new(input_dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.into_path();
        let is_zip = has_extension(&path, "zip");
        if !is_zip && !has_extension(&path, "obj") {
            continue;
        }

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_owned();
        if stem.is_empty() {
            continue;
        }

        match by_stem.entry(stem) {
            Entry::Vacant(slot) => {
                slot.insert(path);
            }
            Entry::Occupied(mut slot) => {
                let existing_is_zip = has_extension(slot.get(), "zip");
                if is_zip && !existing_is_zip {
                    slot.insert(path);
                } else if is_zip == existing_is_zip {
                    warn!(
                        "Ignoring {}: stem {:?} already taken by {}",
                        path.display(),
                        slot.key(),
                        slot.get().display()
                    );
                }
            }
        }
    }

    by_stem.into_values().collect()
}
