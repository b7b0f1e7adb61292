//! citymesh: footprint-driven splitting of building meshes and CityGML generation.
//!
//! Pipeline (leaves first):
//!
//! - [`obj`]: line-oriented OBJ reader/writer (vertices, normals, `o`/`g` groups, `usemtl`).
//! - [`footprint`]: GeoJSON footprints (outer ring, hole, islands) shifted into a local frame.
//! - [`tiler`]: flat uniform grid over the footprint extent, tile -> candidate ids.
//! - [`join`]: per-group representative points + ray-casting containment -> [`MatchResult`].
//! - [`partition`]: buckets matched groups per footprint, renumbers indices, writes one OBJ
//!   per building plus the centroid registry CSV.
//! - [`classify`]: Roof / Wall / Ground per face (material hint, then normal angle).
//! - [`builder`]: LOD1-3 building assembly; [`gml`] serializes it as a CityGML 2.0 document.
//!
//! Coordinates are `f64` in a local frame. Footprints are shifted by an [`Origin`] when
//! loaded; the partitioner adds it back for file names and the registry.

pub mod builder;
pub mod classify;
pub mod error;
pub mod footprint;
pub mod geom;
pub mod gml;
pub mod join;
pub mod obj;
pub mod partition;
pub mod tiler;

pub use builder::{BuildOptions, Building, BuildingAttributes, LodMode, ModelBuilder};
pub use classify::{ClassifiedFace, SurfaceClass};
pub use error::{Error, Result};
pub use footprint::{Footprint, FootprintId, FootprintSet, HolePolicy, Origin, Ring};
pub use geom::{Bounds3, Extent, Point2};
pub use gml::CityModel;
pub use join::{CentroidStrategy, GroupMatch, JoinOptions, MatchResult};
pub use obj::{Corner, Face, Mesh, MeshGroup, ParseReport};
pub use partition::{ExportSummary, Partition};
pub use tiler::TileIndex;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Write a file through `<path>.tmp` and rename it into place once flushed.
///
/// An interrupted run therefore never leaves a truncated file under the final name.
pub(crate) fn write_atomically<P, F>(path: P, fill: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let path = path.as_ref();
    let tmp = tmp_path(path);

    let result = (|| {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        fill(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    })();

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp);
        return Err(Error::io(path, err));
    }

    fs::rename(&tmp, path).map_err(|err| {
        let _ = fs::remove_file(&tmp);
        Error::io(path, err)
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_through_tmp_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_atomically(&path, |w| w.write_all(b"hello")).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn failed_rename_leaves_no_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory under the target name makes the rename fail.
        let path = dir.path().join("taken");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("inner"), b"x").unwrap();

        let err = write_atomically(&path, |w| w.write_all(b"data")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!tmp_path(&path).exists());
        assert!(path.is_dir());
    }

    #[test]
    fn failed_fill_leaves_no_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let err = write_atomically(&path, |_| Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"))).unwrap_err();

        assert!(err.to_string().contains("boom"));
        assert!(!tmp_path(&path).exists());
        assert!(!path.exists());
    }
}
