//! Bucketing of matched groups per footprint and export of per-building meshes.
//!
//! Buckets are ordered by ascending footprint id and keep their member groups in
//! source order, so repeated runs over the same input produce the same files. Each
//! exported mesh is renumbered locally: vertices and normals are numbered from 1 in
//! order of first use by the bucket's faces.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use log::{debug, info, warn};
use nohash_hasher::BuildNoHashHasher;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::footprint::{FootprintId, Origin};
use crate::geom::Point2;
use crate::join::GroupMatch;
use crate::obj::{vertex_at, Corner, Face, Mesh, MeshGroup};
use crate::write_atomically;

type IndexMap = HashMap<u32, u32, BuildNoHashHasher<u32>>;

/// Groups claimed by one footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub footprint: FootprintId,
    /// Indices into the source mesh's groups, ascending.
    pub groups: Vec<usize>,
    /// Mean of the member centroids, world frame.
    pub centroid: [f64; 3],
}

/// One centroid registry row (world frame).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegistryRow {
    pub group: usize,
    pub footprint: FootprintId,
    pub position: [f64; 3],
}

#[derive(Debug, Clone, Default)]
pub struct Partition {
    buckets: Vec<Bucket>,
    rows: Vec<RegistryRow>,
    total_groups: usize,
}

/// What an export run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSummary {
    pub total_groups: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub written: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl ExportSummary {
    pub fn buildings(&self) -> usize {
        self.written.len()
    }
}

impl Partition {
    /// Bucket the join results. `matches` is indexed like the source mesh's groups.
    pub fn new(matches: &[GroupMatch], origin: Origin) -> Self {
        let mut members: BTreeMap<FootprintId, Vec<usize>> = BTreeMap::new();
        let mut rows = Vec::new();

        for (group, m) in matches.iter().enumerate() {
            let (Some(footprint), Some(c)) = (m.result.footprint(), m.centroid) else {
                continue;
            };

            members.entry(footprint).or_default().push(group);

            let world = origin.to_world(Point2::new(c[0], c[1]));
            rows.push(RegistryRow {
                group,
                footprint,
                position: [world.x, world.y, c[2]],
            });
        }

        let buckets = members
            .into_iter()
            .map(|(footprint, groups)| {
                let inv_n = 1.0 / groups.len() as f64;
                let mut sum = [0.0; 3];
                for &g in &groups {
                    if let Some(c) = matches[g].centroid {
                        for axis in 0..3 {
                            sum[axis] += c[axis];
                        }
                    }
                }
                let world = origin.to_world(Point2::new(sum[0] * inv_n, sum[1] * inv_n));

                Bucket {
                    footprint,
                    groups,
                    centroid: [world.x, world.y, sum[2] * inv_n],
                }
            })
            .collect();

        Self {
            buckets,
            rows,
            total_groups: matches.len(),
        }
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Registry rows in source group order.
    pub fn registry(&self) -> &[RegistryRow] {
        &self.rows
    }

    pub fn total_groups(&self) -> usize {
        self.total_groups
    }

    pub fn matched(&self) -> usize {
        self.rows.len()
    }

    pub fn unmatched(&self) -> usize {
        self.total_groups - self.rows.len()
    }

    /// `<base>_<X>_<Y>.obj` per bucket, X/Y being the world centroid truncated
    /// toward zero. A repeated name gets `_<footprint id>` appended.
    pub fn file_names(&self, base: &str) -> Vec<String> {
        let mut seen = HashSet::with_capacity(self.buckets.len());

        self.buckets
            .iter()
            .map(|bucket| {
                let stem = format!(
                    "{}_{}_{}",
                    base,
                    bucket.centroid[0].trunc() as i64,
                    bucket.centroid[1].trunc() as i64
                );

                let name = if seen.contains(&stem) {
                    debug!("File name {stem} already used; suffixing footprint {}", bucket.footprint);
                    format!("{stem}_{}", bucket.footprint)
                } else {
                    stem
                };
                seen.insert(name.clone());
                format!("{name}.obj")
            })
            .collect()
    }

    /// Write one OBJ per bucket into `out_dir`, in parallel. Per-file failures are
    /// logged and listed in the summary; only an unusable output directory is an error.
    pub fn export<P: AsRef<Path>>(&self, source: &Mesh, base: &str, out_dir: P) -> Result<ExportSummary> {
        let out_dir = out_dir.as_ref();
        fs::create_dir_all(out_dir).map_err(|e| Error::io(out_dir, e))?;

        let names = self.file_names(base);
        let outcomes: Vec<(PathBuf, Result<()>)> = self
            .buckets
            .par_iter()
            .zip(names.par_iter())
            .map(|(bucket, name)| {
                let path = out_dir.join(name);
                let mesh = extract(source, &bucket.groups);
                let result = write_atomically(&path, |w| mesh.write_to(w));
                (path, result)
            })
            .collect();

        let mut summary = ExportSummary {
            total_groups: self.total_groups,
            matched: self.matched(),
            unmatched: self.unmatched(),
            ..ExportSummary::default()
        };

        for (path, result) in outcomes {
            match result {
                Ok(()) => summary.written.push(path),
                Err(err) => {
                    warn!("Failed to write {}: {}", path.display(), err);
                    summary.failed.push(path);
                }
            }
        }

        info!(
            "Exported {} building mesh(es) to {} ({} groups matched, {} unmatched, {} failed)",
            summary.buildings(),
            out_dir.display(),
            summary.matched,
            summary.unmatched,
            summary.failed.len()
        );

        Ok(summary)
    }

    /// Centroid registry as CSV: `X,Y,Z,Index`, one row per matched group.
    pub fn write_registry_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        writeln!(w, "X,Y,Z,Index")?;
        for row in &self.rows {
            writeln!(
                w,
                "{:.6},{:.6},{:.6},{}",
                row.position[0], row.position[1], row.position[2], row.footprint
            )?;
        }
        Ok(())
    }

    pub fn write_registry<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        write_atomically(path, |w| self.write_registry_to(w))?;
        debug!("Wrote {} registry rows to {}", self.rows.len(), path.display());
        Ok(())
    }
}

/// Copy the given groups of `source` into a standalone mesh with local numbering.
///
/// Corners pointing at vertices that do not exist are dropped, and so is any face
/// left with fewer than three corners.
pub fn extract(source: &Mesh, groups: &[usize]) -> Mesh {
    let mut vertex_map = IndexMap::default();
    let mut normal_map = IndexMap::default();
    let mut out = Mesh {
        mtllib: source.mtllib.clone(),
        ..Mesh::default()
    };

    for group in groups.iter().filter_map(|&g| source.groups.get(g)) {
        let mut faces = Vec::with_capacity(group.faces.len());

        for face in &group.faces {
            let corners: Vec<Corner> = face
                .corners
                .iter()
                .filter_map(|corner| {
                    let v = renumber(&mut vertex_map, &mut out.vertices, &source.vertices, corner.v)?;
                    let vn = corner
                        .vn
                        .and_then(|vn| renumber(&mut normal_map, &mut out.normals, &source.normals, vn));
                    Some(Corner { v, vn })
                })
                .collect();

            if corners.len() >= 3 {
                faces.push(Face {
                    corners,
                    material: face.material.clone(),
                });
            }
        }

        out.groups.push(MeshGroup {
            name: group.name.clone(),
            faces,
        });
    }

    out
}

fn renumber(map: &mut IndexMap, store: &mut Vec<[f64; 3]>, source: &[[f64; 3]], index: u32) -> Option<u32> {
    if let Some(&local) = map.get(&index) {
        return Some(local);
    }

    let value = vertex_at(source, index)?;
    store.push(value);
    let local = store.len() as u32;
    map.insert(index, local);
    Some(local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::MatchResult;

    fn matched(id: u32, c: [f64; 3]) -> GroupMatch {
        GroupMatch {
            result: MatchResult::Matched(FootprintId(id)),
            centroid: Some(c),
        }
    }

    fn unmatched() -> GroupMatch {
        GroupMatch {
            result: MatchResult::Unmatched,
            centroid: Some([0.0; 3]),
        }
    }

    const SOURCE: &str = "\
mtllib city.mtl
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
v 5 5 1
v 6 5 1
v 6 6 1
vn 0 0 1
vn 0 0 -1
o a
usemtl Roof
f 5//2 6//2 7//2
o b
f 1//1 2//1 3//1
f 1//1 3//1 4//1
o c
f 2 3 4
";

    #[test]
    fn buckets_are_ordered_by_footprint_and_skip_unmatched() {
        let matches = vec![
            matched(3, [1.0, 1.0, 0.0]),
            unmatched(),
            matched(1, [2.0, 4.0, 1.0]),
            matched(3, [3.0, 3.0, 2.0]),
        ];
        let p = Partition::new(&matches, Origin::new(100.0, 200.0));

        assert_eq!(p.total_groups(), 4);
        assert_eq!(p.matched(), 3);
        assert_eq!(p.unmatched(), 1);
        assert_eq!(p.matched() + p.unmatched(), p.total_groups());

        let ids: Vec<u32> = p.buckets().iter().map(|b| b.footprint.0).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(p.buckets()[1].groups, vec![0, 3]);
        assert_eq!(p.buckets()[1].centroid, [102.0, 202.0, 1.0]);
        assert_eq!(p.registry().len(), 3);
        assert_eq!(p.registry()[1].position, [102.0, 204.0, 1.0]);
    }

    #[test]
    fn file_names_truncate_toward_zero_and_resolve_collisions() {
        let matches = vec![
            matched(0, [10.9, -3.7, 0.0]),
            matched(1, [10.2, -3.1, 0.0]),
            matched(2, [-0.5, 7.0, 0.0]),
        ];
        let p = Partition::new(&matches, Origin::default());
        assert_eq!(
            p.file_names("scene"),
            vec!["scene_10_-3.obj", "scene_10_-3_1.obj", "scene_0_7.obj"]
        );
    }

    #[test]
    fn extraction_renumbers_by_first_use() {
        let (mesh, _) = Mesh::parse_str(SOURCE).unwrap();
        let out = extract(&mesh, &[0, 1]);

        assert_eq!(out.mtllib.as_deref(), Some("city.mtl"));
        assert_eq!(out.vertices.len(), 7);
        assert_eq!(out.vertices[0], [5.0, 5.0, 1.0]);
        assert_eq!(out.normals, vec![[0.0, 0.0, -1.0], [0.0, 0.0, 1.0]]);

        let first: Vec<Corner> = out.groups[0].faces[0].corners.clone();
        assert_eq!(
            first,
            vec![
                Corner { v: 1, vn: Some(1) },
                Corner { v: 2, vn: Some(1) },
                Corner { v: 3, vn: Some(1) },
            ]
        );
        assert_eq!(out.groups[0].faces[0].material(), Some("Roof"));

        // Renumbering is a bijection onto 1..=n.
        let mut used: Vec<u32> = out.faces().flat_map(|f| f.vertex_indices()).collect();
        used.sort_unstable();
        used.dedup();
        assert_eq!(used, (1..=out.vertices.len() as u32).collect::<Vec<_>>());

        // Every corner points at the same coordinates as in the source.
        for (src, dst) in [0usize, 1].iter().flat_map(|&g| mesh.groups[g].faces.iter()).zip(out.faces()) {
            for (a, b) in src.corners.iter().zip(&dst.corners) {
                assert_eq!(mesh.vertex(a.v), out.vertex(b.v));
            }
        }
    }

    #[test]
    fn extraction_drops_dangling_corners() {
        let (mesh, _) = Mesh::parse_str("v 0 0 0\nv 1 0 0\nv 0 1 0\no x\nf 1 2 3\nf 1 2 9\n").unwrap();
        let out = extract(&mesh, &[0]);
        assert_eq!(out.face_count(), 1);
        assert_eq!(out.vertices.len(), 3);
    }

    #[test]
    fn registry_csv_layout() {
        let p = Partition::new(&[matched(4, [1.5, 2.25, 3.0]), unmatched()], Origin::new(10.0, 20.0));
        let mut out = Vec::new();
        p.write_registry_to(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "X,Y,Z,Index\n11.500000,22.250000,3.000000,4\n"
        );
    }

    #[test]
    fn export_writes_one_file_per_bucket() {
        let (mesh, _) = Mesh::parse_str(SOURCE).unwrap();
        let matches = vec![
            matched(1, [5.0, 5.0, 1.0]),
            matched(0, [0.5, 0.5, 0.0]),
            unmatched(),
        ];
        let dir = tempfile::tempdir().unwrap();
        let p = Partition::new(&matches, Origin::new(1000.0, 2000.0));

        let summary = p.export(&mesh, "city", dir.path()).unwrap();
        assert_eq!(summary.buildings(), 2);
        assert_eq!(summary.unmatched, 1);
        assert!(summary.failed.is_empty());

        let first = dir.path().join("city_1000_2000.obj");
        let second = dir.path().join("city_1005_2005.obj");
        assert_eq!(summary.written, vec![first.clone(), second.clone()]);

        let (building, report) = crate::obj::read_mesh_file(&second).unwrap();
        assert!(report.is_clean());
        assert_eq!(building.groups.len(), 1);
        assert_eq!(building.groups[0].name.as_deref(), Some("a"));
        assert!(!dir.path().join("city_1005_2005.obj.tmp").exists());
    }
}
