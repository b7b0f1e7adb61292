//! OBJ mesh reader/writer.
//!
//! Records consumed:
//!
//! ```text
//!   v  x y z [w | r g b]     vertex (extra fields ignored)
//!   vn x y z                 vertex normal
//!   f  v[/vt][/vn] ...       face; vt is ignored, negative indices are relative
//!   o name | g name          group boundary (one candidate building shell)
//!   usemtl name              material for the following faces
//!   mtllib file              material library reference (carried, not parsed)
//! ```
//!
//! Everything else is ignored. A malformed record is skipped and counted in
//! [`ParseReport`]; only IO failures abort a read.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Error, Result};

/// One face corner. Indices are 1-based positions into the owning mesh's arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corner {
    pub v: u32,
    pub vn: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Face {
    pub corners: Vec<Corner>,
    pub material: Option<Arc<str>>,
}

impl Face {
    pub fn new(corners: Vec<Corner>) -> Self {
        Self {
            corners,
            material: None,
        }
    }

    pub fn with_material(mut self, material: &str) -> Self {
        self.material = Some(Arc::from(material));
        self
    }

    /// Vertex indices in corner order.
    pub fn vertex_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.corners.iter().map(|c| c.v)
    }

    pub fn material(&self) -> Option<&str> {
        self.material.as_deref()
    }
}

/// Faces between two `o`/`g` markers: one candidate building shell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshGroup {
    pub name: Option<String>,
    pub faces: Vec<Face>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<[f64; 3]>,
    pub normals: Vec<[f64; 3]>,
    pub groups: Vec<MeshGroup>,
    pub mtllib: Option<String>,
}

/// Counters describing what a read skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseReport {
    pub lines: usize,
    /// Records dropped entirely (bad numbers, too few fields, faces with < 3 corners).
    pub skipped_lines: usize,
    /// Individual face corners dropped while the face itself survived.
    pub skipped_fields: usize,
}

impl ParseReport {
    pub fn is_clean(&self) -> bool {
        self.skipped_lines == 0 && self.skipped_fields == 0
    }
}

impl Mesh {
    /// Vertex by 1-based index.
    #[inline]
    pub fn vertex(&self, index: u32) -> Option<[f64; 3]> {
        vertex_at(&self.vertices, index)
    }

    /// Every face of every group, in source order.
    pub fn faces(&self) -> impl Iterator<Item = &Face> + '_ {
        self.groups.iter().flat_map(|g| g.faces.iter())
    }

    pub fn face_count(&self) -> usize {
        self.groups.iter().map(|g| g.faces.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.face_count() == 0
    }

    /// Parse an OBJ stream. Bad records are skipped; IO errors are returned.
    pub fn parse<R: BufRead>(mut reader: R) -> Result<(Mesh, ParseReport)> {
        let mut state = ParseState::default();
        let mut tick = Tick::new(1_000_000);
        let mut buf = Vec::with_capacity(256);

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }

            let line = String::from_utf8_lossy(&buf);
            state.report.lines += 1;
            state.line(line.trim());

            if tick.should(state.report.lines) {
                info!(
                    "OBJ: {:>11} lines, {:>10} vertices, {:>8} groups, rate {:5.2} M lines/s",
                    state.report.lines,
                    state.mesh.vertices.len(),
                    state.mesh.groups.len(),
                    tick.rate_mps(state.report.lines)
                );
                tick.bump();
            }
        }

        let (mesh, report) = state.finish();
        if !report.is_clean() {
            warn!(
                "OBJ: skipped {} malformed record(s) and {} face corner(s) out of {} lines",
                report.skipped_lines, report.skipped_fields, report.lines
            );
        }

        Ok((mesh, report))
    }

    pub fn parse_str(text: &str) -> Result<(Mesh, ParseReport)> {
        Self::parse(text.as_bytes())
    }

    /// Serialize as OBJ with `v`, `vn`, one `o` per group, `usemtl` switches and
    /// `v//vn` corners (plain `v` when a face carries no normals).
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        if let Some(lib) = &self.mtllib {
            writeln!(w, "mtllib {lib}")?;
        }

        for v in &self.vertices {
            writeln!(w, "v {:.6} {:.6} {:.6}", v[0], v[1], v[2])?;
        }

        for n in &self.normals {
            writeln!(w, "vn {:.6} {:.6} {:.6}", n[0], n[1], n[2])?;
        }

        let mut current_material: Option<&str> = None;
        for (index, group) in self.groups.iter().enumerate() {
            match &group.name {
                Some(name) => writeln!(w, "o {name}")?,
                None => writeln!(w, "o group_{}", index + 1)?,
            }

            for face in &group.faces {
                if face.material() != current_material {
                    match face.material() {
                        Some(material) => writeln!(w, "usemtl {material}")?,
                        // Bare `usemtl` clears the material on re-read.
                        None => writeln!(w, "usemtl")?,
                    }
                    current_material = face.material();
                }

                w.write_all(b"f")?;
                let with_normals = face.corners.iter().all(|c| c.vn.is_some());
                for corner in &face.corners {
                    match corner.vn {
                        Some(vn) if with_normals => write!(w, " {}//{}", corner.v, vn)?,
                        _ => write!(w, " {}", corner.v)?,
                    }
                }
                w.write_all(b"\n")?;
            }
        }

        Ok(())
    }
}

/// Vertex by 1-based index into a slice.
#[inline]
pub fn vertex_at(vertices: &[[f64; 3]], index: u32) -> Option<[f64; 3]> {
    (index as usize)
        .checked_sub(1)
        .and_then(|i| vertices.get(i))
        .copied()
}

/// Read a mesh from disk.
#[cfg(feature = "mmap")]
pub fn read_mesh_file<P: AsRef<Path>>(path: P) -> Result<(Mesh, ParseReport)> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    // Safety: the map is read-only and dropped before this function returns.
    let map = unsafe { memmap2::MmapOptions::new().map(&file) }.map_err(|e| Error::io(path, e))?;
    debug!("Mapped {} ({} bytes)", path.display(), map.len());
    Mesh::parse(&map[..])
}

/// Read a mesh from disk.
#[cfg(not(feature = "mmap"))]
pub fn read_mesh_file<P: AsRef<Path>>(path: P) -> Result<(Mesh, ParseReport)> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    debug!("Reading {}", path.display());
    read_mesh(file)
}

/// Read a mesh from any byte source (e.g. a zip entry).
pub fn read_mesh<R: Read>(reader: R) -> Result<(Mesh, ParseReport)> {
    Mesh::parse(BufReader::with_capacity(1 << 20, reader))
}

#[derive(Default)]
struct ParseState {
    mesh: Mesh,
    report: ParseReport,
    current: MeshGroup,
    material: Option<Arc<str>>,
}

impl ParseState {
    fn line(&mut self, line: &str) {
        let mut parts = line.split_whitespace();
        let Some(tag) = parts.next() else {
            return;
        };

        match tag {
            "v" => match parse_xyz(&mut parts) {
                Some(v) => self.mesh.vertices.push(v),
                None => self.skip(line),
            },
            "vn" => match parse_xyz(&mut parts) {
                Some(n) => self.mesh.normals.push(n),
                None => self.skip(line),
            },
            "f" => self.face(line, parts),
            "o" | "g" => {
                let name = rest_of_line(line, tag);
                self.start_group(name);
            }
            "usemtl" => {
                self.material = rest_of_line(line, tag).map(Arc::from);
            }
            "mtllib" => {
                self.mesh.mtllib = rest_of_line(line, tag);
            }
            _ => {}
        }
    }

    fn face<'a>(&mut self, line: &str, parts: impl Iterator<Item = &'a str>) {
        let vertex_count = self.mesh.vertices.len();
        let normal_count = self.mesh.normals.len();
        let mut corners = Vec::with_capacity(4);

        for token in parts {
            let mut fields = token.split('/');
            let v = fields
                .next()
                .and_then(|s| resolve_index(s, vertex_count));
            // Skip the texture coordinate slot; an empty normal slot means "no normal".
            let vn = fields
                .nth(1)
                .filter(|s| !s.is_empty())
                .map(|s| resolve_index(s, normal_count));

            match (v, vn) {
                (Some(v), None) => corners.push(Corner { v, vn: None }),
                (Some(v), Some(Some(vn))) => corners.push(Corner { v, vn: Some(vn) }),
                _ => self.report.skipped_fields += 1,
            }
        }

        if corners.len() < 3 {
            self.skip(line);
            return;
        }

        self.current.faces.push(Face {
            corners,
            material: self.material.clone(),
        });
    }

    fn start_group(&mut self, name: Option<String>) {
        if self.current.faces.is_empty() {
            // Consecutive markers (`o` followed by `g`) describe the same shell.
            if self.current.name.is_none() {
                self.current.name = name;
            }
            return;
        }

        let finished = std::mem::replace(
            &mut self.current,
            MeshGroup {
                name,
                faces: Vec::new(),
            },
        );
        self.mesh.groups.push(finished);
    }

    fn skip(&mut self, line: &str) {
        self.report.skipped_lines += 1;
        debug!("OBJ: skipping malformed record at line {}: {line:?}", self.report.lines);
    }

    fn finish(mut self) -> (Mesh, ParseReport) {
        if !self.current.faces.is_empty() {
            self.mesh.groups.push(self.current);
        }
        (self.mesh, self.report)
    }
}

fn parse_xyz<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Option<[f64; 3]> {
    let x = parts.next()?.parse::<f64>().ok()?;
    let y = parts.next()?.parse::<f64>().ok()?;
    let z = parts.next()?.parse::<f64>().ok()?;
    Some([x, y, z])
}

/// Resolve an OBJ index (1-based, or negative relative to `count`) to a 1-based index.
fn resolve_index(s: &str, count: usize) -> Option<u32> {
    let raw: i64 = s.parse().ok()?;
    let resolved = match raw {
        0 => return None,
        r if r > 0 => r,
        r => count as i64 + 1 + r,
    };
    u32::try_from(resolved).ok().filter(|&i| i > 0)
}

fn rest_of_line(line: &str, tag: &str) -> Option<String> {
    let rest = line[tag.len()..].trim();
    (!rest.is_empty()).then(|| rest.to_owned())
}

/// Throttled progress logging: fires on multiples of `every`, at most every 200 ms.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tick {
    start: Instant,
    last: Instant,
    every: usize,
}

impl Tick {
    #[inline]
    pub(crate) fn new(every: usize) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            every: every.max(1),
        }
    }

    #[inline]
    pub(crate) fn should(&self, count: usize) -> bool {
        const MIN_INTERVAL: Duration = Duration::from_millis(200);
        count % self.every == 0 && self.last.elapsed() >= MIN_INTERVAL
    }

    #[inline]
    pub(crate) fn bump(&mut self) {
        self.last = Instant::now();
    }

    /// Items per second, in millions.
    #[inline]
    pub(crate) fn rate_mps(&self, count: usize) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64().max(1e-9);
        count as f64 / 1_000_000.0 / elapsed
    }
}
