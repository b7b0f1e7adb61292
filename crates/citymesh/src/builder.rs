//! Building assembly from a per-building mesh.
//!
//! One builder covers every level of detail: [`LodMode`] picks the geometry that is
//! emitted and [`BuildOptions`] toggles material hints, orientation grouping and
//! winding normalization. Every identifier is derived from the building id plus a
//! sequence number or an order-dependent string hash, so rebuilding unchanged input
//! yields the same ids.

use std::fmt;

use log::debug;

use crate::classify::{group_surfaces, ClassifiedFace, SurfaceClass};
use crate::error::{Error, Result};
use crate::geom::Bounds3;
use crate::obj::Mesh;

pub const CLASS_CODE_SPACE: &str =
    "http://www.sig3d.org/codelists/citygml/2.0/building/2.0/_AbstractBuilding_class.xml";
pub const FUNCTION_CODE_SPACE: &str =
    "http://www.sig3d.org/codelists/citygml/2.0/building/2.0/_AbstractBuilding_function.xml";
pub const USAGE_CODE_SPACE: &str =
    "http://www.sig3d.org/codelists/citygml/2.0/building/2.0/_AbstractBuilding_usage.xml";
pub const ROOF_TYPE_CODE_SPACE: &str =
    "http://www.sig3d.org/codelists/citygml/2.0/building/2.0/_AbstractBuilding_roofType.xml";

/// Description written on ground surfaces.
pub const GROUND_DESCRIPTION: &str = "Bodenplatte";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LodMode {
    /// Single block solid.
    #[default]
    Lod1,
    /// Solid plus semantic boundary surfaces.
    Lod2,
    Lod3,
}

impl LodMode {
    pub fn level(self) -> u8 {
        match self {
            LodMode::Lod1 => 1,
            LodMode::Lod2 => 2,
            LodMode::Lod3 => 3,
        }
    }

    pub fn has_surfaces(self) -> bool {
        self != LodMode::Lod1
    }
}

impl fmt::Display for LodMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lod{}", self.level())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Let `Roof`/`Wall`/`Ground` in a material name decide the class.
    pub material_hints: bool,
    /// One surface per orientation bucket instead of one per class.
    pub orientation_grouping: bool,
    /// Reverse rings whose normal points down.
    pub winding_normalization: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            material_hints: true,
            orientation_grouping: false,
            winding_normalization: false,
        }
    }
}

/// Code list value with its optional code space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub value: String,
    pub code_space: Option<String>,
}

impl Code {
    pub fn new(value: impl Into<String>, code_space: &str) -> Self {
        Self {
            value: value.into(),
            code_space: Some(code_space.to_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    pub name: String,
    pub value: f64,
    pub uom: String,
}

/// Descriptive building attributes. Everything is optional; unset values are not written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildingAttributes {
    pub name: Option<String>,
    pub description: Option<String>,
    /// ISO date (`YYYY-MM-DD`).
    pub creation_date: Option<String>,
    pub relative_to_terrain: Option<String>,
    pub class: Option<Code>,
    pub function: Option<Code>,
    pub usage: Option<Code>,
    pub year_of_construction: Option<i32>,
    pub roof_type: Option<Code>,
    pub storeys_above_ground: Option<u32>,
    pub storeys_below_ground: Option<u32>,
    pub strings: Vec<(String, String)>,
    pub measures: Vec<Measure>,
}

/// Closed polygon ring with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub id: String,
    /// First position repeated at the end.
    pub ring: Vec<[f64; 3]>,
}

/// A named semantic boundary surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub id: String,
    pub class: SurfaceClass,
    pub name: String,
    pub description: Option<String>,
    /// Indices into [`Building::polygons`].
    pub polygons: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    pub id: String,
    pub lod: LodMode,
    pub attributes: BuildingAttributes,
    pub envelope: Bounds3,
    /// `max z - min z` of the envelope.
    pub measured_height: f64,
    /// Id of the exterior solid.
    pub solid_id: String,
    /// Every face as a polygon, in source order.
    pub polygons: Vec<Polygon>,
    /// Empty for LOD1.
    pub surfaces: Vec<Surface>,
}

impl Building {
    /// Polygon of each surface, in surface order.
    pub fn surface_polygons<'a>(&'a self, surface: &'a Surface) -> impl Iterator<Item = &'a Polygon> + 'a {
        surface.polygons.iter().filter_map(|&i| self.polygons.get(i))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModelBuilder {
    lod: LodMode,
    options: BuildOptions,
}

impl ModelBuilder {
    pub fn new(lod: LodMode, options: BuildOptions) -> Self {
        Self { lod, options }
    }

    pub fn lod(&self) -> LodMode {
        self.lod
    }

    pub fn options(&self) -> BuildOptions {
        self.options
    }

    pub fn build(&self, id: &str, mesh: &Mesh, attributes: BuildingAttributes) -> Result<Building> {
        if id.is_empty() {
            return Err(Error::build(id, "empty building id"));
        }

        let envelope = Bounds3::from_points(&mesh.vertices);
        if envelope.is_empty() {
            return Err(Error::build(id, "mesh has no finite vertices"));
        }

        let mut faces = Vec::with_capacity(mesh.face_count());
        let mut dropped = 0usize;
        for face in mesh.faces() {
            let mut classified = ClassifiedFace::new(face, &mesh.vertices, self.options.material_hints);
            if classified.positions.len() < 3 {
                dropped += 1;
                continue;
            }
            if self.options.winding_normalization {
                classified.normalize_winding();
            }
            faces.push(classified);
        }

        if faces.is_empty() {
            return Err(Error::build(id, "mesh has no face with three valid vertices"));
        }
        if dropped > 0 {
            debug!("{id}: dropped {dropped} face(s) with fewer than three valid vertices");
        }

        let polygons: Vec<Polygon> = faces
            .iter()
            .enumerate()
            .map(|(i, face)| Polygon {
                id: format!("{id}-polygon-{i}"),
                ring: closed_ring(&face.positions),
            })
            .collect();

        let surfaces = if self.lod.has_surfaces() {
            self.surfaces(id, &faces)
        } else {
            Vec::new()
        };

        debug!(
            "{id}: {} polygon(s), {} surface(s) at {}",
            polygons.len(),
            surfaces.len(),
            self.lod
        );

        Ok(Building {
            id: id.to_owned(),
            lod: self.lod,
            attributes,
            envelope,
            measured_height: envelope.height(),
            solid_id: format!("{id}-solid"),
            polygons,
            surfaces,
        })
    }

    fn surfaces(&self, id: &str, faces: &[ClassifiedFace]) -> Vec<Surface> {
        let groups = group_surfaces(faces, self.options.orientation_grouping);

        let mut surfaces = Vec::with_capacity(groups.len());
        for class in SurfaceClass::EMIT_ORDER {
            let count = groups.iter().filter(|g| g.class == class).count();
            let of_class = groups.iter().filter(|g| g.class == class);

            for (n, group) in of_class.enumerate() {
                let name = class.surface_name(n + 1, count);
                surfaces.push(Surface {
                    id: surface_id(id, &name),
                    class,
                    description: (class == SurfaceClass::Ground).then(|| GROUND_DESCRIPTION.to_owned()),
                    name,
                    polygons: group.faces.clone(),
                });
            }
        }

        surfaces
    }
}

fn closed_ring(positions: &[[f64; 3]]) -> Vec<[f64; 3]> {
    let mut ring = Vec::with_capacity(positions.len() + 1);
    ring.extend_from_slice(positions);
    if let Some(&first) = positions.first() {
        ring.push(first);
    }
    ring
}

/// `h = 31 * h + c` over the characters, wrapping.
pub fn string_hash(s: &str) -> u64 {
    s.chars()
        .fold(0u64, |h, c| h.wrapping_mul(31).wrapping_add(u64::from(c)))
}

/// `GML_<building>-<hash of building id + surface name>`.
pub fn surface_id(building: &str, name: &str) -> String {
    let mut key = String::with_capacity(building.len() + name.len());
    key.push_str(building);
    key.push_str(name);
    format!("GML_{building}-{:016x}", string_hash(&key))
}
