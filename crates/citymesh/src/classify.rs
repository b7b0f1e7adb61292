//! Roof / Wall / Ground classification of building faces.
//!
//! A material name containing `Roof`, `Wall` or `Ground` decides first (when hints
//! are enabled). Otherwise the face normal from its first three vertices decides:
//! `z > 0.7` is a roof, `z < -0.7` a ground plate, anything else a wall.

use std::fmt;

use hashbrown::HashMap;

use crate::geom::{cross, normalize, sub};
use crate::obj::{vertex_at, Face};

/// Vertical normal component above which a face is a roof (below the negation, ground).
pub const VERTICAL_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SurfaceClass {
    Roof,
    Wall,
    Ground,
}

impl SurfaceClass {
    /// Order in which boundary surfaces are emitted.
    pub const EMIT_ORDER: [SurfaceClass; 3] = [SurfaceClass::Wall, SurfaceClass::Roof, SurfaceClass::Ground];

    /// Class named by a material, if any. The first keyword found wins, checked
    /// in the order Roof, Wall, Ground; matching is case-sensitive.
    pub fn from_material(material: &str) -> Option<Self> {
        if material.contains("Roof") {
            Some(SurfaceClass::Roof)
        } else if material.contains("Wall") {
            Some(SurfaceClass::Wall)
        } else if material.contains("Ground") {
            Some(SurfaceClass::Ground)
        } else {
            None
        }
    }

    pub fn from_normal(normal: [f64; 3]) -> Self {
        if normal[2] > VERTICAL_THRESHOLD {
            SurfaceClass::Roof
        } else if normal[2] < -VERTICAL_THRESHOLD {
            SurfaceClass::Ground
        } else {
            SurfaceClass::Wall
        }
    }

    /// Element name of the boundary surface in the building schema.
    pub fn element(self) -> &'static str {
        match self {
            SurfaceClass::Roof => "bldg:RoofSurface",
            SurfaceClass::Wall => "bldg:WallSurface",
            SurfaceClass::Ground => "bldg:GroundSurface",
        }
    }

    /// Display name of the `ordinal`-th (1-based) surface out of `count` of this class.
    pub fn surface_name(self, ordinal: usize, count: usize) -> String {
        match self {
            SurfaceClass::Roof => format!("Roof {ordinal}"),
            SurfaceClass::Wall => format!("Outer Wall {ordinal}"),
            SurfaceClass::Ground if count > 1 => format!("Base Surface {ordinal}"),
            SurfaceClass::Ground => "Base Surface".to_owned(),
        }
    }
}

impl fmt::Display for SurfaceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SurfaceClass::Roof => "Roof",
            SurfaceClass::Wall => "Wall",
            SurfaceClass::Ground => "Ground",
        })
    }
}

/// Unit normal from the first three resolvable vertices, `(v2 - v1) x (v3 - v1)`.
/// `None` when fewer than three vertices resolve; a degenerate triangle yields the
/// zero vector.
pub fn face_normal(face: &Face, vertices: &[[f64; 3]]) -> Option<[f64; 3]> {
    let mut it = face.vertex_indices().filter_map(|i| vertex_at(vertices, i));
    let (v1, v2, v3) = (it.next()?, it.next()?, it.next()?);
    Some(normalize(cross(sub(v2, v1), sub(v3, v1))))
}

/// Classify one face. `material` is consulted only when given.
pub fn classify(face: &Face, vertices: &[[f64; 3]], material: Option<&str>) -> SurfaceClass {
    if let Some(class) = material.and_then(SurfaceClass::from_material) {
        return class;
    }

    face_normal(face, vertices).map_or(SurfaceClass::Wall, SurfaceClass::from_normal)
}

/// A face resolved to positions and tagged with its class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedFace {
    pub class: SurfaceClass,
    /// Geometric unit normal; zero when it could not be computed.
    pub normal: [f64; 3],
    /// Ring positions in corner order, not closed.
    pub positions: Vec<[f64; 3]>,
}

impl ClassifiedFace {
    pub fn new(face: &Face, vertices: &[[f64; 3]], material_hints: bool) -> Self {
        let material = if material_hints { face.material() } else { None };
        Self {
            class: classify(face, vertices, material),
            normal: face_normal(face, vertices).unwrap_or([0.0; 3]),
            positions: face
                .vertex_indices()
                .filter_map(|i| vertex_at(vertices, i))
                .collect(),
        }
    }

    /// Reverse the ring when its normal points down. The class is left as is.
    pub fn normalize_winding(&mut self) -> bool {
        if self.normal[2] >= 0.0 {
            return false;
        }
        self.positions.reverse();
        self.normal = [-self.normal[0], -self.normal[1], -self.normal[2]];
        true
    }

    /// Normal rounded to one decimal per axis, in tenths.
    pub fn orientation_key(&self) -> [i32; 3] {
        orientation_key(self.normal)
    }
}

pub fn orientation_key(normal: [f64; 3]) -> [i32; 3] {
    normal.map(|c| (c * 10.0).round() as i32)
}

/// Faces forming one semantic surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceGroup {
    pub class: SurfaceClass,
    /// Indices into the classified face list, ascending.
    pub faces: Vec<usize>,
}

/// Surfaces in [`SurfaceClass::EMIT_ORDER`]; one per present class, or with
/// `by_orientation` one per orientation key within a class (first-appearance order).
pub fn group_surfaces(faces: &[ClassifiedFace], by_orientation: bool) -> Vec<SurfaceGroup> {
    let mut surfaces = Vec::new();

    for class in SurfaceClass::EMIT_ORDER {
        let members = faces
            .iter()
            .enumerate()
            .filter(|(_, f)| f.class == class);

        if !by_orientation {
            let faces: Vec<usize> = members.map(|(i, _)| i).collect();
            if !faces.is_empty() {
                surfaces.push(SurfaceGroup { class, faces });
            }
            continue;
        }

        let mut slots: HashMap<[i32; 3], usize> = HashMap::new();
        for (i, face) in members {
            let slot = *slots.entry(face.orientation_key()).or_insert_with(|| {
                surfaces.push(SurfaceGroup {
                    class,
                    faces: Vec::new(),
                });
                surfaces.len() - 1
            });
            surfaces[slot].faces.push(i);
        }
    }

    surfaces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obj::Mesh;

    fn face(text: &str) -> Face {
        let (mesh, _) = Mesh::parse_str(text).unwrap();
        mesh.groups[0].faces[0].clone()
    }

    /// Unit cube, outward-wound quads.
    const BOX: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
v 0 0 1
v 1 0 1
v 1 1 1
v 0 1 1
o box
f 1 4 3 2
f 5 6 7 8
f 1 2 6 5
f 2 3 7 6
f 3 4 8 7
f 4 1 5 8
";

    #[test]
    fn material_hint_overrides_geometry() {
        let f = face("v 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl Wall_Brick\nf 1 2 3\n");
        let vertices = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        assert_eq!(SurfaceClass::from_normal(face_normal(&f, &vertices).unwrap()), SurfaceClass::Roof);
        assert_eq!(classify(&f, &vertices, f.material()), SurfaceClass::Wall);
        assert_eq!(classify(&f, &vertices, None), SurfaceClass::Roof);
        assert_eq!(ClassifiedFace::new(&f, &vertices, true).class, SurfaceClass::Wall);
        assert_eq!(ClassifiedFace::new(&f, &vertices, false).class, SurfaceClass::Roof);
    }

    #[test]
    fn material_keywords_are_case_sensitive() {
        assert_eq!(SurfaceClass::from_material("Ground_Slab"), Some(SurfaceClass::Ground));
        assert_eq!(SurfaceClass::from_material("RoofTiles"), Some(SurfaceClass::Roof));
        assert_eq!(SurfaceClass::from_material("roof"), None);
        assert_eq!(SurfaceClass::from_material("Glass"), None);
    }

    #[test]
    fn closed_box_has_one_roof_one_ground_four_walls() {
        let (mesh, _) = Mesh::parse_str(BOX).unwrap();
        let faces: Vec<ClassifiedFace> = mesh
            .faces()
            .map(|f| ClassifiedFace::new(f, &mesh.vertices, true))
            .collect();

        let count = |c| faces.iter().filter(|f| f.class == c).count();
        assert_eq!(count(SurfaceClass::Roof), 1);
        assert_eq!(count(SurfaceClass::Ground), 1);
        assert_eq!(count(SurfaceClass::Wall), 4);
        assert_eq!(faces[0].class, SurfaceClass::Ground);
        assert_eq!(faces[1].class, SurfaceClass::Roof);
    }

    #[test]
    fn too_few_vertices_default_to_wall() {
        let f = Face::new(vec![
            crate::obj::Corner { v: 1, vn: None },
            crate::obj::Corner { v: 2, vn: None },
            crate::obj::Corner { v: 9, vn: None },
        ]);
        let vertices = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        assert_eq!(face_normal(&f, &vertices), None);
        assert_eq!(classify(&f, &vertices, None), SurfaceClass::Wall);
    }

    #[test]
    fn degenerate_triangle_is_a_wall() {
        let vertices = [[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]];
        let f = face("v 0 0 0\nv 1 1 1\nv 2 2 2\nf 1 2 3\n");
        assert_eq!(face_normal(&f, &vertices), Some([0.0, 0.0, 0.0]));
        assert_eq!(classify(&f, &vertices, None), SurfaceClass::Wall);
    }

    #[test]
    fn grouping_by_class_and_orientation() {
        let (mesh, _) = Mesh::parse_str(BOX).unwrap();
        let faces: Vec<ClassifiedFace> = mesh
            .faces()
            .map(|f| ClassifiedFace::new(f, &mesh.vertices, false))
            .collect();

        let plain = group_surfaces(&faces, false);
        let classes: Vec<SurfaceClass> = plain.iter().map(|s| s.class).collect();
        assert_eq!(classes, vec![SurfaceClass::Wall, SurfaceClass::Roof, SurfaceClass::Ground]);
        assert_eq!(plain[0].faces, vec![2, 3, 4, 5]);

        let oriented = group_surfaces(&faces, true);
        assert_eq!(oriented.len(), 6);
        assert!(oriented[..4].iter().all(|s| s.class == SurfaceClass::Wall && s.faces.len() == 1));
        assert_eq!(oriented[4].faces, vec![1]);
        assert_eq!(oriented[5].faces, vec![0]);
    }

    #[test]
    fn coplanar_faces_share_an_orientation_bucket() {
        // Two triangles of one roof slope plus a slightly tilted neighbour.
        let text = "\
v 0 0 0
v 1 0 0
v 1 1 0.01
v 0 1 0.01
v 2 0 0
v 2 1 0.6
o roof
f 1 2 3
f 1 3 4
f 2 5 6
";
        let (mesh, _) = Mesh::parse_str(text).unwrap();
        let faces: Vec<ClassifiedFace> = mesh
            .faces()
            .map(|f| ClassifiedFace::new(f, &mesh.vertices, false))
            .collect();
        assert!(faces.iter().all(|f| f.class == SurfaceClass::Roof));

        let groups = group_surfaces(&faces, true);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].faces, vec![0, 1]);
        assert_eq!(groups[1].faces, vec![2]);
    }

    #[test]
    fn winding_normalization_flips_downward_faces_only() {
        let (mesh, _) = Mesh::parse_str(BOX).unwrap();
        let mut ground = ClassifiedFace::new(&mesh.groups[0].faces[0], &mesh.vertices, false);
        let before = ground.positions.clone();

        assert!(ground.normalize_winding());
        assert_eq!(ground.class, SurfaceClass::Ground);
        assert_eq!(ground.normal, [0.0, 0.0, 1.0]);
        let mut reversed = before;
        reversed.reverse();
        assert_eq!(ground.positions, reversed);

        let mut roof = ClassifiedFace::new(&mesh.groups[0].faces[1], &mesh.vertices, false);
        assert!(!roof.normalize_winding());
    }

    #[test]
    fn orientation_key_rounds_to_tenths() {
        assert_eq!(orientation_key([0.04, -0.04, 0.96]), [0, 0, 10]);
        assert_eq!(orientation_key([0.707, -0.707, 0.0]), [7, -7, 0]);
        assert_eq!(orientation_key([-0.0, 0.0, -1.0]), [0, 0, -10]);
    }

    #[test]
    fn surface_names() {
        assert_eq!(SurfaceClass::Roof.surface_name(2, 3), "Roof 2");
        assert_eq!(SurfaceClass::Wall.surface_name(1, 4), "Outer Wall 1");
        assert_eq!(SurfaceClass::Ground.surface_name(1, 1), "Base Surface");
        assert_eq!(SurfaceClass::Ground.surface_name(2, 2), "Base Surface 2");
    }
}
