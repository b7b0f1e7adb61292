//! Building footprints from a GeoJSON FeatureCollection.
//!
//! Each feature becomes one [`Footprint`] whose id is the feature's position in the
//! collection. `Polygon` geometry yields an outer ring plus (first) hole;
//! `MultiPolygon` uses its first polygon the same way and turns every further
//! polygon into an island. Features without usable geometry are kept as empty
//! placeholders so ids stay aligned with feature order; they never match.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::geom::{Extent, Point2};

/// Tolerance used by the ray-casting test.
pub const CONTAINMENT_EPS: f64 = 1e-9;

/// Position of the footprint's feature in the source collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FootprintId(pub u32);

impl fmt::Display for FootprintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference offset subtracted from world coordinates to get the local frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Origin {
    pub x: f64,
    pub y: f64,
}

impl Origin {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn to_local(self, x: f64, y: f64) -> Point2 {
        Point2::new(x - self.x, y - self.y)
    }

    #[inline]
    pub fn to_world(self, p: Point2) -> Point2 {
        Point2::new(p.x + self.x, p.y + self.y)
    }
}

/// What a hole ring does to containment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HolePolicy {
    /// Holes are carried but not tested; a point inside a hole still matches.
    #[default]
    Ignore,
    /// A point inside the hole of the part that contains it does not match.
    Subtract,
}

/// Implicitly closed ring of planar points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ring(pub Vec<Point2>);

impl Ring {
    pub fn new(points: Vec<Point2>) -> Self {
        Self(points)
    }

    pub fn from_xy(points: &[(f64, f64)]) -> Self {
        Self(points.iter().map(|&(x, y)| Point2::new(x, y)).collect())
    }

    pub fn points(&self) -> &[Point2] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extent(&self) -> Extent {
        Extent::from_points(&self.0)
    }

    /// Even-odd ray cast towards +x. Rings with fewer than 3 points contain nothing.
    pub fn contains(&self, p: Point2) -> bool {
        let ring = &self.0;
        let n = ring.len();
        if n < 3 {
            return false;
        }

        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (xi, yi) = (ring[i].x, ring[i].y);
            let (xj, yj) = (ring[j].x, ring[j].y);

            if (yi > p.y + CONTAINMENT_EPS) != (yj > p.y + CONTAINMENT_EPS) {
                let x_inter = (xj - xi) * (p.y - yi) / (yj - yi + CONTAINMENT_EPS) + xi;
                if p.x < x_inter + CONTAINMENT_EPS {
                    inside = !inside;
                }
            }

            j = i;
        }

        inside
    }
}

/// A disjoint sub-polygon of a footprint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Island {
    pub outer: Ring,
    pub hole: Option<Ring>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    pub id: FootprintId,
    /// Value of the identifying property, when present.
    pub key: Option<String>,
    pub outer: Ring,
    pub hole: Option<Ring>,
    pub islands: Vec<Island>,
}

impl Footprint {
    pub fn new(id: u32, outer: Ring) -> Self {
        Self {
            id: FootprintId(id),
            key: None,
            outer,
            hole: None,
            islands: Vec::new(),
        }
    }

    /// Placeholder for a feature without usable geometry.
    pub fn placeholder(id: u32, key: Option<String>) -> Self {
        Self {
            key,
            ..Self::new(id, Ring::default())
        }
    }

    pub fn with_hole(mut self, hole: Ring) -> Self {
        self.hole = Some(hole);
        self
    }

    pub fn with_island(mut self, outer: Ring, hole: Option<Ring>) -> Self {
        self.islands.push(Island { outer, hole });
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.outer.is_empty()
    }

    /// Bounding boxes of the outer ring and of every island's outer ring.
    pub fn part_extents(&self) -> impl Iterator<Item = Extent> + '_ {
        std::iter::once(&self.outer)
            .chain(self.islands.iter().map(|island| &island.outer))
            .filter(|ring| !ring.is_empty())
            .map(Ring::extent)
    }

    /// Union of all part extents.
    pub fn extent(&self) -> Extent {
        let mut extent = Extent::empty();
        for part in self.part_extents() {
            extent.union(&part);
        }
        extent
    }

    /// Outer ring first, then each island in order; the first part that contains
    /// the point decides.
    pub fn contains(&self, p: Point2, holes: HolePolicy) -> bool {
        if self.is_placeholder() {
            return false;
        }

        if part_contains(&self.outer, self.hole.as_ref(), p, holes) {
            return true;
        }

        self.islands
            .iter()
            .any(|island| part_contains(&island.outer, island.hole.as_ref(), p, holes))
    }
}

fn part_contains(outer: &Ring, hole: Option<&Ring>, p: Point2, holes: HolePolicy) -> bool {
    if !outer.contains(p) {
        return false;
    }

    match (holes, hole) {
        (HolePolicy::Subtract, Some(hole)) => !hole.contains(p),
        _ => true,
    }
}

/// All footprints of one collection plus their combined extent (local frame).
#[derive(Debug, Clone, Default)]
pub struct FootprintSet {
    footprints: Vec<Footprint>,
    extent: Extent,
}

impl FootprintSet {
    /// Footprints must be ordered by id, with ids equal to their positions.
    pub fn new(footprints: Vec<Footprint>) -> Self {
        debug_assert!(footprints
            .iter()
            .enumerate()
            .all(|(i, f)| f.id.0 as usize == i));

        let mut extent = Extent::empty();
        for footprint in &footprints {
            extent.union(&footprint.extent());
        }

        Self { footprints, extent }
    }

    pub fn from_path<P: AsRef<Path>>(path: P, origin: Origin, id_property: &str) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        let set = Self::from_reader(BufReader::new(file), origin, id_property)?;
        info!(
            "Loaded {} footprints from {} ({} without geometry)",
            set.len(),
            path.display(),
            set.iter().filter(|f| f.is_placeholder()).count()
        );
        Ok(set)
    }

    pub fn from_reader<R: Read>(reader: R, origin: Origin, id_property: &str) -> Result<Self> {
        let root: FeatureCollection = serde_json::from_reader(reader)?;
        Ok(Self::from_collection(root, origin, id_property))
    }

    pub fn from_geojson_str(text: &str, origin: Origin, id_property: &str) -> Result<Self> {
        let root: FeatureCollection = serde_json::from_str(text)?;
        Ok(Self::from_collection(root, origin, id_property))
    }

    fn from_collection(root: FeatureCollection, origin: Origin, id_property: &str) -> Self {
        debug!("Using coordinate offsets: cx={:.5}, cy={:.5}", origin.x, origin.y);

        let footprints = root
            .features
            .into_iter()
            .enumerate()
            .map(|(index, feature)| feature.into_footprint(index as u32, origin, id_property))
            .collect();

        Self::new(footprints)
    }

    pub fn get(&self, id: FootprintId) -> Option<&Footprint> {
        self.footprints.get(id.0 as usize)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Footprint> {
        self.footprints.iter()
    }

    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }

    /// Extent over every ring point of every footprint.
    pub fn extent(&self) -> Extent {
        self.extent
    }
}

// -------- GeoJSON --------

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    geometry: Value,
    #[serde(default)]
    properties: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
}

impl Feature {
    fn into_footprint(self, index: u32, origin: Origin, id_property: &str) -> Footprint {
        let key = match self.properties.get(id_property) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        if self.geometry.is_null() {
            debug!("Feature {index}: no geometry");
            return Footprint::placeholder(index, key);
        }

        let polygons = match serde_json::from_value::<Geometry>(self.geometry) {
            Ok(Geometry::Polygon { coordinates }) => vec![coordinates],
            Ok(Geometry::MultiPolygon { coordinates }) => coordinates,
            Err(err) => {
                warn!("Feature {index}: unusable geometry ({err}); kept as empty footprint");
                return Footprint::placeholder(index, key);
            }
        };

        // Ring 0 is the outer ring and ring 1 the hole, whatever their validity.
        let mut parts = polygons.into_iter().map(|rings| {
            let mut rings = rings.into_iter().map(|ring| to_local_ring(ring, origin));
            let outer = rings.next().filter(is_usable).unwrap_or_default();
            let hole = rings.next().filter(is_usable);
            Island { outer, hole }
        });

        let main = match parts.next() {
            Some(main) if !main.outer.is_empty() => main,
            _ => {
                debug!("Feature {index}: outer ring has fewer than 3 positions");
                return Footprint::placeholder(index, key);
            }
        };

        let islands: Vec<Island> = parts
            .filter(|island| {
                let usable = !island.outer.is_empty();
                if !usable {
                    debug!("Feature {index}: dropping part with a degenerate outer ring");
                }
                usable
            })
            .collect();

        Footprint {
            id: FootprintId(index),
            key,
            outer: main.outer,
            hole: main.hole,
            islands,
        }
    }
}

fn is_usable(ring: &Ring) -> bool {
    ring.points().len() >= 3
}

fn to_local_ring(positions: Vec<Vec<f64>>, origin: Origin) -> Ring {
    Ring(
        positions
            .into_iter()
            .filter(|pos| pos.len() >= 2)
            .map(|pos| origin.to_local(pos[0], pos[1]))
            .filter(|p| p.is_finite())
            .collect(),
    )
}
