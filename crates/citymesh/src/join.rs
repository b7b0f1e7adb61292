//! Spatial join: which footprint claims each mesh group.
//!
//! For every group a centroid and a set of sample points are derived (by default one
//! sample per face, the XY of its first vertex). The centroid is tested against the
//! candidates of every tile that contains it, in ascending footprint id order; if
//! no footprint contains it the per-face samples are tried against the same
//! candidates. The first hit wins. Groups are independent, so [`match_all`] runs
//! them on the rayon pool against the shared, read-only index.

use hashbrown::HashSet;
use log::{debug, info};
use nohash_hasher::BuildNoHashHasher;
use rayon::prelude::*;

use crate::footprint::{FootprintId, FootprintSet, HolePolicy};
use crate::geom::Point2;
use crate::obj::{vertex_at, MeshGroup};
use crate::tiler::TileIndex;

/// Outcome of matching one mesh group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchResult {
    Matched(FootprintId),
    Unmatched,
}

impl MatchResult {
    #[inline]
    pub fn footprint(self) -> Option<FootprintId> {
        match self {
            MatchResult::Matched(id) => Some(id),
            MatchResult::Unmatched => None,
        }
    }

    #[inline]
    pub fn is_matched(self) -> bool {
        matches!(self, MatchResult::Matched(_))
    }
}

/// How the representative points of a group are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CentroidStrategy {
    /// One sample per face: its first vertex. O(faces).
    #[default]
    FirstVertex,
    /// Every distinct vertex referenced by the group.
    AllVertices,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinOptions {
    pub centroid: CentroidStrategy,
    pub holes: HolePolicy,
}

/// Representative points of one group (local frame).
#[derive(Debug, Clone, PartialEq)]
pub struct Representative {
    pub centroid: Point2,
    /// Mean height of the sampled vertices.
    pub elevation: f64,
    pub samples: Vec<Point2>,
}

impl Representative {
    pub fn centroid_xyz(&self) -> [f64; 3] {
        [self.centroid.x, self.centroid.y, self.elevation]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupMatch {
    pub result: MatchResult,
    /// `None` when the group references no usable vertex.
    pub centroid: Option<[f64; 3]>,
}

/// Sample points and centroid for `group`. `None` if no face yields a vertex.
pub fn representative(
    group: &MeshGroup,
    vertices: &[[f64; 3]],
    strategy: CentroidStrategy,
) -> Option<Representative> {
    let sampled: Vec<[f64; 3]> = match strategy {
        CentroidStrategy::FirstVertex => group
            .faces
            .iter()
            .filter_map(|face| face.corners.first())
            .filter_map(|corner| vertex_at(vertices, corner.v))
            .collect(),
        CentroidStrategy::AllVertices => {
            let mut seen: HashSet<u32, BuildNoHashHasher<u32>> = HashSet::default();
            group
                .faces
                .iter()
                .flat_map(|face| face.corners.iter())
                .filter(|corner| seen.insert(corner.v))
                .filter_map(|corner| vertex_at(vertices, corner.v))
                .collect()
        }
    };

    if sampled.is_empty() {
        return None;
    }

    let inv_n = 1.0 / sampled.len() as f64;
    let (sx, sy, sz) = sampled
        .iter()
        .fold((0.0, 0.0, 0.0), |(ax, ay, az), v| (ax + v[0], ay + v[1], az + v[2]));

    Some(Representative {
        centroid: Point2::new(sx * inv_n, sy * inv_n),
        elevation: sz * inv_n,
        samples: sampled.iter().map(|v| Point2::new(v[0], v[1])).collect(),
    })
}

/// First footprint (by tile, then ascending id) containing the centroid, else the
/// first containing any sample point.
pub fn find_footprint(
    rep: &Representative,
    tiles: &TileIndex,
    footprints: &FootprintSet,
    holes: HolePolicy,
) -> MatchResult {
    for tile in tiles.tiles_at(rep.centroid) {
        let candidates = || tile.ids.iter().filter_map(|&id| footprints.get(id));

        if let Some(fp) = candidates().find(|fp| fp.contains(rep.centroid, holes)) {
            return MatchResult::Matched(fp.id);
        }

        for fp in candidates() {
            if rep.samples.iter().any(|&p| fp.contains(p, holes)) {
                return MatchResult::Matched(fp.id);
            }
        }
    }

    MatchResult::Unmatched
}

pub fn match_group(
    group: &MeshGroup,
    vertices: &[[f64; 3]],
    tiles: &TileIndex,
    footprints: &FootprintSet,
    options: JoinOptions,
) -> GroupMatch {
    let Some(rep) = representative(group, vertices, options.centroid) else {
        return GroupMatch {
            result: MatchResult::Unmatched,
            centroid: None,
        };
    };

    GroupMatch {
        result: find_footprint(&rep, tiles, footprints, options.holes),
        centroid: Some(rep.centroid_xyz()),
    }
}

/// Match every group in parallel; the result is indexed like `groups`.
pub fn match_all(
    groups: &[MeshGroup],
    vertices: &[[f64; 3]],
    tiles: &TileIndex,
    footprints: &FootprintSet,
    options: JoinOptions,
) -> Vec<GroupMatch> {
    let matches: Vec<GroupMatch> = groups
        .par_iter()
        .map(|group| match_group(group, vertices, tiles, footprints, options))
        .collect();

    let matched = matches.iter().filter(|m| m.result.is_matched()).count();
    info!(
        "Matched {} of {} mesh groups ({} unmatched)",
        matched,
        groups.len(),
        groups.len() - matched
    );

    for (index, m) in matches.iter().enumerate() {
        if !m.result.is_matched() {
            debug!(
                "Group {} ({}) unmatched, centroid {:?}",
                index,
                groups[index].name.as_deref().unwrap_or("-"),
                m.centroid
            );
        }
    }

    matches
}
