//! Uniform grid over the footprint extent.
//!
//! Tiles are square cells of edge `tile_size` laid out column-major from the root
//! extent's minimum corner; the last column and row are clipped to the root. A
//! footprint is registered in every tile whose closed extent contains one of its
//! bounding-box corners, so a footprint straddling a tile edge is listed in each
//! tile it touches. Built once, then only read (`TileIndex` is `Sync`).

use log::debug;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::footprint::{FootprintId, FootprintSet};
use crate::geom::{Extent, Point2};

/// Upper bound on grid cells; beyond this the tile size is surely a unit mistake.
pub const MAX_TILES: usize = 1 << 24;

#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub extent: Extent,
    /// Registered footprints, ascending and unique.
    pub ids: SmallVec<[FootprintId; 4]>,
}

#[derive(Debug, Clone)]
pub struct TileIndex {
    root: Extent,
    tile_size: f64,
    cols: usize,
    rows: usize,
    tiles: Vec<Tile>,
}

impl TileIndex {
    /// Grid over `root` with cells of `tile_size`, populated from `footprints`.
    pub fn build(root: Extent, tile_size: f64, footprints: &FootprintSet) -> Result<Self> {
        let mut index = Self::empty_grid(root, tile_size)?;

        for footprint in footprints.iter() {
            if footprint.is_placeholder() {
                continue;
            }

            for part in footprint.part_extents() {
                for corner in part.corners() {
                    for tile_idx in index.tile_indices_at(corner) {
                        let ids = &mut index.tiles[tile_idx].ids;
                        if ids.last() != Some(&footprint.id) {
                            ids.push(footprint.id);
                        }
                    }
                }
            }
        }

        debug!(
            "Tiled {:.1} x {:.1} extent into {} x {} cells of {:.1}; {} registrations",
            root.width(),
            root.height(),
            index.cols,
            index.rows,
            tile_size,
            index.tiles.iter().map(|t| t.ids.len()).sum::<usize>()
        );

        Ok(index)
    }

    fn empty_grid(root: Extent, tile_size: f64) -> Result<Self> {
        if !(tile_size.is_finite() && tile_size > 0.0) {
            return Err(Error::InvalidTileSize(tile_size));
        }
        if root.is_empty() {
            return Err(Error::EmptyExtent);
        }

        let cols = ((root.width() / tile_size).ceil() as usize).max(1);
        let rows = ((root.height() / tile_size).ceil() as usize).max(1);
        if cols.saturating_mul(rows) > MAX_TILES {
            return Err(Error::TooManyTiles { cols, rows });
        }

        let mut tiles = Vec::with_capacity(cols * rows);
        for col in 0..cols {
            let min_x = root.min_x + col as f64 * tile_size;
            let max_x = if col + 1 == cols {
                root.max_x
            } else {
                (min_x + tile_size).min(root.max_x)
            };

            for row in 0..rows {
                let min_y = root.min_y + row as f64 * tile_size;
                let max_y = if row + 1 == rows {
                    root.max_y
                } else {
                    (min_y + tile_size).min(root.max_y)
                };

                tiles.push(Tile {
                    extent: Extent::new(min_x, min_y, max_x, max_y),
                    ids: SmallVec::new(),
                });
            }
        }

        Ok(Self {
            root,
            tile_size,
            cols,
            rows,
            tiles,
        })
    }

    /// Indices of every tile whose closed extent contains `p`, ascending.
    fn tile_indices_at(&self, p: Point2) -> SmallVec<[usize; 4]> {
        let mut hits = SmallVec::new();
        if !p.is_finite() || !self.root.contains(p) {
            return hits;
        }

        // Neighbouring cells are checked too: a point on a shared edge belongs to both.
        let col_range = cell_range((p.x - self.root.min_x) / self.tile_size, self.cols);
        let row_range = cell_range((p.y - self.root.min_y) / self.tile_size, self.rows);

        for col in col_range {
            for row in row_range.clone() {
                let idx = col * self.rows + row;
                if self.tiles[idx].extent.contains(p) {
                    hits.push(idx);
                }
            }
        }

        hits
    }

    /// Tiles containing `p` (boundary inclusive), in grid order.
    pub fn tiles_at(&self, p: Point2) -> impl Iterator<Item = &Tile> + '_ {
        self.tile_indices_at(p).into_iter().map(move |i| &self.tiles[i])
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Tile at grid position (`col`, `row`).
    pub fn tile(&self, col: usize, row: usize) -> Option<&Tile> {
        (col < self.cols && row < self.rows).then(|| &self.tiles[col * self.rows + row])
    }

    pub fn root(&self) -> Extent {
        self.root
    }

    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

fn cell_range(offset: f64, cells: usize) -> std::ops::RangeInclusive<usize> {
    let cell = offset.floor() as isize;
    let last = cells as isize - 1;
    let lo = (cell - 1).clamp(0, last) as usize;
    let hi = (cell + 1).clamp(0, last) as usize;
    lo..=hi
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footprint::{Footprint, Ring};

    fn square(id: u32, x: f64, y: f64, size: f64) -> Footprint {
        Footprint::new(
            id,
            Ring::from_xy(&[(x, y), (x + size, y), (x + size, y + size), (x, y + size)]),
        )
    }

    #[test]
    fn rejects_degenerate_configuration() {
        let set = FootprintSet::default();
        let root = Extent::new(0.0, 0.0, 10.0, 10.0);
        assert!(matches!(
            TileIndex::build(root, 0.0, &set),
            Err(Error::InvalidTileSize(_))
        ));
        assert!(matches!(
            TileIndex::build(root, -5.0, &set),
            Err(Error::InvalidTileSize(_))
        ));
        assert!(matches!(
            TileIndex::build(root, f64::NAN, &set),
            Err(Error::InvalidTileSize(_))
        ));
        assert!(matches!(
            TileIndex::build(Extent::empty(), 1.0, &set),
            Err(Error::EmptyExtent)
        ));
        assert!(matches!(
            TileIndex::build(root, 1e-6, &set),
            Err(Error::TooManyTiles { .. })
        ));
    }

    #[test]
    fn tiles_cover_root_without_gaps() {
        for (root, size) in [
            (Extent::new(0.0, 0.0, 10.0, 10.0), 3.0),
            (Extent::new(-7.5, 2.25, 13.1, 40.0), 5.0),
            (Extent::new(100.0, 100.0, 100.5, 101.0), 500.0),
            (Extent::new(0.0, 0.0, 9.0, 6.0), 3.0),
        ] {
            let index = TileIndex::build(root, size, &FootprintSet::default()).unwrap();
            assert_eq!(index.tiles().len(), index.cols() * index.rows());

            let area: f64 = index
                .tiles()
                .iter()
                .map(|t| t.extent.width() * t.extent.height())
                .sum();
            approx::assert_relative_eq!(area, root.width() * root.height(), max_relative = 1e-9);

            // Neighbours share edges exactly and the outer edges are the root's.
            for col in 0..index.cols() {
                for row in 0..index.rows() {
                    let t = index.tile(col, row).unwrap().extent;
                    assert!(t.width() > 0.0 && t.height() > 0.0);
                    if col == 0 {
                        assert_eq!(t.min_x, root.min_x);
                    } else {
                        assert_eq!(t.min_x, index.tile(col - 1, row).unwrap().extent.max_x);
                    }
                    if row == 0 {
                        assert_eq!(t.min_y, root.min_y);
                    } else {
                        assert_eq!(t.min_y, index.tile(col, row - 1).unwrap().extent.max_y);
                    }
                    if col + 1 == index.cols() {
                        assert_eq!(t.max_x, root.max_x);
                    }
                    if row + 1 == index.rows() {
                        assert_eq!(t.max_y, root.max_y);
                    }
                }
            }
        }
    }

    #[test]
    fn footprint_inside_one_tile_is_registered_once() {
        let set = FootprintSet::new(vec![square(0, 1.0, 1.0, 2.0), square(1, 12.0, 3.0, 1.0)]);
        let index = TileIndex::build(Extent::new(0.0, 0.0, 20.0, 20.0), 10.0, &set).unwrap();

        let holders: Vec<(usize, usize)> = (0..2)
            .flat_map(|c| (0..2).map(move |r| (c, r)))
            .filter(|&(c, r)| index.tile(c, r).unwrap().ids.contains(&FootprintId(0)))
            .collect();
        assert_eq!(holders, vec![(0, 0)]);
        assert_eq!(index.tile(1, 0).unwrap().ids.as_slice(), &[FootprintId(1)]);
    }

    #[test]
    fn straddling_footprint_is_registered_in_every_touched_tile() {
        let set = FootprintSet::new(vec![square(0, 8.0, 8.0, 4.0)]);
        let index = TileIndex::build(Extent::new(0.0, 0.0, 20.0, 20.0), 10.0, &set).unwrap();

        let count = index
            .tiles()
            .iter()
            .filter(|t| t.ids.contains(&FootprintId(0)))
            .count();
        assert_eq!(count, 4);
    }

    #[test]
    fn ids_are_ascending_and_unique_per_tile() {
        let set = FootprintSet::new(vec![
            square(0, 1.0, 1.0, 1.0),
            Footprint::placeholder(1, None),
            square(2, 0.5, 0.5, 2.0).with_island(Ring::from_xy(&[(3.0, 3.0), (4.0, 3.0), (4.0, 4.0)]), None),
            square(3, 2.0, 2.0, 1.0),
        ]);
        let index = TileIndex::build(set.extent(), 100.0, &set).unwrap();
        assert_eq!(index.tiles().len(), 1);
        assert_eq!(
            index.tiles()[0].ids.as_slice(),
            &[FootprintId(0), FootprintId(2), FootprintId(3)]
        );
    }

    #[test]
    fn point_on_shared_edge_hits_both_tiles() {
        let index =
            TileIndex::build(Extent::new(0.0, 0.0, 20.0, 10.0), 10.0, &FootprintSet::default())
                .unwrap();
        assert_eq!(index.tiles_at(Point2::new(10.0, 5.0)).count(), 2);
        assert_eq!(index.tiles_at(Point2::new(5.0, 5.0)).count(), 1);
        assert_eq!(index.tiles_at(Point2::new(25.0, 5.0)).count(), 0);
    }
}
