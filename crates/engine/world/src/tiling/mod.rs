//! Tiling Grid
//!
//! Every tiled surface in the map is a [`TileDef`]: one face of a 128-unit
//! voxel, split into a 4x4 grid of 32-unit sub-tiles. The set of tiledefs is
//! read from the source brushwork once; afterwards only sub-tile contents
//! change, until [`TileGrid::generate_brushes`] turns them back into
//! geometry.
//!
//! Sub-tiles live in one flat arena, 16 entries per tiledef, addressed
//! through a packed `(cell, orientation)` key.

mod analyse;
mod generate;
mod optimise;

pub use generate::{TilingConfig, NODRAW};
pub use optimise::{merge_rects, Rect};

use crate::error::{SimpleTile, ViewerPos};
use glam::{DVec3, IVec3};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Edge length of a voxel
pub const VOXEL: f64 = 128.0;
/// Edge length of a sub-tile
pub const SUBTILE: f64 = 32.0;

/// Physical type of one sub-tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TileType {
    White,
    White4x4,
    Black,
    Black4x4,
    /// Black sides of goo pits
    GooSide,
    /// Covered by something, rendered as nodraw
    Nodraw,
    /// Open air; nothing is generated
    Void,
    /// Recessed, missing since the chamber was built
    CutoutBroken,
    /// Recessed, not installed yet
    CutoutPartial,
}

impl TileType {
    /// Regular white or black tile
    pub fn is_tile(self) -> bool {
        matches!(
            self,
            TileType::White | TileType::White4x4 | TileType::Black | TileType::Black4x4 | TileType::GooSide
        )
    }

    pub fn is_white(self) -> bool {
        matches!(self, TileType::White | TileType::White4x4)
    }

    pub fn is_black(self) -> bool {
        matches!(self, TileType::Black | TileType::Black4x4 | TileType::GooSide)
    }

    pub fn is_4x4(self) -> bool {
        matches!(self, TileType::White4x4 | TileType::Black4x4)
    }

    pub fn is_recess(self) -> bool {
        matches!(self, TileType::CutoutBroken | TileType::CutoutPartial)
    }

    /// Swap the colour, keeping the size
    pub fn inverted(self) -> TileType {
        match self {
            TileType::White => TileType::Black,
            TileType::White4x4 => TileType::Black4x4,
            TileType::Black => TileType::White,
            TileType::Black4x4 => TileType::White4x4,
            TileType::GooSide => TileType::White4x4,
            other => other,
        }
    }

    /// Parse the names rules use (`white`, `black_4x4`, `goo_side`...)
    pub fn parse(text: &str) -> Option<TileType> {
        let ty = match text.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "white" => TileType::White,
            "white_4x4" | "white4x4" => TileType::White4x4,
            "black" => TileType::Black,
            "black_4x4" | "black4x4" => TileType::Black4x4,
            "goo_side" | "goo" => TileType::GooSide,
            "nodraw" => TileType::Nodraw,
            "void" => TileType::Void,
            "cutout_broken" | "cutout_tile_broken" => TileType::CutoutBroken,
            "cutout_partial" | "cutout_tile_partial" => TileType::CutoutPartial,
            _ => return None,
        };
        Some(ty)
    }

    /// Kind name used by the diagnostic viewer
    fn viewer_kind(self) -> Option<&'static str> {
        if self.is_white() {
            Some("white")
        } else if self.is_black() {
            Some("black")
        } else {
            None
        }
    }
}

/// Contents of a sub-tile: its type plus a material variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileState {
    pub ty: TileType,
    /// Index into the material palette of the tile's colour
    pub variant: u8,
}

impl TileState {
    pub fn new(ty: TileType) -> Self {
        TileState { ty, variant: 0 }
    }

    pub fn with_variant(ty: TileType, variant: u8) -> Self {
        TileState { ty, variant }
    }
}

/// One of the six axis-aligned face directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Orient {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

impl Orient {
    pub const ALL: [Orient; 6] = [
        Orient::PosX,
        Orient::NegX,
        Orient::PosY,
        Orient::NegY,
        Orient::PosZ,
        Orient::NegZ,
    ];

    /// Match a unit normal to a face direction
    pub fn from_normal(normal: DVec3) -> Option<Orient> {
        let n = normal.round();
        if (normal - n).length_squared() > 1e-6 || n.abs().element_sum() != 1.0 {
            return None;
        }
        Some(match (n.x as i32, n.y as i32, n.z as i32) {
            (1, _, _) => Orient::PosX,
            (-1, _, _) => Orient::NegX,
            (_, 1, _) => Orient::PosY,
            (_, -1, _) => Orient::NegY,
            (_, _, 1) => Orient::PosZ,
            _ => Orient::NegZ,
        })
    }

    pub fn normal(self) -> DVec3 {
        match self {
            Orient::PosX => DVec3::X,
            Orient::NegX => DVec3::NEG_X,
            Orient::PosY => DVec3::Y,
            Orient::NegY => DVec3::NEG_Y,
            Orient::PosZ => DVec3::Z,
            Orient::NegZ => DVec3::NEG_Z,
        }
    }

    pub fn ivec(self) -> IVec3 {
        self.normal().as_ivec3()
    }

    /// Axis index of the normal (0 = x, 1 = y, 2 = z)
    pub fn axis(self) -> usize {
        match self {
            Orient::PosX | Orient::NegX => 0,
            Orient::PosY | Orient::NegY => 1,
            Orient::PosZ | Orient::NegZ => 2,
        }
    }

    /// Axes spanning the face, as `(u, v)` indices
    pub fn uv_axes(self) -> (usize, usize) {
        match self.axis() {
            0 => (1, 2),
            1 => (0, 2),
            _ => (0, 1),
        }
    }

    pub fn is_positive(self) -> bool {
        matches!(self, Orient::PosX | Orient::PosY | Orient::PosZ)
    }

    fn index(self) -> u64 {
        self as u64
    }

    /// Letter used by the diagnostic viewer
    fn viewer_char(self) -> char {
        match self {
            Orient::PosX => 'e',
            Orient::NegX => 'w',
            Orient::PosY => 'n',
            Orient::NegY => 's',
            Orient::PosZ => 'u',
            Orient::NegZ => 'd',
        }
    }
}

/// Address of a single sub-tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileAddr {
    /// Voxel index; the voxel spans `cell * 128 .. cell * 128 + 128`
    pub cell: IVec3,
    pub orient: Orient,
    pub u: u8,
    pub v: u8,
}

/// Voxel index containing a world position
pub fn world_to_cell(pos: DVec3) -> IVec3 {
    (pos / VOXEL).floor().as_ivec3()
}

/// Center of a voxel
pub fn cell_center(cell: IVec3) -> DVec3 {
    cell.as_dvec3() * VOXEL + DVec3::splat(VOXEL / 2.0)
}

const COORD_BITS: u32 = 20;
const COORD_OFFSET: i32 = 1 << (COORD_BITS - 1);
const COORD_MASK: u64 = (1 << COORD_BITS) - 1;

fn pack_key(cell: IVec3, orient: Orient) -> u64 {
    let pack = |c: i32| {
        let shifted = c + COORD_OFFSET;
        assert!(
            (0..(1 << COORD_BITS)).contains(&shifted),
            "Tile cell {cell} is outside the addressable grid"
        );
        shifted as u64 & COORD_MASK
    };
    (pack(cell.x) << (2 * COORD_BITS + 3))
        | (pack(cell.y) << (COORD_BITS + 3))
        | (pack(cell.z) << 3)
        | orient.index()
}

/// A tiledef, as seen through [`TileGrid::tiledefs`]
#[derive(Debug, Clone, Copy)]
pub struct TileDef<'a> {
    pub cell: IVec3,
    pub orient: Orient,
    subtiles: &'a [TileState],
}

impl TileDef<'_> {
    pub fn get(&self, u: u8, v: u8) -> TileState {
        assert!(u < 4 && v < 4, "Sub-tile ({u}, {v}) out of range");
        self.subtiles[v as usize * 4 + u as usize]
    }

    /// Iterate `(u, v, state)` in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (u8, u8, TileState)> + '_ {
        self.subtiles
            .iter()
            .enumerate()
            .map(|(i, s)| ((i % 4) as u8, (i / 4) as u8, *s))
    }

    /// Center of the tiled surface
    pub fn surface_center(&self) -> DVec3 {
        cell_center(self.cell) + self.orient.normal() * (VOXEL / 2.0)
    }
}

/// All tiledefs in the map
#[derive(Debug, Default, Clone)]
pub struct TileGrid {
    index: HashMap<u64, usize>,
    slots: Vec<(IVec3, Orient)>,
    subtiles: Vec<TileState>,
}

impl TileGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, cell: IVec3, orient: Orient) -> Option<usize> {
        self.index.get(&pack_key(cell, orient)).copied()
    }

    pub fn contains(&self, cell: IVec3, orient: Orient) -> bool {
        self.slot(cell, orient).is_some()
    }

    /// Create a tiledef filled with `base`, or return the existing one unchanged
    ///
    /// Returns `true` if a new tiledef was created.
    pub fn ensure(&mut self, cell: IVec3, orient: Orient, base: TileState) -> bool {
        let key = pack_key(cell, orient);
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key, self.slots.len());
        self.slots.push((cell, orient));
        self.subtiles.extend([base; 16]);
        true
    }

    fn arena_index(slot: usize, u: u8, v: u8) -> usize {
        assert!(u < 4 && v < 4, "Sub-tile ({u}, {v}) out of range");
        slot * 16 + v as usize * 4 + u as usize
    }

    /// Read a sub-tile
    ///
    /// # Panics
    /// Panics if `u` or `v` is 4 or more.
    pub fn get(&self, addr: TileAddr) -> Option<TileState> {
        let slot = self.slot(addr.cell, addr.orient)?;
        Some(self.subtiles[Self::arena_index(slot, addr.u, addr.v)])
    }

    /// Overwrite a sub-tile
    ///
    /// The tiledef must already exist; writing to a missing one logs a
    /// warning and returns `false`.
    pub fn set(&mut self, addr: TileAddr, state: TileState) -> bool {
        match self.slot(addr.cell, addr.orient) {
            Some(slot) => {
                self.subtiles[Self::arena_index(slot, addr.u, addr.v)] = state;
                true
            }
            None => {
                warn!(
                    cell = %addr.cell,
                    orient = ?addr.orient,
                    "Expected tile, but none found"
                );
                false
            }
        }
    }

    /// Fill every sub-tile of a tiledef
    pub fn fill(&mut self, cell: IVec3, orient: Orient, state: TileState) -> bool {
        let Some(slot) = self.slot(cell, orient) else {
            return false;
        };
        self.subtiles[slot * 16..slot * 16 + 16].fill(state);
        true
    }

    pub fn tiledef(&self, cell: IVec3, orient: Orient) -> Option<TileDef<'_>> {
        let slot = self.slot(cell, orient)?;
        Some(TileDef {
            cell,
            orient,
            subtiles: &self.subtiles[slot * 16..slot * 16 + 16],
        })
    }

    /// Every tiledef, in creation order
    pub fn tiledefs(&self) -> impl Iterator<Item = TileDef<'_>> {
        self.slots
            .iter()
            .zip(self.subtiles.chunks_exact(16))
            .map(|(&(cell, orient), subtiles)| TileDef {
                cell,
                orient,
                subtiles,
            })
    }

    /// Address of the sub-tile whose surface center is at `origin`
    ///
    /// Returns `None` for non-axial normals or positions not centered on
    /// a sub-tile. Does not check that the tiledef exists.
    pub fn locate(origin: DVec3, normal: DVec3) -> Option<TileAddr> {
        let orient = Orient::from_normal(normal)?;
        let n_axis = orient.axis();
        let (u_axis, v_axis) = orient.uv_axes();

        let mut grid = DVec3::ZERO;
        grid[n_axis] = origin[n_axis] - VOXEL / 2.0 * normal[n_axis].round();
        grid[u_axis] = (origin[u_axis] / VOXEL).floor() * VOXEL + VOXEL / 2.0;
        grid[v_axis] = (origin[v_axis] / VOXEL).floor() * VOXEL + VOXEL / 2.0;

        let uv = origin - grid + DVec3::splat(VOXEL / 2.0 - SUBTILE / 2.0);
        let u = (uv[u_axis] / SUBTILE).rem_euclid(4.0);
        let v = (uv[v_axis] / SUBTILE).rem_euclid(4.0);
        if (u - u.round()).abs() > 1e-6 || (v - v.round()).abs() > 1e-6 {
            return None;
        }
        // The voxel center must sit on the 128 grid along the normal too
        let center_n = (grid[n_axis] - VOXEL / 2.0) / VOXEL;
        if (center_n - center_n.round()).abs() > 1e-6 {
            return None;
        }
        Some(TileAddr {
            cell: world_to_cell(grid),
            orient,
            u: u.round() as u8 % 4,
            v: v.round() as u8 % 4,
        })
    }

    /// Find the existing sub-tile whose surface center is at `origin`
    pub fn find_tile(&self, origin: DVec3, normal: DVec3) -> Option<TileAddr> {
        Self::locate(origin, normal).filter(|addr| self.contains(addr.cell, addr.orient))
    }

    /// Change one sub-tile, respecting what is already there
    ///
    /// Void is never overwritten, nodraw is not turned back into a tile and
    /// goo sides do not regress to black. `force` skips those rules and
    /// creates the tiledef (as void) if it is missing.
    pub fn edit_quarter_tile(&mut self, origin: DVec3, normal: DVec3, ty: TileType, force: bool) -> bool {
        let Some(addr) = Self::locate(origin, normal) else {
            warn!("Bad tile position {origin} with normal {normal}");
            return false;
        };
        if force {
            self.ensure(addr.cell, addr.orient, TileState::new(TileType::Void));
        }
        let Some(old) = self.get(addr) else {
            warn!("Expected tile, but none found: {origin}, {normal}");
            return false;
        };
        if !force {
            if old.ty == TileType::Void {
                return false;
            }
            if old.ty == TileType::Nodraw && ty.is_tile() {
                return false;
            }
            if old.ty == TileType::GooSide && matches!(ty, TileType::Black | TileType::Black4x4) {
                return false;
            }
        }
        self.set(addr, TileState::with_variant(ty, old.variant))
    }

    /// Simplified view of every tile for the diagnostic viewer
    pub fn snapshot(&self) -> BTreeMap<String, Vec<SimpleTile>> {
        let mut faces: BTreeMap<String, Vec<SimpleTile>> = BTreeMap::new();
        for tile in self.tiledefs() {
            // Colour of the first visible sub-tile stands for the whole tile
            let Some(kind) = tile.iter().find_map(|(_, _, s)| s.ty.viewer_kind()) else {
                continue;
            };
            let position: ViewerPos = crate::error::to_viewer_space(tile.surface_center());
            faces.entry(kind.to_string()).or_default().push(SimpleTile {
                position,
                orient: tile.orient.viewer_char(),
            });
        }
        faces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(cell: IVec3, orient: Orient, u: u8, v: u8) -> TileAddr {
        TileAddr { cell, orient, u, v }
    }

    #[test]
    fn test_set_get_round_trip() {
        let mut grid = TileGrid::new();
        assert!(grid.ensure(IVec3::ZERO, Orient::PosZ, TileState::new(TileType::White)));
        assert!(!grid.ensure(IVec3::ZERO, Orient::PosZ, TileState::new(TileType::Black)));

        let a = addr(IVec3::ZERO, Orient::PosZ, 2, 3);
        let state = TileState::with_variant(TileType::Black4x4, 2);
        assert!(grid.set(a, state));
        assert_eq!(grid.get(a), Some(state));
        assert_eq!(grid.get(addr(IVec3::ZERO, Orient::PosZ, 0, 0)), Some(TileState::new(TileType::White)));

        // Last write wins
        grid.set(a, TileState::new(TileType::Nodraw));
        assert_eq!(grid.get(a).map(|s| s.ty), Some(TileType::Nodraw));
    }

    #[test]
    fn test_missing_tiledef() {
        let mut grid = TileGrid::new();
        let a = addr(IVec3::ONE, Orient::NegX, 0, 0);
        assert_eq!(grid.get(a), None);
        assert!(!grid.set(a, TileState::new(TileType::White)));
        assert!(grid.is_empty());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_subtile_out_of_range_panics() {
        let mut grid = TileGrid::new();
        grid.ensure(IVec3::ZERO, Orient::PosZ, TileState::new(TileType::White));
        grid.get(addr(IVec3::ZERO, Orient::PosZ, 4, 0));
    }

    #[test]
    fn test_negative_cells_pack_distinctly() {
        let mut grid = TileGrid::new();
        grid.ensure(IVec3::new(-1, 0, 0), Orient::PosX, TileState::new(TileType::White));
        grid.ensure(IVec3::new(1, 0, 0), Orient::PosX, TileState::new(TileType::Black));
        grid.ensure(IVec3::new(-1, 0, 0), Orient::NegX, TileState::new(TileType::Nodraw));
        assert_eq!(grid.len(), 3);
        let t = grid.tiledef(IVec3::new(-1, 0, 0), Orient::PosX).unwrap();
        assert_eq!(t.get(0, 0).ty, TileType::White);
    }

    #[test]
    fn test_locate_floor_subtiles() {
        // Floor of the voxel above cell (0, 0, -1): surface at z = 0
        let a = TileGrid::locate(DVec3::new(16.0, 16.0, 0.0), DVec3::Z).unwrap();
        assert_eq!(a, addr(IVec3::new(0, 0, -1), Orient::PosZ, 0, 0));

        let a = TileGrid::locate(DVec3::new(112.0, 48.0, 0.0), DVec3::Z).unwrap();
        assert_eq!((a.u, a.v), (3, 1));

        let a = TileGrid::locate(DVec3::new(-16.0, 16.0, 0.0), DVec3::Z).unwrap();
        assert_eq!(a.cell, IVec3::new(-1, 0, -1));
        assert_eq!(a.u, 3);

        // Ceiling facing down, surface at z = 128 belongs to cell z = 1
        let a = TileGrid::locate(DVec3::new(16.0, 16.0, 128.0), DVec3::NEG_Z).unwrap();
        assert_eq!(a.cell, IVec3::new(0, 0, 1));

        assert!(TileGrid::locate(DVec3::new(20.0, 16.0, 0.0), DVec3::Z).is_none());
        assert!(TileGrid::locate(DVec3::new(16.0, 16.0, 0.0), DVec3::new(1.0, 1.0, 0.0)).is_none());
    }

    #[test]
    fn test_edit_quarter_tile_rules() {
        let mut grid = TileGrid::new();
        let cell = IVec3::new(0, 0, -1);
        grid.ensure(cell, Orient::PosZ, TileState::new(TileType::Black));
        let pos = |u: f64, v: f64| DVec3::new(16.0 + 32.0 * u, 16.0 + 32.0 * v, 0.0);
        let ty = |grid: &TileGrid, u, v| grid.get(addr(cell, Orient::PosZ, u, v)).map(|s| s.ty);

        assert!(grid.edit_quarter_tile(pos(0.0, 0.0), DVec3::Z, TileType::Nodraw, false));
        assert!(!grid.edit_quarter_tile(pos(0.0, 0.0), DVec3::Z, TileType::White, false));
        assert_eq!(ty(&grid, 0, 0), Some(TileType::Nodraw));

        assert!(grid.edit_quarter_tile(pos(1.0, 0.0), DVec3::Z, TileType::GooSide, false));
        assert!(!grid.edit_quarter_tile(pos(1.0, 0.0), DVec3::Z, TileType::Black4x4, false));
        assert_eq!(ty(&grid, 1, 0), Some(TileType::GooSide));

        assert!(grid.edit_quarter_tile(pos(2.0, 0.0), DVec3::Z, TileType::Void, false));
        assert!(!grid.edit_quarter_tile(pos(2.0, 0.0), DVec3::Z, TileType::White, false));
        assert!(grid.edit_quarter_tile(pos(2.0, 0.0), DVec3::Z, TileType::White, true));
        assert_eq!(ty(&grid, 2, 0), Some(TileType::White));

        // Forcing creates the tiledef
        let elsewhere = DVec3::new(16.0, 16.0, 256.0);
        assert!(!grid.edit_quarter_tile(elsewhere, DVec3::Z, TileType::White, false));
        assert!(grid.edit_quarter_tile(elsewhere, DVec3::Z, TileType::White, true));
        assert_eq!(grid.len(), 2);
    }

    #[test]
    fn test_snapshot_groups_by_colour() {
        let mut grid = TileGrid::new();
        grid.ensure(IVec3::ZERO, Orient::PosZ, TileState::new(TileType::White));
        grid.ensure(IVec3::X, Orient::PosZ, TileState::new(TileType::Black));
        grid.ensure(IVec3::Y, Orient::PosZ, TileState::new(TileType::Void));
        let snap = grid.snapshot();
        assert_eq!(snap["white"].len(), 1);
        assert_eq!(snap["black"].len(), 1);
        assert_eq!(snap["white"][0].orient, 'u');
        assert_eq!(snap["white"][0].position, [0.5, 1.0, -0.5]);
    }
}
