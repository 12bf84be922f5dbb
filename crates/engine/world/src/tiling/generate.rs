//! Turning the sub-tile grid back into brushes

use super::optimise::merge_rects;
use super::{Orient, TileGrid, TileState, TileType, SUBTILE, VOXEL};
use glam::DVec3;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use vmf::{IdAllocator, Solid};

pub const NODRAW: &str = "tools/toolsnodraw";

/// Depth cutout sub-tiles are pushed back from the surface
const RECESS_DEPTH: f64 = 3.0;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Materials used to read and write tiles
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    /// Source materials read as white tiles
    pub white_materials: Vec<String>,
    pub white_4x4_materials: Vec<String>,
    /// Source materials read as black tiles
    pub black_materials: Vec<String>,
    pub black_4x4_materials: Vec<String>,
    /// Source materials that may back a tiled brush without being tiles
    pub nodraw_materials: Vec<String>,

    /// Output palettes, picked by a sub-tile's variant
    pub white: Vec<String>,
    pub white_4x4: Vec<String>,
    pub black: Vec<String>,
    pub black_4x4: Vec<String>,
    pub goo_side: Vec<String>,
    pub cutout: Vec<String>,
    pub nodraw: String,

    /// Depth of generated tile brushes
    pub thickness: f64,
}

impl Default for TilingConfig {
    fn default() -> Self {
        TilingConfig {
            white_materials: strings(&[
                "tile/white_floor_tile002a",
                "tile/white_wall_tile003a",
                "tile/white_wall_tile003h",
                "tile/white_wall_tile003c",
            ]),
            white_4x4_materials: strings(&["tile/white_wall_tile003f"]),
            black_materials: strings(&[
                "metal/black_floor_metal_001c",
                "metal/black_wall_metal_002c",
                "metal/black_wall_metal_002e",
                "metal/black_wall_metal_002a",
            ]),
            black_4x4_materials: strings(&["metal/black_wall_metal_002b"]),
            nodraw_materials: strings(&[NODRAW]),
            white: strings(&["tile/white_wall_tile003a"]),
            white_4x4: strings(&["tile/white_wall_tile003f"]),
            black: strings(&["metal/black_wall_metal_002c"]),
            black_4x4: strings(&["metal/black_wall_metal_002b"]),
            goo_side: strings(&["anim_wp/framework/squarebeams"]),
            cutout: strings(&["tile/white_wall_tile003f"]),
            nodraw: NODRAW.to_string(),
            thickness: 4.0,
        }
    }
}

impl TilingConfig {
    /// Tile type a source face material stands for
    pub fn classify(&self, material: &str) -> Option<TileType> {
        let has = |list: &[String]| list.iter().any(|m| m.eq_ignore_ascii_case(material));
        if has(&self.white_materials) {
            Some(TileType::White)
        } else if has(&self.white_4x4_materials) {
            Some(TileType::White4x4)
        } else if has(&self.black_materials) {
            Some(TileType::Black)
        } else if has(&self.black_4x4_materials) {
            Some(TileType::Black4x4)
        } else if has(&self.nodraw_materials) {
            Some(TileType::Nodraw)
        } else {
            None
        }
    }

    /// Front material for a sub-tile, or `None` if nothing is generated
    pub fn material(&self, state: TileState) -> Option<&str> {
        let palette = match state.ty {
            TileType::White => &self.white,
            TileType::White4x4 => &self.white_4x4,
            TileType::Black => &self.black,
            TileType::Black4x4 => &self.black_4x4,
            TileType::GooSide => &self.goo_side,
            TileType::CutoutBroken | TileType::CutoutPartial => &self.cutout,
            TileType::Nodraw => return Some(&self.nodraw),
            TileType::Void => return None,
        };
        if palette.is_empty() {
            Some(&self.nodraw)
        } else {
            Some(&palette[state.variant as usize % palette.len()])
        }
    }
}

/// Tiled plane: the face direction plus its coordinate along the normal, in voxels
type PlaneKey = (Orient, i32);

impl TileGrid {
    /// Build brushes for every non-void sub-tile
    ///
    /// Sub-tiles are grouped per plane and merged into the largest
    /// same-state rectangles a greedy scan finds. The grid is left
    /// untouched; calling this twice with equal id allocators gives equal
    /// brushes.
    pub fn generate_brushes(&self, ids: &mut IdAllocator, cfg: &TilingConfig) -> Vec<Solid> {
        let mut planes: BTreeMap<PlaneKey, HashMap<(i32, i32), TileState>> = BTreeMap::new();
        for tile in self.tiledefs() {
            let (ua, va) = tile.orient.uv_axes();
            let cell = tile.cell;
            let plane = planes.entry((tile.orient, cell[tile.orient.axis()])).or_default();
            for (u, v, state) in tile.iter() {
                if state.ty == TileType::Void {
                    continue;
                }
                plane.insert((cell[ua] * 4 + u as i32, cell[va] * 4 + v as i32), state);
            }
        }

        let mut brushes = Vec::new();
        for ((orient, depth), cells) in &planes {
            if cells.is_empty() {
                continue;
            }
            let (u_min, v_min, u_max, v_max) = cells.keys().fold(
                (i32::MAX, i32::MAX, i32::MIN, i32::MIN),
                |(a, b, c, d), &(u, v)| (a.min(u), b.min(v), c.max(u), d.max(v)),
            );
            let width = (u_max - u_min + 1) as usize;
            let height = (v_max - v_min + 1) as usize;
            let mut dense = vec![None; width * height];
            for (&(u, v), &state) in cells {
                dense[(v - v_min) as usize * width + (u - u_min) as usize] = Some(state);
            }

            let rects = merge_rects(&dense, width, height);
            debug!(?orient, depth, subtiles = cells.len(), brushes = rects.len(), "Merged plane");
            for (rect, state) in rects {
                let Some(material) = cfg.material(state) else {
                    continue;
                };
                let (min, max) = tile_bounds(
                    *orient,
                    *depth,
                    (u_min + rect.u0, v_min + rect.v0),
                    (u_min + rect.u1, v_min + rect.v1),
                    state.ty,
                    cfg.thickness,
                );
                let front = orient.normal();
                brushes.push(Solid::cuboid_with(ids, min, max, |n| {
                    if n == front {
                        material.to_string()
                    } else {
                        cfg.nodraw.clone()
                    }
                }));
            }
        }
        brushes
    }
}

/// Surface position along the normal for tiledefs of cell coordinate `depth`
pub(super) fn surface_offset(orient: Orient, depth: i32) -> f64 {
    if orient.is_positive() {
        (depth + 1) as f64 * VOXEL
    } else {
        depth as f64 * VOXEL
    }
}

/// World bounds of a tile brush spanning sub-tile coordinates `lo..hi`
fn tile_bounds(
    orient: Orient,
    depth: i32,
    lo: (i32, i32),
    hi: (i32, i32),
    ty: TileType,
    thickness: f64,
) -> (DVec3, DVec3) {
    let (ua, va) = orient.uv_axes();
    let axis = orient.axis();
    let sign = if orient.is_positive() { 1.0 } else { -1.0 };
    let recess = if ty.is_recess() { RECESS_DEPTH } else { 0.0 };
    let front = surface_offset(orient, depth) - sign * recess;
    let back = front - sign * thickness;

    let mut min = DVec3::ZERO;
    let mut max = DVec3::ZERO;
    min[ua] = lo.0 as f64 * SUBTILE;
    max[ua] = hi.0 as f64 * SUBTILE;
    min[va] = lo.1 as f64 * SUBTILE;
    max[va] = hi.1 as f64 * SUBTILE;
    min[axis] = front.min(back);
    max[axis] = front.max(back);
    (min, max)
}
