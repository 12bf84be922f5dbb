//! Reading tiledefs out of the source brushwork

use super::generate::surface_offset;
use super::{world_to_cell, Orient, TileGrid, TileState, TileType, TilingConfig, VOXEL};
use glam::DVec3;
use tracing::{debug, info};
use vmf::{Solid, Vmf};

/// What a world brush turned into
enum Classified {
    /// Not a plain voxel of tile; left alone
    Other,
    /// Tiled voxel: the cell plus its tiled faces
    Voxel(glam::IVec3, Vec<(Orient, TileType)>),
}

fn classify(solid: &Solid, cfg: &TilingConfig) -> Classified {
    let (min, max) = solid.bbox();
    if solid.sides.len() != 6 || max - min != DVec3::splat(VOXEL) {
        return Classified::Other;
    }
    if (min / VOXEL).round() * VOXEL != min {
        return Classified::Other;
    }
    let mut faces = Vec::new();
    for side in &solid.sides {
        let Some(orient) = Orient::from_normal(side.normal().normalize_or_zero()) else {
            return Classified::Other;
        };
        match cfg.classify(&side.material) {
            None => return Classified::Other,
            Some(TileType::Nodraw) => {}
            Some(ty) => faces.push((orient, ty)),
        }
    }
    Classified::Voxel(world_to_cell(min), faces)
}

impl TileGrid {
    /// Collect tiledefs from world brushes
    ///
    /// A world brush counts as tiled when it is exactly one 128-aligned
    /// voxel and every face uses a known tile or nodraw material. Each
    /// tile face becomes a tiledef filled with that face's type; the brush
    /// itself stays as nodraw backing, pulled back from each tiled face so
    /// the generated tiles have room in front of it.
    pub fn analyse(vmf: &mut Vmf, cfg: &TilingConfig) -> TileGrid {
        let mut grid = TileGrid::new();
        let mut voxels = 0;
        for solid in &mut vmf.world.solids {
            let Classified::Voxel(cell, faces) = classify(solid, cfg) else {
                continue;
            };
            voxels += 1;
            for &(orient, ty) in &faces {
                if !grid.ensure(cell, orient, TileState::new(ty)) {
                    debug!(%cell, ?orient, "Duplicate tile brush");
                }
            }
            inset_backing(solid, cell, &faces, cfg);
        }
        info!(voxels, tiledefs = grid.len(), "Analysed tiles");
        grid
    }
}

/// Replace a tiled voxel's faces with nodraw, moving tiled faces inward
fn inset_backing(solid: &mut Solid, cell: glam::IVec3, faces: &[(Orient, TileType)], cfg: &TilingConfig) {
    for side in &mut solid.sides {
        side.material = cfg.nodraw.clone();
        let Some(orient) = Orient::from_normal(side.normal().normalize_or_zero()) else {
            continue;
        };
        if faces.iter().any(|(o, _)| *o == orient) {
            let axis = orient.axis();
            let surface = surface_offset(orient, cell[axis]);
            let sign = if orient.is_positive() { 1.0 } else { -1.0 };
            let offset = surface - sign * cfg.thickness - side.plane[0][axis];
            let mut shift = DVec3::ZERO;
            shift[axis] = offset;
            side.translate(shift);
        }
    }
}
