//! Greedy rectangle merging for sub-tile grids

/// Half-open rectangle of grid cells, `u0..u1` by `v0..v1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rect {
    pub u0: i32,
    pub v0: i32,
    pub u1: i32,
    pub v1: i32,
}

impl Rect {
    pub fn width(&self) -> i32 {
        self.u1 - self.u0
    }

    pub fn height(&self) -> i32 {
        self.v1 - self.v0
    }

    pub fn area(&self) -> i32 {
        self.width() * self.height()
    }
}

/// Cover every filled cell with as few same-valued rectangles as a greedy scan finds
///
/// `cells` is row-major, `width * height` long, `None` for empty cells. The
/// scan starts at the lowest unclaimed cell in row-major order, extends
/// along `u` as far as the value repeats, then adds whole rows while they
/// match. Output order follows the scan, so equal input gives equal output.
pub fn merge_rects<T: Copy + Eq>(cells: &[Option<T>], width: usize, height: usize) -> Vec<(Rect, T)> {
    assert_eq!(cells.len(), width * height, "Grid is not {width}x{height}");
    let mut claimed = vec![false; cells.len()];
    let mut rects = Vec::new();
    let at = |u: usize, v: usize| v * width + u;

    for v in 0..height {
        for u in 0..width {
            let Some(value) = cells[at(u, v)] else {
                continue;
            };
            if claimed[at(u, v)] {
                continue;
            }
            let free_match = |uu: usize, vv: usize| !claimed[at(uu, vv)] && cells[at(uu, vv)] == Some(value);

            let mut u_end = u + 1;
            while u_end < width && free_match(u_end, v) {
                u_end += 1;
            }
            let mut v_end = v + 1;
            while v_end < height && (u..u_end).all(|uu| free_match(uu, v_end)) {
                v_end += 1;
            }
            for vv in v..v_end {
                for uu in u..u_end {
                    claimed[at(uu, vv)] = true;
                }
            }
            rects.push((
                Rect {
                    u0: u as i32,
                    v0: v as i32,
                    u1: u_end as i32,
                    v1: v_end as i32,
                },
                value,
            ));
        }
    }
    rects
}
