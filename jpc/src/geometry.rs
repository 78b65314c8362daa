// B.2 – B.6
//
// Geometry of the reference grid, tiles, tile-components, resolution levels
// and precincts. All arithmetic is done in u64 so that shifts by the number
// of decomposition levels cannot overflow.

/// ⌈a / b⌉
pub fn ceil_div(a: u64, b: u64) -> u64 {
    a.div_ceil(b)
}

/// A half open rectangle on some grid, `x0 <= x < x1`, `y0 <= y < y1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }
}

/// Span of tile `id` along one axis, reduced by `level` decomposition
/// levels.
///
/// At level 0 this is `[max(O, TO + id·T), min(size, TO + (id + 1)·T))`;
/// every further level applies ⌈x / 2⌉ to both ends.
pub fn tile_range(
    origin: u32,
    size: u32,
    tile_origin: u32,
    tile_size: u32,
    id: u32,
    level: u8,
) -> (u32, u32) {
    let start = tile_origin as u64 + id as u64 * tile_size as u64;
    let mut min = start.max(origin as u64);
    let mut max = (start + tile_size as u64).min(size as u64);
    for _ in 0..level {
        min = ceil_div(min, 2);
        max = ceil_div(max, 2);
    }
    (min as u32, max.max(min) as u32)
}

/// Bounds of resolution `r` of a tile-component with `levels` decomposition
/// levels (B-14): trx0 = ⌈tcx0 / 2^(N_L - r)⌉ and so on.
pub fn resolution_rect(tile_component: Rect, levels: u8, r: u8) -> Rect {
    let divisor = 1u64 << (levels.saturating_sub(r)) as u64;
    Rect {
        x0: ceil_div(tile_component.x0 as u64, divisor) as u32,
        y0: ceil_div(tile_component.y0 as u64, divisor) as u32,
        x1: ceil_div(tile_component.x1 as u64, divisor) as u32,
        y1: ceil_div(tile_component.y1 as u64, divisor) as u32,
    }
}

/// Number of precincts across and down a resolution (B-16):
/// numprecincts = ⌈trx1 / 2^PPx⌉ - ⌊trx0 / 2^PPx⌋, or zero for an empty
/// resolution.
pub fn precinct_count(resolution: Rect, ppx: u8, ppy: u8) -> (u32, u32) {
    if resolution.is_empty() {
        return (0, 0);
    }
    let px = 1u64 << ppx;
    let py = 1u64 << ppy;
    let wide = ceil_div(resolution.x1 as u64, px) - resolution.x0 as u64 / px;
    let high = ceil_div(resolution.y1 as u64, py) - resolution.y0 as u64 / py;
    (wide as u32, high as u32)
}
