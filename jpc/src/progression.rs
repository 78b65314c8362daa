// B.12
//
// Progression order. Packets of a tile are interleaved by layer, resolution
// level, component and precinct position; the order of the nesting is given
// by the progression order of COD (or a tile-part COD).
use std::collections::HashSet;

use crate::geometry::{precinct_count, resolution_rect, Rect};
use crate::{
    CodingStyleParameters, ImageAndTileSizeMarkerSegment, MainHeader, ProgressionOrder,
    TileHeader,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentCoding {
    pub levels: u8,
    /// (PPx, PPy) for every resolution 0..=levels.
    pub precinct_exponents: Vec<(u8, u8)>,
}

impl ComponentCoding {
    fn from_parameters(parameters: &CodingStyleParameters) -> Self {
        let levels = parameters.no_decomposition_levels();
        ComponentCoding {
            levels,
            precinct_exponents: (0..=levels)
                .map(|r| parameters.precinct_exponents(r))
                .collect(),
        }
    }
}

/// Coding parameters in force for one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileCoding {
    pub progression: ProgressionOrder,
    pub layers: u16,
    pub uses_sop: bool,
    pub uses_eph: bool,
    pub components: Vec<ComponentCoding>,
}

impl TileCoding {
    /// Resolves the parameters for a tile. Precedence, highest first:
    /// tile-part COC, tile-part COD, main COC, main COD.
    pub fn new(main: &MainHeader, tile: Option<&TileHeader>) -> TileCoding {
        let tile_cod = tile.and_then(|t| t.cod.as_ref());
        let cod = tile_cod.unwrap_or(&main.cod);
        let no_components = main.siz.no_components();

        let components = (0..no_components)
            .map(|c| {
                let tile_coc = tile.and_then(|t| t.cocs.iter().find(|coc| coc.index == c));
                let main_coc = main.cocs.iter().find(|coc| coc.index == c);
                let parameters = match (tile_coc, tile_cod, main_coc) {
                    (Some(coc), _, _) => coc.coding_style_parameters(),
                    (None, Some(cod), _) => cod.coding_style_parameters(),
                    (None, None, Some(coc)) => coc.coding_style_parameters(),
                    (None, None, None) => main.cod.coding_style_parameters(),
                };
                ComponentCoding::from_parameters(parameters)
            })
            .collect();

        TileCoding {
            progression: cod.progression_order(),
            layers: cod.no_layers(),
            uses_sop: cod.uses_sop(),
            uses_eph: cod.uses_eph(),
            components,
        }
    }

    pub fn max_levels(&self) -> u8 {
        self.components.iter().map(|c| c.levels).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionLayout {
    pub rect: Rect,
    pub precinct_exponents: (u8, u8),
    pub precincts_wide: u32,
    pub precincts_high: u32,
}

impl ResolutionLayout {
    pub fn precinct_count(&self) -> u32 {
        self.precincts_wide * self.precincts_high
    }
}

/// Resolutions and precinct partitions of every component of one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileLayout {
    pub tile: u32,
    pub rect: Rect,
    pub components: Vec<Vec<ResolutionLayout>>,
    separations: Vec<(u8, u8)>,
}

impl TileLayout {
    pub fn new(siz: &ImageAndTileSizeMarkerSegment, coding: &TileCoding, tile: u32) -> Self {
        let components = coding
            .components
            .iter()
            .enumerate()
            .map(|(c, component)| {
                let tile_component = siz.tile_component_rect(tile, c);
                (0..=component.levels)
                    .map(|r| {
                        let rect = resolution_rect(tile_component, component.levels, r);
                        let (ppx, ppy) = component.precinct_exponents[r as usize];
                        let (precincts_wide, precincts_high) = precinct_count(rect, ppx, ppy);
                        ResolutionLayout {
                            rect,
                            precinct_exponents: (ppx, ppy),
                            precincts_wide,
                            precincts_high,
                        }
                    })
                    .collect()
            })
            .collect();
        let separations = (0..siz.no_components() as usize)
            .map(|c| {
                (
                    siz.horizontal_separation(c).unwrap_or(1).max(1),
                    siz.vertical_separation(c).unwrap_or(1).max(1),
                )
            })
            .collect();

        TileLayout {
            tile,
            rect: siz.tile_rect(tile),
            components,
            separations,
        }
    }

    pub fn resolution(&self, c: usize, r: u8) -> Option<&ResolutionLayout> {
        self.components.get(c).and_then(|res| res.get(r as usize))
    }

    /// Sequence number of precinct `p` of resolution `r` within the
    /// tile-component: precincts of lower resolutions come first.
    pub fn sequence(&self, c: usize, r: u8, p: u32) -> Option<u32> {
        let resolutions = self.components.get(c)?;
        if p >= resolutions.get(r as usize)?.precinct_count() {
            return None;
        }
        let before: u32 = resolutions[..r as usize]
            .iter()
            .map(ResolutionLayout::precinct_count)
            .sum();
        Some(before + p)
    }

    /// Total number of precincts of a tile-component.
    pub fn sequence_count(&self, c: usize) -> u32 {
        self.components
            .get(c)
            .map(|res| res.iter().map(ResolutionLayout::precinct_count).sum())
            .unwrap_or(0)
    }

    /// Resolution and precinct index of a sequence number.
    pub fn locate(&self, c: usize, s: u32) -> Option<(u8, u32)> {
        let mut remaining = s;
        for (r, resolution) in self.components.get(c)?.iter().enumerate() {
            if remaining < resolution.precinct_count() {
                return Some((r as u8, remaining));
            }
            remaining -= resolution.precinct_count();
        }
        None
    }
}

/// One packet: the contribution of a precinct to a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Packet {
    pub component: u16,
    pub resolution: u8,
    pub precinct: u32,
    pub layer: u16,
}

/// Packets of a tile in codestream order.
pub fn packet_order(layout: &TileLayout, coding: &TileCoding) -> Vec<Packet> {
    let mut packets = Vec::new();
    let max_levels = coding.max_levels();
    let no_components = coding.components.len();

    match coding.progression {
        ProgressionOrder::RLCP => {
            for r in 0..=max_levels {
                for l in 0..coding.layers {
                    for c in 0..no_components {
                        push_precincts(layout, c, r, l..l + 1, &mut packets);
                    }
                }
            }
        }
        ProgressionOrder::RPCL => {
            let mut seen = HashSet::new();
            for r in 0..=max_levels {
                let (dx, dy) = position_steps(layout, coding, 0..no_components, Some(r));
                for (x, y) in positions(layout.rect, dx, dy) {
                    for c in 0..no_components {
                        push_at(layout, coding, c, r, x, y, &mut seen, &mut packets);
                    }
                }
            }
        }
        ProgressionOrder::PCRL => {
            let mut seen = HashSet::new();
            let (dx, dy) = position_steps(layout, coding, 0..no_components, None);
            for (x, y) in positions(layout.rect, dx, dy) {
                for c in 0..no_components {
                    for r in 0..=coding.components[c].levels {
                        push_at(layout, coding, c, r, x, y, &mut seen, &mut packets);
                    }
                }
            }
        }
        ProgressionOrder::CPRL => {
            let mut seen = HashSet::new();
            for c in 0..no_components {
                let (dx, dy) = position_steps(layout, coding, c..c + 1, None);
                for (x, y) in positions(layout.rect, dx, dy) {
                    for r in 0..=coding.components[c].levels {
                        push_at(layout, coding, c, r, x, y, &mut seen, &mut packets);
                    }
                }
            }
        }
        // Reserved values are treated as the default layer progression.
        ProgressionOrder::LRCP | ProgressionOrder::Reserved { .. } => {
            for l in 0..coding.layers {
                for r in 0..=max_levels {
                    for c in 0..no_components {
                        push_precincts(layout, c, r, l..l + 1, &mut packets);
                    }
                }
            }
        }
    }

    packets
}

fn push_precincts(
    layout: &TileLayout,
    c: usize,
    r: u8,
    layers: std::ops::Range<u16>,
    packets: &mut Vec<Packet>,
) {
    if let Some(resolution) = layout.resolution(c, r) {
        for p in 0..resolution.precinct_count() {
            for l in layers.clone() {
                packets.push(Packet {
                    component: c as u16,
                    resolution: r,
                    precinct: p,
                    layer: l,
                });
            }
        }
    }
}

// Smallest step on the reference grid between precinct boundaries of the
// given components and resolutions, XRsiz · 2^(PPx + N_L - r).
fn position_steps(
    layout: &TileLayout,
    coding: &TileCoding,
    components: std::ops::Range<usize>,
    resolution: Option<u8>,
) -> (u64, u64) {
    let mut dx = u64::MAX;
    let mut dy = u64::MAX;
    for c in components {
        let levels = coding.components[c].levels;
        let (xr, yr) = layout.separations[c];
        for r in 0..=levels {
            if resolution.is_some_and(|only| only != r) {
                continue;
            }
            let (ppx, ppy) = coding.components[c].precinct_exponents[r as usize];
            let level_no = (levels - r) as u64;
            dx = dx.min((xr as u64) << (ppx as u64 + level_no));
            dy = dy.min((yr as u64) << (ppy as u64 + level_no));
        }
    }
    (dx, dy)
}

fn positions(rect: Rect, dx: u64, dy: u64) -> Vec<(u64, u64)> {
    let mut result = Vec::new();
    if dx == u64::MAX || dy == u64::MAX || rect.is_empty() {
        return result;
    }
    let mut y = rect.y0 as u64;
    while y < rect.y1 as u64 {
        let mut x = rect.x0 as u64;
        while x < rect.x1 as u64 {
            result.push((x, y));
            x += dx - (x % dx);
        }
        y += dy - (y % dy);
    }
    result
}

// Emits every layer of the precinct of (c, r) that starts at reference grid
// point (x, y), if one does.
#[allow(clippy::too_many_arguments)]
fn push_at(
    layout: &TileLayout,
    coding: &TileCoding,
    c: usize,
    r: u8,
    x: u64,
    y: u64,
    seen: &mut HashSet<(usize, u8, u32)>,
    packets: &mut Vec<Packet>,
) {
    let levels = coding.components[c].levels;
    if r > levels {
        return;
    }
    let resolution = match layout.resolution(c, r) {
        Some(resolution) if resolution.precinct_count() > 0 => resolution,
        _ => return,
    };
    let (xr, yr) = layout.separations[c];
    let (xr, yr) = (xr as u64, yr as u64);
    let level_no = (levels - r) as u64;
    let (ppx, ppy) = resolution.precinct_exponents;
    let rpx = ppx as u64 + level_no;
    let rpy = ppy as u64 + level_no;
    let trx0 = resolution.rect.x0 as u64;
    let try0 = resolution.rect.y0 as u64;

    let on_row = y % (yr << rpy) == 0
        || (y == layout.rect.y0 as u64 && (try0 << level_no) % (1u64 << rpy) != 0);
    let on_column = x % (xr << rpx) == 0
        || (x == layout.rect.x0 as u64 && (trx0 << level_no) % (1u64 << rpx) != 0);
    if !on_row || !on_column {
        return;
    }

    let prci = (x.div_ceil(xr << level_no) >> ppx) - (trx0 >> ppx);
    let prcj = (y.div_ceil(yr << level_no) >> ppy) - (try0 >> ppy);
    let precinct = prci + prcj * resolution.precincts_wide as u64;
    if precinct >= resolution.precinct_count() as u64 {
        return;
    }
    let precinct = precinct as u32;
    if !seen.insert((c, r, precinct)) {
        return;
    }
    for l in 0..coding.layers {
        packets.push(Packet {
            component: c as u16,
            resolution: r,
            precinct,
            layer: l,
        });
    }
}
