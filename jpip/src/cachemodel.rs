// What one channel's client is known to hold. Flags only ever go from
// unsent to sent.
use log::debug;

use crate::index::Index;

/// A unit of delivery the cache model tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinRef {
    MainHeader,
    TileHeader { tile: u32 },
    TilePart { tile: u32, part: u32 },
    /// Layer `layer` of the precinct with sequence number `sequence`.
    Precinct {
        component: u16,
        tile: u32,
        sequence: u32,
        layer: u16,
    },
    Metadata { id: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheModel {
    csn: u64,
    main_header: bool,
    tile_headers: Vec<bool>,
    tile_parts: Vec<Vec<bool>>,
    /// [component][tile][sequence · layers + layer]
    precincts: Vec<Vec<Vec<bool>>>,
    layers: Vec<u16>,
    metadata: Vec<bool>,
}

impl CacheModel {
    /// An empty model sized to the index of codestream `csn`.
    pub fn new(index: &Index, csn: u64) -> Self {
        let no_tiles = index.no_tiles();
        let tile_parts = (0..no_tiles)
            .map(|t| vec![false; index.tile_part_count(t)])
            .collect();
        let layers: Vec<u16> = index.tile_codings.iter().map(|c| c.layers).collect();
        let precincts = match &index.precincts {
            Some(_) => (0..index.no_components() as usize)
                .map(|c| {
                    (0..no_tiles)
                        .map(|t| match index.tile_layout(t) {
                            Some(layout) => vec![
                                false;
                                layout.sequence_count(c) as usize
                                    * layers[t as usize] as usize
                            ],
                            None => Vec::new(),
                        })
                        .collect()
                })
                .collect(),
            None => Vec::new(),
        };
        let metadata_bins = index.metadata.iter().map(|bin| bin.id + 1).max().unwrap_or(0);

        CacheModel {
            csn,
            main_header: false,
            tile_headers: vec![false; no_tiles as usize],
            tile_parts,
            precincts,
            layers,
            metadata: vec![false; metadata_bins as usize],
        }
    }

    pub fn csn(&self) -> u64 {
        self.csn
    }

    /// True when `bin` is known to the client. Units outside the model are
    /// reported unsent.
    pub fn query(&self, bin: BinRef) -> bool {
        match bin {
            BinRef::MainHeader => self.main_header,
            BinRef::TileHeader { tile } => self.tile_headers.get(tile as usize) == Some(&true),
            BinRef::TilePart { tile, part } => self
                .tile_parts
                .get(tile as usize)
                .and_then(|parts| parts.get(part as usize))
                .copied()
                .unwrap_or(false),
            BinRef::Precinct { .. } => self.precinct_flag(bin).copied().unwrap_or(false),
            BinRef::Metadata { id } => self.metadata.get(id as usize) == Some(&true),
        }
    }

    pub fn mark(&mut self, bin: BinRef) {
        let flag = match bin {
            BinRef::MainHeader => Some(&mut self.main_header),
            BinRef::TileHeader { tile } => self.tile_headers.get_mut(tile as usize),
            BinRef::TilePart { tile, part } => self
                .tile_parts
                .get_mut(tile as usize)
                .and_then(|parts| parts.get_mut(part as usize)),
            BinRef::Precinct {
                component,
                tile,
                sequence,
                layer,
            } => {
                let layers = self.layers.get(tile as usize).copied().unwrap_or(0) as usize;
                if layer as usize >= layers {
                    debug!("ignoring mark of {:?} beyond the tile's layers", bin);
                    return;
                }
                self.precincts
                    .get_mut(component as usize)
                    .and_then(|tiles| tiles.get_mut(tile as usize))
                    .and_then(|flags| flags.get_mut(sequence as usize * layers + layer as usize))
            }
            BinRef::Metadata { id } => self.metadata.get_mut(id as usize),
        };
        match flag {
            Some(flag) => *flag = true,
            None => debug!("ignoring mark of {:?} outside the cache model", bin),
        }
    }

    /// Marks every unit of a response once it has been produced.
    pub fn commit(&mut self, marks: &[BinRef]) {
        for bin in marks {
            self.mark(*bin);
        }
    }

    /// True when the main header and all image data are known to the client,
    /// whether it came as tile-parts or as precincts.
    pub fn is_all_sent(&self) -> bool {
        if !self.main_header {
            return false;
        }
        let tiles_sent = self
            .tile_parts
            .iter()
            .all(|parts| parts.iter().all(|sent| *sent));
        let precincts_sent = !self.precincts.is_empty()
            && self.tile_headers.iter().all(|sent| *sent)
            && self
                .precincts
                .iter()
                .flatten()
                .all(|flags| flags.iter().all(|sent| *sent));
        tiles_sent || precincts_sent
    }

    fn precinct_flag(&self, bin: BinRef) -> Option<&bool> {
        match bin {
            BinRef::Precinct {
                component,
                tile,
                sequence,
                layer,
            } => {
                let layers = *self.layers.get(tile as usize)? as usize;
                if layer as usize >= layers {
                    return None;
                }
                self.precincts
                    .get(component as usize)?
                    .get(tile as usize)?
                    .get(sequence as usize * layers + layer as usize)
            }
            _ => None,
        }
    }
}
