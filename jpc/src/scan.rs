use log::{info, warn};
use std::io;

use crate::{
    decode_main_header, decode_tile_header, CodestreamError, MainHeader, MarkerSymbol, TileHeader,
    MARKER_SYMBOL_EOC, MARKER_SYMBOL_SOT,
};

#[derive(Debug, Clone, PartialEq)]
pub struct TilePart {
    pub header: TileHeader,
    /// Offset of the SOT marker relative to the codestream start.
    pub offset: u64,
    /// From the SOT marker to the end of the tile-part data.
    pub length: u64,
}

impl TilePart {
    pub fn tile_index(&self) -> u16 {
        self.header.sot.tile_index()
    }

    /// Offset of the first byte after SOD.
    pub fn data_offset(&self) -> u64 {
        self.offset + self.header.data_offset + 2
    }

    pub fn data_length(&self) -> u64 {
        self.length - self.header.data_offset - 2
    }
}

/// Result of walking a codestream marker by marker.
#[derive(Debug, Clone, PartialEq)]
pub struct CodestreamLayout {
    pub header: MainHeader,
    /// Tile-parts in codestream order.
    pub tile_parts: Vec<TilePart>,
    /// Through EOC, or to the end of the scanned range when EOC is missing.
    pub length: u64,
}

impl CodestreamLayout {
    /// The tile-parts of one tile in codestream order.
    pub fn tile_parts_of(&self, tile: u32) -> impl Iterator<Item = &TilePart> {
        self.tile_parts
            .iter()
            .filter(move |part| part.tile_index() as u32 == tile)
    }
}

/// Walks the codestream in `[start, end)`: the main header, then each
/// tile-part by its Psot, until EOC. Only the marker segments are read,
/// never the entropy coded data.
pub fn scan_codestream<R: io::Read + io::Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
) -> Result<CodestreamLayout, CodestreamError> {
    reader.seek(io::SeekFrom::Start(start))?;
    let header = decode_main_header(reader)?;
    let no_components = header.siz.no_components();
    let no_tiles = header.siz.no_tiles();

    let mut tile_parts = Vec::new();
    let mut marker_type: MarkerSymbol = [0; 2];
    let length = loop {
        let position = reader.stream_position()?;
        if position + 2 > end {
            warn!("codestream ends at {} without EOC", position - start);
            break position - start;
        }
        reader.read_exact(&mut marker_type)?;
        match marker_type {
            MARKER_SYMBOL_EOC => break position + 2 - start,
            MARKER_SYMBOL_SOT => {
                reader.seek(io::SeekFrom::Start(position))?;
                let tile_header = decode_tile_header(reader, no_components)?;
                let tile_index = tile_header.sot.tile_index() as u32;
                if tile_index >= no_tiles {
                    return Err(CodestreamError::TileIndexOverflow {
                        tile_index,
                        no_tiles,
                    });
                }

                let tile_length = match tile_header.sot.tile_length() as u64 {
                    // Only the last tile-part may run up to EOC.
                    0 => {
                        reader.seek(io::SeekFrom::Start(end - 2))?;
                        reader.read_exact(&mut marker_type)?;
                        if marker_type == MARKER_SYMBOL_EOC {
                            end - 2 - position
                        } else {
                            end - position
                        }
                    }
                    length => length,
                };
                if tile_length < tile_header.data_offset + 2 || position + tile_length > end {
                    return Err(CodestreamError::MarkerError {
                        marker: MARKER_SYMBOL_SOT,
                        error: format!(
                            "tile-part length {} at byte offset {} exceeds the codestream",
                            tile_length,
                            position - start
                        ),
                    });
                }
                info!(
                    "tile {} part {} at {} length {}",
                    tile_index,
                    tile_header.sot.tile_part_index(),
                    position - start,
                    tile_length
                );

                tile_parts.push(TilePart {
                    header: tile_header,
                    offset: position - start,
                    length: tile_length,
                });
                reader.seek(io::SeekFrom::Start(position + tile_length))?;
            }
            _ => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker: marker_type,
                    offset: position - start,
                });
            }
        }
    };

    Ok(CodestreamLayout {
        header,
        tile_parts,
        length,
    })
}
