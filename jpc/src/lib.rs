use log::{debug, info};
use std::error;
use std::fmt;
use std::io;

mod geometry;
mod progression;
mod scan;

pub use geometry::{ceil_div, precinct_count, resolution_rect, tile_range, Rect};
pub use progression::{packet_order, ComponentCoding, Packet, ResolutionLayout, TileCoding, TileLayout};
pub use scan::{scan_codestream, CodestreamLayout, TilePart};

#[derive(Debug)]
pub enum CodestreamError {
    MarkerError {
        marker: MarkerSymbol,
        error: String,
    },
    MarkerMissing {
        marker: MarkerSymbol,
    },
    MarkerUnexpected {
        marker: MarkerSymbol,
        offset: u64,
    },
    TileSizeOverflow {
        image_horizontal_offset: u32,
        image_vertical_offset: u32,
        tile_horizontal_offset: u32,
        tile_vertical_offset: u32,
        reference_tile_width: u32,
        reference_tile_height: u32,
    },
    TileGridOffsetOverflow {
        tile_horizontal_offset: u32,
        tile_vertical_offset: u32,
        image_horizontal_offset: u32,
        image_vertical_offset: u32,
    },
    TileIndexOverflow {
        tile_index: u32,
        no_tiles: u32,
    },
    Io(io::Error),
}

impl error::Error for CodestreamError {}
impl fmt::Display for CodestreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MarkerError { marker, error } => {
                write!(
                    f,
                    "marker 0x{:0>2X?}{:0>2X?} error {:?}",
                    marker[0], marker[1], error
                )
            }
            Self::MarkerMissing { marker } => {
                write!(f, "missing marker 0x{:0>2X?}{:0>2X?}", marker[0], marker[1])
            }
            Self::MarkerUnexpected { marker, offset } => {
                write!(
                    f,
                    "unexpected marker 0x{:0>2X?}{:0>2X?} at byte offset {}",
                    marker[0], marker[1], offset
                )
            }
            Self::TileGridOffsetOverflow {
                image_horizontal_offset,
                image_vertical_offset,
                tile_horizontal_offset,
                tile_vertical_offset,
            } => {
                write!(
                    f,
                    "tile grid offset overflow: XOSiz = {:?}, YOsiz = {:?}, XTOsiz = {:?}, YTOsiz = {:?}",
                    image_horizontal_offset,
                    image_vertical_offset,
                    tile_horizontal_offset,
                    tile_vertical_offset,
                )
            }
            // XTsiz + XTOsiz > XOsiz
            // YTsiz + YTOsiz > YOsiz
            Self::TileSizeOverflow {
                image_horizontal_offset,
                image_vertical_offset,
                tile_horizontal_offset,
                tile_vertical_offset,
                reference_tile_width,
                reference_tile_height,
            } => {
                write!(
                    f,
                    "tile size overflow: XOSiz = {:?}, YOsiz = {:?}, XTOsiz = {:?}, YTOsiz = {:?}, XTsize = {:?}, YTsize = {:?}",
                    image_horizontal_offset,
                    image_vertical_offset,
                    tile_horizontal_offset,
                    tile_vertical_offset,
                    reference_tile_width,
                    reference_tile_height,
                )
            }
            Self::TileIndexOverflow {
                tile_index,
                no_tiles,
            } => {
                write!(
                    f,
                    "tile index {} exceeds the number of tiles {}",
                    tile_index, no_tiles
                )
            }
            Self::Io(error) => write!(f, "{}", error),
        }
    }
}

impl From<io::Error> for CodestreamError {
    fn from(error: io::Error) -> Self {
        CodestreamError::Io(error)
    }
}

pub type MarkerSymbol = [u8; 2];

// Delimiting markers and marker segments
pub const MARKER_SYMBOL_SOC: MarkerSymbol = [255, 79]; // Start of code stream
pub const MARKER_SYMBOL_SOT: MarkerSymbol = [255, 144]; // Start of tile-part
pub const MARKER_SYMBOL_SOD: MarkerSymbol = [255, 147]; // Start of data
pub const MARKER_SYMBOL_EOC: MarkerSymbol = [255, 217]; // End of codestream

// Fixed information marker segments
pub const MARKER_SYMBOL_SIZ: MarkerSymbol = [255, 81]; // Image and tile size

// Functional marker segments
pub const MARKER_SYMBOL_COD: MarkerSymbol = [255, 82]; // Coding style default
pub const MARKER_SYMBOL_COC: MarkerSymbol = [255, 83]; // Coding style component
pub const MARKER_SYMBOL_RGN: MarkerSymbol = [255, 94]; // Region-of-interest
pub const MARKER_SYMBOL_QCD: MarkerSymbol = [255, 92]; // Quantization default
pub const MARKER_SYMBOL_QCC: MarkerSymbol = [255, 93]; // Quantization component
pub const MARKER_SYMBOL_POC: MarkerSymbol = [255, 95]; // Progression order change

// Pointer marker segments
pub const MARKER_SYMBOL_TLM: MarkerSymbol = [255, 85]; // Tile-part lengths
pub const MARKER_SYMBOL_PLM: MarkerSymbol = [255, 87]; // Packet length, main header
pub const MARKER_SYMBOL_PLT: MarkerSymbol = [255, 88]; // Packet length, tile-part header
pub const MARKER_SYMBOL_PPM: MarkerSymbol = [255, 96]; // Packed packet headers, main header
pub const MARKER_SYMBOL_PPT: MarkerSymbol = [255, 97]; // Packed packet headers, tile-part header

// In bit stream markers and marker segments
pub const MARKER_SYMBOL_SOP: MarkerSymbol = [255, 145]; // Start of packet
pub const MARKER_SYMBOL_EPH: MarkerSymbol = [255, 146]; // End of packet header

// Informational marker segments
pub const MARKER_SYMBOL_CRG: MarkerSymbol = [255, 99]; // Component registration
pub const MARKER_SYMBOL_COM: MarkerSymbol = [255, 100]; // Comment

pub fn marker_code(marker: MarkerSymbol) -> u16 {
    u16::from_be_bytes(marker)
}

/// Whether a marker is followed by a marker segment with a two byte length.
///
/// Delimiting markers without parameters and the range 0xFF30 to 0xFF3F
/// stand alone; every other marker carries an Lxxx field.
pub fn has_marker_segment(marker: MarkerSymbol) -> bool {
    !matches!(
        marker,
        MARKER_SYMBOL_SOC | MARKER_SYMBOL_SOD | MARKER_SYMBOL_EOC | MARKER_SYMBOL_EPH
    ) && !(marker[0] == 0xFF && (0x30..=0x3F).contains(&marker[1]))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressionOrder {
    // 0000 0000 Layer-resolution level-component-position progression
    LRCP,

    // 0000 0001 Resolution level-layer-component-position progression
    RLCP,

    // 0000 0010 Resolution level-position-component-layer progression
    RPCL,

    // 0000 0011 Position-component-resolution level-layer progression
    PCRL,

    // 0000 0100 Component-position-resolution level-layer progression
    CPRL,

    // All other values reserved
    Reserved { value: u8 },
}

impl ProgressionOrder {
    pub fn new(value: u8) -> ProgressionOrder {
        match value {
            0b0000_0000 => ProgressionOrder::LRCP,
            0b0000_0001 => ProgressionOrder::RLCP,
            0b0000_0010 => ProgressionOrder::RPCL,
            0b0000_0011 => ProgressionOrder::PCRL,
            0b0000_0100 => ProgressionOrder::CPRL,
            _ => ProgressionOrder::Reserved { value },
        }
    }
}

/// Location of a marker segment, relative to the codestream start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerInfo {
    pub marker: MarkerSymbol,
    /// Offset of the marker code.
    pub offset: u64,
    /// Lxxx, zero for markers without a segment.
    pub length: u16,
}

// A.5.1
//
// Image and tile size (SIZ)
//
// Provides information about the uncompressed image such as the width and
// height of the reference grid, the width and height of the tiles, the number
// of components, component bit depth, and the separation of component samples
// with respect to the reference grid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageAndTileSizeMarkerSegment {
    offset: u64,
    length: u16,

    // Rsiz
    decoder_capabilities: [u8; 2],

    // Xsiz, Ysiz: size of the reference grid.
    reference_grid_width: [u8; 4],
    reference_grid_height: [u8; 4],

    // XOsiz, YOsiz: offset from the origin of the reference grid to the image
    // area.
    image_horizontal_offset: [u8; 4],
    image_vertical_offset: [u8; 4],

    // XTsiz, YTsiz: size of one reference tile.
    reference_tile_width: [u8; 4],
    reference_tile_height: [u8; 4],

    // XTOsiz, YTOsiz: offset from the origin of the reference grid to the
    // first tile.
    tile_horizontal_offset: [u8; 4],
    tile_vertical_offset: [u8; 4],

    // Csiz
    no_components: [u8; 2],

    // Ssiz, XRsiz, YRsiz for every component in index order.
    precision: Vec<u8>,
    horizontal_separation: Vec<u8>,
    vertical_separation: Vec<u8>,
}

impl ImageAndTileSizeMarkerSegment {
    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn decoder_capabilities(&self) -> u16 {
        u16::from_be_bytes(self.decoder_capabilities)
    }

    pub fn reference_grid_width(&self) -> u32 {
        u32::from_be_bytes(self.reference_grid_width)
    }
    pub fn reference_grid_height(&self) -> u32 {
        u32::from_be_bytes(self.reference_grid_height)
    }

    pub fn image_horizontal_offset(&self) -> u32 {
        u32::from_be_bytes(self.image_horizontal_offset)
    }
    pub fn image_vertical_offset(&self) -> u32 {
        u32::from_be_bytes(self.image_vertical_offset)
    }

    pub fn reference_tile_width(&self) -> u32 {
        u32::from_be_bytes(self.reference_tile_width)
    }
    pub fn reference_tile_height(&self) -> u32 {
        u32::from_be_bytes(self.reference_tile_height)
    }

    pub fn tile_horizontal_offset(&self) -> u32 {
        u32::from_be_bytes(self.tile_horizontal_offset)
    }
    pub fn tile_vertical_offset(&self) -> u32 {
        u32::from_be_bytes(self.tile_vertical_offset)
    }

    pub fn no_components(&self) -> u16 {
        u16::from_be_bytes(self.no_components)
    }

    /// Component bit depth, Ssiz + 1 without the sign bit.
    pub fn precision(&self, i: usize) -> Option<u8> {
        self.precision.get(i).map(|ssiz| (ssiz & 0x7f) + 1)
    }

    pub fn values_are_signed(&self, i: usize) -> Option<bool> {
        self.precision.get(i).map(|ssiz| (ssiz & 0x80) == 0x80)
    }

    pub fn horizontal_separation(&self, i: usize) -> Option<u8> {
        self.horizontal_separation.get(i).copied()
    }

    pub fn vertical_separation(&self, i: usize) -> Option<u8> {
        self.vertical_separation.get(i).copied()
    }

    // The number of tiles in the X direction (numXtiles) and the Y direction
    // (numYtiles) is the following
    //
    // numXtiles = ⌈(Xsiz - XTOsiz) / XTsiz⌉
    // numYtiles = ⌈(Ysiz - YTOsiz) / YTsiz⌉
    pub fn num_x_tiles(&self) -> u32 {
        ceil_div(
            (self.reference_grid_width() - self.tile_horizontal_offset()) as u64,
            self.reference_tile_width() as u64,
        ) as u32
    }
    pub fn num_y_tiles(&self) -> u32 {
        ceil_div(
            (self.reference_grid_height() - self.tile_vertical_offset()) as u64,
            self.reference_tile_height() as u64,
        ) as u32
    }

    pub fn no_tiles(&self) -> u32 {
        self.num_x_tiles() * self.num_y_tiles()
    }

    /// Area of tile `t` on the reference grid at full resolution.
    pub fn tile_rect(&self, t: u32) -> Rect {
        let p = t % self.num_x_tiles();
        let q = t / self.num_x_tiles();
        let (x0, x1) = tile_range(
            self.image_horizontal_offset(),
            self.reference_grid_width(),
            self.tile_horizontal_offset(),
            self.reference_tile_width(),
            p,
            0,
        );
        let (y0, y1) = tile_range(
            self.image_vertical_offset(),
            self.reference_grid_height(),
            self.tile_vertical_offset(),
            self.reference_tile_height(),
            q,
            0,
        );
        Rect { x0, y0, x1, y1 }
    }

    /// Samples of component `c` inside tile `t` (B.3).
    pub fn tile_component_rect(&self, t: u32, c: usize) -> Rect {
        let tile = self.tile_rect(t);
        let dx = self.horizontal_separation(c).unwrap_or(1).max(1) as u64;
        let dy = self.vertical_separation(c).unwrap_or(1).max(1) as u64;
        Rect {
            x0: ceil_div(tile.x0 as u64, dx) as u32,
            y0: ceil_div(tile.y0 as u64, dy) as u32,
            x1: ceil_div(tile.x1 as u64, dx) as u32,
            y1: ceil_div(tile.y1 as u64, dy) as u32,
        }
    }
}

// A.6.1, Table A.13
pub const CODING_STYLE_PRECINCTS: u8 = 0b0000_0001;
pub const CODING_STYLE_SOP: u8 = 0b0000_0010;
pub const CODING_STYLE_EPH: u8 = 0b0000_0100;

// A.6.1
//
// Coding style default (COD)
//
// Describes the coding style, number of decomposition levels, and layering
// that is the default used for compressing all components of an image (if in
// the main header) or a tile (if in the tile-part header).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodingStyleMarkerSegment {
    offset: u64,
    length: u16,
    coding_style: [u8; 1],
    progression_order: [u8; 1],
    no_layers: [u8; 2],
    multiple_component_transformation: [u8; 1],
    coding_style_parameters: CodingStyleParameters,
}

impl CodingStyleMarkerSegment {
    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn coding_style(&self) -> u8 {
        self.coding_style[0]
    }

    pub fn uses_sop(&self) -> bool {
        self.coding_style[0] & CODING_STYLE_SOP != 0
    }

    pub fn uses_eph(&self) -> bool {
        self.coding_style[0] & CODING_STYLE_EPH != 0
    }

    pub fn progression_order(&self) -> ProgressionOrder {
        ProgressionOrder::new(self.progression_order[0])
    }

    pub fn no_layers(&self) -> u16 {
        u16::from_be_bytes(self.no_layers)
    }

    pub fn coding_style_parameters(&self) -> &CodingStyleParameters {
        &self.coding_style_parameters
    }
}

// A.6.2
//
// Coding style component (COC)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodingStyleComponentSegment {
    offset: u64,
    length: u16,
    index: u16,
    coding_style: [u8; 1],
    coding_style_parameters: CodingStyleParameters,
}

impl CodingStyleComponentSegment {
    pub fn component_index(&self) -> u16 {
        self.index
    }

    pub fn coding_style_parameters(&self) -> &CodingStyleParameters {
        &self.coding_style_parameters
    }
}

// A.12 – Coding style parameter values shared by COD and COC
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodingStyleParameters {
    coding_style: u8,
    no_decomposition_levels: u8,
    code_block_width: u8,
    code_block_height: u8,
    code_block_style: u8,
    transformation: u8,
    // One byte per resolution level, PPx in the low and PPy in the high
    // nibble. Absent when the entropy coder default of 15 applies.
    precinct_size: Vec<u8>,
}

impl CodingStyleParameters {
    pub fn no_decomposition_levels(&self) -> u8 {
        self.no_decomposition_levels
    }

    pub fn code_block_width(&self) -> u16 {
        2u16.pow(((self.code_block_width & 0b0000_1111) + 2) as u32)
    }

    pub fn code_block_height(&self) -> u16 {
        2u16.pow(((self.code_block_height & 0b0000_1111) + 2) as u32)
    }

    pub fn has_defined_precinct_size(&self) -> bool {
        self.coding_style & CODING_STYLE_PRECINCTS != 0
    }

    /// Precinct width and height exponents (PPx, PPy) of resolution `r`.
    pub fn precinct_exponents(&self, r: u8) -> (u8, u8) {
        match self.precinct_size.get(r as usize) {
            Some(value) if self.has_defined_precinct_size() => (value & 0x0f, value >> 4),
            _ => (15, 15),
        }
    }
}

fn decode_length<R: io::Read>(reader: &mut R) -> Result<u16, CodestreamError> {
    let mut length: [u8; 2] = [0; 2];
    reader.read_exact(&mut length)?;
    Ok(u16::from_be_bytes(length))
}

fn skip_segment<R: io::Read + io::Seek>(
    reader: &mut R,
    marker: MarkerSymbol,
) -> Result<u16, CodestreamError> {
    let offset = reader.stream_position()? - 2;
    let length = decode_length(reader)?;
    if length < 2 {
        return Err(CodestreamError::MarkerError {
            marker,
            error: format!("segment length {} at byte offset {}", length, offset),
        });
    }
    reader.seek(io::SeekFrom::Current(length as i64 - 2))?;
    Ok(length)
}

/// Decodes SIZ with the reader positioned after the marker code.
pub fn decode_siz<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<ImageAndTileSizeMarkerSegment, CodestreamError> {
    info!("SIZ start at byte offset {}", reader.stream_position()? - 2);
    let mut segment = ImageAndTileSizeMarkerSegment {
        offset: reader.stream_position()? - 2,
        length: decode_length(reader)?,
        ..Default::default()
    };

    reader.read_exact(&mut segment.decoder_capabilities)?;
    reader.read_exact(&mut segment.reference_grid_width)?;
    reader.read_exact(&mut segment.reference_grid_height)?;
    reader.read_exact(&mut segment.image_horizontal_offset)?;
    reader.read_exact(&mut segment.image_vertical_offset)?;
    reader.read_exact(&mut segment.reference_tile_width)?;
    reader.read_exact(&mut segment.reference_tile_height)?;
    reader.read_exact(&mut segment.tile_horizontal_offset)?;
    reader.read_exact(&mut segment.tile_vertical_offset)?;
    reader.read_exact(&mut segment.no_components)?;

    let no_components = segment.no_components() as usize;
    if no_components == 0 || segment.length as usize != 38 + 3 * no_components {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_SIZ,
            error: format!(
                "length {} does not match {} components",
                segment.length, no_components
            ),
        });
    }

    let mut components = vec![0u8; 3 * no_components];
    reader.read_exact(&mut components)?;
    for chunk in components.chunks(3) {
        segment.precision.push(chunk[0]);
        segment.horizontal_separation.push(chunk[1]);
        segment.vertical_separation.push(chunk[2]);
    }

    if segment.reference_tile_width() == 0
        || segment.reference_tile_height() == 0
        || segment.image_horizontal_offset() >= segment.reference_grid_width()
        || segment.image_vertical_offset() >= segment.reference_grid_height()
    {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_SIZ,
            error: "empty image area or tile size".to_string(),
        });
    }

    // 0 ≤ XTOsiz ≤ XOsiz
    // 0 ≤ YTOsiz ≤ YOsiz
    if segment.tile_horizontal_offset() > segment.image_horizontal_offset()
        || segment.tile_vertical_offset() > segment.image_vertical_offset()
    {
        return Err(CodestreamError::TileGridOffsetOverflow {
            tile_horizontal_offset: segment.tile_horizontal_offset(),
            image_horizontal_offset: segment.image_horizontal_offset(),
            tile_vertical_offset: segment.tile_vertical_offset(),
            image_vertical_offset: segment.image_vertical_offset(),
        });
    }

    // XTsiz + XTOsiz > XOsiz
    // YTsiz + YTOsiz > YOsiz
    if (segment.reference_tile_width() as u64 + segment.tile_horizontal_offset() as u64)
        <= segment.image_horizontal_offset() as u64
        || (segment.reference_tile_height() as u64 + segment.tile_vertical_offset() as u64)
            <= segment.image_vertical_offset() as u64
    {
        return Err(CodestreamError::TileSizeOverflow {
            reference_tile_width: segment.reference_tile_width(),
            tile_horizontal_offset: segment.tile_horizontal_offset(),
            image_horizontal_offset: segment.image_horizontal_offset(),
            reference_tile_height: segment.reference_tile_height(),
            tile_vertical_offset: segment.tile_vertical_offset(),
            image_vertical_offset: segment.image_vertical_offset(),
        });
    }
    info!("SIZ end at byte offset {}", reader.stream_position()?);

    Ok(segment)
}

fn decode_coding_style_parameters<R: io::Read>(
    reader: &mut R,
    coding_style: u8,
    remaining: u16,
) -> Result<CodingStyleParameters, CodestreamError> {
    let mut fixed = [0u8; 5];
    reader.read_exact(&mut fixed)?;
    let mut parameters = CodingStyleParameters {
        coding_style,
        no_decomposition_levels: fixed[0],
        code_block_width: fixed[1],
        code_block_height: fixed[2],
        code_block_style: fixed[3],
        transformation: fixed[4],
        precinct_size: vec![],
    };

    if parameters.has_defined_precinct_size() {
        // The first parameter corresponds to the N_L LL sub-band, each
        // successive parameter to the next resolution level.
        let count = parameters.no_decomposition_levels as u16 + 1;
        if remaining < 5 + count {
            return Err(CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_COD,
                error: format!("{} precinct sizes do not fit the segment", count),
            });
        }
        parameters.precinct_size = vec![0; count as usize];
        reader.read_exact(&mut parameters.precinct_size)?;
    }

    Ok(parameters)
}

/// Decodes COD with the reader positioned after the marker code.
pub fn decode_cod<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<CodingStyleMarkerSegment, CodestreamError> {
    info!("COD start at byte offset {}", reader.stream_position()? - 2);
    let start = reader.stream_position()?;
    let mut segment = CodingStyleMarkerSegment {
        offset: start - 2,
        length: decode_length(reader)?,
        ..Default::default()
    };
    if segment.length < 12 {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_COD,
            error: format!("segment length {}", segment.length),
        });
    }

    reader.read_exact(&mut segment.coding_style)?;
    reader.read_exact(&mut segment.progression_order)?;
    reader.read_exact(&mut segment.no_layers)?;
    reader.read_exact(&mut segment.multiple_component_transformation)?;

    segment.coding_style_parameters =
        decode_coding_style_parameters(reader, segment.coding_style[0], segment.length - 7)?;
    reader.seek(io::SeekFrom::Start(start + segment.length as u64))?;
    info!("COD end at byte offset {}", reader.stream_position()?);

    Ok(segment)
}

/// Decodes COC with the reader positioned after the marker code.
pub fn decode_coc<R: io::Read + io::Seek>(
    reader: &mut R,
    no_components: u16,
) -> Result<CodingStyleComponentSegment, CodestreamError> {
    info!("COC start at byte offset {}", reader.stream_position()? - 2);
    let start = reader.stream_position()?;
    let mut segment = CodingStyleComponentSegment {
        offset: start - 2,
        length: decode_length(reader)?,
        ..Default::default()
    };

    // Either 8 or 16 bits depending on Csiz value.
    let index_width = if no_components < 257 { 1 } else { 2 };
    if segment.length < 8 + index_width {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_COC,
            error: format!("segment length {}", segment.length),
        });
    }
    segment.index = if index_width == 1 {
        let mut buffer = [0u8; 1];
        reader.read_exact(&mut buffer)?;
        buffer[0] as u16
    } else {
        decode_length(reader)?
    };
    if segment.index >= no_components {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_COC,
            error: format!("component index {} out of range", segment.index),
        });
    }

    reader.read_exact(&mut segment.coding_style)?;
    segment.coding_style_parameters = decode_coding_style_parameters(
        reader,
        segment.coding_style[0],
        segment.length - 3 - index_width,
    )?;
    reader.seek(io::SeekFrom::Start(start + segment.length as u64))?;
    info!("COC end at byte offset {}", reader.stream_position()?);

    Ok(segment)
}

// A.4.2
//
// Start of tile-part (SOT)
//
// Marks the beginning of a tile-part, the index of its tile, and the index of
// the tile-part. The tile-parts of a given tile shall appear in order (see
// TPsot) in the codestream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartOfTileSegment {
    // Isot: Tile index, in raster order starting at 0.
    tile_index: [u8; 2],

    // Psot: Length, in bytes, from the beginning of the first byte of this SOT
    // marker segment of the tile-part to the end of the data of that
    // tile-part. If 0, the tile-part runs until the EOC marker.
    tile_length: [u8; 4],

    // TPsot: Tile-part index.
    tile_part_index: [u8; 1],

    // TNsot: Number of tile-parts of the tile, 0 when not specified here.
    no_tile_parts: [u8; 1],
}

/// SOT marker plus its fixed ten byte segment.
pub const SOT_SEGMENT_LENGTH: u64 = 12;

impl StartOfTileSegment {
    pub fn new(tile_index: u16, tile_length: u32, tile_part_index: u8, no_tile_parts: u8) -> Self {
        StartOfTileSegment {
            tile_index: tile_index.to_be_bytes(),
            tile_length: tile_length.to_be_bytes(),
            tile_part_index: [tile_part_index],
            no_tile_parts: [no_tile_parts],
        }
    }

    pub fn tile_index(&self) -> u16 {
        u16::from_be_bytes(self.tile_index)
    }

    pub fn tile_length(&self) -> u32 {
        u32::from_be_bytes(self.tile_length)
    }

    pub fn tile_part_index(&self) -> u8 {
        self.tile_part_index[0]
    }

    pub fn no_tile_parts(&self) -> u8 {
        self.no_tile_parts[0]
    }

    /// Marker code and segment, twelve bytes.
    pub fn encode(&self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[0..2].copy_from_slice(&MARKER_SYMBOL_SOT);
        // Lsot
        bytes[2..4].copy_from_slice(&10u16.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.tile_index);
        bytes[6..10].copy_from_slice(&self.tile_length);
        bytes[10] = self.tile_part_index[0];
        bytes[11] = self.no_tile_parts[0];
        bytes
    }
}

/// Decodes SOT with the reader positioned after the marker code.
pub fn decode_sot<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<StartOfTileSegment, CodestreamError> {
    debug!("SOT start at byte offset {}", reader.stream_position()? - 2);
    let length = decode_length(reader)?;
    if length != 10 {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_SOT,
            error: format!("segment length {}", length),
        });
    }
    let mut segment = StartOfTileSegment::default();
    reader.read_exact(&mut segment.tile_index)?;
    reader.read_exact(&mut segment.tile_length)?;
    reader.read_exact(&mut segment.tile_part_index)?;
    reader.read_exact(&mut segment.no_tile_parts)?;
    Ok(segment)
}

/// Decodes the packet lengths of a PLT or PLM segment body, each a
/// sequence of 7 bit groups, most significant first, with the high bit set
/// on every byte but the last.
fn decode_packet_lengths(bytes: &[u8], lengths: &mut Vec<u32>) -> Result<(), CodestreamError> {
    let mut value: u32 = 0;
    let mut pending = false;
    for byte in bytes {
        value = value
            .checked_mul(128)
            .ok_or_else(|| CodestreamError::MarkerError {
                marker: MARKER_SYMBOL_PLT,
                error: "packet length overflow".to_string(),
            })?
            | (byte & 0x7f) as u32;
        pending = byte & 0x80 != 0;
        if !pending {
            lengths.push(value);
            value = 0;
        }
    }
    if pending {
        return Err(CodestreamError::MarkerError {
            marker: MARKER_SYMBOL_PLT,
            error: "packet length continues past the segment".to_string(),
        });
    }
    Ok(())
}

/// Encodes packet lengths the way a PLT body carries them.
pub fn encode_packet_length(length: u32, out: &mut Vec<u8>) {
    let mut groups = vec![(length & 0x7f) as u8];
    let mut rest = length >> 7;
    while rest > 0 {
        groups.push((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    out.extend(groups.iter().rev());
}

/// Main header markers of interest, located relative to the codestream start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MainHeader {
    pub siz: ImageAndTileSizeMarkerSegment,
    pub cod: CodingStyleMarkerSegment,
    pub cocs: Vec<CodingStyleComponentSegment>,
    pub markers: Vec<MarkerInfo>,
    /// Bytes from SOC up to the first SOT (or EOC).
    pub length: u64,
    pub has_progression_changes: bool,
    pub has_packed_headers: bool,
}

impl MainHeader {
    pub fn siz(&self) -> &ImageAndTileSizeMarkerSegment {
        &self.siz
    }

    pub fn cod(&self) -> &CodingStyleMarkerSegment {
        &self.cod
    }
}

/// Decodes the main header with the reader positioned on SOC. Every offset
/// recorded is relative to the SOC position.
pub fn decode_main_header<R: io::Read + io::Seek>(
    reader: &mut R,
) -> Result<MainHeader, CodestreamError> {
    let start = reader.stream_position()?;
    let mut marker_type: MarkerSymbol = [0; 2];

    reader.read_exact(&mut marker_type)?;
    if marker_type != MARKER_SYMBOL_SOC {
        return Err(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_SOC,
        });
    }

    // SIZ shall immediately follow SOC
    reader.read_exact(&mut marker_type)?;
    if marker_type != MARKER_SYMBOL_SIZ {
        return Err(CodestreamError::MarkerUnexpected {
            marker: marker_type,
            offset: reader.stream_position()? - 2 - start,
        });
    }
    let mut header = MainHeader {
        siz: decode_siz(reader)?,
        ..Default::default()
    };
    header.siz.offset -= start;
    header.markers.push(MarkerInfo {
        marker: MARKER_SYMBOL_SIZ,
        offset: header.siz.offset,
        length: header.siz.length,
    });
    let no_components = header.siz.no_components();
    let mut has_cod = false;

    loop {
        let offset = reader.stream_position()?;
        reader.read_exact(&mut marker_type)?;
        match marker_type {
            MARKER_SYMBOL_SOT | MARKER_SYMBOL_EOC => {
                reader.seek(io::SeekFrom::Start(offset))?;
                break;
            }
            MARKER_SYMBOL_COD => {
                header.cod = decode_cod(reader)?;
                header.cod.offset -= start;
                has_cod = true;
            }
            MARKER_SYMBOL_COC => {
                let mut coc = decode_coc(reader, no_components)?;
                coc.offset -= start;
                header.cocs.retain(|c| c.index != coc.index);
                header.cocs.push(coc);
            }
            MARKER_SYMBOL_POC => {
                header.has_progression_changes = true;
                skip_segment(reader, marker_type)?;
            }
            MARKER_SYMBOL_PPM => {
                header.has_packed_headers = true;
                skip_segment(reader, marker_type)?;
            }
            marker if marker[0] == 0xFF && has_marker_segment(marker) => {
                skip_segment(reader, marker)?;
            }
            _ => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker: marker_type,
                    offset: offset - start,
                });
            }
        }
        let end = reader.stream_position()?;
        header.markers.push(MarkerInfo {
            marker: marker_type,
            offset: offset - start,
            length: (end - offset - 2) as u16,
        });
    }

    if !has_cod {
        return Err(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_COD,
        });
    }
    if !header.markers.iter().any(|m| m.marker == MARKER_SYMBOL_QCD) {
        return Err(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_QCD,
        });
    }

    header.length = reader.stream_position()? - start;
    info!("main header length {}", header.length);
    Ok(header)
}

/// Decodes a main header held in memory.
pub fn decode_main_header_bytes(bytes: &[u8]) -> Result<MainHeader, CodestreamError> {
    let mut reader = io::Cursor::new(bytes);
    decode_main_header(&mut reader)
}

// A.4
//
// A tile-part header: SOT followed by optional COD, COC, QCD, QCC, RGN, POC,
// PPT, PLT and COM segments, terminated by SOD.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileHeader {
    pub sot: StartOfTileSegment,
    pub cod: Option<CodingStyleMarkerSegment>,
    pub cocs: Vec<CodingStyleComponentSegment>,
    pub packet_lengths: Vec<u32>,
    /// Offset of the SOD marker, relative to the SOT marker.
    pub data_offset: u64,
    pub has_progression_changes: bool,
    pub has_packed_headers: bool,
}

impl TileHeader {
    /// Bytes between the end of the SOT segment and the SOD marker.
    pub fn markers_length(&self) -> u64 {
        self.data_offset - SOT_SEGMENT_LENGTH
    }
}

/// Decodes a tile-part header with the reader positioned on SOT. The reader
/// is left after the SOD marker.
pub fn decode_tile_header<R: io::Read + io::Seek>(
    reader: &mut R,
    no_components: u16,
) -> Result<TileHeader, CodestreamError> {
    let start = reader.stream_position()?;
    let mut marker_type: MarkerSymbol = [0; 2];

    reader.read_exact(&mut marker_type)?;
    if marker_type != MARKER_SYMBOL_SOT {
        return Err(CodestreamError::MarkerUnexpected {
            marker: marker_type,
            offset: start,
        });
    }
    let mut header = TileHeader {
        sot: decode_sot(reader)?,
        ..Default::default()
    };

    loop {
        let offset = reader.stream_position()?;
        reader.read_exact(&mut marker_type)?;
        match marker_type {
            MARKER_SYMBOL_SOD => {
                header.data_offset = offset - start;
                break;
            }
            MARKER_SYMBOL_COD => header.cod = Some(decode_cod(reader)?),
            MARKER_SYMBOL_COC => {
                let coc = decode_coc(reader, no_components)?;
                header.cocs.retain(|c| c.index != coc.index);
                header.cocs.push(coc);
            }
            MARKER_SYMBOL_PLT => {
                let length = decode_length(reader)?;
                if length < 3 {
                    return Err(CodestreamError::MarkerError {
                        marker: MARKER_SYMBOL_PLT,
                        error: format!("segment length {}", length),
                    });
                }
                // Zplt
                let mut index = [0u8; 1];
                reader.read_exact(&mut index)?;
                let mut body = vec![0u8; length as usize - 3];
                reader.read_exact(&mut body)?;
                decode_packet_lengths(&body, &mut header.packet_lengths)?;
            }
            MARKER_SYMBOL_POC => {
                header.has_progression_changes = true;
                skip_segment(reader, marker_type)?;
            }
            MARKER_SYMBOL_PPT => {
                header.has_packed_headers = true;
                skip_segment(reader, marker_type)?;
            }
            marker if marker[0] == 0xFF && has_marker_segment(marker) => {
                skip_segment(reader, marker)?;
            }
            _ => {
                return Err(CodestreamError::MarkerUnexpected {
                    marker: marker_type,
                    offset,
                });
            }
        }
    }

    Ok(header)
}

/// Decodes the marker segments of a tile header held in memory, as carried
/// by a tile header data-bin: no SOT segment and no SOD marker.
pub fn decode_tile_header_markers(
    bytes: &[u8],
    no_components: u16,
) -> Result<TileHeader, CodestreamError> {
    let mut framed = Vec::with_capacity(bytes.len() + 14);
    framed.extend_from_slice(&StartOfTileSegment::new(0, 0, 0, 0).encode());
    framed.extend_from_slice(bytes);
    framed.extend_from_slice(&MARKER_SYMBOL_SOD);
    let mut reader = io::Cursor::new(framed.as_slice());
    decode_tile_header(&mut reader, no_components)
}
