use log::{debug, info};
use std::error;
use std::fmt;
use std::io;

mod index;
mod writer;

pub use index::{
    CodestreamFinderBox, FragmentArrayIndexBox, FragmentEntry, HeaderIndexTableBox,
    ManifestBox, ManifestEntry, MarkerIndexEntry,
};
pub use writer::BoxWriter;

#[derive(Debug)]
pub enum JP2Error {
    InvalidSignature { signature: [u8; 4], offset: u64 },
    InvalidBrand { brand: [u8; 4], offset: u64 },
    BoxUnexpected { box_type: BoxType, offset: u64 },
    BoxMalformed { box_type: BoxType, offset: u64 },
    BoxMissing { box_type: BoxType },
    BoxLengthReserved { length: u32, offset: u64 },
    BoxOverflow { box_type: BoxType, offset: u64, length: u64 },
    UnsupportedVersion { box_type: BoxType, version: u8 },
    Io(io::Error),
}

impl error::Error for JP2Error {}
impl fmt::Display for JP2Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidSignature { signature, offset } => {
                write!(
                    f,
                    "invalid signature {:02X?} at offset {}",
                    signature, offset
                )
            }
            Self::InvalidBrand { brand, offset } => {
                write!(
                    f,
                    "invalid brand {:?} at offset {}",
                    type_name(brand),
                    offset
                )
            }
            Self::BoxUnexpected { box_type, offset } => {
                write!(
                    f,
                    "unexpected box type {:?} at offset {}",
                    type_name(box_type),
                    offset
                )
            }
            Self::BoxMalformed { box_type, offset } => {
                write!(
                    f,
                    "malformed box type {:?} at offset {}",
                    type_name(box_type),
                    offset
                )
            }
            Self::BoxMissing { box_type } => {
                write!(f, "box type {:?} missing", type_name(box_type))
            }
            Self::BoxLengthReserved { length, offset } => {
                write!(
                    f,
                    "unsupported reserved box length {} at offset {}",
                    length, offset
                )
            }
            Self::BoxOverflow {
                box_type,
                offset,
                length,
            } => {
                write!(
                    f,
                    "box type {:?} at offset {} with length {} overflows its superbox",
                    type_name(box_type),
                    offset,
                    length
                )
            }
            Self::UnsupportedVersion { box_type, version } => {
                write!(
                    f,
                    "unsupported version {} of box type {:?}",
                    version,
                    type_name(box_type)
                )
            }
            Self::Io(error) => write!(f, "{}", error),
        }
    }
}

impl From<io::Error> for JP2Error {
    fn from(error: io::Error) -> Self {
        JP2Error::Io(error)
    }
}

pub type BoxType = [u8; 4];

/// Printable form of a box type, non-ASCII bytes are replaced.
pub fn type_name(box_type: &BoxType) -> String {
    String::from_utf8_lossy(box_type).into_owned()
}

// jP\040\040 (0x6A50 2020)
pub const BOX_TYPE_SIGNATURE: BoxType = [106, 80, 32, 32];
pub const BOX_TYPE_FILE_TYPE: BoxType = [102, 116, 121, 112];
pub const BOX_TYPE_HEADER: BoxType = [106, 112, 50, 104];
pub const BOX_TYPE_IMAGE_HEADER: BoxType = [105, 104, 100, 114];
pub const BOX_TYPE_BITS_PER_COMPONENT: BoxType = [98, 112, 99, 99];
pub const BOX_TYPE_COLOUR_SPECIFICATION: BoxType = [99, 111, 108, 114];
pub const BOX_TYPE_RESOLUTION: BoxType = [114, 101, 115, 32];
pub const BOX_TYPE_CONTIGUOUS_CODESTREAM: BoxType = [106, 112, 50, 99];
pub const BOX_TYPE_INTELLECTUAL_PROPERTY: BoxType = [106, 112, 50, 105];
pub const BOX_TYPE_XML: BoxType = [120, 109, 108, 32];
pub const BOX_TYPE_UUID: BoxType = [117, 117, 105, 100];
pub const BOX_TYPE_UUID_INFO: BoxType = [117, 105, 110, 102];
pub const BOX_TYPE_ASSOCIATION: BoxType = [97, 115, 111, 99];

// ISO/IEC 15444-9 Annex I, index table boxes
pub const BOX_TYPE_CODESTREAM_INDEX: BoxType = [99, 105, 100, 120];
pub const BOX_TYPE_CODESTREAM_FINDER: BoxType = [99, 112, 116, 114];
pub const BOX_TYPE_MANIFEST: BoxType = [109, 97, 110, 102];
pub const BOX_TYPE_HEADER_INDEX_TABLE: BoxType = [109, 104, 105, 120];
pub const BOX_TYPE_TILE_PART_INDEX: BoxType = [116, 112, 105, 120];
pub const BOX_TYPE_TILE_HEADER_INDEX: BoxType = [116, 104, 105, 120];
pub const BOX_TYPE_PRECINCT_PACKET_INDEX: BoxType = [112, 112, 105, 120];
pub const BOX_TYPE_PACKET_HEADER_INDEX: BoxType = [112, 104, 105, 120];
pub const BOX_TYPE_FRAGMENT_ARRAY_INDEX: BoxType = [102, 97, 105, 120];
pub const BOX_TYPE_INDEX_FINDER: BoxType = [105, 112, 116, 114];
pub const BOX_TYPE_FILE_INDEX: BoxType = [102, 105, 100, 120];
pub const BOX_TYPE_PROXY: BoxType = [112, 114, 120, 121];

// ISO/IEC 15444-9 Annex A.3.6.3, placeholder
pub const BOX_TYPE_PLACEHOLDER: BoxType = [112, 104, 108, 100];

// jp2\040
pub const BRAND_JP2: [u8; 4] = [106, 112, 50, 32];

// <CR><LF><0x87><LF> (0x0D0A 870A).
pub const SIGNATURE_MAGIC: [u8; 4] = [13, 10, 135, 10];

/// Superboxes whose contents are a sequence of boxes.
pub fn is_superbox(box_type: &BoxType) -> bool {
    matches!(
        *box_type,
        BOX_TYPE_HEADER
            | BOX_TYPE_RESOLUTION
            | BOX_TYPE_UUID_INFO
            | BOX_TYPE_ASSOCIATION
            | BOX_TYPE_CODESTREAM_INDEX
            | BOX_TYPE_TILE_PART_INDEX
            | BOX_TYPE_TILE_HEADER_INDEX
            | BOX_TYPE_PRECINCT_PACKET_INDEX
            | BOX_TYPE_PACKET_HEADER_INDEX
            | BOX_TYPE_FILE_INDEX
    )
}

/// Boxes that only serve the server side and are never delivered as
/// metadata.
pub fn is_index_box(box_type: &BoxType) -> bool {
    matches!(
        *box_type,
        BOX_TYPE_CODESTREAM_INDEX
            | BOX_TYPE_INDEX_FINDER
            | BOX_TYPE_FILE_INDEX
            | BOX_TYPE_PROXY
            | BOX_TYPE_PACKET_HEADER_INDEX
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxHeader {
    /// Length of the box contents, excluding LBox, TBox and XLBox.
    pub box_length: u64,
    pub box_type: BoxType,
    /// 8, or 16 when the XLBox field is present.
    pub header_length: u8,
}

impl BoxHeader {
    pub fn new(box_type: BoxType, box_length: u64) -> BoxHeader {
        let header_length = if box_length + 8 > u32::MAX as u64 {
            16
        } else {
            8
        };
        BoxHeader {
            box_length,
            box_type,
            header_length,
        }
    }

    pub fn total_length(&self) -> u64 {
        self.box_length + self.header_length as u64
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.header_length as usize);
        if self.header_length == 16 {
            bytes.extend_from_slice(&1u32.to_be_bytes());
            bytes.extend_from_slice(&self.box_type);
            bytes.extend_from_slice(&self.total_length().to_be_bytes());
        } else {
            bytes.extend_from_slice(&(self.total_length() as u32).to_be_bytes());
            bytes.extend_from_slice(&self.box_type);
        }
        bytes
    }

    /// Decodes a header previously produced by [`BoxHeader::encode`] or
    /// read verbatim from a file. A zero LBox yields a zero content length.
    pub fn from_bytes(bytes: &[u8]) -> Result<BoxHeader, JP2Error> {
        let mut reader = io::Cursor::new(bytes);
        decode_box_header(&mut reader, u64::MAX)
    }
}

/// Decodes the LBox, TBox and optional XLBox fields at the current
/// position. `limit` is the end of the enclosing superbox or file and is
/// used for a zero LBox.
pub fn decode_box_header<R: io::Read + io::Seek>(
    reader: &mut R,
    limit: u64,
) -> Result<BoxHeader, JP2Error> {
    let offset = reader.stream_position()?;
    let mut header_length = 8;
    let mut box_length: [u8; 4] = [0; 4];
    let mut box_type: [u8; 4] = [0; 4];

    reader.read_exact(&mut box_length)?;
    reader.read_exact(&mut box_type)?;

    let lbox = u32::from_be_bytes(box_length);
    let box_length_value = match lbox {
        // The box contains all bytes up to the end of its superbox or the
        // file.
        0 => {
            if limit == u64::MAX {
                0
            } else {
                limit
                    .checked_sub(offset + 8)
                    .ok_or(JP2Error::BoxMalformed { box_type, offset })?
            }
        }
        1 => {
            let mut xl_length: [u8; 8] = [0; 8];
            reader.read_exact(&mut xl_length)?;
            header_length = 16;
            u64::from_be_bytes(xl_length)
                .checked_sub(16)
                .ok_or(JP2Error::BoxMalformed { box_type, offset })?
        }
        // The values 2–7 are reserved for ISO use.
        2..=7 => {
            return Err(JP2Error::BoxLengthReserved {
                length: lbox,
                offset,
            })
        }
        _ => lbox as u64 - 8,
    };

    if limit != u64::MAX && offset + header_length as u64 + box_length_value > limit {
        return Err(JP2Error::BoxOverflow {
            box_type,
            offset,
            length: box_length_value + header_length as u64,
        });
    }

    Ok(BoxHeader {
        box_length: box_length_value,
        box_type,
        header_length,
    })
}

/// A box located in a file, with links into the owning [`BoxTree`].
#[derive(Debug, Clone, PartialEq)]
pub struct BoxNode {
    pub header: BoxHeader,
    /// Byte offset of the LBox field.
    pub offset: u64,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl BoxNode {
    pub fn box_type(&self) -> BoxType {
        self.header.box_type
    }

    pub fn length(&self) -> u64 {
        self.header.total_length()
    }

    pub fn contents_offset(&self) -> u64 {
        self.offset + self.header.header_length as u64
    }

    pub fn contents_length(&self) -> u64 {
        self.header.box_length
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BoxTree {
    nodes: Vec<BoxNode>,
    roots: Vec<usize>,
}

impl BoxTree {
    pub fn nodes(&self) -> &[BoxNode] {
        &self.nodes
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn get(&self, index: usize) -> Option<&BoxNode> {
        self.nodes.get(index)
    }

    /// Indices of the boxes directly below `parent`, or the top level.
    pub fn children(&self, parent: Option<usize>) -> &[usize] {
        match parent {
            Some(index) => match self.nodes.get(index) {
                Some(node) => &node.children,
                None => &[],
            },
            None => &self.roots,
        }
    }

    pub fn find(&self, parent: Option<usize>, box_type: BoxType) -> Option<usize> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&i| self.nodes[i].box_type() == box_type)
    }

    pub fn find_all(&self, parent: Option<usize>, box_type: BoxType) -> Vec<usize> {
        self.children(parent)
            .iter()
            .copied()
            .filter(|&i| self.nodes[i].box_type() == box_type)
            .collect()
    }

    fn push(&mut self, node: BoxNode) -> usize {
        let index = self.nodes.len();
        match node.parent {
            Some(parent) => self.nodes[parent].children.push(index),
            None => self.roots.push(index),
        }
        self.nodes.push(node);
        index
    }
}

/// Decodes the sequence of boxes in `[start, end)` without descending into
/// superboxes.
pub fn decode_boxes<R: io::Read + io::Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
) -> Result<Vec<BoxNode>, JP2Error> {
    let mut boxes = Vec::new();
    let mut offset = start;
    while offset < end {
        reader.seek(io::SeekFrom::Start(offset))?;
        let header = decode_box_header(reader, end)?;
        debug!(
            "box {:?} at {} with length {}",
            type_name(&header.box_type),
            offset,
            header.total_length()
        );
        let node = BoxNode {
            header,
            offset,
            parent: None,
            children: vec![],
        };
        offset = node.end();
        boxes.push(node);
    }
    Ok(boxes)
}

/// Decodes the boxes in `[start, end)` and recursively the contents of every
/// superbox among them.
pub fn decode_box_tree<R: io::Read + io::Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
) -> Result<BoxTree, JP2Error> {
    let mut tree = BoxTree::default();
    decode_tree_level(reader, start, end, None, &mut tree)?;
    Ok(tree)
}

fn decode_tree_level<R: io::Read + io::Seek>(
    reader: &mut R,
    start: u64,
    end: u64,
    parent: Option<usize>,
    tree: &mut BoxTree,
) -> Result<(), JP2Error> {
    for mut node in decode_boxes(reader, start, end)? {
        node.parent = parent;
        let superbox = is_superbox(&node.box_type());
        let (contents_start, contents_end) = (node.contents_offset(), node.end());
        let index = tree.push(node);
        if superbox {
            info!(
                "{} superbox start at {}",
                type_name(&tree.nodes[index].box_type()),
                contents_start
            );
            decode_tree_level(reader, contents_start, contents_end, Some(index), tree)?;
        }
    }
    Ok(())
}

fn read_array<R: io::Read, const N: usize>(reader: &mut R) -> Result<[u8; N], JP2Error> {
    let mut buffer = [0u8; N];
    reader.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// A box whose contents can be decoded from and encoded to bytes.
pub trait JBox: Sized {
    fn identifier(&self) -> BoxType;

    /// Decodes `length` bytes of contents.
    fn decode<R: io::Read>(reader: &mut R, length: u64) -> Result<Self, JP2Error>;

    /// Writes the contents (not the header) into `writer`.
    fn encode(&self, writer: &mut BoxWriter);

    /// Serializes the complete box, header included.
    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = BoxWriter::new(self.identifier());
        self.encode(&mut writer);
        writer.finish()
    }
}

// I.5.2
//
// JPEG 2000 Signature box
//
// The first box of a JP2 file. Its contents are the four bytes
// <CR><LF><0x87><LF>.
pub fn decode_signature<R: io::Read + io::Seek>(reader: &mut R) -> Result<(), JP2Error> {
    let offset = reader.stream_position()?;
    let header = decode_box_header(reader, u64::MAX)?;
    if header.box_type != BOX_TYPE_SIGNATURE {
        return Err(JP2Error::BoxUnexpected {
            box_type: header.box_type,
            offset,
        });
    }
    let signature: [u8; 4] = read_array(reader)?;
    if signature != SIGNATURE_MAGIC {
        return Err(JP2Error::InvalidSignature {
            signature,
            offset: offset + 8,
        });
    }
    Ok(())
}

pub fn encode_signature() -> Vec<u8> {
    let mut writer = BoxWriter::new(BOX_TYPE_SIGNATURE);
    writer.write_bytes(&SIGNATURE_MAGIC);
    writer.finish()
}

// I.5.2
//
// File Type box
//
// Brand, minor version and a compatibility list. A JP2 reader requires
// 'jp2 ' in the compatibility list.
#[derive(Debug, Clone, PartialEq)]
pub struct FileTypeBox {
    brand: [u8; 4],
    min_version: [u8; 4],
    compatibility_list: Vec<[u8; 4]>,
}

impl Default for FileTypeBox {
    fn default() -> Self {
        FileTypeBox {
            brand: BRAND_JP2,
            min_version: [0; 4],
            compatibility_list: vec![BRAND_JP2],
        }
    }
}

impl FileTypeBox {
    pub fn brand(&self) -> [u8; 4] {
        self.brand
    }

    pub fn is_jp2_compatible(&self) -> bool {
        self.compatibility_list.contains(&BRAND_JP2)
    }
}

impl JBox for FileTypeBox {
    fn identifier(&self) -> BoxType {
        BOX_TYPE_FILE_TYPE
    }

    fn decode<R: io::Read>(reader: &mut R, length: u64) -> Result<Self, JP2Error> {
        if length < 8 || length % 4 != 0 {
            return Err(JP2Error::BoxMalformed {
                box_type: BOX_TYPE_FILE_TYPE,
                offset: 0,
            });
        }
        let brand = read_array(reader)?;
        let min_version = read_array(reader)?;
        let mut compatibility_list = Vec::with_capacity(((length - 8) / 4) as usize);
        for _ in 0..(length - 8) / 4 {
            compatibility_list.push(read_array(reader)?);
        }
        Ok(FileTypeBox {
            brand,
            min_version,
            compatibility_list,
        })
    }

    fn encode(&self, writer: &mut BoxWriter) {
        writer.write_bytes(&self.brand);
        writer.write_bytes(&self.min_version);
        for brand in &self.compatibility_list {
            writer.write_bytes(brand);
        }
    }
}

// I.5.3.1
//
// Image Header box
//
// Contains fixed length generic information about the image, such as the
// image size and number of components. Its contents shall be 14 bytes and it
// shall be the first box in the JP2 Header box.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageHeaderBox {
    height: [u8; 4],
    width: [u8; 4],
    components_num: [u8; 2],
    components_bits: [u8; 1],
    compression_type: [u8; 1],
    colourspace_unknown: [u8; 1],
    intellectual_property: [u8; 1],
}

impl ImageHeaderBox {
    /// `precision` is the bit depth (1 to 38), `signed` sets the high bit of
    /// the BPC field.
    pub fn new(width: u32, height: u32, components_num: u16, precision: u8, signed: bool) -> Self {
        let mut bits = precision.saturating_sub(1) & 0x7f;
        if signed {
            bits |= 0x80;
        }
        ImageHeaderBox {
            height: height.to_be_bytes(),
            width: width.to_be_bytes(),
            components_num: components_num.to_be_bytes(),
            components_bits: [bits],
            compression_type: [7],
            colourspace_unknown: [0],
            intellectual_property: [0],
        }
    }

    /// Ysiz - YOsiz of the codestream.
    pub fn height(&self) -> u32 {
        u32::from_be_bytes(self.height)
    }

    /// Xsiz - XOsiz of the codestream.
    pub fn width(&self) -> u32 {
        u32::from_be_bytes(self.width)
    }

    pub fn components_num(&self) -> u16 {
        u16::from_be_bytes(self.components_num)
    }

    /// Bit depth of the components, or 255 when it varies per component and
    /// is given by a Bits Per Component box.
    pub fn components_bits(&self) -> u8 {
        if self.components_bits[0] == 255 {
            255
        } else {
            (self.components_bits[0] & 0b0111_1111) + 1
        }
    }

    pub fn values_are_signed(&self) -> bool {
        self.components_bits[0] != 255 && (self.components_bits[0] & 0x80) == 0x80
    }

    // The value of this field shall be 7.
    pub fn compression_type(&self) -> u8 {
        self.compression_type[0]
    }

    pub fn colourspace_unknown(&self) -> bool {
        self.colourspace_unknown[0] == 1
    }

    pub fn intellectual_property(&self) -> bool {
        self.intellectual_property[0] == 1
    }
}

impl JBox for ImageHeaderBox {
    // The type of the Image Header box shall be ‘ihdr’ (0x6968 6472)
    fn identifier(&self) -> BoxType {
        BOX_TYPE_IMAGE_HEADER
    }

    fn decode<R: io::Read>(reader: &mut R, length: u64) -> Result<Self, JP2Error> {
        if length != 14 {
            return Err(JP2Error::BoxMalformed {
                box_type: BOX_TYPE_IMAGE_HEADER,
                offset: 0,
            });
        }
        Ok(ImageHeaderBox {
            height: read_array(reader)?,
            width: read_array(reader)?,
            components_num: read_array(reader)?,
            components_bits: read_array(reader)?,
            compression_type: read_array(reader)?,
            colourspace_unknown: read_array(reader)?,
            intellectual_property: read_array(reader)?,
        })
    }

    fn encode(&self, writer: &mut BoxWriter) {
        writer.write_bytes(&self.height);
        writer.write_bytes(&self.width);
        writer.write_bytes(&self.components_num);
        writer.write_bytes(&self.components_bits);
        writer.write_bytes(&self.compression_type);
        writer.write_bytes(&self.colourspace_unknown);
        writer.write_bytes(&self.intellectual_property);
    }
}

pub const ENUMERATED_COLOUR_SPACE_SRGB: u32 = 16;
pub const ENUMERATED_COLOUR_SPACE_GREYSCALE: u32 = 17;
pub const ENUMERATED_COLOUR_SPACE_SYCC: u32 = 18;

// I.5.3.3
//
// Colour Specification box, enumerated method only.
#[derive(Debug, Clone, PartialEq)]
pub struct ColourSpecificationBox {
    method: u8,
    precedence: u8,
    colourspace_approximation: u8,
    enumerated_colour_space: u32,
}

impl ColourSpecificationBox {
    pub fn enumerated(colour_space: u32) -> Self {
        ColourSpecificationBox {
            method: 1,
            precedence: 0,
            colourspace_approximation: 0,
            enumerated_colour_space: colour_space,
        }
    }

    pub fn enumerated_colour_space(&self) -> Option<u32> {
        if self.method == 1 {
            Some(self.enumerated_colour_space)
        } else {
            None
        }
    }
}

impl JBox for ColourSpecificationBox {
    fn identifier(&self) -> BoxType {
        BOX_TYPE_COLOUR_SPECIFICATION
    }

    fn decode<R: io::Read>(reader: &mut R, length: u64) -> Result<Self, JP2Error> {
        if length < 3 {
            return Err(JP2Error::BoxMalformed {
                box_type: BOX_TYPE_COLOUR_SPECIFICATION,
                offset: 0,
            });
        }
        let [method, precedence, colourspace_approximation] = read_array(reader)?;
        let enumerated_colour_space = if method == 1 && length >= 7 {
            u32::from_be_bytes(read_array(reader)?)
        } else {
            // restricted ICC profiles are carried verbatim by callers
            io::copy(&mut io::Read::take(&mut *reader, length - 3), &mut io::sink())?;
            0
        };
        Ok(ColourSpecificationBox {
            method,
            precedence,
            colourspace_approximation,
            enumerated_colour_space,
        })
    }

    fn encode(&self, writer: &mut BoxWriter) {
        writer.write_u8(self.method);
        writer.write_u8(self.precedence);
        writer.write_u8(self.colourspace_approximation);
        writer.write_u32(self.enumerated_colour_space);
    }
}

/// The original box contents are available in the metadata-bin OrigID.
pub const PLACEHOLDER_FLAG_ORIGINAL: u32 = 0b0001;
/// The original box is a contiguous codestream whose contents travel as
/// codestream data-bins.
pub const PLACEHOLDER_FLAG_CODESTREAM: u32 = 0b0100;

// ISO/IEC 15444-9 A.3.6.3
//
// Placeholder box
//
// Stands in for a box whose contents are delivered in another metadata-bin.
// LBox(4) TBox(4) Flags(4) OrigID(8) OrigBH, where OrigBH is the header of
// the original box (8 or 16 bytes).
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceholderBox {
    flags: u32,
    original_id: u64,
    original_header: Vec<u8>,
}

impl PlaceholderBox {
    pub fn new(flags: u32, original_id: u64, original_header: &BoxHeader) -> Self {
        PlaceholderBox {
            flags,
            original_id,
            original_header: original_header.encode(),
        }
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn original_id(&self) -> u64 {
        self.original_id
    }

    pub fn original_header_bytes(&self) -> &[u8] {
        &self.original_header
    }

    pub fn original_header(&self) -> Result<BoxHeader, JP2Error> {
        BoxHeader::from_bytes(&self.original_header)
    }

    /// Serialized length of the complete placeholder box.
    pub fn length(&self) -> u64 {
        20 + self.original_header.len() as u64
    }

    /// Decodes a complete placeholder box, header included. The original
    /// box header occupies everything after the first 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, JP2Error> {
        if bytes.len() < 28 || bytes[4..8] != BOX_TYPE_PLACEHOLDER {
            return Err(JP2Error::BoxMalformed {
                box_type: BOX_TYPE_PLACEHOLDER,
                offset: 0,
            });
        }
        let mut reader = io::Cursor::new(&bytes[8..]);
        Self::decode(&mut reader, bytes.len() as u64 - 8)
    }
}

impl JBox for PlaceholderBox {
    fn identifier(&self) -> BoxType {
        BOX_TYPE_PLACEHOLDER
    }

    fn decode<R: io::Read>(reader: &mut R, length: u64) -> Result<Self, JP2Error> {
        if length < 20 {
            return Err(JP2Error::BoxMalformed {
                box_type: BOX_TYPE_PLACEHOLDER,
                offset: 0,
            });
        }
        let flags = u32::from_be_bytes(read_array(reader)?);
        let original_id = u64::from_be_bytes(read_array(reader)?);
        let mut original_header = vec![0; (length - 12) as usize];
        reader.read_exact(&mut original_header)?;
        Ok(PlaceholderBox {
            flags,
            original_id,
            original_header,
        })
    }

    fn encode(&self, writer: &mut BoxWriter) {
        writer.write_u32(self.flags);
        writer.write_u64(self.original_id);
        writer.write_bytes(&self.original_header);
    }
}
