// Locating every data-bin of a target: from the file's own Codestream Index
// box when present and consistent, otherwise by scanning the codestream.
use std::io::{self, Read, Seek};

use jp2::{
    decode_box_tree, decode_boxes, decode_signature, type_name, BoxNode, BoxTree,
    CodestreamFinderBox, FragmentArrayIndexBox, FragmentEntry, HeaderIndexTableBox, JBox,
    JP2Error, BOX_TYPE_CODESTREAM_FINDER, BOX_TYPE_CODESTREAM_INDEX,
    BOX_TYPE_CONTIGUOUS_CODESTREAM, BOX_TYPE_FRAGMENT_ARRAY_INDEX, BOX_TYPE_HEADER_INDEX_TABLE,
    BOX_TYPE_PRECINCT_PACKET_INDEX, BOX_TYPE_SIGNATURE, BOX_TYPE_TILE_HEADER_INDEX,
    BOX_TYPE_TILE_PART_INDEX,
};
use jpc::{
    decode_coc, decode_cod, decode_siz, decode_tile_header, packet_order, scan_codestream,
    tile_range, CodestreamError, CodestreamLayout, ImageAndTileSizeMarkerSegment,
    MainHeader, MarkerInfo, MarkerSymbol, Rect, TileCoding, TileHeader, TileLayout,
    MARKER_SYMBOL_COC, MARKER_SYMBOL_COD, MARKER_SYMBOL_POC, MARKER_SYMBOL_PPM,
    MARKER_SYMBOL_SIZ, MARKER_SYMBOL_SOC, SOT_SEGMENT_LENGTH,
};
use log::{debug, info};

use crate::metadata::{build_metadata, MetadataBin};
use crate::source::{ByteSource, SourceReader};
use crate::{EventSink, JPIPError};

/// Byte locations of every data-bin of one codestream. Offsets in the
/// fragment tables are relative to the first byte of the codestream.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub is_jp2: bool,
    /// Built from a Codestream Index box rather than a scan.
    pub from_index_box: bool,
    /// Absolute offset of SOC in the resource.
    pub codestream_offset: u64,
    pub codestream_length: u64,
    pub main_header: MainHeader,
    /// One row per tile, one entry per tile-part in codestream order.
    pub tile_parts: FragmentArrayIndexBox,
    /// Marker segments between the first SOT segment and SOD of each tile.
    pub tile_headers: Vec<Option<FragmentEntry>>,
    pub tile_codings: Vec<TileCoding>,
    /// Per component: one row per tile, entry `s · layers + l` for layer `l`
    /// of the precinct with sequence number `s`.
    pub precincts: Option<Vec<FragmentArrayIndexBox>>,
    pub metadata: Vec<MetadataBin>,
}

impl Index {
    pub fn siz(&self) -> &ImageAndTileSizeMarkerSegment {
        &self.main_header.siz
    }

    pub fn no_tiles(&self) -> u32 {
        self.siz().no_tiles()
    }

    pub fn no_components(&self) -> u16 {
        self.siz().no_components()
    }

    pub fn main_header_length(&self) -> u64 {
        self.main_header.length
    }

    /// Decomposition levels every tile-component has, the deepest reduction
    /// a client can ask for.
    pub fn levels(&self) -> u8 {
        self.tile_codings
            .iter()
            .flat_map(|coding| coding.components.iter().map(|c| c.levels))
            .min()
            .unwrap_or(0)
    }

    pub fn layers(&self) -> u16 {
        self.main_header.cod.no_layers()
    }

    /// Tile `t` on the frame reduced by `level` decomposition levels.
    pub fn tile_rect(&self, t: u32, level: u8) -> Rect {
        let siz = self.siz();
        let (x0, x1) = tile_range(
            siz.image_horizontal_offset(),
            siz.reference_grid_width(),
            siz.tile_horizontal_offset(),
            siz.reference_tile_width(),
            t % siz.num_x_tiles(),
            level,
        );
        let (y0, y1) = tile_range(
            siz.image_vertical_offset(),
            siz.reference_grid_height(),
            siz.tile_vertical_offset(),
            siz.reference_tile_height(),
            t / siz.num_x_tiles(),
            level,
        );
        Rect { x0, y0, x1, y1 }
    }

    pub fn tile_part_count(&self, t: u32) -> usize {
        self.tile_parts.fragment_count(t as u64)
    }

    /// Tile-parts of tile `t`, padding skipped.
    pub fn tile_parts_of(&self, t: u32) -> impl Iterator<Item = &FragmentEntry> {
        self.tile_parts
            .row(t as u64)
            .iter()
            .filter(|entry| !entry.is_padding())
    }

    pub fn tile_coding(&self, t: u32) -> Option<&TileCoding> {
        self.tile_codings.get(t as usize)
    }

    pub fn tile_layout(&self, t: u32) -> Option<TileLayout> {
        self.tile_coding(t)
            .map(|coding| TileLayout::new(self.siz(), coding, t))
    }

    /// Packet of layer `l` of precinct `s` in tile-component (t, c).
    pub fn precinct_packet(&self, c: u16, t: u32, s: u32, l: u16) -> Option<&FragmentEntry> {
        let layers = self.tile_coding(t)?.layers as u64;
        self.precincts
            .as_ref()?
            .get(c as usize)?
            .get(t as u64, s as u64 * layers + l as u64)
            .filter(|entry| !entry.is_padding())
    }

    pub fn metadata_bin(&self, id: u64) -> Option<&MetadataBin> {
        self.metadata.iter().find(|bin| bin.id == id)
    }
}

/// Recognises the target format and indexes its first codestream.
pub fn build_index(source: &dyn ByteSource, sink: &dyn EventSink) -> Result<Index, JPIPError> {
    let mut magic = [0u8; 8];
    if source.len() < magic.len() as u64 {
        return Err(JPIPError::NotJP2Format);
    }
    source.read_exact_at(&mut magic, 0)?;
    let mut reader = SourceReader::new(source);

    if magic[..2] == MARKER_SYMBOL_SOC {
        info!("raw codestream of {} bytes", source.len());
        return scan_index(&mut reader, 0, source.len(), false, sink);
    }
    if magic[4..8] != BOX_TYPE_SIGNATURE {
        return Err(JPIPError::NotJP2Format);
    }
    decode_signature(&mut reader).map_err(|e| match e {
        JP2Error::Io(e) => JPIPError::Io(e),
        _ => JPIPError::NotJP2Format,
    })?;

    let top_level = decode_boxes(&mut reader, 0, source.len())?;
    let codestream = top_level
        .iter()
        .find(|node| node.box_type() == BOX_TYPE_CONTIGUOUS_CODESTREAM)
        .ok_or(JPIPError::NoCodestream)?;
    let metadata = build_metadata(&mut reader, &top_level)?;

    let indexed = match top_level
        .iter()
        .find(|node| node.box_type() == BOX_TYPE_CODESTREAM_INDEX)
    {
        Some(cidx) => match index_from_cidx(&mut reader, cidx, codestream, source.len()) {
            Ok(index) => Some(index),
            Err(error) => {
                sink.warning(&format!(
                    "codestream index box at {} is unusable, scanning the codestream instead: {}",
                    cidx.offset, error
                ));
                None
            }
        },
        None => None,
    };

    let mut index = match indexed {
        Some(index) => index,
        None => scan_index(
            &mut reader,
            codestream.contents_offset(),
            codestream.contents_length(),
            true,
            sink,
        )?,
    };
    index.metadata = metadata;
    Ok(index)
}

fn scan_index<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    length: u64,
    is_jp2: bool,
    sink: &dyn EventSink,
) -> Result<Index, JPIPError> {
    let layout = scan_codestream(reader, offset, offset + length)?;
    let siz = &layout.header.siz;
    let no_tiles = siz.no_tiles();

    let mut rows = Vec::with_capacity(no_tiles as usize);
    let mut tile_headers = Vec::with_capacity(no_tiles as usize);
    let mut tile_codings = Vec::with_capacity(no_tiles as usize);
    for t in 0..no_tiles {
        rows.push(
            layout
                .tile_parts_of(t)
                .map(|part| FragmentEntry::new(part.offset, part.length))
                .collect::<Vec<_>>(),
        );
        let first = layout.tile_parts_of(t).next();
        if first.is_none() {
            sink.warning(&format!("tile {} has no tile-parts", t));
        }
        tile_headers.push(first.map(|part| {
            FragmentEntry::new(
                part.offset + SOT_SEGMENT_LENGTH,
                part.header.markers_length(),
            )
        }));
        tile_codings.push(TileCoding::new(
            &layout.header,
            first.map(|part| &part.header),
        ));
    }

    let precincts = precincts_from_packet_lengths(&layout, &tile_codings, sink);
    Ok(Index {
        is_jp2,
        from_index_box: false,
        codestream_offset: offset,
        codestream_length: length,
        main_header: layout.header,
        tile_parts: FragmentArrayIndexBox::from_rows(&rows),
        tile_headers,
        tile_codings,
        precincts,
        metadata: Vec::new(),
    })
}

// Locates every packet from the PLT segments. Needs PLT in every tile-part
// and a progression that packet_order can reproduce.
fn precincts_from_packet_lengths(
    layout: &CodestreamLayout,
    codings: &[TileCoding],
    sink: &dyn EventSink,
) -> Option<Vec<FragmentArrayIndexBox>> {
    let header = &layout.header;
    if header.has_progression_changes || header.has_packed_headers {
        debug!("POC or PPM in the main header, no precinct table");
        return None;
    }
    if layout.tile_parts.is_empty()
        || layout.tile_parts.iter().any(|part| {
            part.header.packet_lengths.is_empty()
                || part.header.has_progression_changes
                || part.header.has_packed_headers
        })
    {
        debug!("packet lengths not available for every tile-part, no precinct table");
        return None;
    }

    let no_components = header.siz.no_components() as usize;
    let mut tables: Vec<Vec<Vec<FragmentEntry>>> = vec![Vec::new(); no_components];
    for (t, coding) in codings.iter().enumerate() {
        let t = t as u32;
        let tile_layout = TileLayout::new(&header.siz, coding, t);
        let packets = packet_order(&tile_layout, coding);
        let layers = coding.layers as u32;
        let mut rows: Vec<Vec<FragmentEntry>> = (0..no_components)
            .map(|c| {
                vec![FragmentEntry::default(); (tile_layout.sequence_count(c) * layers) as usize]
            })
            .collect();

        let mut next = packets.iter();
        for part in layout.tile_parts_of(t) {
            let mut position = part.data_offset();
            for length in &part.header.packet_lengths {
                let packet = match next.next() {
                    Some(packet) => packet,
                    None => {
                        sink.warning(&format!(
                            "tile {} has more packet lengths than packets",
                            t
                        ));
                        return None;
                    }
                };
                let c = packet.component as usize;
                let s = tile_layout.sequence(c, packet.resolution, packet.precinct)?;
                rows[c][(s * layers + packet.layer as u32) as usize] =
                    FragmentEntry::new(position, *length as u64);
                position += *length as u64;
            }
            if position != part.offset + part.length {
                sink.warning(&format!(
                    "packet lengths of tile {} disagree with its tile-part length",
                    t
                ));
                return None;
            }
        }
        if next.next().is_some() {
            sink.warning(&format!("tile {} has fewer packet lengths than packets", t));
            return None;
        }
        for (c, row) in rows.into_iter().enumerate() {
            tables[c].push(row);
        }
    }

    Some(
        tables
            .iter()
            .map(|rows| FragmentArrayIndexBox::from_rows(rows))
            .collect(),
    )
}

fn decode_child<T: JBox, R: Read + Seek>(reader: &mut R, node: &BoxNode) -> Result<T, JP2Error> {
    reader.seek(io::SeekFrom::Start(node.contents_offset()))?;
    let mut contents = Read::take(&mut *reader, node.contents_length());
    T::decode(&mut contents, node.contents_length())
}

fn required(
    tree: &BoxTree,
    parent: Option<usize>,
    box_type: jp2::BoxType,
) -> Result<&BoxNode, JP2Error> {
    tree.find(parent, box_type)
        .and_then(|i| tree.get(i))
        .ok_or(JP2Error::BoxMissing { box_type })
}

fn malformed(node: &BoxNode) -> JPIPError {
    JPIPError::Box(JP2Error::BoxMalformed {
        box_type: node.box_type(),
        offset: node.offset,
    })
}

fn index_from_cidx<R: Read + Seek>(
    reader: &mut R,
    cidx: &BoxNode,
    codestream: &BoxNode,
    resource_length: u64,
) -> Result<Index, JPIPError> {
    let tree = decode_box_tree(reader, cidx.contents_offset(), cidx.end())?;

    let cptr_node = required(&tree, None, BOX_TYPE_CODESTREAM_FINDER)?;
    let cptr: CodestreamFinderBox = decode_child(reader, cptr_node)?;
    if !cptr.is_contiguous()
        || cptr.offset() != codestream.contents_offset()
        || cptr.offset() + cptr.length() > resource_length
    {
        return Err(malformed(cptr_node));
    }
    let offset = cptr.offset();
    let length = cptr.length();

    let mhix_node = required(&tree, None, BOX_TYPE_HEADER_INDEX_TABLE)?;
    let mhix: HeaderIndexTableBox = decode_child(reader, mhix_node)?;
    if mhix.total_length() > length {
        return Err(malformed(mhix_node));
    }
    let main_header = main_header_from_table(reader, offset, &mhix)?;
    let siz = &main_header.siz;
    let no_tiles = siz.no_tiles();
    let no_components = siz.no_components();

    let tpix_node = required(&tree, None, BOX_TYPE_TILE_PART_INDEX)?;
    let tpix_index = tree.find(None, BOX_TYPE_TILE_PART_INDEX);
    let faix_node = required(&tree, tpix_index, BOX_TYPE_FRAGMENT_ARRAY_INDEX)?;
    let tile_parts: FragmentArrayIndexBox = decode_child(reader, faix_node)?;
    if tile_parts.rows() != no_tiles as u64 {
        return Err(malformed(tpix_node));
    }
    for t in 0..no_tiles as u64 {
        let out_of_range = tile_parts.row(t).iter().any(|e| {
            !e.is_padding() && (e.offset < main_header.length || e.offset + e.length > length)
        });
        if out_of_range {
            return Err(malformed(faix_node));
        }
    }

    let mut tile_headers = Vec::with_capacity(no_tiles as usize);
    let mut tile_codings = Vec::with_capacity(no_tiles as usize);
    let thix_index = tree.find(None, BOX_TYPE_TILE_HEADER_INDEX);
    let thix_tables = thix_index.map(|i| tree.find_all(Some(i), BOX_TYPE_HEADER_INDEX_TABLE));
    if let (Some(i), Some(tables)) = (thix_index, &thix_tables) {
        if tables.len() != no_tiles as usize {
            return Err(malformed(&tree.nodes()[i]));
        }
    }

    for t in 0..no_tiles {
        let first = match tile_parts.row(t as u64).iter().find(|e| !e.is_padding()) {
            Some(first) => *first,
            None => {
                tile_headers.push(None);
                tile_codings.push(TileCoding::new(&main_header, None));
                continue;
            }
        };
        let tile_header = match &thix_tables {
            Some(tables) => {
                let node = &tree.nodes()[tables[t as usize]];
                let table: HeaderIndexTableBox = decode_child(reader, node)?;
                if table.total_length() < SOT_SEGMENT_LENGTH + 2
                    || table.total_length() > first.length
                {
                    return Err(malformed(node));
                }
                tile_header_from_table(reader, offset, &table, no_components)?
            }
            None => {
                reader.seek(io::SeekFrom::Start(offset + first.offset))?;
                let header = decode_tile_header(reader, no_components)?;
                (header.data_offset + 2, header)
            }
        };
        let (total_length, header) = tile_header;
        tile_headers.push(Some(FragmentEntry::new(
            first.offset + SOT_SEGMENT_LENGTH,
            total_length - SOT_SEGMENT_LENGTH - 2,
        )));
        tile_codings.push(TileCoding::new(&main_header, Some(&header)));
    }

    let mut precincts = None;
    if let Some(ppix_index) = tree.find(None, BOX_TYPE_PRECINCT_PACKET_INDEX) {
        let ppix_node = &tree.nodes()[ppix_index];
        let tables = tree.find_all(Some(ppix_index), BOX_TYPE_FRAGMENT_ARRAY_INDEX);
        if tables.len() != no_components as usize {
            return Err(malformed(ppix_node));
        }
        let mut components = Vec::with_capacity(tables.len());
        for i in tables {
            let faix: FragmentArrayIndexBox = decode_child(reader, &tree.nodes()[i])?;
            if faix.rows() != no_tiles as u64 {
                return Err(malformed(ppix_node));
            }
            components.push(faix);
        }
        if main_header.has_progression_changes || main_header.has_packed_headers {
            info!(
                "ignoring {} with POC or PPM in the main header",
                type_name(&BOX_TYPE_PRECINCT_PACKET_INDEX)
            );
        } else {
            precincts = Some(components);
        }
    }

    info!(
        "indexed codestream at {} from its index box, {} tiles",
        offset, no_tiles
    );
    Ok(Index {
        is_jp2: true,
        from_index_box: true,
        codestream_offset: offset,
        codestream_length: length,
        main_header,
        tile_parts,
        tile_headers,
        tile_codings,
        precincts,
        metadata: Vec::new(),
    })
}

// Decodes only the marker segments the index points at.
fn main_header_from_table<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    table: &HeaderIndexTableBox,
) -> Result<MainHeader, JPIPError> {
    let mut soc: MarkerSymbol = [0; 2];
    reader.seek(io::SeekFrom::Start(offset))?;
    reader.read_exact(&mut soc)?;
    if soc != MARKER_SYMBOL_SOC {
        return Err(CodestreamError::MarkerMissing {
            marker: MARKER_SYMBOL_SOC,
        }
        .into());
    }

    let mut header = MainHeader {
        length: table.total_length(),
        ..Default::default()
    };
    let mut has_siz = false;
    let mut has_cod = false;
    for entry in table.markers() {
        let marker = entry.marker.to_be_bytes();
        if marker == MARKER_SYMBOL_SOC {
            continue;
        }
        if entry.offset + 2 + entry.length as u64 > table.total_length() {
            return Err(CodestreamError::MarkerError {
                marker,
                error: format!("indexed at {} beyond the main header", entry.offset),
            }
            .into());
        }
        reader.seek(io::SeekFrom::Start(offset + entry.offset))?;
        let mut found: MarkerSymbol = [0; 2];
        reader.read_exact(&mut found)?;
        if found != marker {
            return Err(CodestreamError::MarkerUnexpected {
                marker: found,
                offset: entry.offset,
            }
            .into());
        }
        match marker {
            MARKER_SYMBOL_SIZ => {
                header.siz = decode_siz(reader)?;
                has_siz = true;
            }
            MARKER_SYMBOL_COD => {
                header.cod = decode_cod(reader)?;
                has_cod = true;
            }
            MARKER_SYMBOL_COC if has_siz => {
                let coc = decode_coc(reader, header.siz.no_components())?;
                header
                    .cocs
                    .retain(|c| c.component_index() != coc.component_index());
                header.cocs.push(coc);
            }
            MARKER_SYMBOL_POC => header.has_progression_changes = true,
            MARKER_SYMBOL_PPM => header.has_packed_headers = true,
            _ => {}
        }
        header.markers.push(MarkerInfo {
            marker,
            offset: entry.offset,
            length: entry.length,
        });
    }

    for (present, marker) in [(has_siz, MARKER_SYMBOL_SIZ), (has_cod, MARKER_SYMBOL_COD)] {
        if !present {
            return Err(CodestreamError::MarkerMissing { marker }.into());
        }
    }
    debug!(
        "main header of {} bytes, {} indexed markers",
        header.length,
        header.markers.len()
    );
    Ok(header)
}

// Returns TLEN, SOT through SOD, and the coding style segments of the tile.
fn tile_header_from_table<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    table: &HeaderIndexTableBox,
    no_components: u16,
) -> Result<(u64, TileHeader), JPIPError> {
    let mut header = TileHeader::default();
    for entry in table.markers() {
        let marker = entry.marker.to_be_bytes();
        if marker != MARKER_SYMBOL_COD && marker != MARKER_SYMBOL_COC {
            continue;
        }
        reader.seek(io::SeekFrom::Start(offset + entry.offset + 2))?;
        if marker == MARKER_SYMBOL_COD {
            header.cod = Some(decode_cod(reader)?);
        } else {
            let coc = decode_coc(reader, no_components)?;
            header
                .cocs
                .retain(|c| c.component_index() != coc.component_index());
            header.cocs.push(coc);
        }
    }
    Ok((table.total_length(), header))
}
