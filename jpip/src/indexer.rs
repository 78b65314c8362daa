// ISO/IEC 15444-9 I.3
//
// Writes a JP2 file carrying a Codestream Index box, so that a server can
// later locate every data-bin without scanning the codestream.
use jp2::{
    decode_boxes, is_index_box, type_name, BoxHeader, BoxWriter, CodestreamFinderBox,
    ColourSpecificationBox, FileTypeBox, FragmentArrayIndexBox, HeaderIndexTableBox,
    ImageHeaderBox, JBox, ManifestBox, ManifestEntry, MarkerIndexEntry, BOX_TYPE_BITS_PER_COMPONENT,
    BOX_TYPE_CODESTREAM_INDEX, BOX_TYPE_CONTIGUOUS_CODESTREAM, BOX_TYPE_FILE_TYPE,
    BOX_TYPE_HEADER, BOX_TYPE_PRECINCT_PACKET_INDEX, BOX_TYPE_SIGNATURE,
    BOX_TYPE_TILE_HEADER_INDEX, BOX_TYPE_TILE_PART_INDEX, ENUMERATED_COLOUR_SPACE_GREYSCALE,
    ENUMERATED_COLOUR_SPACE_SRGB,
};
use jpc::{
    marker_code, ImageAndTileSizeMarkerSegment, MarkerInfo, MARKER_SYMBOL_SOD, MARKER_SYMBOL_SOT,
    SOT_SEGMENT_LENGTH,
};
use log::{debug, info};

use crate::index::{build_index, Index};
use crate::source::{ByteSource, SourceReader};
use crate::{EventSink, JPIPError};

/// Rewrites a JP2 file or raw codestream as a JP2 file whose `cidx` box
/// indexes the main header, every tile-part, every tile header and, when
/// they can be located, every packet.
pub fn write_indexed_jp2(source: &dyn ByteSource, sink: &dyn EventSink) -> Result<Vec<u8>, JPIPError> {
    let index = build_index(source, sink)?;

    let mut boxes: Vec<Vec<u8>> = Vec::new();
    let (mut signature, mut file_type, mut header) = (None, None, None);
    if index.is_jp2 {
        let mut reader = SourceReader::new(source);
        for node in decode_boxes(&mut reader, 0, source.len())? {
            let box_type = node.box_type();
            if is_index_box(&box_type) || box_type == BOX_TYPE_CONTIGUOUS_CODESTREAM {
                debug!("{} at {} not copied", type_name(&box_type), node.offset);
                continue;
            }
            let bytes = source.read_vec(node.offset, node.length())?;
            match box_type {
                BOX_TYPE_SIGNATURE => signature = Some(bytes),
                BOX_TYPE_FILE_TYPE => file_type = Some(bytes),
                BOX_TYPE_HEADER => header = Some(bytes),
                _ => boxes.push(bytes),
            }
        }
    }

    let mut out = signature.unwrap_or_else(jp2::encode_signature);
    out.extend_from_slice(&file_type.unwrap_or_else(|| FileTypeBox::default().to_bytes()));
    out.extend_from_slice(&header.unwrap_or_else(|| image_header(index.siz())));
    for bytes in &boxes {
        out.extend_from_slice(bytes);
    }

    let codestream = source.read_vec(index.codestream_offset, index.codestream_length)?;
    let codestream_header = BoxHeader::new(BOX_TYPE_CONTIGUOUS_CODESTREAM, codestream.len() as u64);
    let codestream_offset = out.len() as u64 + codestream_header.header_length as u64;
    out.extend_from_slice(&codestream_header.encode());
    out.extend_from_slice(&codestream);

    let cidx = codestream_index(&index, &codestream, codestream_offset);
    info!(
        "indexed JP2 of {} bytes, {} tiles, packets {}",
        out.len() + cidx.len(),
        index.no_tiles(),
        if index.precincts.is_some() { "indexed" } else { "not indexed" }
    );
    out.extend_from_slice(&cidx);
    Ok(out)
}

// A JP2 Header box describing the codestream.
fn image_header(siz: &ImageAndTileSizeMarkerSegment) -> Vec<u8> {
    let no_components = siz.no_components();
    let precisions: Vec<(u8, bool)> = (0..no_components as usize)
        .map(|c| {
            (
                siz.precision(c).unwrap_or(8),
                siz.values_are_signed(c).unwrap_or(false),
            )
        })
        .collect();
    let (precision, signed) = precisions.first().copied().unwrap_or((8, false));
    let uniform = precisions.iter().all(|p| *p == (precision, signed));

    let mut ihdr = ImageHeaderBox::new(
        siz.reference_grid_width() - siz.image_horizontal_offset(),
        siz.reference_grid_height() - siz.image_vertical_offset(),
        no_components,
        precision,
        signed,
    )
    .to_bytes();
    if !uniform {
        // BPC 0xFF: the depths are in the bpcc box.
        let last = ihdr.len() - 4;
        ihdr[last] = 0xFF;
    }

    let mut jp2h = BoxWriter::new(BOX_TYPE_HEADER);
    jp2h.write_bytes(&ihdr);
    if !uniform {
        let mut bpcc = BoxWriter::new(BOX_TYPE_BITS_PER_COMPONENT);
        for (precision, signed) in &precisions {
            bpcc.write_u8((precision - 1) | if *signed { 0x80 } else { 0 });
        }
        jp2h.write_box(bpcc);
    }
    let colour_space = if no_components >= 3 {
        ENUMERATED_COLOUR_SPACE_SRGB
    } else {
        ENUMERATED_COLOUR_SPACE_GREYSCALE
    };
    jp2h.write_bytes(&ColourSpecificationBox::enumerated(colour_space).to_bytes());
    jp2h.finish()
}

// Index entries for marker segments; NR counts the later segments with the
// same marker.
fn marker_entries(markers: &[MarkerInfo]) -> Vec<MarkerIndexEntry> {
    markers
        .iter()
        .enumerate()
        .map(|(i, info)| MarkerIndexEntry {
            marker: marker_code(info.marker),
            remaining: markers[i + 1..]
                .iter()
                .filter(|later| later.marker == info.marker)
                .count() as u16,
            offset: info.offset,
            length: info.length,
        })
        .collect()
}

// Marker segments of a tile-part header, SOT included, located relative to
// the codestream start.
fn tile_header_markers(codestream: &[u8], offset: u64) -> Vec<MarkerInfo> {
    let mut markers = vec![MarkerInfo {
        marker: MARKER_SYMBOL_SOT,
        offset,
        length: (SOT_SEGMENT_LENGTH - 2) as u16,
    }];
    let mut position = (offset + SOT_SEGMENT_LENGTH) as usize;
    while position + 4 <= codestream.len() {
        let marker = [codestream[position], codestream[position + 1]];
        if marker == MARKER_SYMBOL_SOD {
            break;
        }
        let length = u16::from_be_bytes([codestream[position + 2], codestream[position + 3]]);
        markers.push(MarkerInfo {
            marker,
            offset: position as u64,
            length,
        });
        position += 2 + length as usize;
    }
    markers
}

// A superbox whose first child is a manifest of the others.
fn with_manifest(box_type: jp2::BoxType, children: Vec<Vec<u8>>) -> BoxWriter {
    let entries = children
        .iter()
        .map(|child| ManifestEntry {
            length: u32::from_be_bytes([child[0], child[1], child[2], child[3]]),
            box_type: [child[4], child[5], child[6], child[7]],
        })
        .collect();
    let mut writer = BoxWriter::new(box_type);
    writer.write_bytes(&ManifestBox::new(entries).to_bytes());
    for child in &children {
        writer.write_bytes(child);
    }
    writer
}

fn codestream_index(index: &Index, codestream: &[u8], codestream_offset: u64) -> Vec<u8> {
    let mut children = vec![
        CodestreamFinderBox::new(codestream_offset, codestream.len() as u64).to_bytes(),
        HeaderIndexTableBox::new(
            index.main_header_length(),
            marker_entries(&index.main_header.markers),
        )
        .to_bytes(),
        with_manifest(BOX_TYPE_TILE_PART_INDEX, vec![index.tile_parts.to_bytes()]).finish(),
    ];

    let tile_tables = (0..index.no_tiles())
        .map(|t| match (index.tile_parts_of(t).next(), &index.tile_headers[t as usize]) {
            (Some(first), Some(header)) => HeaderIndexTableBox::new(
                SOT_SEGMENT_LENGTH + header.length + 2,
                marker_entries(&tile_header_markers(codestream, first.offset)),
            ),
            _ => HeaderIndexTableBox::new(0, Vec::new()),
        })
        .map(|table| table.to_bytes())
        .collect();
    children.push(with_manifest(BOX_TYPE_TILE_HEADER_INDEX, tile_tables).finish());

    if let Some(precincts) = &index.precincts {
        let tables = precincts
            .iter()
            .map(FragmentArrayIndexBox::to_bytes)
            .collect();
        children.push(with_manifest(BOX_TYPE_PRECINCT_PACKET_INDEX, tables).finish());
    }

    let mut cidx = BoxWriter::new(BOX_TYPE_CODESTREAM_INDEX);
    for child in &children {
        cidx.write_bytes(child);
    }
    cidx.finish()
}
