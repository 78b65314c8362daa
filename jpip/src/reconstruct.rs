// Rebuilding a decodable codestream, or JP2 file, from received messages.
// Whatever was not delivered is filled in with the smallest valid stand-in:
// an empty tile-part for a missing tile, an empty packet for a missing
// precinct layer.
use std::collections::{BTreeMap, HashMap};
use std::io;

use jp2::{
    decode_boxes, encode_signature, type_name, BoxHeader, BoxType, BoxWriter, FileTypeBox, JBox,
    PlaceholderBox, BOX_TYPE_CONTIGUOUS_CODESTREAM, BOX_TYPE_FILE_TYPE, BOX_TYPE_HEADER,
    BOX_TYPE_IMAGE_HEADER, BOX_TYPE_PLACEHOLDER, BOX_TYPE_SIGNATURE, PLACEHOLDER_FLAG_CODESTREAM,
    PLACEHOLDER_FLAG_ORIGINAL,
};
use jpc::{
    decode_main_header_bytes, decode_tile_header_markers, packet_order, MainHeader,
    StartOfTileSegment, TileCoding, TileLayout, MARKER_SYMBOL_EOC, MARKER_SYMBOL_EPH,
    MARKER_SYMBOL_PLT, MARKER_SYMBOL_SIZ, MARKER_SYMBOL_SOC, MARKER_SYMBOL_SOD, MARKER_SYMBOL_SOT,
    SOT_SEGMENT_LENGTH,
};
use log::{debug, info};

use crate::message::{ClassId, Message, MessageQueue};
use crate::{EventSink, JPIPError};

/// A rebuilt image and the tiles that had to be left empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub data: Vec<u8>,
    pub missing_tiles: Vec<u32>,
}

impl Reconstruction {
    pub fn is_complete(&self) -> bool {
        self.missing_tiles.is_empty()
    }

    /// The data, or `IncompleteRegion` naming the tiles left empty.
    pub fn into_complete(self) -> Result<Vec<u8>, JPIPError> {
        if self.is_complete() {
            Ok(self.data)
        } else {
            Err(JPIPError::IncompleteRegion {
                missing_tiles: self.missing_tiles,
            })
        }
    }
}

/// The contiguous prefix of a data-bin that the messages provide.
#[derive(Debug, Default)]
struct DataBin {
    bytes: Vec<u8>,
    /// The message carrying the last byte of the bin is inside the prefix.
    complete: bool,
    /// Bin offset at which each completed layer ends.
    layer_ends: BTreeMap<u64, u64>,
}

impl DataBin {
    fn assemble<'a>(
        stream: &[u8],
        messages: impl Iterator<Item = &'a Message>,
    ) -> Result<DataBin, JPIPError> {
        let mut messages: Vec<&Message> = messages.collect();
        messages.sort_by_key(|m| m.bin_offset);

        let mut bin = DataBin::default();
        for (i, message) in messages.iter().enumerate() {
            let payload = MessageQueue::payload(stream, message)?;
            let have = bin.bytes.len() as u64;
            if message.bin_offset > have {
                debug!(
                    "gap in {} bin {} at {}",
                    message.class_id, message.in_class_id, have
                );
                break;
            }
            if message.end() > have {
                bin.bytes
                    .extend_from_slice(&payload[(have - message.bin_offset) as usize..]);
            }
            bin.complete |= message.last_byte;
            let layer = if message.class_id.has_aux() {
                message.aux
            } else {
                i as u64 + 1
            };
            bin.layer_ends.entry(layer).or_insert(message.end());
        }
        Ok(bin)
    }

    fn of(
        stream: &[u8],
        queue: &MessageQueue,
        class_id: ClassId,
        in_class_id: u64,
        csn: u64,
    ) -> Result<DataBin, JPIPError> {
        DataBin::assemble(stream, queue.bin(class_id, in_class_id, csn))
    }

    /// Bytes of layer `l`, when both of its ends are known.
    fn layer(&self, l: u16) -> Option<&[u8]> {
        let start = match l {
            0 => 0,
            l => *self.layer_ends.get(&(l as u64))?,
        };
        let end = *self.layer_ends.get(&(l as u64 + 1))?;
        if start > end || end > self.bytes.len() as u64 {
            return None;
        }
        Some(&self.bytes[start as usize..end as usize])
    }
}

/// Rebuilds the codestream of `csn` from the messages in `queue`, whose
/// payloads are in `stream`. Tile data of resolutions beyond the first
/// `N_L - min_level` is left out.
pub fn reconstruct_j2k(
    stream: &[u8],
    queue: &MessageQueue,
    csn: u64,
    min_level: u8,
    sink: &dyn EventSink,
) -> Result<Reconstruction, JPIPError> {
    let main = DataBin::of(stream, queue, ClassId::MainHeader, 0, csn)?;
    if !main.complete
        || main.bytes.len() < 4
        || main.bytes[..2] != MARKER_SYMBOL_SOC
        || main.bytes[2..4] != MARKER_SYMBOL_SIZ
    {
        return Err(JPIPError::IncompleteHeader);
    }
    let mut framed = main.bytes.clone();
    framed.extend_from_slice(&MARKER_SYMBOL_EOC);
    let header = decode_main_header_bytes(&framed)?;
    let no_tiles = header.siz.no_tiles();

    let mut data = main.bytes;
    let mut missing_tiles = Vec::new();
    for t in 0..no_tiles {
        // Aux counts the tile-parts from this one to the last; the first
        // tile-part is kept at any level.
        let tile_messages = queue.iter().filter(|m| {
            m.csn == csn
                && m.in_class_id == t as u64
                && (m.class_id == ClassId::Tile
                    || (m.class_id == ClassId::ExtTile
                        && (m.aux > min_level as u64 || m.bin_offset == 0)))
        });
        let tile = DataBin::assemble(stream, tile_messages)?;
        if !tile.bytes.is_empty() {
            let written = write_tile_parts(&tile.bytes, &mut data);
            if written > 0 {
                continue;
            }
            sink.warning(&format!("tile {} data holds no complete tile-part", t));
        }

        let tile_header = DataBin::of(stream, queue, ClassId::TileHeader, t as u64, csn)?;
        if tile_header.complete {
            write_precinct_tile(
                stream,
                queue,
                csn,
                &header,
                t,
                min_level,
                &tile_header.bytes,
                &mut data,
            )?;
            continue;
        }

        missing_tiles.push(t);
        data.extend_from_slice(&StartOfTileSegment::new(t as u16, 14, 0, 1).encode());
        data.extend_from_slice(&MARKER_SYMBOL_SOD);
    }
    data.extend_from_slice(&MARKER_SYMBOL_EOC);

    if !missing_tiles.is_empty() {
        sink.info(&format!(
            "{} of {} tiles were not delivered",
            missing_tiles.len(),
            no_tiles
        ));
    }
    Ok(Reconstruction {
        data,
        missing_tiles,
    })
}

// Copies every complete tile-part at the start of a tile data-bin, with
// TNsot set to the number copied.
fn write_tile_parts(bytes: &[u8], out: &mut Vec<u8>) -> usize {
    let mut parts = Vec::new();
    let mut position = 0;
    while position + SOT_SEGMENT_LENGTH as usize <= bytes.len() {
        if bytes[position..position + 2] != MARKER_SYMBOL_SOT {
            debug!("tile data at {} does not start with SOT", position);
            break;
        }
        let psot = u32::from_be_bytes([
            bytes[position + 6],
            bytes[position + 7],
            bytes[position + 8],
            bytes[position + 9],
        ]) as usize;
        let length = if psot == 0 { bytes.len() - position } else { psot };
        if length < SOT_SEGMENT_LENGTH as usize + 2 || position + length > bytes.len() {
            break;
        }
        parts.push(position..position + length);
        position += length;
    }

    let count = parts.len().min(u8::MAX as usize);
    for part in parts.into_iter().take(count) {
        let start = out.len();
        out.extend_from_slice(&bytes[part]);
        out[start + 11] = count as u8;
    }
    count
}

fn empty_packet(uses_eph: bool, out: &mut Vec<u8>) {
    out.push(0x00);
    if uses_eph {
        out.extend_from_slice(&MARKER_SYMBOL_EPH);
    }
}

// Packet lengths describe the original packets, not the ones written here.
fn strip_packet_lengths(header: &[u8]) -> Vec<u8> {
    let mut stripped = Vec::with_capacity(header.len());
    let mut position = 0;
    while position + 4 <= header.len() {
        let length = u16::from_be_bytes([header[position + 2], header[position + 3]]) as usize;
        let end = position + 2 + length;
        if length < 2 || end > header.len() {
            return header.to_vec();
        }
        if header[position..position + 2] != MARKER_SYMBOL_PLT {
            stripped.extend_from_slice(&header[position..end]);
        }
        position = end;
    }
    if position != header.len() {
        return header.to_vec();
    }
    stripped
}

// One tile-part: synthesised SOT, the tile header, SOD, then every packet of
// the tile in progression order.
#[allow(clippy::too_many_arguments)]
fn write_precinct_tile(
    stream: &[u8],
    queue: &MessageQueue,
    csn: u64,
    header: &MainHeader,
    t: u32,
    min_level: u8,
    tile_header: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), JPIPError> {
    let no_components = header.siz.no_components();
    let no_tiles = header.siz.no_tiles() as u64;
    let markers = decode_tile_header_markers(tile_header, no_components)?;
    let coding = TileCoding::new(header, Some(&markers));
    let layout = TileLayout::new(&header.siz, &coding, t);

    let mut bins: HashMap<u64, DataBin> = HashMap::new();
    let mut body = Vec::new();
    let mut delivered = 0usize;
    let mut empty = 0usize;
    for packet in packet_order(&layout, &coding) {
        let c = packet.component as usize;
        let levels = coding.components[c].levels;
        let sequence = layout.sequence(c, packet.resolution, packet.precinct);
        let wanted = packet.resolution as u16 + min_level as u16 <= levels as u16;

        let bytes = match sequence {
            Some(s) if wanted => {
                let id = t as u64 + (c as u64 + s as u64 * no_components as u64) * no_tiles;
                if !bins.contains_key(&id) {
                    let bin = DataBin::assemble(
                        stream,
                        queue.iter().filter(|m| {
                            m.csn == csn && m.in_class_id == id && m.class_id.is_precinct()
                        }),
                    )?;
                    bins.insert(id, bin);
                }
                bins.get(&id).and_then(|bin| bin.layer(packet.layer))
            }
            _ => None,
        };
        match bytes {
            Some(bytes) => {
                body.extend_from_slice(bytes);
                delivered += 1;
            }
            None => {
                empty_packet(coding.uses_eph, &mut body);
                empty += 1;
            }
        }
    }

    let tile_header = strip_packet_lengths(tile_header);
    let length = SOT_SEGMENT_LENGTH + tile_header.len() as u64 + 2 + body.len() as u64;
    let psot = u32::try_from(length).unwrap_or(0);
    out.extend_from_slice(&StartOfTileSegment::new(t as u16, psot, 0, 1).encode());
    out.extend_from_slice(&tile_header);
    out.extend_from_slice(&MARKER_SYMBOL_SOD);
    out.extend_from_slice(&body);
    debug!("tile {}: {} packets delivered, {} empty", t, delivered, empty);
    Ok(())
}

/// Rebuilds a JP2 file: metadata-bin 0 gives the box sequence, the
/// codestream takes the place of the `jp2c` placeholder.
pub fn reconstruct_jp2(
    stream: &[u8],
    queue: &MessageQueue,
    csn: u64,
    min_level: u8,
    sink: &dyn EventSink,
) -> Result<Reconstruction, JPIPError> {
    let codestream = reconstruct_j2k(stream, queue, csn, min_level, sink)?;
    let root = DataBin::of(stream, queue, ClassId::Metadata, 0, csn)?;

    let mut boxes: Vec<(BoxType, Vec<u8>)> = Vec::new();
    let mut codestream_placed = false;
    let mut position = 0;
    while let Some((box_header, length)) = next_box(&root.bytes, position) {
        let bytes = &root.bytes[position..position + length];
        position += length;
        if box_header.box_type != BOX_TYPE_PLACEHOLDER {
            boxes.push((box_header.box_type, bytes.to_vec()));
            continue;
        }

        let placeholder = PlaceholderBox::from_bytes(bytes)?;
        let original = placeholder.original_header()?;
        if placeholder.flags() & PLACEHOLDER_FLAG_CODESTREAM != 0
            || original.box_type == BOX_TYPE_CONTIGUOUS_CODESTREAM
        {
            if !codestream_placed {
                boxes.push((BOX_TYPE_CONTIGUOUS_CODESTREAM, codestream_box(&codestream.data)));
                codestream_placed = true;
            }
            continue;
        }
        if placeholder.flags() & PLACEHOLDER_FLAG_ORIGINAL == 0 {
            continue;
        }
        let bin = DataBin::of(
            stream,
            queue,
            ClassId::Metadata,
            placeholder.original_id(),
            csn,
        )?;
        if bin.complete {
            let mut writer = BoxWriter::new(original.box_type);
            writer.write_bytes(&bin.bytes);
            boxes.push((original.box_type, writer.finish()));
        } else {
            sink.warning(&format!(
                "metadata-bin {} not delivered, {} box left out",
                placeholder.original_id(),
                type_name(&original.box_type)
            ));
        }
    }
    if position < root.bytes.len() {
        debug!("{} trailing bytes of metadata-bin 0", root.bytes.len() - position);
    }

    if !boxes
        .iter()
        .any(|(box_type, bytes)| *box_type == BOX_TYPE_HEADER && has_image_header(bytes))
    {
        return Err(JPIPError::MissingIhdr);
    }

    let signature = take_box(&mut boxes, BOX_TYPE_SIGNATURE).unwrap_or_else(encode_signature);
    let file_type =
        take_box(&mut boxes, BOX_TYPE_FILE_TYPE).unwrap_or_else(|| FileTypeBox::default().to_bytes());
    let mut data = signature;
    data.extend_from_slice(&file_type);
    for (_, bytes) in &boxes {
        data.extend_from_slice(bytes);
    }
    if !codestream_placed {
        data.extend_from_slice(&codestream_box(&codestream.data));
    }

    info!(
        "rebuilt JP2 of {} bytes, {} boxes",
        data.len(),
        boxes.len() + 2 + usize::from(!codestream_placed)
    );
    Ok(Reconstruction {
        data,
        missing_tiles: codestream.missing_tiles,
    })
}

// Header and total length of the complete box at `position`, if any.
fn next_box(bytes: &[u8], position: usize) -> Option<(BoxHeader, usize)> {
    let rest = bytes.get(position..)?;
    if rest.len() < 8 {
        return None;
    }
    let header = BoxHeader::from_bytes(rest).ok()?;
    let length = if rest[..4] == [0, 0, 0, 0] {
        rest.len()
    } else {
        header.total_length() as usize
    };
    if length < header.header_length as usize || length > rest.len() {
        return None;
    }
    Some((header, length))
}

fn codestream_box(codestream: &[u8]) -> Vec<u8> {
    let mut writer = BoxWriter::new(BOX_TYPE_CONTIGUOUS_CODESTREAM);
    writer.write_bytes(codestream);
    writer.finish()
}

fn take_box(boxes: &mut Vec<(BoxType, Vec<u8>)>, box_type: BoxType) -> Option<Vec<u8>> {
    let position = boxes.iter().position(|(t, _)| *t == box_type)?;
    Some(boxes.remove(position).1)
}

fn has_image_header(jp2h: &[u8]) -> bool {
    let header_length = match BoxHeader::from_bytes(jp2h) {
        Ok(header) => header.header_length as u64,
        Err(_) => return false,
    };
    let mut reader = io::Cursor::new(jp2h);
    match decode_boxes(&mut reader, header_length, jp2h.len() as u64) {
        Ok(children) => children
            .iter()
            .any(|child| child.box_type() == BOX_TYPE_IMAGE_HEADER),
        Err(_) => false,
    }
}
