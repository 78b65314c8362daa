#![allow(dead_code)]

use std::sync::Arc;

use jp2::{
    encode_signature, BoxWriter, ColourSpecificationBox, FileTypeBox, ImageHeaderBox, JBox,
    BOX_TYPE_CONTIGUOUS_CODESTREAM, BOX_TYPE_HEADER, BOX_TYPE_XML,
    ENUMERATED_COLOUR_SPACE_GREYSCALE,
};
use jpc::{encode_packet_length, StartOfTileSegment};
use jpip::{MemorySink, MemorySource, Target};

/// Shape of a synthesised codestream. Precincts are not partitioned, so
/// every resolution holds one precinct and a tile has
/// `layers * (levels + 1) * components` packets in LRCP order.
#[derive(Debug, Clone)]
pub struct Fixture {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub components: u16,
    pub levels: u8,
    pub layers: u16,
    pub parts_per_tile: u8,
    pub packet_lengths: bool,
    pub eph: bool,
}

impl Default for Fixture {
    fn default() -> Self {
        Fixture {
            width: 64,
            height: 64,
            tile_width: 32,
            tile_height: 32,
            components: 1,
            levels: 2,
            layers: 2,
            parts_per_tile: 1,
            packet_lengths: false,
            eph: false,
        }
    }
}

impl Fixture {
    pub fn tiles(&self) -> u32 {
        ((self.width + self.tile_width - 1) / self.tile_width)
            * ((self.height + self.tile_height - 1) / self.tile_height)
    }

    pub fn packets_per_tile(&self) -> usize {
        self.layers as usize * (self.levels as usize + 1) * self.components as usize
    }

    /// Bytes of packet `i` of tile `t`. Never 0xFF, so no marker can appear.
    pub fn packet(&self, t: u32, i: usize) -> Vec<u8> {
        let length = 3 + (i + t as usize) % 4;
        (0..length)
            .map(|k| ((t as usize * 31 + i * 7 + k) % 0x7f) as u8)
            .collect()
    }

    pub fn main_header(&self) -> Vec<u8> {
        let mut out = vec![0xFF, 0x4F];

        // SIZ
        out.extend_from_slice(&[0xFF, 0x51]);
        out.extend_from_slice(&(38 + 3 * self.components).to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        for value in [
            self.width,
            self.height,
            0,
            0,
            self.tile_width,
            self.tile_height,
            0,
            0,
        ] {
            out.extend_from_slice(&value.to_be_bytes());
        }
        out.extend_from_slice(&self.components.to_be_bytes());
        for _ in 0..self.components {
            out.extend_from_slice(&[7, 1, 1]);
        }

        // COD: LRCP, no precinct partition, 64x64 code-blocks, 5-3 wavelet
        out.extend_from_slice(&[0xFF, 0x52, 0x00, 0x0C]);
        out.push(if self.eph { 0x04 } else { 0x00 });
        out.push(0x00);
        out.extend_from_slice(&self.layers.to_be_bytes());
        out.push(0x00);
        out.extend_from_slice(&[self.levels, 4, 4, 0, 1]);

        // QCD: no quantization, one exponent per sub-band
        let bands = 1 + 3 * self.levels as u16;
        out.extend_from_slice(&[0xFF, 0x5C]);
        out.extend_from_slice(&(3 + bands).to_be_bytes());
        out.push(0x40);
        out.extend((0..bands).map(|_| 0x48u8));
        out
    }

    /// The tile-parts of tile `t`, each split off a share of its packets.
    pub fn tile_parts(&self, t: u32) -> Vec<Vec<u8>> {
        let packets: Vec<Vec<u8>> = (0..self.packets_per_tile())
            .map(|i| self.packet(t, i))
            .collect();
        let parts = self.parts_per_tile as usize;
        let share = (packets.len() + parts - 1) / parts;

        (0..parts)
            .map(|k| {
                let chunk: &[Vec<u8>] = packets
                    .get(k * share..((k + 1) * share).min(packets.len()))
                    .unwrap_or(&[]);
                let mut header = Vec::new();
                if self.packet_lengths {
                    let mut body = Vec::new();
                    for packet in chunk {
                        encode_packet_length(packet.len() as u32, &mut body);
                    }
                    header.extend_from_slice(&[0xFF, 0x58]);
                    header.extend_from_slice(&(3 + body.len() as u16).to_be_bytes());
                    header.push(0);
                    header.extend_from_slice(&body);
                }
                let data: Vec<u8> = chunk.concat();
                let psot = 12 + header.len() + 2 + data.len();
                let mut part = StartOfTileSegment::new(
                    t as u16,
                    psot as u32,
                    k as u8,
                    self.parts_per_tile,
                )
                .encode()
                .to_vec();
                part.extend_from_slice(&header);
                part.extend_from_slice(&[0xFF, 0x93]);
                part.extend_from_slice(&data);
                part
            })
            .collect()
    }

    /// Complete codestream: tile-parts grouped by tile.
    pub fn codestream(&self) -> Vec<u8> {
        let mut out = self.main_header();
        for t in 0..self.tiles() {
            for part in self.tile_parts(t) {
                out.extend_from_slice(&part);
            }
        }
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }
}

pub fn image_header_box(fixture: &Fixture) -> Vec<u8> {
    let mut jp2h = BoxWriter::new(BOX_TYPE_HEADER);
    jp2h.write_bytes(
        &ImageHeaderBox::new(fixture.width, fixture.height, fixture.components, 8, false)
            .to_bytes(),
    );
    jp2h.write_bytes(&ColourSpecificationBox::enumerated(ENUMERATED_COLOUR_SPACE_GREYSCALE).to_bytes());
    jp2h.finish()
}

pub fn xml_box(text: &str) -> Vec<u8> {
    let mut xml = BoxWriter::new(BOX_TYPE_XML);
    xml.write_bytes(text.as_bytes());
    xml.finish()
}

/// jP, ftyp, jp2h, then `extra` boxes, then jp2c.
pub fn jp2(fixture: &Fixture, extra: &[Vec<u8>]) -> Vec<u8> {
    let mut out = encode_signature();
    out.extend_from_slice(&FileTypeBox::default().to_bytes());
    out.extend_from_slice(&image_header_box(fixture));
    for bytes in extra {
        out.extend_from_slice(bytes);
    }
    let mut jp2c = BoxWriter::new(BOX_TYPE_CONTIGUOUS_CODESTREAM);
    jp2c.write_bytes(&fixture.codestream());
    jp2c.finish_into(&mut out);
    out
}

pub fn open(bytes: Vec<u8>, csn: u64) -> Target {
    let sink = MemorySink::new();
    Target::open("fixture", Arc::new(MemorySource::new(bytes)), csn, &sink)
        .expect("fixture opens")
}

pub fn open_with_sink(bytes: Vec<u8>, csn: u64, sink: &MemorySink) -> Target {
    Target::open("fixture", Arc::new(MemorySource::new(bytes)), csn, sink).expect("fixture opens")
}
