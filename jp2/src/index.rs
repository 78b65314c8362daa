// ISO/IEC 15444-9 Annex I
//
// Index table boxes. A Codestream Index box ('cidx') groups the tables that
// locate the parts of one codestream: the Codestream Finder box, the main
// header index, the tile-part index, the tile header index and the precinct
// packet index. All offsets in these tables are relative to the first byte
// of the codestream.
use std::io;

use crate::{
    read_array, BoxType, BoxWriter, JBox, JP2Error, BOX_TYPE_CODESTREAM_FINDER,
    BOX_TYPE_FRAGMENT_ARRAY_INDEX, BOX_TYPE_HEADER_INDEX_TABLE, BOX_TYPE_MANIFEST,
};

// I.3.2.2
//
// Codestream Finder box
//
// DR(2) CONT(2) COFF(8) CLEN(8). DR = 0 and CONT = 0 denote a codestream
// contained in this file as one contiguous range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodestreamFinderBox {
    data_reference: u16,
    container: u16,
    offset: u64,
    length: u64,
}

impl CodestreamFinderBox {
    pub fn new(offset: u64, length: u64) -> Self {
        CodestreamFinderBox {
            data_reference: 0,
            container: 0,
            offset,
            length,
        }
    }

    pub fn data_reference(&self) -> u16 {
        self.data_reference
    }

    pub fn is_contiguous(&self) -> bool {
        self.container == 0
    }

    /// Offset of the first byte of the codestream in the file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }
}

impl JBox for CodestreamFinderBox {
    fn identifier(&self) -> BoxType {
        BOX_TYPE_CODESTREAM_FINDER
    }

    fn decode<R: io::Read>(reader: &mut R, length: u64) -> Result<Self, JP2Error> {
        if length != 20 {
            return Err(JP2Error::BoxMalformed {
                box_type: BOX_TYPE_CODESTREAM_FINDER,
                offset: 0,
            });
        }
        Ok(CodestreamFinderBox {
            data_reference: u16::from_be_bytes(read_array(reader)?),
            container: u16::from_be_bytes(read_array(reader)?),
            offset: u64::from_be_bytes(read_array(reader)?),
            length: u64::from_be_bytes(read_array(reader)?),
        })
    }

    fn encode(&self, writer: &mut BoxWriter) {
        writer.write_u16(self.data_reference);
        writer.write_u16(self.container);
        writer.write_u64(self.offset);
        writer.write_u64(self.length);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManifestEntry {
    pub length: u32,
    pub box_type: BoxType,
}

// I.3.2.3
//
// Manifest box: the LBox and TBox of each box that follows it in the same
// superbox.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestBox {
    entries: Vec<ManifestEntry>,
}

impl ManifestBox {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        ManifestBox { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }
}

impl JBox for ManifestBox {
    fn identifier(&self) -> BoxType {
        BOX_TYPE_MANIFEST
    }

    fn decode<R: io::Read>(reader: &mut R, length: u64) -> Result<Self, JP2Error> {
        if length % 8 != 0 {
            return Err(JP2Error::BoxMalformed {
                box_type: BOX_TYPE_MANIFEST,
                offset: 0,
            });
        }
        let mut entries = Vec::with_capacity((length / 8) as usize);
        for _ in 0..length / 8 {
            entries.push(ManifestEntry {
                length: u32::from_be_bytes(read_array(reader)?),
                box_type: read_array(reader)?,
            });
        }
        Ok(ManifestBox { entries })
    }

    fn encode(&self, writer: &mut BoxWriter) {
        for entry in &self.entries {
            writer.write_u32(entry.length);
            writer.write_bytes(&entry.box_type);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerIndexEntry {
    /// Marker code, e.g. 0xFF51 for SIZ.
    pub marker: u16,
    /// Number of remaining markers of the same type.
    pub remaining: u16,
    /// Offset of the marker code relative to the codestream start.
    pub offset: u64,
    /// Marker segment length (Lxxx), excluding the marker code.
    pub length: u16,
}

// I.3.2.4
//
// Header Index Table box
//
// TLEN(8) followed by one record per marker segment of the header:
// marker(2) NR(2) offset(8) length(2).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderIndexTableBox {
    total_length: u64,
    markers: Vec<MarkerIndexEntry>,
}

impl HeaderIndexTableBox {
    pub fn new(total_length: u64, markers: Vec<MarkerIndexEntry>) -> Self {
        HeaderIndexTableBox {
            total_length,
            markers,
        }
    }

    /// Length of the indexed header in bytes.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn markers(&self) -> &[MarkerIndexEntry] {
        &self.markers
    }

    pub fn find(&self, marker: u16) -> Option<&MarkerIndexEntry> {
        self.markers.iter().find(|entry| entry.marker == marker)
    }
}

impl JBox for HeaderIndexTableBox {
    fn identifier(&self) -> BoxType {
        BOX_TYPE_HEADER_INDEX_TABLE
    }

    fn decode<R: io::Read>(reader: &mut R, length: u64) -> Result<Self, JP2Error> {
        if length < 8 || (length - 8) % 14 != 0 {
            return Err(JP2Error::BoxMalformed {
                box_type: BOX_TYPE_HEADER_INDEX_TABLE,
                offset: 0,
            });
        }
        let total_length = u64::from_be_bytes(read_array(reader)?);
        let count = (length - 8) / 14;
        let mut markers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            markers.push(MarkerIndexEntry {
                marker: u16::from_be_bytes(read_array(reader)?),
                remaining: u16::from_be_bytes(read_array(reader)?),
                offset: u64::from_be_bytes(read_array(reader)?),
                length: u16::from_be_bytes(read_array(reader)?),
            });
        }
        Ok(HeaderIndexTableBox {
            total_length,
            markers,
        })
    }

    fn encode(&self, writer: &mut BoxWriter) {
        writer.write_u64(self.total_length);
        for entry in &self.markers {
            writer.write_u16(entry.marker);
            writer.write_u16(entry.remaining);
            writer.write_u64(entry.offset);
            writer.write_u16(entry.length);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FragmentEntry {
    pub offset: u64,
    pub length: u64,
    pub aux: u32,
}

impl FragmentEntry {
    pub fn new(offset: u64, length: u64) -> Self {
        FragmentEntry {
            offset,
            length,
            aux: 0,
        }
    }

    /// Zero length entries pad a row up to NMAX.
    pub fn is_padding(&self) -> bool {
        self.length == 0
    }
}

// I.3.2.5
//
// Fragment Array Index box
//
// Version(1) NMAX M then M rows of NMAX (offset, length) entries.
// Version 0: 4-byte fields, 1: 8-byte fields, 2 and 3 as 0 and 1 with a
// 4-byte Aux field after each entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentArrayIndexBox {
    version: u8,
    max_fragments: u64,
    entries: Vec<FragmentEntry>,
    rows: u64,
}

impl FragmentArrayIndexBox {
    /// Builds a table from rows of fragments, padding each to the longest.
    /// The narrowest version that can represent every value is chosen.
    pub fn from_rows(rows: &[Vec<FragmentEntry>]) -> Self {
        let max_fragments = rows.iter().map(Vec::len).max().unwrap_or(0) as u64;
        let mut entries = Vec::with_capacity(rows.len() * max_fragments as usize);
        for row in rows {
            entries.extend_from_slice(row);
            entries.extend(
                std::iter::repeat(FragmentEntry::default()).take(max_fragments as usize - row.len()),
            );
        }

        let wide = entries
            .iter()
            .any(|e| e.offset > u32::MAX as u64 || e.length > u32::MAX as u64)
            || rows.len() as u64 > u32::MAX as u64;
        let aux = entries.iter().any(|e| e.aux != 0);
        let version = match (wide, aux) {
            (false, false) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (true, true) => 3,
        };

        FragmentArrayIndexBox {
            version,
            max_fragments,
            entries,
            rows: rows.len() as u64,
        }
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// NMAX, the number of entries per row.
    pub fn max_fragments(&self) -> u64 {
        self.max_fragments
    }

    /// M, the number of rows.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// The full row including padding entries.
    pub fn row(&self, row: u64) -> &[FragmentEntry] {
        if row >= self.rows {
            return &[];
        }
        let start = (row * self.max_fragments) as usize;
        &self.entries[start..start + self.max_fragments as usize]
    }

    /// Number of non-padding entries of a row.
    pub fn fragment_count(&self, row: u64) -> usize {
        self.row(row).iter().filter(|e| !e.is_padding()).count()
    }

    pub fn get(&self, row: u64, index: u64) -> Option<&FragmentEntry> {
        if index >= self.max_fragments {
            return None;
        }
        self.row(row).get(index as usize)
    }

    fn field_width(&self) -> u8 {
        if self.version & 0b01 == 0 {
            4
        } else {
            8
        }
    }

    fn has_aux(&self) -> bool {
        self.version & 0b10 != 0
    }
}

fn read_field<R: io::Read>(reader: &mut R, width: u8) -> Result<u64, JP2Error> {
    if width == 4 {
        Ok(u32::from_be_bytes(read_array(reader)?) as u64)
    } else {
        Ok(u64::from_be_bytes(read_array(reader)?))
    }
}

fn write_field(writer: &mut BoxWriter, width: u8, value: u64) {
    if width == 4 {
        writer.write_u32(value as u32);
    } else {
        writer.write_u64(value);
    }
}

impl JBox for FragmentArrayIndexBox {
    fn identifier(&self) -> BoxType {
        BOX_TYPE_FRAGMENT_ARRAY_INDEX
    }

    fn decode<R: io::Read>(reader: &mut R, length: u64) -> Result<Self, JP2Error> {
        let [version] = read_array(reader)?;
        if version > 3 {
            return Err(JP2Error::UnsupportedVersion {
                box_type: BOX_TYPE_FRAGMENT_ARRAY_INDEX,
                version,
            });
        }
        let mut faix = FragmentArrayIndexBox {
            version,
            ..Default::default()
        };
        let width = faix.field_width();
        faix.max_fragments = read_field(reader, width)?;
        faix.rows = read_field(reader, width)?;

        let entry_size = 2 * width as u64 + if faix.has_aux() { 4 } else { 0 };
        let count = faix.max_fragments.checked_mul(faix.rows);
        let expected = count
            .and_then(|count| count.checked_mul(entry_size))
            .map(|size| size + 1 + 2 * width as u64);
        if expected != Some(length) {
            return Err(JP2Error::BoxMalformed {
                box_type: BOX_TYPE_FRAGMENT_ARRAY_INDEX,
                offset: 0,
            });
        }

        let count = (faix.max_fragments * faix.rows) as usize;
        faix.entries.reserve(count);
        for _ in 0..count {
            let offset = read_field(reader, width)?;
            let length = read_field(reader, width)?;
            let aux = if faix.has_aux() {
                u32::from_be_bytes(read_array(reader)?)
            } else {
                0
            };
            faix.entries.push(FragmentEntry {
                offset,
                length,
                aux,
            });
        }
        Ok(faix)
    }

    fn encode(&self, writer: &mut BoxWriter) {
        let width = self.field_width();
        writer.write_u8(self.version);
        write_field(writer, width, self.max_fragments);
        write_field(writer, width, self.rows);
        for entry in &self.entries {
            write_field(writer, width, entry.offset);
            write_field(writer, width, entry.length);
            if self.has_aux() {
                writer.write_u32(entry.aux);
            }
        }
    }
}
