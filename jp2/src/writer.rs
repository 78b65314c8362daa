use std::io;

use crate::{BoxHeader, BoxType};

/// Builds a box by collecting its contents first and emitting the header
/// once the final length is known.
///
/// ```
/// use jp2::{BoxWriter, BOX_TYPE_XML};
///
/// let mut writer = BoxWriter::new(BOX_TYPE_XML);
/// writer.write_bytes(b"<a/>");
/// let bytes = writer.finish();
/// assert_eq!(&bytes[..4], &[0, 0, 0, 12]);
/// ```
#[derive(Debug, Clone)]
pub struct BoxWriter {
    box_type: BoxType,
    contents: Vec<u8>,
}

impl BoxWriter {
    pub fn new(box_type: BoxType) -> Self {
        BoxWriter {
            box_type,
            contents: Vec::new(),
        }
    }

    pub fn box_type(&self) -> BoxType {
        self.box_type
    }

    /// Length of the contents written so far.
    pub fn contents_length(&self) -> u64 {
        self.contents.len() as u64
    }

    pub fn write_u8(&mut self, value: u8) {
        self.contents.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.contents.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.contents.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.contents.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.contents.extend_from_slice(bytes);
    }

    /// Appends a finished child box.
    pub fn write_box(&mut self, child: BoxWriter) {
        child.finish_into(&mut self.contents);
    }

    pub fn header(&self) -> BoxHeader {
        BoxHeader::new(self.box_type, self.contents.len() as u64)
    }

    pub fn finish(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.contents.len() + 16);
        self.finish_into(&mut bytes);
        bytes
    }

    /// Writes header and contents to the end of `out` in one pass.
    pub fn finish_into(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header().encode());
        out.extend_from_slice(&self.contents);
    }
}

impl io::Write for BoxWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.contents.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
