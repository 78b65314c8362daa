// ISO/IEC 15444-9 A.3.6
//
// Metadata-bins. Bin 0 mirrors the top level of the file: the boxes a client
// needs to open the image are copied, every other box is replaced by a
// placeholder naming the bin that carries its contents.
use std::io;

use jp2::{
    decode_boxes, is_index_box, is_superbox, type_name, BoxNode, BoxType, JP2Error, PlaceholderBox,
    BOX_TYPE_CONTIGUOUS_CODESTREAM, BOX_TYPE_FILE_TYPE, BOX_TYPE_HEADER, BOX_TYPE_SIGNATURE,
    PLACEHOLDER_FLAG_CODESTREAM, PLACEHOLDER_FLAG_ORIGINAL,
};
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum MetadataEntry {
    /// A complete box copied from the resource, header included.
    Box {
        box_type: BoxType,
        offset: u64,
        length: u64,
    },
    Placeholder(PlaceholderBox),
    /// Raw box contents copied from the resource.
    Contents { offset: u64, length: u64 },
}

impl MetadataEntry {
    /// Bytes the entry occupies in its bin.
    pub fn length(&self) -> u64 {
        match self {
            MetadataEntry::Box { length, .. } | MetadataEntry::Contents { length, .. } => *length,
            MetadataEntry::Placeholder(placeholder) => placeholder.length(),
        }
    }

    /// The type of the box this entry is or stands in for.
    pub fn box_type(&self) -> Option<BoxType> {
        match self {
            MetadataEntry::Box { box_type, .. } => Some(*box_type),
            MetadataEntry::Placeholder(placeholder) => {
                placeholder.original_header().ok().map(|h| h.box_type)
            }
            MetadataEntry::Contents { .. } => None,
        }
    }

    fn resource_range(&self) -> Option<(u64, u64)> {
        match self {
            MetadataEntry::Box { offset, length, .. }
            | MetadataEntry::Contents { offset, length } => Some((*offset, *length)),
            MetadataEntry::Placeholder(_) => None,
        }
    }
}

/// One metadata-bin: its entries in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataBin {
    pub id: u64,
    pub entries: Vec<MetadataEntry>,
}

impl MetadataBin {
    pub fn new(id: u64) -> Self {
        MetadataBin {
            id,
            entries: Vec::new(),
        }
    }

    pub fn length(&self) -> u64 {
        self.entries.iter().map(MetadataEntry::length).sum()
    }

    /// True when the bin holds or points at a box of `box_type`.
    pub fn mentions(&self, box_type: BoxType) -> bool {
        self.entries.iter().any(|e| e.box_type() == Some(box_type))
    }

    /// Bins referenced by placeholders of `box_type`, or by every placeholder
    /// when `box_type` is `None`.
    pub fn referenced_bins(&self, box_type: Option<BoxType>) -> Vec<u64> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                MetadataEntry::Placeholder(p) if p.flags() & PLACEHOLDER_FLAG_ORIGINAL != 0 => {
                    Some((p, e.box_type()))
                }
                _ => None,
            })
            .filter(|(_, t)| box_type.is_none() || *t == box_type)
            .map(|(p, _)| p.original_id())
            .collect()
    }

    /// True when any entry copies bytes from `[offset, offset + length)`.
    pub fn overlaps(&self, offset: u64, length: u64) -> bool {
        self.entries.iter().any(|e| match e.resource_range() {
            Some((start, len)) => start < offset + length && offset < start + len,
            None => false,
        })
    }
}

/// Splits the top-level boxes of a JP2 file into metadata-bins.
pub fn build_metadata<R: io::Read + io::Seek>(
    reader: &mut R,
    top_level: &[BoxNode],
) -> Result<Vec<MetadataBin>, JP2Error> {
    let mut root = MetadataBin::new(0);
    let mut bins = Vec::new();

    for node in top_level {
        let box_type = node.box_type();
        match box_type {
            t if is_index_box(&t) => continue,
            BOX_TYPE_SIGNATURE | BOX_TYPE_FILE_TYPE | BOX_TYPE_HEADER => {
                root.entries.push(MetadataEntry::Box {
                    box_type,
                    offset: node.offset,
                    length: node.length(),
                });
            }
            BOX_TYPE_CONTIGUOUS_CODESTREAM => {
                root.entries.push(MetadataEntry::Placeholder(PlaceholderBox::new(
                    PLACEHOLDER_FLAG_CODESTREAM,
                    0,
                    &node.header,
                )));
            }
            _ => {
                let id = bins.len() as u64 + 1;
                debug!("{} box at {} moves to metadata-bin {}", type_name(&box_type), node.offset, id);
                root.entries.push(MetadataEntry::Placeholder(PlaceholderBox::new(
                    PLACEHOLDER_FLAG_ORIGINAL,
                    id,
                    &node.header,
                )));
                bins.push(contents_bin(reader, node, id)?);
            }
        }
    }

    bins.insert(0, root);
    Ok(bins)
}

// A superbox bin holds its sub-boxes whole; any other box contributes its
// raw contents.
fn contents_bin<R: io::Read + io::Seek>(
    reader: &mut R,
    node: &BoxNode,
    id: u64,
) -> Result<MetadataBin, JP2Error> {
    let mut bin = MetadataBin::new(id);
    if is_superbox(&node.box_type()) {
        for child in decode_boxes(reader, node.contents_offset(), node.end())? {
            bin.entries.push(MetadataEntry::Box {
                box_type: child.box_type(),
                offset: child.offset,
                length: child.length(),
            });
        }
    } else if node.contents_length() > 0 {
        bin.entries.push(MetadataEntry::Contents {
            offset: node.contents_offset(),
            length: node.contents_length(),
        });
    }
    Ok(bin)
}
