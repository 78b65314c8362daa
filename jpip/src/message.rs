use std::fmt;

use jp2::PlaceholderBox;

use crate::JPIPError;

// ISO/IEC 15444-9 Table A.2
//
// Data-bin classes. Extended classes carry an Aux VBAS after the length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClassId {
    Precinct,
    ExtPrecinct,
    TileHeader,
    Tile,
    ExtTile,
    MainHeader,
    Metadata,
}

impl ClassId {
    pub fn value(self) -> u64 {
        match self {
            ClassId::Precinct => 0,
            ClassId::ExtPrecinct => 1,
            ClassId::TileHeader => 2,
            ClassId::Tile => 4,
            ClassId::ExtTile => 5,
            ClassId::MainHeader => 6,
            ClassId::Metadata => 8,
        }
    }

    pub fn from_value(value: u64) -> Option<ClassId> {
        match value {
            0 => Some(ClassId::Precinct),
            1 => Some(ClassId::ExtPrecinct),
            2 => Some(ClassId::TileHeader),
            4 => Some(ClassId::Tile),
            5 => Some(ClassId::ExtTile),
            6 => Some(ClassId::MainHeader),
            8 => Some(ClassId::Metadata),
            _ => None,
        }
    }

    /// Odd class identifiers are the extended classes.
    pub fn has_aux(self) -> bool {
        self.value() & 1 == 1
    }

    pub fn is_precinct(self) -> bool {
        matches!(self, ClassId::Precinct | ClassId::ExtPrecinct)
    }

    pub fn is_tile(self) -> bool {
        matches!(self, ClassId::Tile | ClassId::ExtTile)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ClassId::Precinct => "precinct",
            ClassId::ExtPrecinct => "extended precinct",
            ClassId::TileHeader => "tile header",
            ClassId::Tile => "tile",
            ClassId::ExtTile => "extended tile",
            ClassId::MainHeader => "main header",
            ClassId::Metadata => "metadata",
        };
        write!(f, "{}", name)
    }
}

/// One JPIP message: a contiguous range of one data-bin.
///
/// On the sending side `res_offset` locates the payload in the resource; on
/// the receiving side it locates it in the received stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub class_id: ClassId,
    pub in_class_id: u64,
    pub csn: u64,
    pub bin_offset: u64,
    pub length: u64,
    pub aux: u64,
    pub last_byte: bool,
    pub res_offset: u64,
    /// When set the payload is this serialized box, not resource bytes.
    pub placeholder: Option<PlaceholderBox>,
}

impl Message {
    pub fn new(class_id: ClassId, in_class_id: u64, csn: u64) -> Self {
        Message {
            class_id,
            in_class_id,
            csn,
            bin_offset: 0,
            length: 0,
            aux: 0,
            last_byte: false,
            res_offset: 0,
            placeholder: None,
        }
    }

    /// A message covering `length` bytes of the resource at `res_offset`.
    pub fn with_range(mut self, bin_offset: u64, res_offset: u64, length: u64) -> Self {
        self.bin_offset = bin_offset;
        self.res_offset = res_offset;
        self.length = length;
        self
    }

    pub fn with_aux(mut self, aux: u64) -> Self {
        self.aux = aux;
        self
    }

    pub fn last(mut self, last_byte: bool) -> Self {
        self.last_byte = last_byte;
        self
    }

    pub fn end(&self) -> u64 {
        self.bin_offset + self.length
    }

    /// True when both messages belong to the same data-bin.
    pub fn same_bin(&self, other: &Message) -> bool {
        self.class_id == other.class_id
            && self.in_class_id == other.in_class_id
            && self.csn == other.csn
    }
}

/// Ordered sequence of messages; emission order is queue order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageQueue {
    messages: Vec<Message>,
}

impl MessageQueue {
    pub fn new() -> Self {
        MessageQueue::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Sum of payload lengths.
    pub fn payload_length(&self) -> u64 {
        self.messages.iter().map(|m| m.length).sum()
    }

    /// Messages of one data-bin in queue order.
    pub fn bin<'a>(
        &'a self,
        class_id: ClassId,
        in_class_id: u64,
        csn: u64,
    ) -> impl Iterator<Item = &'a Message> + 'a {
        self.messages.iter().filter(move |m| {
            m.class_id == class_id && m.in_class_id == in_class_id && m.csn == csn
        })
    }

    /// Payload bytes of `message` from `stream`, checked against its bounds.
    pub fn payload<'a>(stream: &'a [u8], message: &Message) -> Result<&'a [u8], JPIPError> {
        let start = message.res_offset as usize;
        let end = start
            .checked_add(message.length as usize)
            .filter(|end| *end <= stream.len())
            .ok_or(JPIPError::ParseError {
                offset: message.res_offset,
            })?;
        Ok(&stream[start..end])
    }
}

impl IntoIterator for MessageQueue {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<'a> IntoIterator for &'a MessageQueue {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

impl FromIterator<Message> for MessageQueue {
    fn from_iter<I: IntoIterator<Item = Message>>(iter: I) -> Self {
        MessageQueue {
            messages: iter.into_iter().collect(),
        }
    }
}
