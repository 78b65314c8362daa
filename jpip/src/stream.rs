// ISO/IEC 15444-9 A.2 and D.3
//
// The JPIP stream: each message is a bin-id VBAS, the class and csn when
// they change, bin offset, length, Aux for extended classes, then the
// payload. A response ends with an EOR message.
use std::io::Write;

use jp2::{JBox, PlaceholderBox, BOX_TYPE_PLACEHOLDER};
use log::{debug, warn};

use crate::message::{ClassId, Message, MessageQueue};
use crate::source::ByteSource;
use crate::vbas::{decode_vbas, encode_vbas, BinIdHeader};
use crate::JPIPError;

/// Identifier byte of an End Of Response message.
pub const EOR_IDENTIFIER: u8 = 0x00;

/// Why the server ended a response (Table D.2, the two reasons this server
/// produces).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EorReason {
    /// Everything the request asked for has now been sent.
    WindowDone,
    /// The byte limit of the request was reached.
    ByteLimit,
    Other(u8),
}

impl EorReason {
    pub fn code(self) -> u8 {
        match self {
            EorReason::WindowDone => 0x01,
            EorReason::ByteLimit => 0x02,
            EorReason::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => EorReason::WindowDone,
            0x02 => EorReason::ByteLimit,
            code => EorReason::Other(code),
        }
    }
}

/// The class and csn of the previous message. Both ends of a channel keep
/// one so that repeated values can be left out. It starts empty at every
/// response, so the first message of a response always carries both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamContext {
    last: Option<(ClassId, u64)>,
}

impl StreamContext {
    fn bb(&self, message: &Message) -> u8 {
        match self.last {
            Some((class_id, csn)) if csn == message.csn && class_id == message.class_id => 1,
            Some((_, csn)) if csn == message.csn => 2,
            _ => 3,
        }
    }
}

/// Encodes every field of `message` before its payload.
pub fn encode_message_header(message: &Message, context: &mut StreamContext, out: &mut Vec<u8>) {
    let bb = context.bb(message);
    BinIdHeader {
        bb,
        last_byte: message.last_byte,
        in_class_id: message.in_class_id,
    }
    .encode(out);
    if bb >= 2 {
        encode_vbas(message.class_id.value(), out);
    }
    if bb == 3 {
        encode_vbas(message.csn, out);
    }
    encode_vbas(message.bin_offset, out);
    encode_vbas(message.length, out);
    if message.class_id.has_aux() {
        encode_vbas(message.aux, out);
    }
    context.last = Some((message.class_id, message.csn));
}

/// Writes the messages of one response after another.
#[derive(Debug, Clone, Default)]
pub struct StreamWriter {
    context: StreamContext,
}

impl StreamWriter {
    pub fn new() -> Self {
        StreamWriter::default()
    }

    /// Writes every message of `queue`, payloads read from `source`.
    /// Returns the number of bytes written.
    pub fn emit<W: Write>(
        &mut self,
        queue: &MessageQueue,
        source: &dyn ByteSource,
        out: &mut W,
    ) -> Result<u64, JPIPError> {
        let mut written = 0;
        let mut buffer = Vec::new();
        for message in queue {
            buffer.clear();
            encode_message_header(message, &mut self.context, &mut buffer);
            match &message.placeholder {
                Some(placeholder) => buffer.extend_from_slice(&placeholder.to_bytes()),
                None => {
                    let start = buffer.len();
                    buffer.resize(start + message.length as usize, 0);
                    source.read_exact_at(&mut buffer[start..], message.res_offset)?;
                }
            }
            out.write_all(&buffer)?;
            written += buffer.len() as u64;
        }
        Ok(written)
    }

    /// Ends the response. The next message starts a new response.
    pub fn end_of_response<W: Write>(&mut self, reason: EorReason, out: &mut W) -> Result<(), JPIPError> {
        out.write_all(&[EOR_IDENTIFIER, reason.code(), 0x00])?;
        self.context = StreamContext::default();
        Ok(())
    }
}

/// Encodes one complete response: messages then the EOR trailer.
pub fn encode_response(
    queue: &MessageQueue,
    source: &dyn ByteSource,
    reason: EorReason,
) -> Result<Vec<u8>, JPIPError> {
    let mut writer = StreamWriter::new();
    let mut out = Vec::new();
    writer.emit(queue, source, &mut out)?;
    writer.end_of_response(reason, &mut out)?;
    Ok(out)
}

enum Decoded {
    Message(Message),
    EndOfResponse(EorReason),
}

// Decodes the message or EOR at `pos`. `Truncated` means the bytes run out
// before the message does.
fn decode_at(
    bytes: &[u8],
    pos: usize,
    context: &StreamContext,
) -> Result<(Decoded, usize, StreamContext), JPIPError> {
    if bytes.get(pos) == Some(&EOR_IDENTIFIER) {
        let reason = *bytes.get(pos + 1).ok_or(JPIPError::Truncated {
            offset: (pos + 1) as u64,
        })?;
        let (body_length, used) = decode_vbas(bytes, pos + 2)?;
        let end = (pos + 2 + used)
            .checked_add(body_length as usize)
            .ok_or(JPIPError::ParseError { offset: pos as u64 })?;
        if end > bytes.len() {
            return Err(JPIPError::Truncated {
                offset: bytes.len() as u64,
            });
        }
        return Ok((
            Decoded::EndOfResponse(EorReason::from_code(reason)),
            end - pos,
            StreamContext::default(),
        ));
    }

    let (header, mut cursor) = BinIdHeader::decode(bytes, pos)?;
    cursor += pos;
    let read = |cursor: &mut usize| -> Result<u64, JPIPError> {
        let (value, used) = decode_vbas(bytes, *cursor)?;
        *cursor += used;
        Ok(value)
    };

    let (class_id, csn) = match (header.bb, context.last) {
        (1, Some(last)) => last,
        (2, Some((_, csn))) => {
            let value = read(&mut cursor)?;
            let class_id =
                ClassId::from_value(value).ok_or(JPIPError::ParseError { offset: pos as u64 })?;
            (class_id, csn)
        }
        (3, _) => {
            let value = read(&mut cursor)?;
            let class_id =
                ClassId::from_value(value).ok_or(JPIPError::ParseError { offset: pos as u64 })?;
            (class_id, read(&mut cursor)?)
        }
        // bb = 1 or 2 with nothing to inherit from.
        _ => return Err(JPIPError::ParseError { offset: pos as u64 }),
    };

    let mut message = Message::new(class_id, header.in_class_id, csn);
    message.last_byte = header.last_byte;
    message.bin_offset = read(&mut cursor)?;
    message.length = read(&mut cursor)?;
    if class_id.has_aux() {
        message.aux = read(&mut cursor)?;
    }
    message.res_offset = cursor as u64;
    let end = cursor
        .checked_add(message.length as usize)
        .ok_or(JPIPError::ParseError { offset: pos as u64 })?;
    if end > bytes.len() {
        return Err(JPIPError::Truncated {
            offset: bytes.len() as u64,
        });
    }

    let payload = &bytes[cursor..end];
    if class_id == ClassId::Metadata && payload.len() >= 28 && payload[4..8] == BOX_TYPE_PLACEHOLDER
    {
        match PlaceholderBox::from_bytes(payload) {
            Ok(placeholder) if placeholder.length() == message.length => {
                message.placeholder = Some(placeholder)
            }
            Ok(_) => {}
            Err(error) => debug!("metadata at {} is not a placeholder: {}", cursor, error),
        }
    }

    Ok((
        Decoded::Message(message),
        end - pos,
        StreamContext {
            last: Some((class_id, csn)),
        },
    ))
}

/// Decodes a JPIP stream that may arrive in pieces. Every received byte is
/// kept; `res_offset` of decoded messages points into [`StreamParser::buffer`].
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: Vec<u8>,
    position: usize,
    context: StreamContext,
    queue: MessageQueue,
    last_eor: Option<EorReason>,
}

impl StreamParser {
    pub fn new() -> Self {
        StreamParser::default()
    }

    /// Appends `bytes` and decodes every message now complete. Returns how
    /// many messages were added.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<usize, JPIPError> {
        self.buffer.extend_from_slice(bytes);
        let before = self.queue.len();
        while self.position < self.buffer.len() {
            match decode_at(&self.buffer, self.position, &self.context) {
                Ok((decoded, consumed, context)) => {
                    match decoded {
                        Decoded::Message(message) => self.queue.push(message),
                        Decoded::EndOfResponse(reason) => {
                            debug!("end of response, reason {:?}", reason);
                            self.last_eor = Some(reason);
                        }
                    }
                    self.context = context;
                    self.position += consumed;
                }
                Err(JPIPError::Truncated { .. }) => break,
                Err(error) => return Err(error),
            }
        }
        Ok(self.queue.len() - before)
    }

    /// Fails with `Truncated` if undecoded bytes remain.
    pub fn finish(&self) -> Result<(), JPIPError> {
        if self.position < self.buffer.len() {
            warn!(
                "{} bytes of an incomplete message at {}",
                self.buffer.len() - self.position,
                self.position
            );
            return Err(JPIPError::Truncated {
                offset: self.position as u64,
            });
        }
        Ok(())
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub fn last_eor(&self) -> Option<EorReason> {
        self.last_eor
    }

    pub fn into_parts(self) -> (Vec<u8>, MessageQueue) {
        (self.buffer, self.queue)
    }
}

/// Decodes a complete stream in one call.
pub fn parse_stream(bytes: &[u8]) -> Result<MessageQueue, JPIPError> {
    let mut parser = StreamParser::new();
    parser.feed(bytes)?;
    parser.finish()?;
    Ok(parser.queue)
}
