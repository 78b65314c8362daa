use std::error;
use std::fmt;
use std::io;

use jp2::JP2Error;
use jpc::CodestreamError;

/// Broad classes of failure, telling a caller whether retrying can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed box, marker segment or stream. Not retriable.
    Format,
    /// Unknown target, codestream or channel. Do not retry the same request.
    NotFound,
    /// The reconstructor lacks data-bins; fetch more and retry.
    IncompleteData,
    /// Index build races are resolved by blocking and never reported with
    /// this kind.
    Concurrency,
    Cancelled,
    InvalidRequest,
    Io,
}

#[derive(Debug)]
pub enum JPIPError {
    NotJP2Format,
    NoCodestream,
    Box(JP2Error),
    Codestream(CodestreamError),
    ParseError { offset: u64 },
    Truncated { offset: u64 },
    UnknownTarget { csn: u64 },
    UnknownChannel { cid: String },
    UnknownSession { id: u64 },
    IncompleteHeader,
    IncompleteRegion { missing_tiles: Vec<u32> },
    MissingIhdr,
    Cancelled,
    InvalidQuery { field: String, value: String },
    Io(io::Error),
}

impl JPIPError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotJP2Format
            | Self::NoCodestream
            | Self::Box(_)
            | Self::Codestream(_)
            | Self::ParseError { .. }
            | Self::Truncated { .. } => ErrorKind::Format,
            Self::UnknownTarget { .. }
            | Self::UnknownChannel { .. }
            | Self::UnknownSession { .. } => ErrorKind::NotFound,
            Self::IncompleteHeader | Self::IncompleteRegion { .. } | Self::MissingIhdr => {
                ErrorKind::IncompleteData
            }
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidQuery { .. } => ErrorKind::InvalidRequest,
            Self::Io(_) => ErrorKind::Io,
        }
    }
}

impl error::Error for JPIPError {}
impl fmt::Display for JPIPError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotJP2Format => write!(f, "not a JP2 file or J2K codestream"),
            Self::NoCodestream => write!(f, "no contiguous codestream box"),
            Self::Box(error) => write!(f, "box error: {}", error),
            Self::Codestream(error) => write!(f, "codestream error: {}", error),
            Self::ParseError { offset } => {
                write!(f, "malformed message at stream offset {}", offset)
            }
            Self::Truncated { offset } => {
                write!(f, "stream truncated at offset {}", offset)
            }
            Self::UnknownTarget { csn } => write!(f, "unknown codestream {}", csn),
            Self::UnknownChannel { cid } => write!(f, "unknown channel {:?}", cid),
            Self::UnknownSession { id } => write!(f, "unknown session {}", id),
            Self::IncompleteHeader => write!(f, "main header data-bin incomplete"),
            Self::IncompleteRegion { missing_tiles } => {
                write!(f, "tiles {:?} were not delivered", missing_tiles)
            }
            Self::MissingIhdr => write!(f, "image header box (ihdr) not delivered"),
            Self::Cancelled => write!(f, "request cancelled"),
            Self::InvalidQuery { field, value } => {
                write!(f, "invalid query field {}={:?}", field, value)
            }
            Self::Io(error) => write!(f, "{}", error),
        }
    }
}

impl From<io::Error> for JPIPError {
    fn from(error: io::Error) -> Self {
        JPIPError::Io(error)
    }
}

impl From<JP2Error> for JPIPError {
    fn from(error: JP2Error) -> Self {
        match error {
            JP2Error::Io(error) => JPIPError::Io(error),
            error => JPIPError::Box(error),
        }
    }
}

impl From<CodestreamError> for JPIPError {
    fn from(error: CodestreamError) -> Self {
        match error {
            CodestreamError::Io(error) => JPIPError::Io(error),
            error => JPIPError::Codestream(error),
        }
    }
}
