// JPIP (ISO/IEC 15444-9) data-bin server core: indexes JP2 files and raw
// codestreams, answers view-window requests with JPT- or JPP-stream
// messages the client does not have yet, and rebuilds decodable files from
// received streams.
mod error;
mod event;

pub mod cachemodel;
pub mod enqueue;
pub mod index;
pub mod indexer;
pub mod message;
pub mod metadata;
pub mod query;
pub mod reconstruct;
pub mod request;
pub mod session;
pub mod source;
pub mod stream;
pub mod target;
pub mod vbas;

pub use cachemodel::{BinRef, CacheModel};
pub use enqueue::{decomposition_level, reduced_frame, Enqueued, Enqueuer};
pub use error::{ErrorKind, JPIPError};
pub use event::{Event, EventLevel, EventSink, LogSink, MemorySink};
pub use index::{build_index, Index};
pub use indexer::write_indexed_jp2;
pub use message::{ClassId, Message, MessageQueue};
pub use query::{parse_query, Query};
pub use reconstruct::{reconstruct_j2k, reconstruct_jp2, Reconstruction};
pub use request::{MetadataRequest, ViewWindowRequest};
pub use session::{Channel, ChannelInfo, Registry, Server, ServerConfig, Transport};
pub use source::{ByteSource, FileSource, MemorySource};
pub use stream::{encode_response, parse_stream, EorReason, StreamParser, StreamWriter};
pub use target::Target;
