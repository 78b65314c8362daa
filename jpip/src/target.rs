use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use log::info;

use crate::index::{build_index, Index};
use crate::source::{ByteSource, FileSource};
use crate::{EventSink, JPIPError};

/// An indexed image resource, shared read-only by every channel serving it.
pub struct Target {
    name: String,
    csn: u64,
    source: Arc<dyn ByteSource>,
    index: Index,
}

impl Target {
    pub fn open(
        name: impl Into<String>,
        source: Arc<dyn ByteSource>,
        csn: u64,
        sink: &dyn EventSink,
    ) -> Result<Target, JPIPError> {
        let name = name.into();
        let index = build_index(source.as_ref(), sink)?;
        info!(
            "target {:?} csn {}: {} tiles, {} components, {} layers{}",
            name,
            csn,
            index.no_tiles(),
            index.no_components(),
            index.layers(),
            if index.precincts.is_some() {
                ", precincts indexed"
            } else {
                ""
            }
        );
        Ok(Target {
            name,
            csn,
            source,
            index,
        })
    }

    pub fn open_file<P: AsRef<Path>>(
        path: P,
        csn: u64,
        sink: &dyn EventSink,
    ) -> Result<Target, JPIPError> {
        let source = FileSource::open(path.as_ref())?;
        Target::open(path.as_ref().display().to_string(), Arc::new(source), csn, sink)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Codestream serial number, unique within the server.
    pub fn csn(&self) -> u64 {
        self.csn
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn source(&self) -> &dyn ByteSource {
        self.source.as_ref()
    }

    pub fn read_at(&self, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        self.source.read_vec(offset, length)
    }

    /// The whole codestream, SOC through EOC.
    pub fn codestream(&self) -> io::Result<Vec<u8>> {
        self.read_at(self.index.codestream_offset, self.index.codestream_length)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("csn", &self.csn)
            .field("length", &self.source.len())
            .finish()
    }
}
