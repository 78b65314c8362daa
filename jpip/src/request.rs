use jp2::BoxType;

/// What metadata a request asks for, besides the image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataRequest {
    /// Every metadata-bin.
    All,
    Bin(u64),
    /// Bins holding, or pointing at, boxes of this type.
    BoxType(BoxType),
    /// Bins copying bytes from this range of the resource.
    ByteRange { offset: u64, length: u64 },
}

/// A view-window request against one codestream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewWindowRequest {
    pub csn: u64,
    /// Frame size (fx, fy); the resolution is the largest that fits.
    pub frame_size: Option<(u32, u32)>,
    /// Discarded decomposition levels, overriding the frame size.
    pub level: Option<u8>,
    /// Region offset and size in the coordinates of the reduced frame.
    pub region_offset: Option<(u32, u32)>,
    pub region_size: Option<(u32, u32)>,
    /// Requested component indices; all components when `None`.
    pub components: Option<Vec<u16>>,
    /// Quality layers; selects precinct delivery when the target supports
    /// it.
    pub layers: Option<u16>,
    pub metadata: Vec<MetadataRequest>,
    /// Response byte quota.
    pub max_bytes: Option<u64>,
}

impl ViewWindowRequest {
    pub fn new(csn: u64) -> Self {
        ViewWindowRequest {
            csn,
            ..Default::default()
        }
    }

    pub fn frame_size(mut self, fx: u32, fy: u32) -> Self {
        self.frame_size = Some((fx, fy));
        self
    }

    pub fn level(mut self, level: u8) -> Self {
        self.level = Some(level);
        self
    }

    pub fn region(mut self, offset: (u32, u32), size: (u32, u32)) -> Self {
        self.region_offset = Some(offset);
        self.region_size = Some(size);
        self
    }

    pub fn components(mut self, components: Vec<u16>) -> Self {
        self.components = Some(components);
        self
    }

    pub fn layers(mut self, layers: u16) -> Self {
        self.layers = Some(layers);
        self
    }

    pub fn metadata(mut self, request: MetadataRequest) -> Self {
        self.metadata.push(request);
        self
    }

    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// True when image data beyond the main header is asked for.
    pub fn has_view_window(&self) -> bool {
        self.frame_size.is_some() || self.level.is_some()
    }

    pub fn wants_component(&self, c: u16) -> bool {
        match &self.components {
            Some(components) => components.contains(&c),
            None => true,
        }
    }
}
