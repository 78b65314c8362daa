// Turning a view-window request into the messages a client still lacks.
use std::sync::atomic::{AtomicBool, Ordering};

use jpc::{ceil_div, Rect};
use log::{debug, info};

use crate::cachemodel::{BinRef, CacheModel};
use crate::index::Index;
use crate::message::{ClassId, Message, MessageQueue};
use crate::metadata::{MetadataBin, MetadataEntry};
use crate::request::{MetadataRequest, ViewWindowRequest};
use crate::target::Target;
use crate::JPIPError;

/// Outcome of one enqueue: the messages, the units they deliver, and
/// whether everything requested fit within the quota.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enqueued {
    pub queue: MessageQueue,
    pub marks: Vec<BinRef>,
    pub complete: bool,
}

pub struct Enqueuer<'a> {
    target: &'a Target,
    cache: &'a CacheModel,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Enqueuer<'a> {
    pub fn new(target: &'a Target, cache: &'a CacheModel) -> Self {
        Enqueuer {
            target,
            cache,
            cancel: None,
        }
    }

    /// Polls `cancel` between tiles; once set the enqueue fails with
    /// `Cancelled`.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Builds the response to `request`. The cache model is only read; apply
    /// the returned marks with [`CacheModel::commit`] once the response is
    /// written.
    pub fn enqueue(&self, request: &ViewWindowRequest) -> Result<Enqueued, JPIPError> {
        let csn = self.target.csn();
        if request.csn != csn || self.cache.csn() != csn {
            return Err(JPIPError::UnknownTarget { csn: request.csn });
        }
        self.check_cancelled()?;

        let index = self.target.index();
        let mut builder = Builder::new(request.max_bytes);

        if !self.cache.query(BinRef::MainHeader) {
            builder.push(
                Message::new(ClassId::MainHeader, 0, csn)
                    .with_range(0, index.codestream_offset, index.main_header_length())
                    .last(true),
                Some(BinRef::MainHeader),
            );
        }

        for id in metadata_bins(index, request) {
            if self.cache.query(BinRef::Metadata { id }) {
                continue;
            }
            if let Some(bin) = index.metadata_bin(id) {
                builder.push_all(enqueue_metadata_bin(bin, csn), BinRef::Metadata { id });
            }
        }

        if request.has_view_window() && !builder.exhausted {
            let level = match request.level {
                Some(level) => level.min(index.levels()),
                None => {
                    let (fx, fy) = request.frame_size.unwrap_or((u32::MAX, u32::MAX));
                    decomposition_level(index, fx, fy)
                }
            };
            let region = request_region(index, request, level);
            let precinct_mode = request.layers.is_some() && index.precincts.is_some();
            debug!(
                "view-window level {} region {:?}, {} delivery",
                level,
                region,
                if precinct_mode { "precinct" } else { "tile-part" }
            );

            for t in 0..index.no_tiles() {
                self.check_cancelled()?;
                if !index.tile_rect(t, level).intersects(&region) {
                    continue;
                }
                if precinct_mode {
                    self.enqueue_precincts(&mut builder, request, t, level);
                } else {
                    self.enqueue_tile_parts(&mut builder, t, level);
                }
                if builder.exhausted {
                    break;
                }
            }
        }

        info!(
            "enqueued {} messages, {} bytes{}",
            builder.queue.len(),
            builder.used,
            if builder.exhausted { ", quota reached" } else { "" }
        );
        Ok(Enqueued {
            complete: !builder.exhausted,
            queue: builder.queue,
            marks: builder.marks,
        })
    }

    fn check_cancelled(&self) -> Result<(), JPIPError> {
        match self.cancel {
            Some(flag) if flag.load(Ordering::Acquire) => Err(JPIPError::Cancelled),
            _ => Ok(()),
        }
    }

    // Whole tile-parts; coarser levels need fewer of them.
    fn enqueue_tile_parts(&self, builder: &mut Builder, t: u32, level: u8) {
        let index = self.target.index();
        let csn = self.target.csn();
        let parts: Vec<_> = index.tile_parts_of(t).copied().collect();
        let count = parts.len() as u64;
        let needed = count.saturating_sub(level as u64).max(1).min(count);

        let mut bin_offset = 0;
        for (i, part) in parts.iter().enumerate().take(needed as usize) {
            let unit = BinRef::TilePart {
                tile: t,
                part: i as u32,
            };
            if !self.cache.query(unit) {
                let message = Message::new(ClassId::ExtTile, t as u64, csn)
                    .with_range(
                        bin_offset,
                        index.codestream_offset + part.offset,
                        part.length,
                    )
                    .with_aux(count - i as u64)
                    .last(i as u64 + 1 == needed);
                if !builder.push(message, Some(unit)) {
                    return;
                }
            }
            bin_offset += part.length;
        }
    }

    // Tile header, then resolution by resolution every precinct of every
    // requested component, layer by layer.
    fn enqueue_precincts(
        &self,
        builder: &mut Builder,
        request: &ViewWindowRequest,
        t: u32,
        level: u8,
    ) {
        let index = self.target.index();
        let csn = self.target.csn();
        let (coding, layout) = match (index.tile_coding(t), index.tile_layout(t)) {
            (Some(coding), Some(layout)) => (coding, layout),
            _ => return,
        };

        let header_unit = BinRef::TileHeader { tile: t };
        if !self.cache.query(header_unit) {
            if let Some(header) = index.tile_headers.get(t as usize).copied().flatten() {
                let message = Message::new(ClassId::TileHeader, t as u64, csn)
                    .with_range(0, index.codestream_offset + header.offset, header.length)
                    .last(true);
                if !builder.push(message, Some(header_unit)) {
                    return;
                }
            }
        }

        let needed = request.layers.unwrap_or(coding.layers).min(coding.layers);
        let no_tiles = index.no_tiles() as u64;
        let no_components = index.no_components();
        let components: Vec<u16> = (0..no_components)
            .filter(|c| request.wants_component(*c))
            .collect();
        let max_resolution = coding.max_levels().saturating_sub(level);

        for r in 0..=max_resolution {
            let most = components
                .iter()
                .filter_map(|c| layout.resolution(*c as usize, r))
                .map(|res| res.precinct_count())
                .max()
                .unwrap_or(0);
            for p in 0..most {
                for &c in &components {
                    let levels = coding.components[c as usize].levels;
                    if levels < level || r > levels - level {
                        continue;
                    }
                    let s = match layout.sequence(c as usize, r, p) {
                        Some(s) => s,
                        None => continue,
                    };
                    let in_class_id =
                        t as u64 + (c as u64 + s as u64 * no_components as u64) * no_tiles;
                    let mut bin_offset = 0;
                    for l in 0..needed {
                        let packet = match index.precinct_packet(c, t, s, l) {
                            Some(packet) => *packet,
                            None => break,
                        };
                        let unit = BinRef::Precinct {
                            component: c,
                            tile: t,
                            sequence: s,
                            layer: l,
                        };
                        if !self.cache.query(unit) {
                            let message = Message::new(ClassId::ExtPrecinct, in_class_id, csn)
                                .with_range(
                                    bin_offset,
                                    index.codestream_offset + packet.offset,
                                    packet.length,
                                )
                                .with_aux(l as u64 + 1)
                                .last(l + 1 == needed);
                            if !builder.push(message, Some(unit)) {
                                return;
                            }
                        }
                        bin_offset += packet.length;
                    }
                }
            }
        }
    }
}

struct Builder {
    queue: MessageQueue,
    marks: Vec<BinRef>,
    limit: Option<u64>,
    used: u64,
    exhausted: bool,
}

impl Builder {
    fn new(limit: Option<u64>) -> Self {
        Builder {
            queue: MessageQueue::new(),
            marks: Vec::new(),
            limit,
            used: 0,
            exhausted: false,
        }
    }

    fn admit(&mut self, length: u64) -> bool {
        if self.exhausted {
            return false;
        }
        if let Some(limit) = self.limit {
            if self.used + length > limit {
                self.exhausted = true;
                return false;
            }
        }
        self.used += length;
        true
    }

    fn push(&mut self, message: Message, unit: Option<BinRef>) -> bool {
        if !self.admit(message.length) {
            return false;
        }
        self.queue.push(message);
        if let Some(unit) = unit {
            self.marks.push(unit);
        }
        true
    }

    // All messages of a bin or none of them.
    fn push_all(&mut self, messages: Vec<Message>, unit: BinRef) -> bool {
        let length = messages.iter().map(|m| m.length).sum();
        if !self.admit(length) {
            return false;
        }
        self.queue.extend(messages);
        self.marks.push(unit);
        true
    }
}

/// The messages of one metadata-bin, entries in order, the last one
/// flagged as completing the bin. An empty bin is sent as one empty message.
pub fn enqueue_metadata_bin(bin: &MetadataBin, csn: u64) -> Vec<Message> {
    let count = bin.entries.len();
    if count == 0 {
        return vec![Message::new(ClassId::Metadata, bin.id, csn).last(true)];
    }

    let mut bin_offset = 0;
    let mut messages = Vec::with_capacity(count);
    for (i, entry) in bin.entries.iter().enumerate() {
        let mut message = Message::new(ClassId::Metadata, bin.id, csn).last(i + 1 == count);
        message = match entry {
            MetadataEntry::Box { offset, length, .. }
            | MetadataEntry::Contents { offset, length } => {
                message.with_range(bin_offset, *offset, *length)
            }
            MetadataEntry::Placeholder(placeholder) => {
                let mut message = message.with_range(bin_offset, 0, placeholder.length());
                message.placeholder = Some(placeholder.clone());
                message
            }
        };
        bin_offset += message.length;
        messages.push(message);
    }
    messages
}

/// Round-down: the fewest discarded levels whose reduced image fits within
/// (fx, fy), or every level when none does.
pub fn decomposition_level(index: &Index, fx: u32, fy: u32) -> u8 {
    let levels = index.levels();
    (0..=levels)
        .find(|level| {
            let frame = reduced_frame(index, *level);
            frame.width() <= fx && frame.height() <= fy
        })
        .unwrap_or(levels)
}

/// The image area on the reference grid reduced by `level` levels.
pub fn reduced_frame(index: &Index, level: u8) -> Rect {
    let siz = index.siz();
    let divisor = 1u64 << level;
    Rect {
        x0: ceil_div(siz.image_horizontal_offset() as u64, divisor) as u32,
        y0: ceil_div(siz.image_vertical_offset() as u64, divisor) as u32,
        x1: ceil_div(siz.reference_grid_width() as u64, divisor) as u32,
        y1: ceil_div(siz.reference_grid_height() as u64, divisor) as u32,
    }
}

// roff/rsiz are relative to the reduced frame; missing values cover the
// rest of it.
fn request_region(index: &Index, request: &ViewWindowRequest, level: u8) -> Rect {
    let frame = reduced_frame(index, level);
    let (rx, ry) = request.region_offset.unwrap_or((0, 0));
    let x0 = frame.x0.saturating_add(rx).min(frame.x1);
    let y0 = frame.y0.saturating_add(ry).min(frame.y1);
    let (x1, y1) = match request.region_size {
        Some((rw, rh)) => (
            x0.saturating_add(rw).min(frame.x1),
            y0.saturating_add(rh).min(frame.y1),
        ),
        None => (frame.x1, frame.y1),
    };
    Rect { x0, y0, x1, y1 }
}

// Nothing unless the request names metadata. Then bin 0 of a JP2 target
// comes first, followed by the requested bins in request order, each once.
fn metadata_bins(index: &Index, request: &ViewWindowRequest) -> Vec<u64> {
    let mut ids = Vec::new();
    if request.metadata.is_empty() {
        return ids;
    }
    if index.is_jp2 && index.metadata_bin(0).is_some() {
        ids.push(0);
    }
    for wanted in &request.metadata {
        for bin in &index.metadata {
            match wanted {
                MetadataRequest::All => ids.push(bin.id),
                MetadataRequest::Bin(id) if *id == bin.id => ids.push(bin.id),
                MetadataRequest::BoxType(box_type) if bin.mentions(*box_type) => {
                    ids.push(bin.id);
                    ids.extend(bin.referenced_bins(Some(*box_type)));
                }
                MetadataRequest::ByteRange { offset, length } if bin.overlaps(*offset, *length) => {
                    ids.push(bin.id)
                }
                _ => {}
            }
        }
    }
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(*id));
    ids
}
