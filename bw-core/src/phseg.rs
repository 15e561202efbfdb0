/// A phone segment of a reference alignment, frames `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhoneSegment {
    pub phone: u32,
    pub start: usize,
    pub end: usize,
}

/// Walks a time-ordered segmentation alongside the forward pass.
pub(crate) struct SegmentCursor<'a> {
    segments: &'a [PhoneSegment],
    pos: usize,
}

impl<'a> SegmentCursor<'a> {
    pub(crate) fn new(segments: &'a [PhoneSegment]) -> Self {
        Self { segments, pos: 0 }
    }

    /// Segment covering frame `t`, `None` once the segmentation has run out.
    /// Frames must be visited in increasing order.
    pub(crate) fn at(&mut self, t: usize) -> Option<&'a PhoneSegment> {
        while self.pos < self.segments.len() && t > self.segments[self.pos].end {
            self.pos += 1;
        }
        self.segments.get(self.pos)
    }
}
