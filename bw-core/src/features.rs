use ndarray::{Array2, ArrayView1, Axis};

use crate::forward::ForwardError;

/// Observation sequence of one utterance: one `[frame][dim]` matrix per
/// feature stream, all with the same number of frames.
#[derive(Debug, Clone)]
pub struct FeatureSeq {
    streams: Vec<Array2<f32>>,
}

impl FeatureSeq {
    pub fn new(streams: Vec<Array2<f32>>) -> Result<Self, ForwardError> {
        let expected = streams.first().map_or(0, |s| s.nrows());
        for (stream, s) in streams.iter().enumerate() {
            if s.nrows() != expected {
                return Err(ForwardError::FrameCountMismatch {
                    stream,
                    expected,
                    actual: s.nrows(),
                });
            }
        }
        Ok(Self { streams })
    }

    pub fn single_stream(frames: Array2<f32>) -> Self {
        Self {
            streams: vec![frames],
        }
    }

    pub fn n_frames(&self) -> usize {
        self.streams.first().map_or(0, |s| s.nrows())
    }

    pub fn n_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn veclen(&self, stream: usize) -> usize {
        self.streams[stream].ncols()
    }

    /// Per-stream observation vectors of frame `t`.
    pub fn frame(&self, t: usize) -> Vec<ArrayView1<'_, f32>> {
        self.streams
            .iter()
            .map(|s| s.index_axis(Axis(0), t))
            .collect()
    }
}
