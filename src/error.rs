use bw_core::BwError;
use thiserror::Error;

/// Batch driver errors.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Shape: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("{0}")]
    Bw(#[from] BwError),

    #[error("Job: {0}")]
    Job(String),

    #[error("Invalid corpus part {part} of {n_part}")]
    InvalidPart { part: usize, n_part: usize },

    #[error("Worker thread panicked")]
    WorkerPanicked,
}

impl BatchError {
    /// Whether the run can log this error, skip the utterance and go on.
    pub fn is_utterance_fatal(&self) -> bool {
        match self {
            Self::Bw(e) => e.is_utterance_fatal(),
            Self::Job(_) | Self::Shape(_) => true,
            Self::Io(_) | Self::Json(_) | Self::InvalidPart { .. } | Self::WorkerPanicked => false,
        }
    }
}
