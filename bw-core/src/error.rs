use thiserror::Error;

use crate::forward::ForwardError;
use crate::gauden::GaudenError;
use crate::state_seq::GraphError;

/// Unified training-core errors.
#[derive(Error, Debug)]
pub enum BwError {
    #[error("Densities: {0}")]
    Gauden(#[from] GaudenError),

    #[error("Sentence HMM: {0}")]
    Graph(#[from] GraphError),

    #[error("Forward: {0}")]
    Forward(#[from] ForwardError),
}

impl BwError {
    /// Whether the error only concerns the current utterance.
    pub fn is_utterance_fatal(&self) -> bool {
        match self {
            Self::Gauden(_) => false,
            Self::Graph(_) => true,
            Self::Forward(e) => e.is_utterance_fatal(),
        }
    }
}
