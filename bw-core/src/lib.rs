pub mod config;
pub mod error;
pub mod features;
pub mod forward;
pub mod gauden;
pub mod mixw;
pub mod model;
pub mod phseg;
pub mod state_seq;

pub use config::{DensityConfig, ForwardConfig};
pub use error::BwError;
pub use features::FeatureSeq;
pub use forward::{forward, AlphaTable, ForwardError, ForwardWorkspace};
pub use gauden::{GaudenError, GaussianMixtureSet};
pub use mixw::MixtureWeights;
pub use model::AcousticModel;
pub use phseg::PhoneSegment;
pub use state_seq::{GraphError, PhoneModel, SentenceHmm, SentenceHmmBuilder, StateLabel};
