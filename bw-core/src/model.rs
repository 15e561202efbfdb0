use crate::gauden::{GaudenError, GaussianMixtureSet};
use crate::mixw::MixtureWeights;

/// The acoustic model parameters consumed by the forward pass. Shared
/// read-only between utterances (and threads) once built.
#[derive(Debug, Clone)]
pub struct AcousticModel {
    pub gauden: GaussianMixtureSet,
    pub mixw: MixtureWeights,
}

impl AcousticModel {
    pub fn new(gauden: GaussianMixtureSet, mixw: MixtureWeights) -> Result<Self, GaudenError> {
        if mixw.n_feat() != gauden.n_feat() {
            return Err(GaudenError::MixtureWeights(format!(
                "{} streams, densities have {}",
                mixw.n_feat(),
                gauden.n_feat()
            )));
        }
        if mixw.n_density() != gauden.n_density() {
            return Err(GaudenError::MixtureWeights(format!(
                "{} weights per stream, codebooks have {} densities",
                mixw.n_density(),
                gauden.n_density()
            )));
        }
        Ok(Self { gauden, mixw })
    }

    /// Floors and precomputes the variances, leaving the model ready for
    /// density evaluation.
    pub fn prepare(&mut self, var_floor: f32) -> Result<(), GaudenError> {
        if var_floor > 0.0 {
            self.gauden.floor_variance(var_floor)?;
        }
        self.gauden.precompute()
    }
}
