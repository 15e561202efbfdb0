use ndarray::{Array3, ArrayView2, Axis};

/// Mixture weights, `[mixw][stream][density]`.
#[derive(Debug, Clone)]
pub struct MixtureWeights {
    weights: Array3<f32>,
}

impl MixtureWeights {
    pub fn new(weights: Array3<f32>) -> Self {
        Self { weights }
    }

    pub fn uniform(n_mixw: usize, n_feat: usize, n_density: usize) -> Self {
        let w = if n_density == 0 {
            0.0
        } else {
            1.0 / n_density as f32
        };
        Self {
            weights: Array3::from_elem((n_mixw, n_feat, n_density), w),
        }
    }

    pub fn n_mixw(&self) -> usize {
        self.weights.len_of(Axis(0))
    }

    pub fn n_feat(&self) -> usize {
        self.weights.len_of(Axis(1))
    }

    pub fn n_density(&self) -> usize {
        self.weights.len_of(Axis(2))
    }

    /// `[stream][density]` weights of one tied state.
    #[inline]
    pub fn get(&self, mixw: usize) -> ArrayView2<'_, f32> {
        self.weights.index_axis(Axis(0), mixw)
    }

    /// Rescales each `[mixw][stream]` row to sum to one. Rows summing to zero
    /// are left untouched; their count is returned.
    pub fn normalize(&mut self) -> usize {
        let mut n_zero = 0;
        for mut rows in self.weights.outer_iter_mut() {
            for mut row in rows.outer_iter_mut() {
                let sum = row.sum();
                if sum > 0.0 {
                    row.mapv_inplace(|w| w / sum);
                } else {
                    n_zero += 1;
                }
            }
        }
        if n_zero > 0 {
            log::warn!("{n_zero} mixture weight rows sum to zero");
        }
        n_zero
    }
}
