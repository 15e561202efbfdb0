//! Gaussian mixture density engine.
//!
//! A [`GaussianMixtureSet`] owns the means, variances and log normalisers of
//! every codebook. Variances go through a one-way [`GaussianMixtureSet::precompute`]
//! step before any density can be evaluated.

pub mod density;
mod scale;
mod topn;

use ndarray::{Array3, Array4, ArrayView1, ArrayView3, ArrayViewMut2, ArrayViewMut3, Axis};

pub use scale::{
    mixture_prob, normalize, scale_densities_bwd, scale_densities_fwd, MINUS_LOG_INFINITY,
};
pub use topn::TopN;

/// Headroom left below the per-stream maximum when densities are rescaled.
pub const MAX_LOG_DEN: f64 = 10.0;

/// Log density of an empty top-N slot.
pub const MIN_LOG_DENSITY: f64 = -1.8e307;

#[derive(thiserror::Error, Debug)]
pub enum GaudenError {
    #[error("n_top ({n_top}) must be between 1 and n_density ({n_density})")]
    NTopExceedsDensity { n_top: usize, n_density: usize },
    #[error("Invalid dimensions: {0}")]
    DimensionMismatch(String),
    #[error("Sanity check var > 0 failed for codebook {cb}, stream {feat}, density {density}, dim {dim}: {value:e}")]
    NonPositiveVariance {
        cb: usize,
        feat: usize,
        density: usize,
        dim: usize,
        value: f32,
    },
    #[error("Covariance matrix of codebook {cb}, stream {feat}, density {density} is not positive-definite")]
    NotPositiveDefinite { cb: usize, feat: usize, density: usize },
    #[error("Variances have already been precomputed")]
    AlreadyPrecomputed,
    #[error("Densities evaluated before variance precomputation")]
    NotPrecomputed,
    #[error("Top-N evaluation is not available with full covariances (n_top {n_top}, n_density {n_density})")]
    TopNWithFullCovariance { n_top: usize, n_density: usize },
    #[error("Codebook {cb} out of range ({n_mgau} codebooks)")]
    UnknownCodebook { cb: usize, n_mgau: usize },
    #[error("Mixture weights do not match the densities: {0}")]
    MixtureWeights(String),
    #[error("Densities of codebook {cb}, stream {feat} sum to zero")]
    ZeroDensitySum { cb: usize, feat: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarianceForm {
    /// Variances as loaded.
    Raw,
    /// Diagonal variances hold `1 / (2σ²)`, full covariances hold their inverse.
    Precomputed,
}

#[derive(Debug, Clone)]
enum Covariance {
    /// Per stream `[codebook][density][dim]`.
    Diagonal(Vec<Array3<f32>>),
    /// Per stream `[codebook][density][dim][dim]`.
    Full(Vec<Array4<f32>>),
}

#[derive(Debug, Clone)]
pub struct GaussianMixtureSet {
    veclen: Vec<usize>,
    n_mgau: usize,
    n_density: usize,
    n_top: usize,
    mean: Vec<Array3<f32>>,
    cov: Covariance,
    norm: Array3<f32>,
    form: VarianceForm,
}

impl GaussianMixtureSet {
    /// Allocates zeroed means and variances for `n_mgau` codebooks of
    /// `n_density` densities over streams of the given vector lengths.
    pub fn new(
        veclen: &[usize],
        n_mgau: usize,
        n_density: usize,
        n_top: usize,
    ) -> Result<Self, GaudenError> {
        if veclen.is_empty() || veclen.contains(&0) {
            return Err(GaudenError::DimensionMismatch(format!(
                "every feature stream needs a positive length, got {veclen:?}"
            )));
        }
        if n_mgau == 0 || n_density == 0 {
            return Err(GaudenError::DimensionMismatch(format!(
                "{n_mgau} codebooks of {n_density} densities"
            )));
        }
        if n_top == 0 || n_top > n_density {
            return Err(GaudenError::NTopExceedsDensity { n_top, n_density });
        }

        let alloc = || -> Vec<Array3<f32>> {
            veclen
                .iter()
                .map(|&l| Array3::zeros((n_mgau, n_density, l)))
                .collect()
        };

        log::info!(
            "{} feature streams {:?}, {} mgau, {} densities/mgau, compute {} densities/frame",
            veclen.len(),
            veclen,
            n_mgau,
            n_density,
            n_top
        );

        Ok(Self {
            veclen: veclen.to_vec(),
            n_mgau,
            n_density,
            n_top,
            mean: alloc(),
            cov: Covariance::Diagonal(alloc()),
            norm: Array3::zeros((n_mgau, veclen.len(), n_density)),
            form: VarianceForm::Raw,
        })
    }

    /// Builds a set from per-stream `[codebook][density][dim]` means and
    /// diagonal variances.
    pub fn from_params(
        mean: Vec<Array3<f32>>,
        var: Vec<Array3<f32>>,
        n_top: usize,
    ) -> Result<Self, GaudenError> {
        let first = mean
            .first()
            .ok_or_else(|| GaudenError::DimensionMismatch("no feature streams".into()))?;
        let (n_mgau, n_density, _) = first.dim();
        let veclen: Vec<usize> = mean.iter().map(|m| m.len_of(Axis(2))).collect();

        let mut g = Self::new(&veclen, n_mgau, n_density, n_top)?;
        g.set_means(mean)?;
        g.set_vars(var)?;
        Ok(g)
    }

    pub fn n_feat(&self) -> usize {
        self.veclen.len()
    }

    pub fn veclen(&self) -> &[usize] {
        &self.veclen
    }

    pub fn n_mgau(&self) -> usize {
        self.n_mgau
    }

    pub fn n_density(&self) -> usize {
        self.n_density
    }

    pub fn n_top(&self) -> usize {
        self.n_top
    }

    pub fn form(&self) -> VarianceForm {
        self.form
    }

    pub fn is_precomputed(&self) -> bool {
        self.form == VarianceForm::Precomputed
    }

    pub fn is_full_covariance(&self) -> bool {
        matches!(self.cov, Covariance::Full(_))
    }

    /// `[codebook][stream][density]` log normalisers (valid after precompute).
    pub fn norm(&self) -> ArrayView3<'_, f32> {
        self.norm.view()
    }

    pub fn mean(&self, feat: usize) -> ArrayView3<'_, f32> {
        self.mean[feat].view()
    }

    /// Diagonal variances of one stream, `None` for full covariances.
    pub fn var(&self, feat: usize) -> Option<ArrayView3<'_, f32>> {
        match &self.cov {
            Covariance::Diagonal(v) => Some(v[feat].view()),
            Covariance::Full(_) => None,
        }
    }

    fn ensure_raw(&self) -> Result<(), GaudenError> {
        match self.form {
            VarianceForm::Raw => Ok(()),
            VarianceForm::Precomputed => Err(GaudenError::AlreadyPrecomputed),
        }
    }

    fn check_shape(&self, what: &str, feat: usize, dim: &[usize]) -> Result<(), GaudenError> {
        let l = self.veclen[feat];
        let ok = dim.len() >= 3
            && dim[0] == self.n_mgau
            && dim[1] == self.n_density
            && dim[2..].iter().all(|&d| d == l);
        if ok {
            Ok(())
        } else {
            Err(GaudenError::DimensionMismatch(format!(
                "{what} of stream {feat} has shape {dim:?}, expected [{}, {}, {l}..]",
                self.n_mgau, self.n_density
            )))
        }
    }

    fn check_streams<T>(&self, what: &str, streams: &[T]) -> Result<(), GaudenError> {
        if streams.len() == self.n_feat() {
            Ok(())
        } else {
            Err(GaudenError::DimensionMismatch(format!(
                "{what} for {} streams, expected {}",
                streams.len(),
                self.n_feat()
            )))
        }
    }

    pub fn set_means(&mut self, mean: Vec<Array3<f32>>) -> Result<(), GaudenError> {
        self.check_streams("means", &mean)?;
        for (f, m) in mean.iter().enumerate() {
            self.check_shape("means", f, m.shape())?;
        }
        self.mean = mean;
        Ok(())
    }

    pub fn set_vars(&mut self, var: Vec<Array3<f32>>) -> Result<(), GaudenError> {
        self.ensure_raw()?;
        self.check_streams("variances", &var)?;
        for (f, v) in var.iter().enumerate() {
            self.check_shape("variances", f, v.shape())?;
        }
        self.cov = Covariance::Diagonal(var);
        Ok(())
    }

    /// Switches to full covariances. Only allowed when every density is
    /// evaluated (`n_top == n_density`).
    pub fn set_full_vars(&mut self, fullvar: Vec<Array4<f32>>) -> Result<(), GaudenError> {
        self.ensure_raw()?;
        if self.n_top != self.n_density {
            return Err(GaudenError::TopNWithFullCovariance {
                n_top: self.n_top,
                n_density: self.n_density,
            });
        }
        self.check_streams("full covariances", &fullvar)?;
        for (f, v) in fullvar.iter().enumerate() {
            self.check_shape("full covariances", f, v.shape())?;
        }
        self.cov = Covariance::Full(fullvar);
        Ok(())
    }

    /// Mutable means of one stream, `[codebook][density][dim]`.
    pub fn mean_mut(&mut self, feat: usize) -> ArrayViewMut3<'_, f32> {
        self.mean[feat].view_mut()
    }

    /// Mutable diagonal variances of one stream. Fails once precomputed or
    /// when the set holds full covariances.
    pub fn var_mut(&mut self, feat: usize) -> Result<ArrayViewMut3<'_, f32>, GaudenError> {
        self.ensure_raw()?;
        match &mut self.cov {
            Covariance::Diagonal(v) => Ok(v[feat].view_mut()),
            Covariance::Full(_) => Err(GaudenError::DimensionMismatch(
                "diagonal variances requested from a full-covariance set".into(),
            )),
        }
    }

    /// Raises every variance below `floor`. Full covariances that are not
    /// positive definite lose their off-diagonal terms and get a floored
    /// diagonal. Returns the number of adjusted components or matrices.
    pub fn floor_variance(&mut self, floor: f32) -> Result<usize, GaudenError> {
        self.ensure_raw()?;
        let mut n_floored = 0;
        match &mut self.cov {
            Covariance::Diagonal(vars) => {
                for var in vars.iter_mut() {
                    var.mapv_inplace(|v| {
                        if v < floor {
                            n_floored += 1;
                            floor
                        } else {
                            v
                        }
                    });
                }
            }
            Covariance::Full(vars) => {
                for var in vars.iter_mut() {
                    for mut cb in var.outer_iter_mut() {
                        for mut m in cb.outer_iter_mut() {
                            if density::cholesky(m.view()).is_some() {
                                continue;
                            }
                            n_floored += 1;
                            for ((i, j), v) in m.indexed_iter_mut() {
                                if i != j {
                                    *v = 0.0;
                                } else if *v < floor {
                                    *v = floor;
                                }
                            }
                        }
                    }
                }
            }
        }
        if n_floored > 0 {
            log::warn!("Floored {n_floored} variance terms to {floor:e}");
        }
        Ok(n_floored)
    }

    /// Computes the log normalisers and replaces the variances with their
    /// evaluation form (`1 / (2σ²)` or the inverse covariance).
    ///
    /// Runs once: a second call returns [`GaudenError::AlreadyPrecomputed`].
    /// On error nothing has been modified.
    pub fn precompute(&mut self) -> Result<(), GaudenError> {
        self.ensure_raw()?;
        let norm = self.compute_norm()?;

        match &mut self.cov {
            Covariance::Diagonal(vars) => {
                for var in vars.iter_mut() {
                    var.mapv_inplace(|v| 1.0 / (v + v));
                }
            }
            Covariance::Full(vars) => {
                for (f, var) in vars.iter_mut().enumerate() {
                    for (i, mut cb) in var.outer_iter_mut().enumerate() {
                        for (k, mut m) in cb.outer_iter_mut().enumerate() {
                            let inv = density::invert_spd(m.view()).ok_or(
                                GaudenError::NotPositiveDefinite {
                                    cb: i,
                                    feat: f,
                                    density: k,
                                },
                            )?;
                            m.assign(&inv);
                        }
                    }
                }
            }
        }

        self.norm = norm;
        self.form = VarianceForm::Precomputed;
        log::info!(
            "Precomputed {} codebooks ({} covariance)",
            self.n_mgau,
            if self.is_full_covariance() { "full" } else { "diagonal" }
        );
        Ok(())
    }

    fn compute_norm(&self) -> Result<Array3<f32>, GaudenError> {
        let mut norm = Array3::zeros((self.n_mgau, self.n_feat(), self.n_density));
        for cb in 0..self.n_mgau {
            for feat in 0..self.n_feat() {
                for density in 0..self.n_density {
                    norm[[cb, feat, density]] = match &self.cov {
                        Covariance::Diagonal(vars) => {
                            let v = vars[feat].index_axis(Axis(0), cb);
                            density::diag_norm(v.row(density)).map_err(|e| {
                                GaudenError::NonPositiveVariance {
                                    cb,
                                    feat,
                                    density,
                                    dim: e.dim,
                                    value: e.value,
                                }
                            })?
                        }
                        Covariance::Full(vars) => {
                            let v = vars[feat].index_axis(Axis(0), cb);
                            density::full_norm(v.index_axis(Axis(0), density)).ok_or(
                                GaudenError::NotPositiveDefinite { cb, feat, density },
                            )?
                        }
                    };
                }
            }
        }
        Ok(norm)
    }

    /// Evaluates codebook `cb` against one observation, writing
    /// `[stream][top]` log densities and their density indices.
    ///
    /// With `n_top == n_density` every density is written in index order.
    /// Otherwise the best `n_top` are kept in descending order (see [`TopN`]);
    /// when `seed_from_previous` is set, the indices already in `den_idx`
    /// (the previous frame's winners) seed the list.
    pub fn compute_log(
        &self,
        mut den: ArrayViewMut2<f64>,
        mut den_idx: ArrayViewMut2<u32>,
        obs: &[ArrayView1<f32>],
        cb: usize,
        seed_from_previous: bool,
    ) -> Result<(), GaudenError> {
        if !self.is_precomputed() {
            return Err(GaudenError::NotPrecomputed);
        }
        if cb >= self.n_mgau {
            return Err(GaudenError::UnknownCodebook {
                cb,
                n_mgau: self.n_mgau,
            });
        }
        if obs.len() != self.n_feat() {
            return Err(GaudenError::DimensionMismatch(format!(
                "observation has {} streams, expected {}",
                obs.len(),
                self.n_feat()
            )));
        }
        for (feat, (o, &l)) in obs.iter().zip(&self.veclen).enumerate() {
            if o.len() != l {
                return Err(GaudenError::DimensionMismatch(format!(
                    "observation stream {feat} has {} dimensions, expected {l}",
                    o.len()
                )));
            }
        }

        for (feat, o) in obs.iter().enumerate() {
            let norm = self.norm.slice(ndarray::s![cb, feat, ..]);
            let mean = self.mean[feat].index_axis(Axis(0), cb);
            let den_row = den.row_mut(feat);
            let idx_row = den_idx.row_mut(feat);

            match &self.cov {
                Covariance::Full(vars) => {
                    let var = vars[feat].index_axis(Axis(0), cb);
                    for (k, (d, i)) in den_row.into_iter().zip(idx_row).enumerate() {
                        *d = density::log_full_eval(
                            o.view(),
                            norm[k],
                            mean.row(k),
                            var.index_axis(Axis(0), k),
                        );
                        *i = k as u32;
                    }
                }
                Covariance::Diagonal(vars) => {
                    let var = vars[feat].index_axis(Axis(0), cb);
                    if self.n_top == self.n_density {
                        for (k, (d, i)) in den_row.into_iter().zip(idx_row).enumerate() {
                            *d = density::log_diag_eval(o.view(), norm[k], mean.row(k), var.row(k));
                            *i = k as u32;
                        }
                        continue;
                    }

                    let seeds: Option<Vec<u32>> = seed_from_previous
                        .then(|| idx_row.to_vec())
                        .filter(|s| s.iter().all(|&i| (i as usize) < self.n_density));

                    let mut top = match &seeds {
                        Some(seeds) => TopN::seeded(
                            den_row,
                            idx_row,
                            self.n_density,
                            seeds.iter().map(|&i| {
                                let k = i as usize;
                                (
                                    density::log_diag_eval(o.view(), norm[k], mean.row(k), var.row(k)),
                                    i,
                                )
                            }),
                        ),
                        None => TopN::empty(den_row, idx_row, self.n_density),
                    };

                    for k in 0..self.n_density {
                        let Some(d) = density::log_diag_eval_bounded(
                            o.view(),
                            norm[k],
                            mean.row(k),
                            var.row(k),
                            top.worst(),
                        ) else {
                            continue;
                        };
                        if seeds.is_some() && top.contains(k as u32) {
                            continue;
                        }
                        top.try_insert(d, k as u32);
                    }
                }
            }
        }

        Ok(())
    }

    /// Linear-domain variant of [`Self::compute_log`].
    pub fn compute(
        &self,
        mut den: ArrayViewMut2<f64>,
        den_idx: ArrayViewMut2<u32>,
        obs: &[ArrayView1<f32>],
        cb: usize,
        seed_from_previous: bool,
    ) -> Result<(), GaudenError> {
        self.compute_log(den.view_mut(), den_idx, obs, cb, seed_from_previous)?;
        den.mapv_inplace(f64::exp);
        Ok(())
    }
}
