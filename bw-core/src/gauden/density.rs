use ndarray::{Array2, ArrayView1, ArrayView2};

/// `d * ln(2π)`, the constant part of a Gaussian normaliser.
fn log_two_pi(len: usize) -> f64 {
    len as f64 * (2.0 * std::f64::consts::PI).ln()
}

/// A variance component that failed the `> 0` check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonPositive {
    pub dim: usize,
    pub value: f32,
}

/// Log normaliser of a diagonal Gaussian: `-0.5 * (Σ ln σ²_d + D ln 2π)`.
pub fn diag_norm(var: ArrayView1<f32>) -> Result<f32, NonPositive> {
    let mut log_det = 0.0f64;
    for (dim, &v) in var.iter().enumerate() {
        if !(v > 0.0) {
            return Err(NonPositive { dim, value: v });
        }
        log_det += (v as f64).ln();
    }
    Ok((-0.5 * (log_det + log_two_pi(var.len()))) as f32)
}

/// Log density of a diagonal Gaussian whose variance has already been
/// replaced by `1 / (2σ²)`.
#[inline]
pub fn log_diag_eval(
    obs: ArrayView1<f32>,
    norm: f32,
    mean: ArrayView1<f32>,
    var_fact: ArrayView1<f32>,
) -> f64 {
    let mut d = 0.0f64;
    for ((&o, &m), &v) in obs.iter().zip(mean.iter()).zip(var_fact.iter()) {
        let diff = (o - m) as f64;
        d += v as f64 * diff * diff;
    }
    norm as f64 - d
}

/// Partial log density with early exit: stops accumulating as soon as the
/// running value drops to `bound` or below. Returns `None` in that case.
#[inline]
pub fn log_diag_eval_bounded(
    obs: ArrayView1<f32>,
    norm: f32,
    mean: ArrayView1<f32>,
    var_fact: ArrayView1<f32>,
    bound: f64,
) -> Option<f64> {
    let mut d = norm as f64;
    for ((&o, &m), &v) in obs.iter().zip(mean.iter()).zip(var_fact.iter()) {
        if d <= bound {
            return None;
        }
        let diff = (o - m) as f64;
        d -= diff * diff * v as f64;
    }
    (d > bound).then_some(d)
}

/// Lower-triangular Cholesky factor of a symmetric matrix, or `None` if it
/// is not positive definite.
pub fn cholesky(a: ArrayView2<f32>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]] as f64;
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !(sum > 0.0) {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Log normaliser of a full-covariance Gaussian, `None` when the covariance
/// is not positive definite.
pub fn full_norm(var: ArrayView2<f32>) -> Option<f32> {
    let l = cholesky(var)?;
    let log_det: f64 = 2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>();
    Some((-0.5 * (log_det + log_two_pi(var.nrows()))) as f32)
}

/// Inverse of a symmetric positive definite matrix via its Cholesky factor.
pub fn invert_spd(a: ArrayView2<f32>) -> Option<Array2<f32>> {
    let l = cholesky(a)?;
    let n = l.nrows();

    // L^-1 by forward substitution, one column at a time.
    let mut l_inv = Array2::<f64>::zeros((n, n));
    for col in 0..n {
        for i in col..n {
            let mut sum = if i == col { 1.0 } else { 0.0 };
            for k in col..i {
                sum -= l[[i, k]] * l_inv[[k, col]];
            }
            l_inv[[i, col]] = sum / l[[i, i]];
        }
    }

    let inv = l_inv.t().dot(&l_inv);
    Some(inv.mapv(|v| v as f32))
}

/// Log density of a full-covariance Gaussian given the inverse covariance.
pub fn log_full_eval(
    obs: ArrayView1<f32>,
    norm: f32,
    mean: ArrayView1<f32>,
    var_inv: ArrayView2<f32>,
) -> f64 {
    let diff: Vec<f64> = obs
        .iter()
        .zip(mean.iter())
        .map(|(&o, &m)| (o - m) as f64)
        .collect();

    let mut quad = 0.0;
    for (i, &di) in diff.iter().enumerate() {
        let row = var_inv.row(i);
        let mut acc = 0.0;
        for (j, &dj) in diff.iter().enumerate() {
            acc += row[j] as f64 * dj;
        }
        quad += di * acc;
    }

    norm as f64 - 0.5 * quad
}
