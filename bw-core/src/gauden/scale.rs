use ndarray::{Array3, ArrayView2, Axis};

use super::{GaudenError, MAX_LOG_DEN, MIN_LOG_DENSITY};

/// `ln(f64::MIN_POSITIVE)`, the smallest usable backward scale factor.
pub const MINUS_LOG_INFINITY: f64 = -708.407751281802;

/// Moves the log densities of every listed codebook into a shared linear range.
///
/// `den` is `[codebook][stream][top]` log densities; only the rows named in
/// `cbs` are touched. For each stream the maximum over those rows, less
/// `MAX_LOG_DEN`, becomes the stream's scale and every listed entry is rewritten
/// as `exp(log_den - scale)`. The returned per-stream scales undo the mapping.
pub fn scale_densities_fwd(den: &mut Array3<f64>, cbs: &[u32]) -> Vec<f64> {
    let n_feat = den.len_of(Axis(1));
    let mut max_den = vec![MIN_LOG_DENSITY; n_feat];

    for &c in cbs {
        let cb = den.index_axis(Axis(0), c as usize);
        for (f, row) in cb.axis_iter(Axis(0)).enumerate() {
            for &d in row.iter() {
                if max_den[f] < d {
                    max_den[f] = d;
                }
            }
        }
    }

    for m in max_den.iter_mut() {
        *m -= MAX_LOG_DEN;
    }

    for &c in cbs {
        let mut cb = den.index_axis_mut(Axis(0), c as usize);
        for (f, mut row) in cb.axis_iter_mut(Axis(0)).enumerate() {
            let s = max_den[f];
            row.mapv_inplace(|d| (d - s).exp());
        }
    }

    max_den
}

/// Rescales log densities with a scale vector produced by a forward pass.
///
/// Factors at or below `MINUS_LOG_INFINITY` are clamped (in `scale` too) so the
/// result stays finite.
pub fn scale_densities_bwd(den: &mut Array3<f64>, cbs: &[u32], scale: &mut [f64]) {
    for s in scale.iter_mut() {
        if *s <= MINUS_LOG_INFINITY {
            log::warn!("Scaling factor too small: {s}");
            *s = MINUS_LOG_INFINITY + MAX_LOG_DEN;
        }
    }

    for &c in cbs {
        let mut cb = den.index_axis_mut(Axis(0), c as usize);
        for (f, mut row) in cb.axis_iter_mut(Axis(0)).enumerate() {
            let s = scale[f];
            row.mapv_inplace(|d| (d - s).exp());
        }
    }
}

/// Output probability of one state: per stream `Σ_k w[idx[k]] * den[k]`,
/// multiplied across streams.
///
/// Entries whose index is outside the weight row (unfilled top-N slots)
/// contribute nothing.
pub fn mixture_prob(den: ArrayView2<f64>, den_idx: ArrayView2<u32>, w: ArrayView2<f32>) -> f64 {
    let mut out = 1.0;
    for ((d_row, i_row), w_row) in den
        .axis_iter(Axis(0))
        .zip(den_idx.axis_iter(Axis(0)))
        .zip(w.axis_iter(Axis(0)))
    {
        let mut oprob = 0.0;
        for (&d, &k) in d_row.iter().zip(i_row.iter()) {
            if let Some(&wk) = w_row.get(k as usize) {
                oprob += wk as f64 * d;
            }
        }
        out *= oprob;
    }
    out
}

/// Normalises every `[codebook][stream]` row of linear densities to sum to one.
pub fn normalize(den: &mut Array3<f64>) -> Result<(), GaudenError> {
    for (cb, mut rows) in den.axis_iter_mut(Axis(0)).enumerate() {
        for (feat, mut row) in rows.axis_iter_mut(Axis(0)).enumerate() {
            let sum = row.sum();
            if sum == 0.0 {
                log::error!("densities for feature {feat} sum to zero");
                return Err(GaudenError::ZeroDensitySum { cb, feat });
            }
            row.mapv_inplace(|d| d / sum);
        }
    }
    Ok(())
}
