use crate::state_seq::SentenceHmm;

use super::workspace::NO_STATE;
use super::ForwardError;

/// Result of a successful forward pass, kept for the backward pass.
///
/// For frame `t`, `alpha(t)[i]` is the scaled forward probability of sentence
/// HMM state `states(t)[i]`. The unscaled value is recovered from `scale` and
/// `dscale` (see [`AlphaTable::unscaled_log_alpha`]).
#[derive(Debug, Clone, Default)]
pub struct AlphaTable {
    active_alpha: Vec<Vec<f64>>,
    active_astate: Vec<Vec<u32>>,
    scale: Vec<f64>,
    dscale: Vec<Vec<f64>>,
    bp: Option<Vec<Vec<u32>>>,
}

impl AlphaTable {
    pub(crate) fn with_capacity(n_obs: usize, backpointers: bool) -> Self {
        Self {
            active_alpha: Vec::with_capacity(n_obs),
            active_astate: Vec::with_capacity(n_obs),
            scale: Vec::with_capacity(n_obs),
            dscale: Vec::with_capacity(n_obs),
            bp: backpointers.then(|| Vec::with_capacity(n_obs)),
        }
    }

    pub(crate) fn push_frame(
        &mut self,
        alpha: Vec<f64>,
        states: Vec<u32>,
        scale: f64,
        dscale: Vec<f64>,
        bp: Option<Vec<u32>>,
    ) {
        self.active_alpha.push(alpha);
        self.active_astate.push(states);
        self.scale.push(scale);
        self.dscale.push(dscale);
        if let (Some(all), Some(bp)) = (self.bp.as_mut(), bp) {
            all.push(bp);
        }
    }

    pub fn n_frames(&self) -> usize {
        self.scale.len()
    }

    pub fn alpha(&self, t: usize) -> &[f64] {
        &self.active_alpha[t]
    }

    pub fn states(&self, t: usize) -> &[u32] {
        &self.active_astate[t]
    }

    pub fn n_active(&self, t: usize) -> usize {
        self.active_astate[t].len()
    }

    /// `1 / best alpha` applied at each frame.
    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// Per-stream density scale of frame `t`.
    pub fn dscale(&self, t: usize) -> &[f64] {
        &self.dscale[t]
    }

    /// Best predecessor of each active state at frame `t > 0`, as a sentence
    /// HMM state id: in frame `t - 1` for emitting states, in frame `t` for
    /// non-emitting ones.
    pub fn backpointers(&self, t: usize) -> Option<&[u32]> {
        self.bp.as_ref().map(|bp| bp[t].as_slice())
    }

    pub fn total_active(&self) -> usize {
        self.active_astate.iter().map(Vec::len).sum()
    }

    pub fn avg_active(&self) -> f64 {
        if self.n_frames() == 0 {
            return 0.0;
        }
        self.total_active() as f64 / self.n_frames() as f64
    }

    /// Position of `state` in the active list of frame `t`.
    pub fn find(&self, t: usize, state: u32) -> Option<usize> {
        self.active_astate[t].iter().position(|&s| s == state)
    }

    /// `ln` of the scale factors removed up to and including frame `t`:
    /// `Σ_τ≤t (Σ_f dscale[τ][f] - ln scale[τ])`.
    pub fn log_scale_through(&self, t: usize) -> f64 {
        self.scale[..=t]
            .iter()
            .zip(&self.dscale[..=t])
            .map(|(s, ds)| ds.iter().sum::<f64>() - s.ln())
            .sum()
    }

    /// Natural log of the unscaled forward probability of the `i`-th active
    /// state at frame `t`.
    pub fn unscaled_log_alpha(&self, t: usize, i: usize) -> f64 {
        self.active_alpha[t][i].ln() + self.log_scale_through(t)
    }

    /// `ln P(O)` assuming the utterance ends in `final_state` at the last
    /// frame. `None` if that state was not active there.
    pub fn log_likelihood(&self, final_state: u32) -> Option<f64> {
        let last = self.n_frames().checked_sub(1)?;
        let i = self.find(last, final_state)?;
        Some(self.unscaled_log_alpha(last, i))
    }

    /// Best emitting state at every frame on the path ending in `final_state`
    /// at the last frame. Needs a pass run with backpointers.
    pub fn backtrace(&self, hmm: &SentenceHmm, final_state: u32) -> Result<Vec<u32>, ForwardError> {
        let bp = self.bp.as_ref().ok_or(ForwardError::BackpointersDisabled)?;
        let Some(mut t) = self.n_frames().checked_sub(1) else {
            return Ok(Vec::new());
        };

        let mut path = Vec::with_capacity(self.n_frames());
        let mut state = final_state;
        loop {
            let i = self
                .find(t, state)
                .ok_or(ForwardError::BrokenBacktrace { frame: t, state })?;
            if hmm.state(state).is_emitting() {
                path.push(state);
                if t == 0 {
                    break;
                }
            }
            let pred = bp[t][i];
            if pred == NO_STATE {
                return Err(ForwardError::BrokenBacktrace { frame: t, state });
            }
            if hmm.state(state).is_emitting() {
                t -= 1;
            }
            state = pred;
        }

        path.reverse();
        Ok(path)
    }

    /// Hands the raw buffers to a consumer such as a backward pass:
    /// `(active_alpha, active_astate, scale, dscale)`.
    pub fn into_parts(self) -> (Vec<Vec<f64>>, Vec<Vec<u32>>, Vec<f64>, Vec<Vec<f64>>) {
        (self.active_alpha, self.active_astate, self.scale, self.dscale)
    }
}
