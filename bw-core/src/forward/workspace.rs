use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ndarray::Array3;

/// `amap` entry of a state that is not active in the current frame.
pub const INACTIVE: u32 = u32::MAX;

/// Predecessor slot that has not been set.
pub const NO_STATE: u32 = u32::MAX;

/// The states activated so far in the frame being computed, with their
/// unnormalised alpha and Viterbi bookkeeping.
///
/// `amap[state]` is the state's position in the list. Positions stay valid
/// until [`ActiveStateSet::release`] at the end of the frame, which also
/// returns every touched `amap` entry to `INACTIVE`.
#[derive(Debug, Default)]
pub struct ActiveStateSet {
    amap: Vec<u32>,
    states: Vec<u32>,
    alpha: Vec<f64>,
    bp: Vec<u32>,
    best_pred: Vec<f64>,
}

impl ActiveStateSet {
    fn reset(&mut self, n_state: usize) {
        self.amap.clear();
        self.amap.resize(n_state, INACTIVE);
        self.states.clear();
        self.alpha.clear();
        self.bp.clear();
        self.best_pred.clear();
    }

    #[inline]
    pub fn index_of(&self, state: u32) -> Option<usize> {
        match self.amap[state as usize] {
            INACTIVE => None,
            i => Some(i as usize),
        }
    }

    /// Adds `state` with zero alpha unless already present. Returns its
    /// position and whether it was newly added.
    #[inline]
    pub fn activate(&mut self, state: u32) -> (usize, bool) {
        if let Some(i) = self.index_of(state) {
            return (i, false);
        }
        let i = self.states.len();
        self.amap[state as usize] = i as u32;
        self.states.push(state);
        self.alpha.push(0.0);
        self.bp.push(NO_STATE);
        self.best_pred.push(0.0);
        (i, true)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[u32] {
        &self.states
    }

    pub fn alpha(&self) -> &[f64] {
        &self.alpha
    }

    #[inline]
    pub(crate) fn add_alpha(&mut self, i: usize, x: f64) {
        self.alpha[i] += x;
    }

    /// Records `pred` as the best predecessor of entry `i` if `x` beats the
    /// best seen so far (or unconditionally when `force` is set).
    #[inline]
    pub(crate) fn offer_pred(&mut self, i: usize, pred: u32, x: f64, force: bool) {
        if force || x > self.best_pred[i] {
            self.best_pred[i] = x;
            self.bp[i] = pred;
        }
    }

    pub(crate) fn bp(&self) -> &[u32] {
        &self.bp
    }

    /// Deactivates every state touched this frame.
    pub fn release(&mut self) {
        for &s in &self.states {
            self.amap[s as usize] = INACTIVE;
        }
        self.states.clear();
        self.alpha.clear();
        self.bp.clear();
        self.best_pred.clear();
    }

    /// True when no state is marked active.
    pub fn is_released(&self) -> bool {
        self.states.is_empty() && self.amap.iter().all(|&a| a == INACTIVE)
    }
}

/// Scratch owned by one forward pass at a time.
///
/// Holds no results: everything the caller keeps is moved into the returned
/// [`super::AlphaTable`]. A workspace can be reused for any number of
/// utterances (on one thread at a time) to avoid reallocating.
#[derive(Debug)]
pub struct ForwardWorkspace {
    pub(crate) next: ActiveStateSet,
    pub(crate) outprob: Vec<f64>,
    /// `[local codebook][stream][top]` densities.
    pub(crate) den: Array3<f64>,
    pub(crate) den_idx: Array3<u32>,
    /// Frame at which each local codebook was last evaluated.
    pub(crate) acbframe: Vec<Option<usize>>,
    /// Local codebooks evaluated in the current frame.
    pub(crate) active_cb: Vec<u32>,
    /// Non-emitting states waiting to propagate, smallest rank first.
    pub(crate) worklist: BinaryHeap<Reverse<(u32, u32)>>,
}

impl Default for ForwardWorkspace {
    fn default() -> Self {
        Self {
            next: ActiveStateSet::default(),
            outprob: Vec::new(),
            den: Array3::zeros((0, 0, 0)),
            den_idx: Array3::zeros((0, 0, 0)),
            acbframe: Vec::new(),
            active_cb: Vec::new(),
            worklist: BinaryHeap::new(),
        }
    }
}

impl ForwardWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the scratch for one utterance and clears anything left over from
    /// a previous (possibly failed) pass.
    pub(crate) fn prepare(&mut self, n_state: usize, n_l_cb: usize, n_feat: usize, n_top: usize) {
        self.next.reset(n_state);
        self.outprob.clear();

        let shape = (n_l_cb, n_feat, n_top);
        if self.den.dim() != shape {
            self.den = Array3::zeros(shape);
            self.den_idx = Array3::zeros(shape);
        }

        self.acbframe.clear();
        self.acbframe.resize(n_l_cb, None);
        self.active_cb.clear();
        self.worklist.clear();
    }

    pub fn active(&self) -> &ActiveStateSet {
        &self.next
    }
}
