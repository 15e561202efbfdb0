//! Sentence HMM: the per-utterance state graph walked by the forward pass.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use ndarray::ArrayView2;
use thiserror::Error;

use crate::model::AcousticModel;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Sentence HMM has no states")]
    Empty,
    #[error("Initial state must be emitting")]
    InitialNonEmitting,
    #[error("Transition {from} -> {to} leaves the graph ({n_state} states)")]
    DanglingTransition { from: u32, to: u32, n_state: usize },
    #[error("Transition {from} -> {to} has invalid probability {prob}")]
    InvalidTransitionProb { from: u32, to: u32, prob: f32 },
    #[error("Non-emitting states form a cycle through state {0}")]
    NonEmittingCycle(u32),
    #[error("Phone model: {0}")]
    PhoneModel(String),
    #[error("State {state} uses codebook {cb}, model has {n_mgau}")]
    CodebookOutOfRange { state: u32, cb: u32, n_mgau: usize },
    #[error("State {state} uses mixture weights {mixw}, model has {n_mixw}")]
    MixtureOutOfRange { state: u32, mixw: u32, n_mixw: usize },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub state: u32,
    pub prob: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Emitting { mixw: u32, cb: u32 },
    NonEmitting,
}

#[derive(Debug, Clone)]
pub struct HmmState {
    kind: StateKind,
    l_cb: u32,
    rank: u32,
    tmat: u32,
    m_state: u32,
    phone: Option<u32>,
    next: Vec<Transition>,
    prior: Vec<Transition>,
}

impl HmmState {
    fn new(kind: StateKind, tmat: u32, m_state: u32) -> Self {
        Self {
            kind,
            l_cb: 0,
            rank: 0,
            tmat,
            m_state,
            phone: None,
            next: Vec::new(),
            prior: Vec::new(),
        }
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    #[inline]
    pub fn is_emitting(&self) -> bool {
        matches!(self.kind, StateKind::Emitting { .. })
    }

    pub fn mixw(&self) -> Option<u32> {
        match self.kind {
            StateKind::Emitting { mixw, .. } => Some(mixw),
            StateKind::NonEmitting => None,
        }
    }

    pub fn cb(&self) -> Option<u32> {
        match self.kind {
            StateKind::Emitting { cb, .. } => Some(cb),
            StateKind::NonEmitting => None,
        }
    }

    /// Utterance-local codebook index (meaningful for emitting states only).
    pub fn l_cb(&self) -> u32 {
        self.l_cb
    }

    /// Position of a non-emitting state in a topological order of the
    /// non-emitting subgraph.
    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn tmat(&self) -> u32 {
        self.tmat
    }

    pub fn m_state(&self) -> u32 {
        self.m_state
    }

    pub fn phone(&self) -> Option<u32> {
        self.phone
    }

    pub fn next(&self) -> &[Transition] {
        &self.next
    }

    pub fn prior(&self) -> &[Transition] {
        &self.prior
    }

    pub fn label(&self) -> StateLabel {
        match self.kind {
            StateKind::Emitting { mixw, .. } => StateLabel::Emitting(mixw),
            StateKind::NonEmitting => StateLabel::NonEmitting {
                tmat: self.tmat,
                m_state: self.m_state,
            },
        }
    }
}

/// Short identity of a state for diagnostics: the tied-state id of emitting
/// states, `N(tmat,m_state)` for non-emitting ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateLabel {
    Emitting(u32),
    NonEmitting { tmat: u32, m_state: u32 },
}

impl fmt::Display for StateLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Emitting(mixw) => write!(f, "{mixw}"),
            Self::NonEmitting { tmat, m_state } => write!(f, "N({tmat},{m_state})"),
        }
    }
}

/// A validated sentence HMM. State 0 is the initial state.
#[derive(Debug, Clone)]
pub struct SentenceHmm {
    states: Vec<HmmState>,
    local_cb: Vec<u32>,
}

impl SentenceHmm {
    pub fn n_state(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub fn state(&self, id: u32) -> &HmmState {
        &self.states[id as usize]
    }

    pub fn states(&self) -> &[HmmState] {
        &self.states
    }

    /// Number of distinct codebooks referenced by this utterance.
    pub fn n_local_cb(&self) -> usize {
        self.local_cb.len()
    }

    /// Model codebook id of each local codebook.
    pub fn local_codebooks(&self) -> &[u32] {
        &self.local_cb
    }

    /// Checks that every codebook and mixture weight id exists in `model`.
    pub fn check_model(&self, model: &AcousticModel) -> Result<(), GraphError> {
        let n_mgau = model.gauden.n_mgau();
        let n_mixw = model.mixw.n_mixw();
        for (s, state) in self.states.iter().enumerate() {
            if let StateKind::Emitting { mixw, cb } = state.kind {
                if cb as usize >= n_mgau {
                    return Err(GraphError::CodebookOutOfRange {
                        state: s as u32,
                        cb,
                        n_mgau,
                    });
                }
                if mixw as usize >= n_mixw {
                    return Err(GraphError::MixtureOutOfRange {
                        state: s as u32,
                        mixw,
                        n_mixw,
                    });
                }
            }
        }
        Ok(())
    }
}

/// One phone HMM to splice into a sentence HMM.
///
/// `tmat` is `(n_emit, n_emit + 1)`: row `j` holds the transitions out of
/// emitting state `j`, the last column leads to the model's non-emitting exit.
#[derive(Debug, Clone, Copy)]
pub struct PhoneModel<'a> {
    pub phone: u32,
    pub tmat_id: u32,
    pub tmat: ArrayView2<'a, f32>,
    pub senones: &'a [u32],
    pub codebooks: &'a [u32],
}

#[derive(Debug, Default)]
pub struct SentenceHmmBuilder {
    states: Vec<HmmState>,
    transitions: Vec<(u32, u32, f32)>,
    last_exit: Option<u32>,
}

impl SentenceHmmBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitting(&mut self, cb: u32, mixw: u32) -> u32 {
        self.push(HmmState::new(StateKind::Emitting { mixw, cb }, 0, 0))
    }

    pub fn non_emitting(&mut self, tmat: u32, m_state: u32) -> u32 {
        self.push(HmmState::new(StateKind::NonEmitting, tmat, m_state))
    }

    fn push(&mut self, state: HmmState) -> u32 {
        self.states.push(state);
        (self.states.len() - 1) as u32
    }

    pub fn set_phone(&mut self, state: u32, phone: u32) -> &mut Self {
        if let Some(s) = self.states.get_mut(state as usize) {
            s.phone = Some(phone);
        }
        self
    }

    pub fn transition(&mut self, from: u32, to: u32, prob: f32) -> &mut Self {
        self.transitions.push((from, to, prob));
        self
    }

    /// Appends a phone HMM, linking the previous phone's exit state to its
    /// first state with probability 1. Zero-probability arcs are dropped.
    /// Returns the ids of the appended states.
    pub fn append_phone(&mut self, model: &PhoneModel<'_>) -> Result<std::ops::Range<u32>, GraphError> {
        let (n_emit, n_cols) = model.tmat.dim();
        if n_emit == 0 || n_cols != n_emit + 1 {
            return Err(GraphError::PhoneModel(format!(
                "transition matrix {} has shape ({n_emit}, {n_cols})",
                model.tmat_id
            )));
        }
        if model.senones.len() != n_emit || model.codebooks.len() != n_emit {
            return Err(GraphError::PhoneModel(format!(
                "phone {} has {} senones and {} codebooks for {n_emit} emitting states",
                model.phone,
                model.senones.len(),
                model.codebooks.len()
            )));
        }

        let first = self.states.len() as u32;
        for j in 0..n_emit {
            let mut state = HmmState::new(
                StateKind::Emitting {
                    mixw: model.senones[j],
                    cb: model.codebooks[j],
                },
                model.tmat_id,
                j as u32,
            );
            state.phone = Some(model.phone);
            self.states.push(state);
        }
        let mut exit = HmmState::new(StateKind::NonEmitting, model.tmat_id, n_emit as u32);
        exit.phone = Some(model.phone);
        self.states.push(exit);

        if let Some(prev_exit) = self.last_exit {
            self.transitions.push((prev_exit, first, 1.0));
        }
        for ((j, k), &p) in model.tmat.indexed_iter() {
            if p > 0.0 {
                self.transitions.push((first + j as u32, first + k as u32, p));
            }
        }

        let end = self.states.len() as u32;
        self.last_exit = Some(end - 1);
        Ok(first..end)
    }

    pub fn build(self) -> Result<SentenceHmm, GraphError> {
        let mut states = self.states;
        let n_state = states.len();
        if n_state == 0 {
            return Err(GraphError::Empty);
        }
        if !states[0].is_emitting() {
            return Err(GraphError::InitialNonEmitting);
        }

        for &(from, to, prob) in &self.transitions {
            if from as usize >= n_state || to as usize >= n_state {
                return Err(GraphError::DanglingTransition { from, to, n_state });
            }
            if !(0.0..=1.0).contains(&prob) {
                return Err(GraphError::InvalidTransitionProb { from, to, prob });
            }
            states[from as usize].next.push(Transition { state: to, prob });
            states[to as usize].prior.push(Transition { state: from, prob });
        }

        let mut cb_inverse: HashMap<u32, u32> = HashMap::new();
        let mut local_cb = Vec::new();
        for state in states.iter_mut() {
            if let StateKind::Emitting { cb, .. } = state.kind {
                state.l_cb = *cb_inverse.entry(cb).or_insert_with(|| {
                    local_cb.push(cb);
                    (local_cb.len() - 1) as u32
                });
            }
        }

        rank_non_emitting(&mut states)?;

        log::debug!(
            "Sentence HMM built: {} states, {} transitions, {} codebooks",
            n_state,
            self.transitions.len(),
            local_cb.len()
        );

        Ok(SentenceHmm { states, local_cb })
    }
}

/// Kahn's algorithm over the arcs between non-emitting states. Fails if they
/// contain a cycle, since such a chain could never be resolved within a frame.
fn rank_non_emitting(states: &mut [HmmState]) -> Result<(), GraphError> {
    let mut in_degree = vec![0u32; states.len()];
    for state in states.iter().filter(|s| !s.is_emitting()) {
        for t in &state.next {
            if !states[t.state as usize].is_emitting() {
                in_degree[t.state as usize] += 1;
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..states.len())
        .filter(|&s| !states[s].is_emitting() && in_degree[s] == 0)
        .collect();
    let mut rank = 0;
    let mut n_ranked = 0;

    while let Some(s) = queue.pop_front() {
        states[s].rank = rank;
        rank += 1;
        n_ranked += 1;
        for t in 0..states[s].next.len() {
            let j = states[s].next[t].state as usize;
            if !states[j].is_emitting() {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    queue.push_back(j);
                }
            }
        }
    }

    let n_non_emitting = states.iter().filter(|s| !s.is_emitting()).count();
    if n_ranked < n_non_emitting {
        let stuck = (0..states.len())
            .find(|&s| !states[s].is_emitting() && in_degree[s] > 0)
            .unwrap_or(0);
        return Err(GraphError::NonEmittingCycle(stuck as u32));
    }
    Ok(())
}
