//! Scaled, pruned forward (alpha) pass over a sentence HMM.

mod alpha;
mod workspace;

use std::cmp::Reverse;
use std::time::{Duration, Instant};

use ndarray::Axis;
use thiserror::Error;

use crate::config::ForwardConfig;
use crate::features::FeatureSeq;
use crate::gauden::{mixture_prob, scale_densities_fwd, GaudenError};
use crate::model::AcousticModel;
use crate::phseg::{PhoneSegment, SegmentCursor};
use crate::state_seq::{GraphError, SentenceHmm, StateKind, StateLabel};

pub use alpha::AlphaTable;
pub use workspace::{ActiveStateSet, ForwardWorkspace, INACTIVE, NO_STATE};

/// Smallest output probability accepted for the initial state.
pub const MIN_INITIAL_OUTPROB: f64 = 1.2e-38;

/// Best alpha below this aborts the utterance; also the pruning threshold
/// used when `best * beam` would underflow.
pub const ALPHA_FLOOR: f64 = 1e-300;

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("Utterance has no frames")]
    EmptyUtterance,
    #[error("Features have {actual} streams, model expects {expected}")]
    StreamMismatch { expected: usize, actual: usize },
    #[error("Feature stream {stream} has length {actual}, model expects {expected}")]
    VeclenMismatch {
        stream: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Feature stream {stream} has {actual} frames, expected {expected}")]
    FrameCountMismatch {
        stream: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Small output prob (== {prob:.2e}) seen at frame 0 state 0")]
    InitialUnderflow { prob: f64 },
    #[error("All {} active states, {}, zero at time {frame}", .states.len(), join_labels(.states))]
    AllAlphasZero { frame: usize, states: Vec<StateLabel> },
    #[error("Best alpha {balpha:e} < 1e-300 at time {frame}")]
    BestAlphaUnderflow { frame: usize, balpha: f64 },
    #[error("No active states at time {frame}")]
    NoActiveStates { frame: usize },
    #[error("Forward pass was run without backpointers")]
    BackpointersDisabled,
    #[error("Backtrace lost state {state} at frame {frame}")]
    BrokenBacktrace { frame: usize, state: u32 },
    #[error("Model: {0}")]
    Model(#[from] GaudenError),
    #[error("Sentence HMM: {0}")]
    Graph(#[from] GraphError),
}

fn join_labels(states: &[StateLabel]) -> String {
    states
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

impl ForwardError {
    /// Whether the batch can skip this utterance and go on. Model errors mean
    /// the shared parameters are unusable and the whole run must stop.
    pub fn is_utterance_fatal(&self) -> bool {
        match self {
            Self::Model(_) => false,
            Self::EmptyUtterance
            | Self::StreamMismatch { .. }
            | Self::VeclenMismatch { .. }
            | Self::FrameCountMismatch { .. }
            | Self::InitialUnderflow { .. }
            | Self::AllAlphasZero { .. }
            | Self::BestAlphaUnderflow { .. }
            | Self::NoActiveStates { .. }
            | Self::BackpointersDisabled
            | Self::BrokenBacktrace { .. }
            | Self::Graph(_) => true,
        }
    }
}

fn check_inputs(
    model: &AcousticModel,
    hmm: &SentenceHmm,
    features: &FeatureSeq,
) -> Result<(), ForwardError> {
    let g = &model.gauden;
    if !g.is_precomputed() {
        return Err(GaudenError::NotPrecomputed.into());
    }
    if features.n_frames() == 0 {
        return Err(ForwardError::EmptyUtterance);
    }
    if features.n_streams() != g.n_feat() {
        return Err(ForwardError::StreamMismatch {
            expected: g.n_feat(),
            actual: features.n_streams(),
        });
    }
    for (stream, &expected) in g.veclen().iter().enumerate() {
        let actual = features.veclen(stream);
        if actual != expected {
            return Err(ForwardError::VeclenMismatch {
                stream,
                expected,
                actual,
            });
        }
    }
    hmm.check_model(model)?;
    Ok(())
}

/// Computes the scaled forward variable of one utterance.
///
/// Only states above the beam (`best alpha * config.beam`) survive each frame.
/// When `phseg` is given, the segment covering a frame restricts the surviving
/// states to its phone instead, as long as at least one active state matches.
///
/// On error no partial table is returned and `workspace` stays reusable.
pub fn forward(
    model: &AcousticModel,
    hmm: &SentenceHmm,
    features: &FeatureSeq,
    config: &ForwardConfig,
    workspace: &mut ForwardWorkspace,
    phseg: Option<&[PhoneSegment]>,
) -> Result<AlphaTable, ForwardError> {
    let start = Instant::now();
    check_inputs(model, hmm, features)?;

    let g = &model.gauden;
    let n_obs = features.n_frames();
    let n_l_cb = hmm.n_local_cb();
    let beam = config.effective_beam();
    let backpointers = config.backpointers;

    workspace.prepare(hmm.n_state(), n_l_cb, g.n_feat(), g.n_top());
    let ws = workspace;

    // A single codebook means semi-continuous models: seed each frame's
    // top-N list with the previous frame's winners.
    let seed_topn = n_l_cb == 1;
    let mut segments = phseg.map(SegmentCursor::new);
    let mut table = AlphaTable::with_capacity(n_obs, backpointers);
    let mut gau_time = Duration::ZERO;

    let (cb0, mixw0) = match hmm.state(0).kind() {
        StateKind::Emitting { cb, mixw } => (cb, mixw),
        StateKind::NonEmitting => return Err(GraphError::InitialNonEmitting.into()),
    };
    let l_cb0 = hmm.state(0).l_cb() as usize;

    let gau_start = Instant::now();
    g.compute_log(
        ws.den.index_axis_mut(Axis(0), l_cb0),
        ws.den_idx.index_axis_mut(Axis(0), l_cb0),
        &features.frame(0),
        cb0 as usize,
        false,
    )?;
    ws.acbframe[l_cb0] = Some(0);
    ws.active_cb.push(l_cb0 as u32);
    let dscale0 = scale_densities_fwd(&mut ws.den, &ws.active_cb);
    let outprob0 = mixture_prob(
        ws.den.index_axis(Axis(0), l_cb0),
        ws.den_idx.index_axis(Axis(0), l_cb0),
        model.mixw.get(mixw0 as usize),
    );
    gau_time += gau_start.elapsed();

    if !(outprob0 > MIN_INITIAL_OUTPROB) {
        log::error!("Small output prob (== {outprob0:.2e}) seen at frame 0 state 0");
        return Err(ForwardError::InitialUnderflow { prob: outprob0 });
    }

    table.push_frame(
        vec![1.0],
        vec![0],
        1.0 / outprob0,
        dscale0,
        backpointers.then(|| vec![NO_STATE]),
    );

    for t in 1..n_obs {
        let obs = features.frame(t);
        let prev_states = table.states(t - 1);
        let prev_alpha = table.alpha(t - 1);
        ws.active_cb.clear();

        // Activate the emitting successors of every state active at t-1 and
        // evaluate their codebooks, so all densities of this frame can be
        // scaled together.
        let gau_start = Instant::now();
        for &i in prev_states {
            for tr in hmm.state(i).next() {
                let j = tr.state;
                let sj = hmm.state(j);
                let StateKind::Emitting { cb, .. } = sj.kind() else {
                    continue;
                };
                if ws.next.index_of(j).is_some() {
                    continue;
                }
                let l_cb = sj.l_cb() as usize;
                if ws.acbframe[l_cb] != Some(t) {
                    g.compute_log(
                        ws.den.index_axis_mut(Axis(0), l_cb),
                        ws.den_idx.index_axis_mut(Axis(0), l_cb),
                        &obs,
                        cb as usize,
                        seed_topn,
                    )?;
                    ws.active_cb.push(l_cb as u32);
                    ws.acbframe[l_cb] = Some(t);
                }
                ws.next.activate(j);
            }
        }

        let dscale = scale_densities_fwd(&mut ws.den, &ws.active_cb);

        ws.outprob.clear();
        for &j in ws.next.states() {
            let sj = hmm.state(j);
            let l_cb = sj.l_cb() as usize;
            let mixw = sj.mixw().unwrap_or_default() as usize;
            ws.outprob.push(mixture_prob(
                ws.den.index_axis(Axis(0), l_cb),
                ws.den_idx.index_axis(Axis(0), l_cb),
                model.mixw.get(mixw),
            ));
        }
        gau_time += gau_start.elapsed();

        // alpha[t][j] += alpha[t-1][i] * a_ij * b_j(o_t) for emitting j.
        for (&i, &prior_alpha) in prev_states.iter().zip(prev_alpha) {
            for tr in hmm.state(i).next() {
                if !hmm.state(tr.state).is_emitting() {
                    continue;
                }
                let Some(idx) = ws.next.index_of(tr.state) else {
                    continue;
                };
                let x = prior_alpha * tr.prob as f64;
                if backpointers {
                    ws.next.offer_pred(idx, i, x, false);
                }
                ws.next.add_alpha(idx, x * ws.outprob[idx]);
            }
        }

        // Push mass into non-emitting successors within this frame. Emitting
        // states first, then non-emitting ones in topological order, so every
        // non-emitting state has all of its mass before it propagates.
        let n_emitting = ws.next.len();
        for s in 0..n_emitting {
            propagate_non_emitting(hmm, ws, s, backpointers);
        }
        while let Some(Reverse((_, s))) = ws.worklist.pop() {
            propagate_non_emitting(hmm, ws, s as usize, backpointers);
        }

        let frame = rescale_and_prune(hmm, ws, t, beam, backpointers, segments.as_mut());
        ws.next.release();
        let (alpha, states, scale, bp) = frame?;
        table.push_frame(alpha, states, scale, dscale, bp);
    }

    log::debug!(
        "Forward pass: {} frames, {:.1} active states/frame, {:?} in densities, {:?} total",
        n_obs,
        table.avg_active(),
        gau_time,
        start.elapsed()
    );

    Ok(table)
}

fn propagate_non_emitting(
    hmm: &SentenceHmm,
    ws: &mut ForwardWorkspace,
    s: usize,
    backpointers: bool,
) {
    let i = ws.next.states()[s];
    let a = ws.next.alpha()[s];
    for tr in hmm.state(i).next() {
        let sj = hmm.state(tr.state);
        if sj.is_emitting() {
            continue;
        }
        let x = a * tr.prob as f64;
        let (idx, added) = ws.next.activate(tr.state);
        if added {
            ws.worklist.push(Reverse((sj.rank(), idx as u32)));
        }
        if backpointers {
            ws.next.offer_pred(idx, i, x, added);
        }
        ws.next.add_alpha(idx, x);
    }
}

type PrunedFrame = (Vec<f64>, Vec<u32>, f64, Option<Vec<u32>>);

/// Finds the best alpha of frame `t`, derives the scale and pruning threshold
/// and returns the surviving, rescaled states in activation order.
fn rescale_and_prune(
    hmm: &SentenceHmm,
    ws: &ForwardWorkspace,
    t: usize,
    beam: f64,
    backpointers: bool,
    segments: Option<&mut SegmentCursor<'_>>,
) -> Result<PrunedFrame, ForwardError> {
    let next = &ws.next;
    if next.is_empty() {
        log::error!("No active states at time {t}");
        return Err(ForwardError::NoActiveStates { frame: t });
    }

    let balpha = next.alpha().iter().fold(0.0f64, |b, &a| if b < a { a } else { b });

    if balpha == 0.0 {
        let states: Vec<StateLabel> = next.states().iter().map(|&s| hmm.state(s).label()).collect();
        let err = ForwardError::AllAlphasZero { frame: t, states };
        log::error!("{err}");
        return Err(err);
    }
    if balpha < ALPHA_FLOOR {
        log::error!("Best alpha < 1e-300");
        return Err(ForwardError::BestAlphaUnderflow { frame: t, balpha });
    }

    let scale = 1.0 / balpha;
    let pthresh = if balpha.log10() + beam.log10() > -300.0 {
        balpha * beam
    } else {
        ALPHA_FLOOR
    };

    // Phone segmentation replaces the beam, unless it would empty the frame.
    let phone = segments
        .and_then(|c| c.at(t))
        .map(|seg| seg.phone)
        .filter(|&p| next.states().iter().any(|&s| hmm.state(s).phone() == Some(p)));

    let n = next.len();
    let mut alpha = Vec::with_capacity(n);
    let mut states = Vec::with_capacity(n);
    let mut bp = backpointers.then(|| Vec::with_capacity(n));

    for (s, (&state, &a)) in next.states().iter().zip(next.alpha()).enumerate() {
        let keep = match phone {
            Some(p) => hmm.state(state).phone() == Some(p),
            None => a >= pthresh,
        };
        if keep {
            alpha.push(a * scale);
            states.push(state);
            if let Some(bp) = bp.as_mut() {
                bp.push(next.bp()[s]);
            }
        }
    }

    Ok((alpha, states, scale, bp))
}
