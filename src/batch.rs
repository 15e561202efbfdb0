use std::ops::Range;
use std::time::Instant;

use bw_core::{forward, AcousticModel, AlphaTable, BwError, ForwardConfig, ForwardWorkspace};
use num_cpus::get_physical;
use serde::Serialize;

use crate::error::BatchError;
use crate::job::{PhoneTable, UtteranceSpec};

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Corpus part to process, `1..=n_part`.
    pub part: usize,
    pub n_part: usize,
    /// Worker threads, each with its own forward workspace.
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            part: 1,
            n_part: 1,
            workers: get_physical(),
        }
    }
}

impl BatchConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides("BW_");
        config
    }

    fn apply_env_overrides(&mut self, prefix: &str) {
        let parse_env = |suffix: &str| {
            std::env::var(format!("{prefix}{suffix}"))
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
        };

        if let Some(v) = parse_env("PART") {
            self.part = v;
        }
        if let Some(v) = parse_env("NPART") {
            self.n_part = v;
        }
        if let Some(v) = parse_env("WORKERS") {
            self.workers = v.max(1);
        }
    }

    /// Utterances belonging to this part of an `n_utt` utterance corpus.
    /// Parts are contiguous runs of `n_utt / n_part`; the last one also takes
    /// the remainder.
    pub fn part_range(&self, n_utt: usize) -> Result<Range<usize>, BatchError> {
        let (part, n_part) = (self.part, self.n_part);
        if n_part == 0 || part == 0 || part > n_part {
            return Err(BatchError::InvalidPart { part, n_part });
        }
        let run_len = n_utt / n_part;
        let start = (part - 1) * run_len;
        let end = if part == n_part { n_utt } else { start + run_len };
        Ok(start..end)
    }
}

/// Outcome of one utterance, written as one JSON line.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UtteranceResult {
    pub id: String,
    pub n_frames: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_likelihood: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_active: Option<f64>,
    /// Best emitting state per frame, when backpointers are on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UtteranceResult {
    fn failed(utt: &UtteranceSpec, err: &BatchError) -> Self {
        Self {
            id: utt.id.clone(),
            n_frames: utt.n_frames(),
            log_likelihood: None,
            avg_active: None,
            path: None,
            error: Some(err.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs the forward pass over this part's utterances on `config.workers`
/// threads. Utterance-level failures are reported in the results; anything
/// else stops the run.
pub fn run_batch(
    utterances: &[UtteranceSpec],
    model: &AcousticModel,
    phones: &PhoneTable,
    forward_config: &ForwardConfig,
    config: &BatchConfig,
) -> Result<Vec<UtteranceResult>, BatchError> {
    let range = config.part_range(utterances.len())?;
    let utts = &utterances[range.clone()];
    if utts.is_empty() {
        log::warn!("Part {} of {} has no utterances", config.part, config.n_part);
        return Ok(Vec::new());
    }

    let n_workers = config.workers.clamp(1, utts.len());
    let chunk = utts.len().div_ceil(n_workers);
    log::info!(
        "Processing utterances {}..{} on {} workers",
        range.start,
        range.end,
        n_workers
    );

    let start = Instant::now();
    let results = std::thread::scope(|s| {
        let handles: Vec<_> = utts
            .chunks(chunk)
            .map(|batch| {
                s.spawn(move || {
                    let mut workspace = ForwardWorkspace::new();
                    batch
                        .iter()
                        .map(|utt| {
                            process_utterance(utt, model, phones, forward_config, &mut workspace)
                        })
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .collect();

        let mut results = Vec::with_capacity(utts.len());
        for handle in handles {
            let batch = handle.join().map_err(|_| BatchError::WorkerPanicked)??;
            results.extend(batch);
        }
        Ok::<_, BatchError>(results)
    })?;

    log::info!(
        "{} utterances in {:?}, {} failed",
        results.len(),
        start.elapsed(),
        results.iter().filter(|r| !r.is_ok()).count()
    );
    Ok(results)
}

fn process_utterance(
    utt: &UtteranceSpec,
    model: &AcousticModel,
    phones: &PhoneTable,
    config: &ForwardConfig,
    workspace: &mut ForwardWorkspace,
) -> Result<UtteranceResult, BatchError> {
    match align(utt, model, phones, config, workspace) {
        Ok(result) => Ok(result),
        Err(e) if e.is_utterance_fatal() => {
            log::warn!("Skipping utterance {}: {e}", utt.id);
            Ok(UtteranceResult::failed(utt, &e))
        }
        Err(e) => {
            log::error!("Utterance {}: {e}", utt.id);
            Err(e)
        }
    }
}

fn align(
    utt: &UtteranceSpec,
    model: &AcousticModel,
    phones: &PhoneTable,
    config: &ForwardConfig,
    workspace: &mut ForwardWorkspace,
) -> Result<UtteranceResult, BatchError> {
    let hmm = phones.sentence_hmm(&utt.phones)?;
    let features = utt.features()?;
    let segments = utt.segments(phones)?;

    let table: AlphaTable = forward(model, &hmm, &features, config, workspace, segments.as_deref())
        .map_err(BwError::from)?;

    // The transcript ends in the exit state of its last phone.
    let final_state = (hmm.n_state() - 1) as u32;
    let log_likelihood = table.log_likelihood(final_state);
    if log_likelihood.is_none() {
        log::warn!("Utterance {} did not reach its final state", utt.id);
    }
    let path = if config.backpointers && log_likelihood.is_some() {
        Some(table.backtrace(&hmm, final_state).map_err(BwError::from)?)
    } else {
        None
    };

    Ok(UtteranceResult {
        id: utt.id.clone(),
        n_frames: table.n_frames(),
        log_likelihood,
        avg_active: Some(table.avg_active()),
        path,
        error: None,
    })
}
