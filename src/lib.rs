pub mod batch;
pub mod error;
pub mod job;

use std::io::Write;
use std::path::Path;

pub use batch::{run_batch, BatchConfig, UtteranceResult};
pub use error::BatchError;
pub use job::{JobFile, PhoneTable};

/// Counts of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub n_ok: usize,
    pub n_failed: usize,
}

/// Builds the job's model, aligns this part of its corpus and writes one JSON
/// line per utterance to `out`.
pub fn run_job(
    job: &JobFile,
    config: &BatchConfig,
    out: &mut impl Write,
) -> Result<BatchSummary, BatchError> {
    let model = job.model.build(&job.density_config())?;
    let phones = PhoneTable::new(&job.phones)?;
    let forward_config = job.forward_config();

    let results = run_batch(&job.utterances, &model, &phones, &forward_config, config)?;

    let mut summary = BatchSummary::default();
    for result in &results {
        serde_json::to_writer(&mut *out, result)?;
        writeln!(out)?;
        if result.is_ok() {
            summary.n_ok += 1;
        } else {
            summary.n_failed += 1;
        }
    }
    out.flush()?;
    Ok(summary)
}

/// Loads a job file and runs it with the environment's batch settings.
pub fn run(job_path: &Path, out: &mut impl Write) -> Result<BatchSummary, BatchError> {
    let job = JobFile::load(job_path)?;
    run_job(&job, &BatchConfig::from_env(), out)
}
