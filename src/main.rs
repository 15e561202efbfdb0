use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Some(job_path) = std::env::args_os().nth(1).map(PathBuf::from) else {
        eprintln!("usage: bw-batch <job.json>");
        return ExitCode::from(2);
    };

    let mut stdout = std::io::stdout().lock();
    match bw_batch::run(&job_path, &mut stdout) {
        Ok(summary) => {
            log::info!(
                "Done: {} utterances aligned, {} skipped",
                summary.n_ok,
                summary.n_failed
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
