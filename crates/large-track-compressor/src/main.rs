mod error;
mod logging;
mod report;
mod settings;

use clap::Parser;
use error::CliError;
use large_track_compress_lib::Job;
use report::Reporter;
use settings::Settings;
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let _profiling = logging::setup_logging();
    let settings = Settings::parse();

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)
        .and_then(|rt| rt.block_on(run(settings)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<(), CliError> {
    let config = Arc::new(settings.to_config()?);
    tracing::info!("Compressing {} files ({})", settings.files.len(), config.compression_strategy);

    if let Some(directory) = &settings.output {
        tokio::fs::create_dir_all(directory)
            .await
            .map_err(|source| CliError::OutputDirectory {
                path: directory.clone(),
                source,
            })?;
    }

    let jobs = Job::batch(&settings.files, config, settings.output.as_deref());
    let total = jobs.len();
    let mut batch = settings.scheduler().enqueue(jobs);

    let reporter = Reporter::new(settings.json);
    while let Some(progress) = batch.next().await {
        reporter.render(&progress)?;
    }

    let summary = batch.join().await?;
    tracing::info!(
        "{} of {} files compressed",
        summary.completed,
        total
    );
    if summary.failed > 0 {
        return Err(CliError::JobsFailed {
            failed: summary.failed,
            total,
        });
    }
    Ok(())
}
