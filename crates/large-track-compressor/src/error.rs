use large_track_compress_lib::ProcessingError;
use std::path::PathBuf;

/// Errors surfaced to the command line
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cannot create output directory {}: {source}", path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("Failed to encode progress as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{failed} of {total} files failed")]
    JobsFailed { failed: usize, total: usize },
}
