//! Progress snapshots emitted by the pipeline and fanned in by the scheduler

use crate::{JobId, ProcessingError};
#[cfg(feature = "serde")]
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

/// Which sub-operation produced the latest snapshot of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Stage {
    Queued,
    Reading,
    Parsing,
    Compressing,
    Writing,
    Completed,
    Failed,
}

impl Stage {
    /// `Completed` or `Failed`
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Admitted and not yet finished
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Reading | Self::Parsing | Self::Compressing | Self::Writing
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Reading => "reading",
            Self::Parsing => "parsing",
            Self::Compressing => "compressing",
            Self::Writing => "writing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Point-in-time view of one job
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct Progress {
    pub id: JobId,
    pub stage: Stage,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub processed_bytes: u64,
    /// Input size; zero when it could not be determined
    pub total_bytes: u64,
    pub processed_segments: usize,
    /// Usually unknown until the job finishes
    pub total_segments: Option<usize>,
    /// Points read from the input
    pub processed_points: usize,
    /// Points written to the output
    pub written_points: usize,
    pub throughput_bytes_per_second: f64,
    pub message: Option<String>,
    #[cfg_attr(feature = "serde", serde(serialize_with = "serialize_error"))]
    pub error: Option<Arc<ProcessingError>>,
    pub timestamp: SystemTime,
}

#[cfg(feature = "serde")]
fn serialize_error<S: Serializer>(
    error: &Option<Arc<ProcessingError>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

impl Progress {
    /// Initial snapshot of a job
    pub fn new(id: JobId, stage: Stage, input: PathBuf, output: Option<PathBuf>) -> Self {
        Self {
            id,
            stage,
            input,
            output,
            processed_bytes: 0,
            total_bytes: 0,
            processed_segments: 0,
            total_segments: None,
            processed_points: 0,
            written_points: 0,
            throughput_bytes_per_second: 0.0,
            message: None,
            error: None,
            timestamp: SystemTime::now(),
        }
    }

    /// `min(1, processed / total)`, or 0 when the total is unknown
    pub fn fraction_completed(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.processed_bytes as f64 / self.total_bytes as f64).min(1.0)
    }

    /// Copy with a new stage and message, timestamped now
    pub fn advance(&self, stage: Stage, message: Option<String>) -> Self {
        Self {
            stage,
            message,
            timestamp: SystemTime::now(),
            ..self.clone()
        }
    }

    /// Terminal failure snapshot carrying the error
    pub fn failed(&self, error: Arc<ProcessingError>) -> Self {
        Self {
            stage: Stage::Failed,
            message: Some(format!("Failed: {}", error)),
            error: Some(error),
            timestamp: SystemTime::now(),
            ..self.clone()
        }
    }
}
