//! Job descriptions handed to the pipeline and the scheduler

use crate::Config;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Caller-assigned job identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// One input file to process into one output file
///
/// Jobs are never mutated after construction and are cheap to clone.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub input: PathBuf,
    pub output: PathBuf,
    pub config: Arc<Config>,
}

impl Job {
    pub fn new(
        id: JobId,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            id,
            input: input.into(),
            output: output.into(),
            config,
        }
    }

    /// Build one job per input, numbering them from zero
    ///
    /// Output paths are derived with [`Config::output_path_for`].
    pub fn batch<P: AsRef<Path>>(
        inputs: &[P],
        config: Arc<Config>,
        override_directory: Option<&Path>,
    ) -> Vec<Job> {
        inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                let input = input.as_ref();
                let output = config.output_path_for(input, override_directory);
                Job::new(JobId(i as u64), input, output, config.clone())
            })
            .collect()
    }
}
