use crate::error::CliError;
use clap::Parser;
use large_track_compress_lib::{CompressionStrategy, Config, FailurePolicy, Scheduler};
use std::path::PathBuf;

/// RDP tolerance used when no strategy flag is given
const DEFAULT_RDP_TOLERANCE: f64 = 5.0;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Large Track Compressor - Shrink huge GPX files by dropping redundant track points
pub struct Settings {
    /// GPX files to compress
    #[clap(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Directory for processed files (defaults to each input's directory)
    #[clap(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Use Ramer-Douglas-Peucker with the given tolerance in meters (default strategy)
    #[clap(long, value_name = "TOLERANCE", conflicts_with_all = ["strip_nearby", "strip_duplicates", "random"])]
    pub rdp: Option<f64>,

    /// Remove points within the given radius in meters of the previous kept point
    #[clap(long, value_name = "RADIUS", conflicts_with_all = ["strip_duplicates", "random"])]
    pub strip_nearby: Option<f64>,

    /// Only remove consecutive points with identical coordinates
    #[clap(long, conflicts_with = "random")]
    pub strip_duplicates: bool,

    /// Randomly drop the given percentage of points (0-100)
    #[clap(long, value_name = "PERCENT")]
    pub random: Option<f64>,

    /// Disable the post-compression proximity pass
    #[clap(long, conflicts_with = "dedupe")]
    pub no_dedupe: bool,

    /// Radius in meters of the post-compression proximity pass
    #[clap(long, value_name = "RADIUS")]
    pub dedupe: Option<f64>,

    /// Suffix appended to output file names
    #[clap(long)]
    pub suffix: Option<String>,

    /// Maximum number of files processed at once (defaults to the CPU count)
    #[clap(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Keep processing the other files when one fails
    #[clap(long, default_value = "false")]
    pub keep_going: bool,

    /// Drop <extensions> elements from the output
    #[clap(long, default_value = "false")]
    pub no_extensions: bool,

    /// Print one JSON progress snapshot per line instead of text
    #[clap(long, default_value = "false")]
    pub json: bool,
}

impl Settings {
    /// Build the processing configuration from the large-file preset
    pub fn to_config(&self) -> Result<Config, CliError> {
        let strategy = if let Some(tolerance) = self.rdp {
            CompressionStrategy::Rdp {
                tolerance: non_negative("--rdp", tolerance)?,
            }
        } else if let Some(radius) = self.strip_nearby {
            CompressionStrategy::StripNearby {
                radius: non_negative("--strip-nearby", radius)?,
            }
        } else if self.strip_duplicates {
            CompressionStrategy::StripDuplicates
        } else if let Some(percent) = self.random {
            if !(percent > 0.0 && percent < 100.0) {
                return Err(CliError::InvalidArgument(format!(
                    "--random expects a percentage between 0 and 100, got {}",
                    percent
                )));
            }
            CompressionStrategy::Random {
                percent: percent / 100.0,
            }
        } else {
            CompressionStrategy::Rdp {
                tolerance: DEFAULT_RDP_TOLERANCE,
            }
        };

        let mut config = Config::large_file().with_strategy(strategy);
        config.enable_random_removal = self.random.is_some();
        config.preserve_extensions = !self.no_extensions;
        if self.no_dedupe {
            config.deduplication_radius = None;
        } else if let Some(radius) = self.dedupe {
            config.deduplication_radius = Some(non_negative("--dedupe", radius)?);
        }
        if let Some(suffix) = &self.suffix {
            config.output_suffix = suffix.clone();
        }
        Ok(config)
    }

    pub fn scheduler(&self) -> Scheduler {
        let scheduler = match self.jobs {
            Some(limit) => Scheduler::new(limit),
            None => Scheduler::with_available_parallelism(),
        };
        let policy = if self.keep_going {
            FailurePolicy::Isolate
        } else {
            FailurePolicy::FailFast
        };
        scheduler.with_failure_policy(policy)
    }
}

fn non_negative(flag: &str, value: f64) -> Result<f64, CliError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(CliError::InvalidArgument(format!(
            "{} expects a non-negative distance, got {}",
            flag, value
        )))
    }
}
