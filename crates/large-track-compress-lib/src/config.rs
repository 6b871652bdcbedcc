//! Processing configuration shared by every job of a batch

use crate::{ProcessingError, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// How a segment's points are reduced
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum CompressionStrategy {
    /// Ramer-Douglas-Peucker simplification, tolerance in meters
    Rdp { tolerance: f64 },
    /// Drop points closer than `radius` meters to the previously kept point
    StripNearby { radius: f64 },
    /// Keep each point with probability `1 - percent`
    Random { percent: f64 },
    /// Lossless removal of consecutive points with identical coordinates
    StripDuplicates,
}

impl fmt::Display for CompressionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rdp { tolerance } => write!(f, "RDP tolerance {:.2}m", tolerance),
            Self::StripNearby { radius } => write!(f, "Radius {:.2}m", radius),
            Self::Random { percent } => write!(f, "Random {}%", (percent * 100.0) as i64),
            Self::StripDuplicates => write!(f, "Strip duplicates"),
        }
    }
}

/// Configuration for processing jobs
///
/// A configuration is immutable once a job is built from it and is shared between
/// concurrent jobs behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    /// Suffix appended to the input file stem to name the output file
    pub output_suffix: String,
    /// Target point count per processing chunk. Chunks never span segments.
    pub segment_chunk_size: NonZeroUsize,
    /// Primary point reduction strategy
    pub compression_strategy: CompressionStrategy,
    /// Radius in meters for the proximity post-pass, `None` disables it
    pub deduplication_radius: Option<f64>,
    /// Keep points in their original order. Segments are always processed
    /// sequentially, so this holds regardless; it is carried for callers that
    /// persist configurations.
    pub enforce_stable_ordering: bool,
    /// Random thinning only takes effect when this is enabled
    pub enable_random_removal: bool,
    /// Write `<extensions>` elements back to the output
    pub preserve_extensions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_suffix: "-compressed".to_string(),
            segment_chunk_size: NonZeroUsize::new(16_384).unwrap_or(NonZeroUsize::MIN),
            compression_strategy: CompressionStrategy::Rdp { tolerance: 5.0 },
            deduplication_radius: Some(2.5),
            enforce_stable_ordering: true,
            enable_random_removal: false,
            preserve_extensions: true,
        }
    }
}

impl Config {
    /// Configuration tuned for multi-gigabyte inputs
    pub fn large_file() -> Self {
        Self {
            output_suffix: "-tahoe".to_string(),
            segment_chunk_size: NonZeroUsize::new(32_768).unwrap_or(NonZeroUsize::MIN),
            compression_strategy: CompressionStrategy::Rdp { tolerance: 4.0 },
            deduplication_radius: Some(1.5),
            ..Self::default()
        }
    }

    /// Derive a configuration with a different chunk size
    ///
    /// Returns [`ProcessingError::InvalidConfiguration`] when `chunk_size` is zero.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        self.segment_chunk_size = NonZeroUsize::new(chunk_size).ok_or_else(|| {
            ProcessingError::InvalidConfiguration("segment chunk size must be > 0".to_string())
        })?;
        Ok(self)
    }

    /// Derive a configuration with a different compression strategy
    pub fn with_strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.compression_strategy = strategy;
        self
    }

    /// Derive a configuration with a different dedup radius
    pub fn with_deduplication_radius(mut self, radius: Option<f64>) -> Self {
        self.deduplication_radius = radius;
        self
    }

    /// Resolve the destination path for a processed file
    ///
    /// The output lands next to the input unless `override_directory` is given,
    /// keeps the input's base name plus [`Config::output_suffix`], and keeps the
    /// input's extension (defaulting to `gpx`).
    pub fn output_path_for(&self, input: &Path, override_directory: Option<&Path>) -> PathBuf {
        let parent = override_directory
            .map(Path::to_path_buf)
            .or_else(|| input.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        let base_name = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = input
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "gpx".to_string());
        parent.join(format!("{}{}.{}", base_name, self.output_suffix, extension))
    }
}
