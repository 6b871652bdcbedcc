//! Large Track Compress Library - Streaming GPX Point Reduction
//!
//! This library rewrites large GPX files with fewer track points while keeping every
//! structure it does not intentionally touch (metadata, waypoints, routes, extensions,
//! attribute sets, element order). Documents are never materialized: a pull-based
//! parser emits structural events, track segments go through a compressor, and a
//! streaming writer serializes the result.
//!
//! # Architecture
//!
//! - **[`StreamingParser`]**: Incremental XML scanner producing [`StreamEvent`]s
//! - **[`simplify`]**: RDP, proximity strip, duplicate strip and random thinning
//! - **[`SegmentCompressor`]**: Applies the configured strategy plus the dedup post-pass
//! - **[`StreamWriter`]**: Serializes events back into GPX, one file per job
//! - **[`Pipeline`]**: Drives parser → compressor → writer for one [`Job`]
//! - **[`Scheduler`]**: Runs many pipelines under a concurrency limit
//!
//! # Performance Characteristics
//!
//! - **Memory**: O(P) where P is the largest single segment, independent of file size
//! - **Simplification**: O(P) for the strip strategies, O(P log P) typical for RDP
//! - **Backpressure**: bounded channels between parser, pipeline and consumer

mod compressor;
mod config;
pub mod distance;
mod event;
mod job;
mod parser;
mod pipeline;
mod point;
mod progress;
mod scheduler;
mod segment;
pub mod simplify;
mod writer;
mod xml_node;

// Public API exports
pub use compressor::{CompressionStats, SegmentCompressor};
pub use config::{CompressionStrategy, Config};
pub use event::{DocumentHeader, StreamEvent, TrackMetadata};
pub use job::{Job, JobId};
pub use parser::{ByteCounter, CountingReader, StreamingParser};
pub use pipeline::{JobHandle, JobSummary, Pipeline};
pub use point::PointRecord;
pub use progress::{Progress, Stage};
pub use scheduler::{Batch, BatchSummary, FailurePolicy, Scheduler};
pub use segment::TrackSegmentPayload;
pub use writer::StreamWriter;
pub use xml_node::{XmlNode, XmlNodeBuilder};

pub use tokio_util::sync::CancellationToken;

use std::path::PathBuf;
use std::sync::Arc;

/// Error types for the processing engine
///
/// Errors are cloneable so the same failure can be returned to the caller and
/// attached to the final progress snapshot.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessingError {
    #[error("Unsupported input file: {0}")]
    UnsupportedInput(String),

    #[error("Unable to read GPX input at {}: {source}", path.display())]
    UnreadableInput {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Failed to write output to {}: {source}", path.display())]
    OutputWriteFailure {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Parser error at line {line}, column {column}: {message}")]
    ParseFailure {
        line: u64,
        column: u64,
        message: String,
    },

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Internal pipeline inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl ProcessingError {
    pub(crate) fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::UnreadableInput {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn write_failure(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::OutputWriteFailure {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Whether this error is the distinguished cancellation outcome
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ProcessingError>;
