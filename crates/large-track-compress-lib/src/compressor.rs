//! Segment compressor: applies the configured strategy then the dedup post-pass

use crate::simplify;
use crate::{
    CancellationToken, CompressionStrategy, Config, ProcessingError, Result, TrackSegmentPayload,
};
use std::sync::Arc;

/// Point counts before and after compressing one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionStats {
    pub original_points: usize,
    pub written_points: usize,
}

impl CompressionStats {
    /// Fraction of points removed, 0 for an empty segment
    pub fn reduction_ratio(&self) -> f64 {
        if self.original_points == 0 {
            return 0.0;
        }
        1.0 - self.written_points as f64 / self.original_points as f64
    }
}

/// Stateless per-segment point reducer
///
/// Holds only the shared configuration, so one instance may serve any number of
/// segments from any thread.
#[derive(Debug, Clone)]
pub struct SegmentCompressor {
    config: Arc<Config>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl SegmentCompressor {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reduce one segment's points
    ///
    /// Everything except the point list is carried over unchanged. Fails with
    /// [`ProcessingError::Cancelled`] if `token` is already cancelled.
    pub fn compress(
        &self,
        payload: TrackSegmentPayload,
        token: &CancellationToken,
    ) -> Result<(TrackSegmentPayload, CompressionStats)> {
        if token.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }

        let original_points = payload.points.len();
        let mut points = match self.config.compression_strategy {
            CompressionStrategy::Rdp { tolerance } => {
                simplify::ramer_douglas_peucker(&payload.points, tolerance)
            }
            CompressionStrategy::StripNearby { radius } => {
                simplify::strip_nearby(&payload.points, radius)
            }
            CompressionStrategy::StripDuplicates => simplify::strip_duplicates(&payload.points),
            CompressionStrategy::Random { percent } => {
                if self.config.enable_random_removal {
                    simplify::random_thinning(&payload.points, percent, &mut rand::rng())
                } else {
                    payload.points.clone()
                }
            }
        };

        if let Some(radius) = self.config.deduplication_radius {
            points = simplify::strip_nearby(&points, radius);
        }

        let stats = CompressionStats {
            original_points,
            written_points: points.len(),
        };
        tracing::trace!(
            "Segment {}/{}: {} -> {} points",
            payload.track_index,
            payload.segment_index,
            stats.original_points,
            stats.written_points
        );

        let mut payload = payload;
        payload.points = points;
        Ok((payload, stats))
    }
}
