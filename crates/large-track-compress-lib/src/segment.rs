//! Track segment payloads flowing from the parser through the compressor to the writer

use crate::{PointRecord, XmlNode};
use std::collections::BTreeMap;

/// One `<trkseg>` with its points and the sibling nodes anchored around them
///
/// Simplification removes points, so non-point children are split into the ones
/// seen before the first point (`leading_nodes`) and the ones after it
/// (`trailing_nodes`). Each group is written back at its own end of the segment.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TrackSegmentPayload {
    /// Index of the track in the document (zero-based)
    pub track_index: usize,
    /// Index of the segment in the track (zero-based)
    pub segment_index: usize,
    /// Attributes of the `<trkseg>` element
    pub attributes: BTreeMap<String, String>,
    /// Ordered track points
    pub points: Vec<PointRecord>,
    /// Non-point children encountered before the first point
    pub leading_nodes: Vec<XmlNode>,
    /// Non-point children encountered after a point had been seen
    pub trailing_nodes: Vec<XmlNode>,
}

impl TrackSegmentPayload {
    /// Create a segment holding only points
    pub fn new(track_index: usize, segment_index: usize, points: Vec<PointRecord>) -> Self {
        Self {
            track_index,
            segment_index,
            points,
            ..Self::default()
        }
    }

    /// Copy of this payload with a different point list; everything else is kept
    pub fn with_points(&self, points: Vec<PointRecord>) -> Self {
        Self {
            track_index: self.track_index,
            segment_index: self.segment_index,
            attributes: self.attributes.clone(),
            points,
            leading_nodes: self.leading_nodes.clone(),
            trailing_nodes: self.trailing_nodes.clone(),
        }
    }

    /// Check if this segment contains any points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get the number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }
}
