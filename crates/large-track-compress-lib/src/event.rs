//! Structural event vocabulary shared by the parser, the pipeline and the writer

use crate::{TrackSegmentPayload, XmlNode};
use std::collections::BTreeMap;

/// Attributes of the `<gpx>` root, namespace declarations included
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DocumentHeader {
    pub attributes: BTreeMap<String, String>,
}

/// Attributes and non-segment children of a `<trk>`
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct TrackMetadata {
    pub attributes: BTreeMap<String, String>,
    pub child_nodes: Vec<XmlNode>,
}

/// One structural event of a GPX document, in document order
///
/// `Header` always comes first and `DocumentEnd` last. For a track `i`,
/// `TrackStart` precedes all of its `TrackSegment`s, which precede `TrackEnd`.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Header(DocumentHeader),
    Metadata(XmlNode),
    Waypoint(XmlNode),
    Route(XmlNode),
    /// Any other direct child of the root, `<extensions>` included
    Extensions(XmlNode),
    TrackStart {
        index: usize,
        metadata: TrackMetadata,
    },
    TrackSegment(TrackSegmentPayload),
    /// `trailing_nodes` holds track children that closed after the first segment opened
    TrackEnd {
        index: usize,
        trailing_nodes: Vec<XmlNode>,
    },
    DocumentEnd,
}

impl StreamEvent {
    /// Short label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Header(_) => "header",
            Self::Metadata(_) => "metadata",
            Self::Waypoint(_) => "waypoint",
            Self::Route(_) => "route",
            Self::Extensions(_) => "extensions",
            Self::TrackStart { .. } => "track-start",
            Self::TrackSegment(_) => "track-segment",
            Self::TrackEnd { .. } => "track-end",
            Self::DocumentEnd => "document-end",
        }
    }
}
