//! Pull-based GPX scanner
//!
//! [`StreamingParser`] walks the xml-rs token stream once and turns it into
//! [`StreamEvent`]s. Only the element currently being assembled is held in memory:
//! the largest resident structure is one track segment's point list.
//!
//! The scan is driven by an explicit state machine over the current top-level
//! construct. Start tags are routed to the deepest open state, text goes to the
//! innermost open node and closing a recognized boundary emits an event.

use crate::{
    CancellationToken, Config, DocumentHeader, PointRecord, ProcessingError, Result, StreamEvent,
    TrackMetadata, TrackSegmentPayload, XmlNode, XmlNodeBuilder,
};
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use xml::common::Position;
use xml::name::OwnedName;
use xml::namespace::{NS_NO_PREFIX, NS_XML_PREFIX, NS_XMLNS_PREFIX};
use xml::reader::{EventReader, ParserConfig, XmlEvent};

/// Upper bound for the pre-allocated point buffer of a segment
const MAX_SEGMENT_CAPACITY: usize = 4096;

/// Shared cumulative count of bytes pulled from a source
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// `Read` adapter publishing every successful read into a [`ByteCounter`]
pub struct CountingReader<R> {
    inner: R,
    counter: ByteCounter,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R, counter: ByteCounter) -> Self {
        Self { inner, counter }
    }

    pub fn counter(&self) -> &ByteCounter {
        &self.counter
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.counter.add(read as u64);
        Ok(read)
    }
}

/// Top-level construct a non-track container was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Metadata,
    Waypoint,
    Route,
    Extensions,
}

impl ContainerKind {
    fn for_element(name: &str) -> Self {
        match name {
            "metadata" => Self::Metadata,
            "wpt" => Self::Waypoint,
            "rte" => Self::Route,
            _ => Self::Extensions,
        }
    }

    fn into_event(self, node: XmlNode) -> StreamEvent {
        match self {
            Self::Metadata => StreamEvent::Metadata(node),
            Self::Waypoint => StreamEvent::Waypoint(node),
            Self::Route => StreamEvent::Route(node),
            Self::Extensions => StreamEvent::Extensions(node),
        }
    }
}

#[derive(Debug)]
enum ParseState {
    /// Nothing but the prolog has been read
    Prolog,
    /// Inside the root, between top-level constructs
    Document,
    Container {
        kind: ContainerKind,
        stack: Vec<XmlNodeBuilder>,
    },
    Track(TrackState),
    /// The root element has closed
    Closed,
}

#[derive(Debug)]
struct TrackState {
    index: usize,
    attributes: BTreeMap<String, String>,
    child_nodes: Vec<XmlNode>,
    stack: Vec<XmlNodeBuilder>,
    started: bool,
    next_segment: usize,
    segment: Option<SegmentState>,
}

impl TrackState {
    fn new(index: usize, attributes: BTreeMap<String, String>) -> Self {
        Self {
            index,
            attributes,
            child_nodes: Vec::new(),
            stack: Vec::new(),
            started: false,
            next_segment: 0,
            segment: None,
        }
    }

    /// Emit `TrackStart` with everything gathered so far, at most once
    fn emit_start(&mut self, events: &mut VecDeque<StreamEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        events.push_back(StreamEvent::TrackStart {
            index: self.index,
            metadata: TrackMetadata {
                attributes: std::mem::take(&mut self.attributes),
                child_nodes: std::mem::take(&mut self.child_nodes),
            },
        });
    }

    fn start_element(
        &mut self,
        name: String,
        attributes: BTreeMap<String, String>,
        events: &mut VecDeque<StreamEvent>,
        capacity: usize,
    ) {
        if let Some(segment) = self.segment.as_mut() {
            segment.start_element(name, attributes);
            return;
        }

        if self.stack.is_empty() && name == "trkseg" {
            self.emit_start(events);
            self.segment = Some(SegmentState::new(
                self.index,
                self.next_segment,
                attributes,
                capacity,
            ));
            self.next_segment += 1;
        } else {
            self.stack.push(XmlNodeBuilder::new(name, attributes));
        }
    }

    /// Returns `true` once the `<trk>` element itself has closed
    fn end_element(&mut self, events: &mut VecDeque<StreamEvent>) -> bool {
        if let Some(segment) = self.segment.as_mut() {
            let closed = segment.end_element();
            if closed {
                if let Some(segment) = self.segment.take() {
                    events.push_back(StreamEvent::TrackSegment(segment.into_payload()));
                }
            }
            return false;
        }

        match self.stack.pop() {
            Some(builder) => {
                let node = builder.build();
                match self.stack.last_mut() {
                    Some(parent) => parent.append_child(node),
                    None => self.child_nodes.push(node),
                }
                false
            }
            None => {
                self.emit_start(events);
                events.push_back(StreamEvent::TrackEnd {
                    index: self.index,
                    trailing_nodes: std::mem::take(&mut self.child_nodes),
                });
                true
            }
        }
    }

    fn innermost_builder(&mut self) -> Option<&mut XmlNodeBuilder> {
        match self.segment.as_mut() {
            Some(segment) => match segment.point.as_mut() {
                Some(point) => point.stack.last_mut(),
                None => segment.stack.last_mut(),
            },
            None => self.stack.last_mut(),
        }
    }
}

#[derive(Debug)]
struct SegmentState {
    payload: TrackSegmentPayload,
    stack: Vec<XmlNodeBuilder>,
    point: Option<PointState>,
}

impl SegmentState {
    fn new(
        track_index: usize,
        segment_index: usize,
        attributes: BTreeMap<String, String>,
        capacity: usize,
    ) -> Self {
        Self {
            payload: TrackSegmentPayload {
                track_index,
                segment_index,
                attributes,
                points: Vec::with_capacity(capacity),
                ..TrackSegmentPayload::default()
            },
            stack: Vec::new(),
            point: None,
        }
    }

    fn start_element(&mut self, name: String, attributes: BTreeMap<String, String>) {
        if let Some(point) = self.point.as_mut() {
            point.stack.push(XmlNodeBuilder::new(name, attributes));
            return;
        }

        if self.stack.is_empty() && name == "trkpt" {
            self.point = Some(PointState::new(attributes));
        } else {
            self.stack.push(XmlNodeBuilder::new(name, attributes));
        }
    }

    /// Returns `true` once the `<trkseg>` element itself has closed
    fn end_element(&mut self) -> bool {
        if let Some(point) = self.point.as_mut() {
            let closed = point.end_element();
            if closed {
                if let Some(record) = self.point.take().and_then(PointState::into_record) {
                    self.payload.points.push(record);
                }
            }
            return false;
        }

        match self.stack.pop() {
            Some(builder) => {
                let node = builder.build();
                match self.stack.last_mut() {
                    Some(parent) => parent.append_child(node),
                    None if self.payload.points.is_empty() => self.payload.leading_nodes.push(node),
                    None => self.payload.trailing_nodes.push(node),
                }
                false
            }
            None => true,
        }
    }

    fn into_payload(self) -> TrackSegmentPayload {
        self.payload
    }
}

#[derive(Debug)]
struct PointState {
    attributes: BTreeMap<String, String>,
    stack: Vec<XmlNodeBuilder>,
    elevation: Option<f64>,
    timestamp: Option<OffsetDateTime>,
    child_nodes: Vec<XmlNode>,
}

impl PointState {
    fn new(attributes: BTreeMap<String, String>) -> Self {
        Self {
            attributes,
            stack: Vec::new(),
            elevation: None,
            timestamp: None,
            child_nodes: Vec::new(),
        }
    }

    /// Returns `true` once the `<trkpt>` element itself has closed
    fn end_element(&mut self) -> bool {
        let Some(builder) = self.stack.pop() else {
            return true;
        };
        let node = builder.build();
        match self.stack.last_mut() {
            Some(parent) => parent.append_child(node),
            None => self.absorb(node),
        }
        false
    }

    /// Lift `<ele>` and `<time>` into typed fields; keep anything else verbatim
    fn absorb(&mut self, node: XmlNode) {
        match node.name.as_str() {
            "ele" => match node.text.as_deref().and_then(|t| t.trim().parse::<f64>().ok()) {
                Some(elevation) => self.elevation = Some(elevation),
                None => self.child_nodes.push(node),
            },
            "time" => match node.text.as_deref().and_then(parse_timestamp) {
                Some(timestamp) => self.timestamp = Some(timestamp),
                None => self.child_nodes.push(node),
            },
            _ => self.child_nodes.push(node),
        }
    }

    fn into_record(mut self) -> Option<PointRecord> {
        let latitude = parse_coordinate(self.attributes.remove("lat"));
        let longitude = parse_coordinate(self.attributes.remove("lon"));
        let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
            tracing::debug!("Skipping track point without a valid lat/lon pair");
            return None;
        };

        Some(PointRecord {
            latitude,
            longitude,
            elevation: self.elevation,
            timestamp: self.timestamp,
            attributes: self.attributes,
            child_nodes: self.child_nodes,
        })
    }
}

fn parse_coordinate(value: Option<String>) -> Option<f64> {
    value?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Parse an RFC 3339 / ISO 8601 timestamp into UTC
///
/// A timestamp without an offset is taken as UTC.
pub(crate) fn parse_timestamp(text: &str) -> Option<OffsetDateTime> {
    let text = text.trim();
    OffsetDateTime::parse(text, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(text, &Iso8601::DEFAULT))
        .or_else(|_| PrimitiveDateTime::parse(text, &Iso8601::DEFAULT).map(|t| t.assume_utc()))
        .ok()
        .map(|t| t.to_offset(UtcOffset::UTC))
}

fn qualified_name(name: &OwnedName) -> String {
    match name.prefix.as_deref() {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, name.local_name),
        _ => name.local_name.clone(),
    }
}

/// Streaming GPX parser yielding [`StreamEvent`]s in document order
///
/// The iterator is fused: after an error or [`StreamEvent::DocumentEnd`] it only
/// returns `None`. Events already yielded stay valid when a later read fails.
pub struct StreamingParser<R: Read> {
    reader: EventReader<R>,
    state: ParseState,
    /// In-scope namespace mapping of every open element
    scopes: Vec<BTreeMap<String, String>>,
    pending: VecDeque<StreamEvent>,
    token: CancellationToken,
    segment_capacity: usize,
    next_track: usize,
    finished: bool,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<R: Read> StreamingParser<R> {
    pub fn new(source: R, config: &Config, token: CancellationToken) -> Self {
        let reader = ParserConfig::new()
            .trim_whitespace(false)
            .whitespace_to_characters(false)
            .cdata_to_characters(true)
            .ignore_comments(true)
            .create_reader(source);

        Self {
            reader,
            state: ParseState::Prolog,
            scopes: Vec::new(),
            pending: VecDeque::new(),
            token,
            segment_capacity: config.segment_chunk_size.get().min(MAX_SEGMENT_CAPACITY),
            next_track: 0,
            finished: false,
        }
    }

    /// Pull one token and fold it into the current state
    fn advance(&mut self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }

        let event = self.reader.next().map_err(|e| {
            let position = e.position();
            ProcessingError::ParseFailure {
                line: position.row + 1,
                column: position.column + 1,
                message: e.msg().to_string(),
            }
        })?;

        match event {
            XmlEvent::StartElement {
                name,
                attributes,
                namespace,
            } => {
                let mut attribute_map: BTreeMap<String, String> = attributes
                    .into_iter()
                    .map(|a| (qualified_name(&a.name), a.value))
                    .collect();
                self.declare_namespaces(&mut attribute_map, namespace.0);
                self.start_element(&name, attribute_map)
            }
            XmlEvent::EndElement { .. } => {
                self.scopes.pop();
                self.end_element();
                Ok(())
            }
            XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                self.characters(&text);
                Ok(())
            }
            XmlEvent::EndDocument => {
                let position = self.reader.position();
                Err(ProcessingError::ParseFailure {
                    line: position.row + 1,
                    column: position.column + 1,
                    message: "Unexpected end of document".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Re-attach namespace declarations made on this element as `xmlns` attributes
    fn declare_namespaces(
        &mut self,
        attributes: &mut BTreeMap<String, String>,
        scope: BTreeMap<String, String>,
    ) {
        let parent = self.scopes.last();
        for (prefix, uri) in &scope {
            if prefix == NS_XML_PREFIX || prefix == NS_XMLNS_PREFIX {
                continue;
            }
            let inherited = parent.and_then(|p| p.get(prefix));
            if inherited == Some(uri) {
                continue;
            }
            if prefix == NS_NO_PREFIX {
                if uri.is_empty() && inherited.is_none_or(|u| u.is_empty()) {
                    continue;
                }
                attributes.insert("xmlns".to_string(), uri.clone());
            } else {
                attributes.insert(format!("xmlns:{}", prefix), uri.clone());
            }
        }
        self.scopes.push(scope);
    }

    fn start_element(&mut self, name: &OwnedName, attributes: BTreeMap<String, String>) -> Result<()> {
        let qualified = qualified_name(name);
        match &mut self.state {
            ParseState::Prolog => {
                if name.local_name != "gpx" {
                    return Err(ProcessingError::UnsupportedInput(format!(
                        "root element is <{}>, expected <gpx>",
                        qualified
                    )));
                }
                self.pending
                    .push_back(StreamEvent::Header(DocumentHeader { attributes }));
                self.state = ParseState::Document;
            }
            ParseState::Document => {
                self.state = if qualified == "trk" {
                    let index = self.next_track;
                    self.next_track += 1;
                    ParseState::Track(TrackState::new(index, attributes))
                } else {
                    ParseState::Container {
                        kind: ContainerKind::for_element(&qualified),
                        stack: vec![XmlNodeBuilder::new(qualified, attributes)],
                    }
                };
            }
            ParseState::Container { stack, .. } => {
                stack.push(XmlNodeBuilder::new(qualified, attributes));
            }
            ParseState::Track(track) => {
                track.start_element(qualified, attributes, &mut self.pending, self.segment_capacity);
            }
            ParseState::Closed => {}
        }
        Ok(())
    }

    fn end_element(&mut self) {
        match &mut self.state {
            ParseState::Prolog | ParseState::Closed => {}
            ParseState::Document => {
                self.pending.push_back(StreamEvent::DocumentEnd);
                self.state = ParseState::Closed;
            }
            ParseState::Container { kind, stack } => {
                let Some(builder) = stack.pop() else {
                    return;
                };
                let node = builder.build();
                match stack.last_mut() {
                    Some(parent) => parent.append_child(node),
                    None => {
                        let kind = *kind;
                        self.pending.push_back(kind.into_event(node));
                        self.state = ParseState::Document;
                    }
                }
            }
            ParseState::Track(track) => {
                if track.end_element(&mut self.pending) {
                    self.state = ParseState::Document;
                }
            }
        }
    }

    fn characters(&mut self, text: &str) {
        let builder = match &mut self.state {
            ParseState::Container { stack, .. } => stack.last_mut(),
            ParseState::Track(track) => track.innermost_builder(),
            _ => None,
        };
        if let Some(builder) = builder {
            builder.append_text(text);
        }
    }
}

impl<R: Read> Iterator for StreamingParser<R> {
    type Item = Result<StreamEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if matches!(event, StreamEvent::DocumentEnd) {
                    self.finished = true;
                }
                return Some(Ok(event));
            }
            if self.finished {
                return None;
            }
            if let Err(e) = self.advance() {
                self.finished = true;
                return Some(Err(e));
            }
        }
    }
}

impl<R: Read> std::iter::FusedIterator for StreamingParser<R> {}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx xmlns="http://www.topografix.com/GPX/1/1" xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1" version="1.1" creator="test">
	<metadata>
		<name>Morning &amp; ride</name>
		<link href="https://example.com"><text>site</text></link>
	</metadata>
	<wpt lat="1.0" lon="2.0"><name>Start</name></wpt>
	<rte><rtept lat="1.0" lon="2.0"/></rte>
	<trk>
		<name>Loop</name>
		<trkseg>
			<extensions><note>before</note></extensions>
			<trkpt lat="51.5" lon="-0.12">
				<ele>35.5</ele>
				<time>2024-03-01T10:00:00.250+01:00</time>
				<extensions><gpxtpx:TrackPointExtension><gpxtpx:hr>142</gpxtpx:hr></gpxtpx:TrackPointExtension></extensions>
			</trkpt>
			<trkpt lat="51.6" lon="-0.13"/>
			<extensions><note>after</note></extensions>
		</trkseg>
		<trkseg>
			<trkpt lat="bad" lon="-0.13"/>
			<trkpt lat="52" lon="1"><ele>high</ele><time>yesterday</time></trkpt>
		</trkseg>
	</trk>
	<extensions><custom>kept</custom></extensions>
</gpx>
"#;

    fn parse_all(input: &str) -> Vec<Result<StreamEvent>> {
        StreamingParser::new(input.as_bytes(), &Config::default(), CancellationToken::new())
            .collect()
    }

    fn parse_ok(input: &str) -> Vec<StreamEvent> {
        parse_all(input)
            .into_iter()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_event_order() {
        let kinds: Vec<&str> = parse_ok(SAMPLE).iter().map(StreamEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                "header",
                "metadata",
                "waypoint",
                "route",
                "track-start",
                "track-segment",
                "track-segment",
                "track-end",
                "extensions",
                "document-end",
            ]
        );
    }

    #[test]
    fn test_header_keeps_namespaces() {
        let events = parse_ok(SAMPLE);
        let StreamEvent::Header(header) = &events[0] else {
            panic!("expected header, got {:?}", events[0]);
        };
        assert_eq!(
            header.attributes.get("xmlns").map(String::as_str),
            Some("http://www.topografix.com/GPX/1/1")
        );
        assert!(header.attributes.contains_key("xmlns:gpxtpx"));
        assert_eq!(header.attributes.get("version").map(String::as_str), Some("1.1"));
        assert_eq!(header.attributes.len(), 4);
    }

    #[test]
    fn test_metadata_subtree() {
        let events = parse_ok(SAMPLE);
        let StreamEvent::Metadata(node) = &events[1] else {
            panic!("expected metadata");
        };
        assert_eq!(node.child("name").and_then(|n| n.text.as_deref()), Some("Morning & ride"));
        let link = node.child("link").unwrap();
        assert_eq!(link.attributes["href"], "https://example.com");
        assert_eq!(link.child("text").and_then(|n| n.text.as_deref()), Some("site"));
    }

    #[test]
    fn test_segment_contents() {
        let events = parse_ok(SAMPLE);
        let StreamEvent::TrackStart { index, metadata } = &events[4] else {
            panic!("expected track start");
        };
        assert_eq!(*index, 0);
        assert_eq!(metadata.child_nodes, vec![XmlNode::with_text("name", "Loop")]);

        let StreamEvent::TrackSegment(segment) = &events[5] else {
            panic!("expected segment");
        };
        assert_eq!(segment.segment_index, 0);
        assert_eq!(segment.points.len(), 2);
        assert_eq!(segment.leading_nodes.len(), 1);
        assert_eq!(segment.trailing_nodes.len(), 1);

        let first = &segment.points[0];
        assert_eq!(first.latitude, 51.5);
        assert_eq!(first.elevation, Some(35.5));
        let timestamp = first.timestamp.unwrap();
        assert_eq!(timestamp.offset(), UtcOffset::UTC);
        assert_eq!(timestamp.hour(), 9);
        assert_eq!(timestamp.millisecond(), 250);
        assert_eq!(first.child_nodes.len(), 1);
        let extension = &first.child_nodes[0].children[0];
        assert_eq!(extension.name, "gpxtpx:TrackPointExtension");
        assert_eq!(extension.children[0].text.as_deref(), Some("142"));
    }

    #[test]
    fn test_invalid_point_dropped_and_raw_children_kept() {
        let events = parse_ok(SAMPLE);
        let StreamEvent::TrackSegment(segment) = &events[6] else {
            panic!("expected segment");
        };
        assert_eq!(segment.segment_index, 1);
        assert_eq!(segment.points.len(), 1);
        let point = &segment.points[0];
        assert!(point.elevation.is_none());
        assert!(point.timestamp.is_none());
        assert_eq!(
            point.child_nodes,
            vec![
                XmlNode::with_text("ele", "high"),
                XmlNode::with_text("time", "yesterday")
            ]
        );
        assert!(!point.attributes.contains_key("lat"));
    }

    #[test]
    fn test_unknown_top_level_is_extensions() {
        let events = parse_ok(SAMPLE);
        let StreamEvent::Extensions(node) = &events[8] else {
            panic!("expected extensions");
        };
        assert_eq!(node.name, "extensions");
        assert_eq!(node.children[0], XmlNode::with_text("custom", "kept"));
    }

    #[test]
    fn test_track_without_segments() {
        let events = parse_ok(r#"<gpx><trk><name>Empty</name></trk><trk/></gpx>"#);
        assert_eq!(events.len(), 6);
        assert!(matches!(
            &events[1],
            StreamEvent::TrackStart { index: 0, metadata } if metadata.child_nodes.len() == 1
        ));
        assert!(matches!(
            &events[2],
            StreamEvent::TrackEnd { index: 0, trailing_nodes } if trailing_nodes.is_empty()
        ));
        assert!(matches!(&events[3], StreamEvent::TrackStart { index: 1, .. }));
        assert!(matches!(&events[4], StreamEvent::TrackEnd { index: 1, .. }));
    }

    #[test]
    fn test_track_children_after_segments_are_trailing() {
        let events = parse_ok(
            r#"<gpx><trk><trkseg><trkpt lat="1" lon="1"/></trkseg><extensions><x>1</x></extensions></trk></gpx>"#,
        );
        let StreamEvent::TrackEnd { trailing_nodes, .. } = &events[3] else {
            panic!("expected track end, got {:?}", events[3]);
        };
        assert_eq!(trailing_nodes.len(), 1);
        assert_eq!(trailing_nodes[0].name, "extensions");
    }

    #[test]
    fn test_recognition_is_positional() {
        // A nested <trkpt> outside a <trkseg> is opaque
        let events = parse_ok(
            r#"<gpx><trk><extensions><trkpt lat="1" lon="1"/></extensions><trkseg/></trk></gpx>"#,
        );
        let StreamEvent::TrackStart { metadata, .. } = &events[1] else {
            panic!("expected track start");
        };
        assert_eq!(metadata.child_nodes[0].children[0].name, "trkpt");
        assert!(matches!(&events[2], StreamEvent::TrackSegment(s) if s.is_empty()));
    }

    #[test]
    fn test_non_gpx_root_rejected() {
        let results = parse_all(r#"<kml><Document/></kml>"#);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ProcessingError::UnsupportedInput(_))));
    }

    #[test]
    fn test_truncated_input_fails_after_valid_events() {
        let results = parse_all("<gpx>\n<trk>\n<trkseg>\n<trkpt lat=\"1\" lon=\"2\"></trkpt>");
        assert!(matches!(results[0], Ok(StreamEvent::Header(_))));
        assert!(matches!(results[1], Ok(StreamEvent::TrackStart { .. })));
        let last = results.last().unwrap();
        match last {
            Err(ProcessingError::ParseFailure { line, column, .. }) => {
                assert!(*line >= 1);
                assert!(*column >= 1);
            }
            other => panic!("expected parse failure, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_input_fails() {
        let results = parse_all("");
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ProcessingError::ParseFailure { .. })));
    }

    #[test]
    fn test_fused_after_document_end() {
        let mut parser = StreamingParser::new(
            "<gpx/>".as_bytes(),
            &Config::default(),
            CancellationToken::new(),
        );
        assert!(matches!(parser.next(), Some(Ok(StreamEvent::Header(_)))));
        assert!(matches!(parser.next(), Some(Ok(StreamEvent::DocumentEnd))));
        assert!(parser.next().is_none());
        assert!(parser.next().is_none());
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let mut parser = StreamingParser::new(SAMPLE.as_bytes(), &Config::default(), token);
        assert!(matches!(parser.next(), Some(Err(ProcessingError::Cancelled))));
        assert!(parser.next().is_none());
    }

    #[test]
    fn test_cancelled_inside_segment() {
        let token = CancellationToken::new();
        let mut parser = StreamingParser::new(SAMPLE.as_bytes(), &Config::default(), token.clone());
        loop {
            match parser.next() {
                Some(Ok(StreamEvent::TrackStart { .. })) => break,
                Some(Ok(_)) => {}
                other => panic!("unexpected {:?}", other),
            }
        }

        // The first segment is still open
        token.cancel();
        assert!(matches!(parser.next(), Some(Err(ProcessingError::Cancelled))));
        assert!(parser.next().is_none());
    }

    #[test]
    fn test_counting_reader() {
        let counter = ByteCounter::new();
        let reader = CountingReader::new(SAMPLE.as_bytes(), counter.clone());
        let events: Vec<_> =
            StreamingParser::new(reader, &Config::default(), CancellationToken::new()).collect();
        assert!(events.iter().all(|e| e.is_ok()));
        assert!(counter.get() > 0);
        assert!(counter.get() <= SAMPLE.len() as u64);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let utc = parse_timestamp("2024-03-01T10:00:00Z").unwrap();
        assert_eq!(utc.hour(), 10);
        let shifted = parse_timestamp(" 2024-03-01T10:00:00-02:00 ").unwrap();
        assert_eq!(shifted.hour(), 12);
        assert_eq!(shifted.offset(), UtcOffset::UTC);
        assert!(parse_timestamp("not a time").is_none());
    }
}
