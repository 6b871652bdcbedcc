//! Streaming GPX writer
//!
//! Serializes the event vocabulary back into an indented document, one tab per
//! nesting level (root → track → segment → point). Each construct is rendered into
//! a reusable buffer and appended to the file in one write; nothing written is ever
//! read back.

use crate::xml_node::{push_attributes, push_indent};
use crate::{
    CancellationToken, DocumentHeader, PointRecord, ProcessingError, Result, TrackMetadata,
    TrackSegmentPayload, XmlNode,
};
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::macros::format_description;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

const EXTENSIONS: &str = "extensions";

const ROOT_LEVEL: usize = 1;
const TRACK_CHILD_LEVEL: usize = 2;
const SEGMENT_CHILD_LEVEL: usize = 3;

/// Single-owner writer for one output file
///
/// Every operation takes `&mut self`, so at most one write is in flight per file.
pub struct StreamWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    preserve_extensions: bool,
    buffer: String,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl StreamWriter {
    /// Replace any existing file at `path` with a new empty one
    pub async fn create(path: impl Into<PathBuf>, preserve_extensions: bool) -> Result<Self> {
        let path = path.into();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!("Removed existing output {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(ProcessingError::write_failure(path, source)),
        }

        let file = match File::create(&path).await {
            Ok(file) => file,
            Err(source) => return Err(ProcessingError::write_failure(path, source)),
        };

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            preserve_extensions,
            buffer: String::with_capacity(64 * 1024),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// XML declaration and the opening `<gpx>` tag
    pub async fn write_header(
        &mut self,
        header: &DocumentHeader,
        token: &CancellationToken,
    ) -> Result<()> {
        ensure_active(token)?;
        self.buffer.clear();
        self.buffer
            .push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<gpx");
        push_attributes(&mut self.buffer, &header.attributes);
        self.buffer.push_str(">\n");
        self.flush_buffer().await
    }

    /// A preserved top-level subtree: metadata, waypoint, route or extensions
    pub async fn write_node(&mut self, node: &XmlNode, token: &CancellationToken) -> Result<()> {
        ensure_active(token)?;
        self.buffer.clear();
        self.push_node(node, ROOT_LEVEL);
        self.flush_buffer().await
    }

    /// Open a `<trk>` and write its preserved children
    pub async fn begin_track(
        &mut self,
        metadata: &TrackMetadata,
        token: &CancellationToken,
    ) -> Result<()> {
        ensure_active(token)?;
        self.buffer.clear();
        push_indent(&mut self.buffer, ROOT_LEVEL);
        self.buffer.push_str("<trk");
        push_attributes(&mut self.buffer, &metadata.attributes);
        self.buffer.push_str(">\n");
        for node in &metadata.child_nodes {
            self.push_node(node, TRACK_CHILD_LEVEL);
        }
        self.flush_buffer().await
    }

    /// One complete `<trkseg>`: leading nodes, points, trailing nodes
    pub async fn write_segment(
        &mut self,
        segment: &TrackSegmentPayload,
        token: &CancellationToken,
    ) -> Result<()> {
        ensure_active(token)?;
        self.buffer.clear();
        push_indent(&mut self.buffer, TRACK_CHILD_LEVEL);
        self.buffer.push_str("<trkseg");
        push_attributes(&mut self.buffer, &segment.attributes);
        self.buffer.push_str(">\n");

        for node in &segment.leading_nodes {
            self.push_node(node, SEGMENT_CHILD_LEVEL);
        }
        for point in &segment.points {
            self.push_point(point);
        }
        for node in &segment.trailing_nodes {
            self.push_node(node, SEGMENT_CHILD_LEVEL);
        }

        push_indent(&mut self.buffer, TRACK_CHILD_LEVEL);
        self.buffer.push_str("</trkseg>\n");
        self.flush_buffer().await
    }

    /// Write late track children and close the `<trk>`
    pub async fn end_track(
        &mut self,
        trailing_nodes: &[XmlNode],
        token: &CancellationToken,
    ) -> Result<()> {
        ensure_active(token)?;
        self.buffer.clear();
        for node in trailing_nodes {
            self.push_node(node, TRACK_CHILD_LEVEL);
        }
        push_indent(&mut self.buffer, ROOT_LEVEL);
        self.buffer.push_str("</trk>\n");
        self.flush_buffer().await
    }

    /// Close the root and flush everything to disk
    pub async fn finish(mut self) -> Result<()> {
        self.buffer.clear();
        self.buffer.push_str("</gpx>\n");
        self.flush_buffer().await?;
        let path = self.path;
        let mut writer = self.writer;
        writer
            .shutdown()
            .await
            .map_err(|source| ProcessingError::write_failure(path, source))
    }

    fn push_node(&mut self, node: &XmlNode, indentation: usize) {
        let preserve = self.preserve_extensions;
        let keep = move |n: &XmlNode| preserve || n.name != EXTENSIONS;
        if keep(node) {
            node.render_into(&mut self.buffer, indentation, &keep);
        }
    }

    fn push_point(&mut self, point: &PointRecord) {
        let out = &mut self.buffer;
        push_indent(out, SEGMENT_CHILD_LEVEL);
        let _ = write!(
            out,
            "<trkpt lat=\"{}\" lon=\"{}\"",
            format_decimal(point.latitude),
            format_decimal(point.longitude)
        );
        push_attributes(out, &point.attributes);
        out.push_str(">\n");

        if let Some(elevation) = point.elevation {
            push_indent(out, SEGMENT_CHILD_LEVEL + 1);
            let _ = writeln!(out, "<ele>{}</ele>", format_decimal(elevation));
        }
        if let Some(timestamp) = point.timestamp {
            push_indent(out, SEGMENT_CHILD_LEVEL + 1);
            let _ = writeln!(out, "<time>{}</time>", format_timestamp(timestamp));
        }
        for node in &point.child_nodes {
            self.push_node(node, SEGMENT_CHILD_LEVEL + 1);
        }

        let out = &mut self.buffer;
        push_indent(out, SEGMENT_CHILD_LEVEL);
        out.push_str("</trkpt>\n");
    }

    async fn flush_buffer(&mut self) -> Result<()> {
        self.writer
            .write_all(self.buffer.as_bytes())
            .await
            .map_err(|source| ProcessingError::write_failure(&self.path, source))
    }
}

#[inline]
fn ensure_active(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(ProcessingError::Cancelled);
    }
    Ok(())
}

/// Shortest round-trip representation, always with a decimal point
pub(crate) fn format_decimal(value: f64) -> String {
    let mut formatted = value.to_string();
    if value.is_finite() && !formatted.contains('.') {
        formatted.push_str(".0");
    }
    formatted
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ` in UTC
pub(crate) fn format_timestamp(timestamp: OffsetDateTime) -> String {
    let format =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");
    timestamp
        .to_offset(time::UtcOffset::UTC)
        .format(&format)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use time::macros::datetime;

    fn header() -> DocumentHeader {
        DocumentHeader {
            attributes: BTreeMap::from([
                ("version".to_string(), "1.1".to_string()),
                ("creator".to_string(), "A & B".to_string()),
            ]),
        }
    }

    fn sample_segment() -> TrackSegmentPayload {
        let mut point = PointRecord::new(51.5074, 0.0)
            .with_elevation(12.0)
            .with_timestamp(datetime!(2024-03-01 10:00:00.5 +01:00));
        point
            .child_nodes
            .push(XmlNode::with_text("extensions", "hr"));
        let mut segment = TrackSegmentPayload::new(0, 0, vec![point]);
        segment.leading_nodes.push(XmlNode::with_text("desc", "lead"));
        segment
    }

    async fn write_document(preserve_extensions: bool) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpx");
        let token = CancellationToken::new();

        let mut writer = StreamWriter::create(&path, preserve_extensions).await.unwrap();
        writer.write_header(&header(), &token).await.unwrap();
        writer
            .write_node(&XmlNode::with_text("extensions", "top"), &token)
            .await
            .unwrap();
        let metadata = TrackMetadata {
            attributes: BTreeMap::new(),
            child_nodes: vec![XmlNode::with_text("name", "Loop")],
        };
        writer.begin_track(&metadata, &token).await.unwrap();
        writer.write_segment(&sample_segment(), &token).await.unwrap();
        writer.end_track(&[], &token).await.unwrap();
        writer.finish().await.unwrap();

        tokio::fs::read_to_string(&path).await.unwrap()
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(0.0), "0.0");
        assert_eq!(format_decimal(51.5074), "51.5074");
        assert_eq!(format_decimal(-12.0), "-12.0");
    }

    #[test]
    fn test_format_timestamp_utc_millis() {
        let formatted = format_timestamp(datetime!(2024-03-01 10:00:00.5 +01:00));
        assert_eq!(formatted, "2024-03-01T09:00:00.500Z");
    }

    #[tokio::test]
    async fn test_document_layout() {
        let output = write_document(true).await;
        let expected = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<gpx creator=\"A &amp; B\" version=\"1.1\">\n\
\t<extensions>top</extensions>\n\
\t<trk>\n\
\t\t<name>Loop</name>\n\
\t\t<trkseg>\n\
\t\t\t<desc>lead</desc>\n\
\t\t\t<trkpt lat=\"51.5074\" lon=\"0.0\">\n\
\t\t\t\t<ele>12.0</ele>\n\
\t\t\t\t<time>2024-03-01T09:00:00.500Z</time>\n\
\t\t\t\t<extensions>hr</extensions>\n\
\t\t\t</trkpt>\n\
\t\t</trkseg>\n\
\t</trk>\n\
</gpx>\n";
        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn test_extensions_dropped_when_disabled() {
        let output = write_document(false).await;
        assert!(!output.contains("extensions"));
        assert!(output.contains("<desc>lead</desc>"));
    }

    #[tokio::test]
    async fn test_create_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpx");
        tokio::fs::write(&path, "stale content").await.unwrap();

        let writer = StreamWriter::create(&path, true).await.unwrap();
        writer.finish().await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "</gpx>\n");
    }

    #[tokio::test]
    async fn test_cancelled_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = StreamWriter::create(dir.path().join("out.gpx"), true)
            .await
            .unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result = writer.write_header(&header(), &token).await;
        assert!(matches!(result, Err(ProcessingError::Cancelled)));
    }

    #[tokio::test]
    async fn test_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.gpx");
        let result = StreamWriter::create(&path, true).await;
        assert!(matches!(
            result,
            Err(ProcessingError::OutputWriteFailure { .. })
        ));
    }
}
