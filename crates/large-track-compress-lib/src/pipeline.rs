//! Per-job orchestration: parser → compressor → writer
//!
//! The parser runs on a blocking thread and hands events over a bounded channel,
//! so a slow writer throttles parsing instead of letting events pile up. Progress
//! snapshots go out on a second channel owned by the caller.

use crate::{
    ByteCounter, CancellationToken, CountingReader, Job, JobId, ProcessingError, Progress, Result,
    SegmentCompressor, Stage, StreamEvent, StreamWriter, StreamingParser,
};
use std::collections::HashSet;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Parser → pipeline hand-off depth
const EVENT_CHANNEL_CAPACITY: usize = 64;
/// Period of byte-progress snapshots while the parser is inside a long element
const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);
/// Progress buffer for a standalone [`JobHandle`]
const PROGRESS_CHANNEL_CAPACITY: usize = 256;
const READ_BUFFER_SIZE: usize = 256 * 1024;

/// Totals of a successfully processed job
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    pub id: JobId,
    pub input: PathBuf,
    pub output: PathBuf,
    pub processed_bytes: u64,
    pub total_bytes: u64,
    pub segments: usize,
    pub processed_points: usize,
    pub written_points: usize,
    pub elapsed: Duration,
}

/// Progress publisher holding the latest snapshot of one job
struct Reporter {
    tx: mpsc::Sender<Progress>,
    current: Progress,
    counter: ByteCounter,
    started: Instant,
}

impl Reporter {
    /// Refresh byte counters, switch stage and publish
    ///
    /// A closed receiver means nobody is interested any more; that is treated as
    /// cancellation.
    async fn emit(&mut self, stage: Stage, message: Option<String>) -> Result<()> {
        self.current.processed_bytes = self.counter.get();
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.current.throughput_bytes_per_second = self.current.processed_bytes as f64 / elapsed;
        }
        self.current = self.current.advance(stage, message);
        self.tx
            .send(self.current.clone())
            .await
            .map_err(|_| ProcessingError::Cancelled)
    }
}

/// Drives a single job from input file to output file
#[derive(Debug, Clone)]
pub struct Pipeline {
    job: Job,
    progress_interval: Duration,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Pipeline {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// How often a `parsing` snapshot reports the bytes read so far
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Run the job to completion, publishing snapshots into `progress`
    ///
    /// Exactly one terminal snapshot is sent: `completed` on success, or `failed`
    /// carrying the error.
    pub async fn run(
        self,
        progress: mpsc::Sender<Progress>,
        token: CancellationToken,
    ) -> Result<JobSummary> {
        let job = &self.job;
        let mut reporter = Reporter {
            tx: progress,
            current: Progress::new(
                job.id,
                Stage::Reading,
                job.input.clone(),
                Some(job.output.clone()),
            ),
            counter: ByteCounter::new(),
            started: Instant::now(),
        };

        tracing::info!(
            "Starting {}: {} -> {}",
            job.id,
            job.input.display(),
            job.output.display()
        );

        match self.execute(&mut reporter, &token).await {
            Ok(summary) => {
                tracing::info!(
                    "Finished {} in {:.2}s: {} -> {} points",
                    job.id,
                    summary.elapsed.as_secs_f64(),
                    summary.processed_points,
                    summary.written_points
                );
                Ok(summary)
            }
            Err(error) => {
                if error.is_cancelled() {
                    tracing::info!("{} cancelled", job.id);
                } else {
                    tracing::warn!("{} failed: {}", job.id, error);
                }
                reporter.current.processed_bytes = reporter.counter.get();
                let failed = reporter.current.failed(Arc::new(error.clone()));
                // The receiver may be gone already
                let _ = reporter.tx.send(failed).await;
                Err(error)
            }
        }
    }

    async fn execute(&self, reporter: &mut Reporter, token: &CancellationToken) -> Result<JobSummary> {
        let job = &self.job;
        let config = job.config.clone();
        if token.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }

        let file = tokio::fs::File::open(&job.input)
            .await
            .map_err(|e| ProcessingError::unreadable(&job.input, e))?;
        let total_bytes = file
            .metadata()
            .await
            .map(|m| m.len())
            .map_err(|e| ProcessingError::unreadable(&job.input, e))?;
        reporter.current.total_bytes = total_bytes;
        reporter
            .emit(Stage::Reading, Some("Preparing".to_string()))
            .await?;

        let mut writer = StreamWriter::create(&job.output, config.preserve_extensions).await?;
        let compressor = SegmentCompressor::new(config.clone());

        // Stops the parser thread whenever this function returns
        let parse_token = token.child_token();
        let _parse_guard = parse_token.clone().drop_guard();

        let (event_tx, mut event_rx) = mpsc::channel::<Result<StreamEvent>>(EVENT_CHANNEL_CAPACITY);
        let file = file.into_std().await;
        let counter = reporter.counter.clone();
        let parser_config = config.clone();
        let parser_task = tokio::task::spawn_blocking(move || {
            let reader = BufReader::with_capacity(READ_BUFFER_SIZE, CountingReader::new(file, counter));
            for event in StreamingParser::new(reader, &parser_config, parse_token) {
                if event_tx.blocking_send(event).is_err() {
                    break;
                }
            }
        });

        let mut open_tracks = HashSet::new();
        let mut reached_end = false;

        let mut ticker = tokio::time::interval(self.progress_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();

        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ProcessingError::Cancelled),
                event = event_rx.recv() => event,
                _ = ticker.tick() => {
                    reporter
                        .emit(Stage::Parsing, Some("Reading track points".to_string()))
                        .await?;
                    continue;
                }
            };
            let Some(event) = event else {
                break;
            };

            match event? {
                StreamEvent::Header(header) => {
                    writer.write_header(&header, token).await?;
                    reporter
                        .emit(Stage::Parsing, Some("Writing header".to_string()))
                        .await?;
                }
                StreamEvent::Metadata(node)
                | StreamEvent::Waypoint(node)
                | StreamEvent::Route(node)
                | StreamEvent::Extensions(node) => {
                    writer.write_node(&node, token).await?;
                }
                StreamEvent::TrackStart { index, metadata } => {
                    open_tracks.insert(index);
                    writer.begin_track(&metadata, token).await?;
                }
                StreamEvent::TrackSegment(payload) => {
                    let track_index = payload.track_index;
                    if !open_tracks.contains(&track_index) {
                        return Err(ProcessingError::InternalInconsistency(format!(
                            "segment {} of track {} arrived outside its track",
                            payload.segment_index, track_index
                        )));
                    }

                    let (payload, stats) = compressor.compress(payload, token)?;
                    writer.write_segment(&payload, token).await?;

                    let current = &mut reporter.current;
                    current.processed_segments += 1;
                    current.processed_points += stats.original_points;
                    current.written_points += stats.written_points;
                    reporter
                        .emit(
                            Stage::Compressing,
                            Some(format!("Compressing track {}", track_index + 1)),
                        )
                        .await?;
                }
                StreamEvent::TrackEnd {
                    index,
                    trailing_nodes,
                } => {
                    open_tracks.remove(&index);
                    writer.end_track(&trailing_nodes, token).await?;
                    reporter
                        .emit(Stage::Writing, Some(format!("Finalising track {}", index + 1)))
                        .await?;
                }
                StreamEvent::DocumentEnd => {
                    reached_end = true;
                    break;
                }
            }
        }

        if token.is_cancelled() {
            return Err(ProcessingError::Cancelled);
        }
        if !reached_end {
            return Err(ProcessingError::InternalInconsistency(
                "event stream ended before the document did".to_string(),
            ));
        }

        writer.finish().await?;
        drop(event_rx);
        if let Err(e) = parser_task.await {
            return Err(ProcessingError::InternalInconsistency(format!(
                "parser thread failed: {}",
                e
            )));
        }

        let elapsed = reporter.started.elapsed();
        let current = &mut reporter.current;
        current.processed_bytes = reporter.counter.get();
        if current.total_bytes == 0 {
            current.total_bytes = current.processed_bytes;
        }
        current.total_segments = Some(current.processed_segments);
        let summary = JobSummary {
            id: job.id,
            input: job.input.clone(),
            output: job.output.clone(),
            processed_bytes: current.processed_bytes,
            total_bytes: current.total_bytes,
            segments: current.processed_segments,
            processed_points: current.processed_points,
            written_points: current.written_points,
            elapsed,
        };
        reporter
            .emit(
                Stage::Completed,
                Some(format!("Completed in {:.2}s", elapsed.as_secs_f64())),
            )
            .await?;

        Ok(summary)
    }

    /// Run the job on the current runtime and hand back its progress stream
    pub fn spawn(job: Job) -> JobHandle {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let id = job.id;
        let task = tokio::spawn(Pipeline::new(job).run(tx, token.clone()));
        JobHandle {
            id,
            progress: rx,
            token,
            task,
        }
    }
}

/// Handle to a job started with [`Pipeline::spawn`]
pub struct JobHandle {
    id: JobId,
    progress: mpsc::Receiver<Progress>,
    token: CancellationToken,
    task: JoinHandle<Result<JobSummary>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Next progress snapshot, `None` once the job has finished and the stream drained
    pub async fn next(&mut self) -> Option<Progress> {
        self.progress.recv().await
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Wait for the job to end, discarding snapshots that were not consumed
    pub async fn join(mut self) -> Result<JobSummary> {
        while self.progress.recv().await.is_some() {}
        self.task.await.map_err(|e| {
            ProcessingError::InternalInconsistency(format!("pipeline task failed: {}", e))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompressionStrategy, Config};
    use std::fmt::Write as _;
    use std::path::Path;

    const INPUT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test">
	<trk>
		<name>Walk</name>
		<trkseg>
			<trkpt lat="0.0" lon="0.0"></trkpt>
			<trkpt lat="0.0" lon="0.0"></trkpt>
			<trkpt lat="1.0" lon="1.0"></trkpt>
		</trkseg>
	</trk>
</gpx>
"#;

    fn job_in(dir: &Path, contents: Option<&str>) -> Job {
        let input = dir.join("input.gpx");
        if let Some(contents) = contents {
            std::fs::write(&input, contents).unwrap();
        }
        let config = Config::default()
            .with_strategy(CompressionStrategy::StripDuplicates)
            .with_deduplication_radius(None);
        Job::new(JobId(3), &input, dir.join("output.gpx"), Arc::new(config))
    }

    async fn drain(mut handle: JobHandle) -> Vec<Progress> {
        let mut snapshots = Vec::new();
        while let Some(progress) = handle.next().await {
            snapshots.push(progress);
        }
        snapshots
    }

    #[tokio::test]
    async fn test_pipeline_completes() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path(), Some(INPUT));
        let output = job.output.clone();

        let snapshots = drain(Pipeline::spawn(job)).await;
        let stages: Vec<Stage> = snapshots.iter().map(|p| p.stage).collect();
        assert_eq!(stages.first(), Some(&Stage::Reading));
        assert_eq!(stages.last(), Some(&Stage::Completed));
        assert!(stages.contains(&Stage::Parsing));
        assert!(stages.contains(&Stage::Compressing));
        assert!(stages.contains(&Stage::Writing));
        assert_eq!(stages.iter().filter(|s| s.is_terminal()).count(), 1);

        let last = snapshots.last().unwrap();
        assert_eq!(last.processed_points, 3);
        assert_eq!(last.written_points, 2);
        assert_eq!(last.total_segments, Some(1));
        assert_eq!(last.total_bytes, INPUT.len() as u64);
        assert_eq!(last.fraction_completed(), 1.0);
        assert!(last.message.as_deref().unwrap().starts_with("Completed in "));

        let written = std::fs::read_to_string(output).unwrap();
        assert!(written.contains("<name>Walk</name>"));
        assert_eq!(written.matches("<trkpt ").count(), 2);
    }

    #[tokio::test]
    async fn test_missing_input_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path(), None);
        let (tx, mut rx) = mpsc::channel(8);

        let result = Pipeline::new(job).run(tx, CancellationToken::new()).await;
        assert!(matches!(result, Err(ProcessingError::UnreadableInput { .. })));

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.stage, Stage::Failed);
        assert!(snapshot.error.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_parse_failure_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path(), Some("<gpx><trk><trkseg>"));
        let snapshots = drain(Pipeline::spawn(job)).await;

        let failures: Vec<&Progress> = snapshots
            .iter()
            .filter(|p| p.stage == Stage::Failed)
            .collect();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0].error.as_deref(),
            Some(ProcessingError::ParseFailure { .. })
        ));
        assert_eq!(snapshots.last().map(|p| p.stage), Some(Stage::Failed));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path(), Some(INPUT));
        let (tx, mut rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        token.cancel();

        let result = Pipeline::new(job).run(tx, token).await;
        assert!(result.is_err_and(|e| e.is_cancelled()));

        let mut last = None;
        while let Some(snapshot) = rx.recv().await {
            last = Some(snapshot);
        }
        let last = last.unwrap();
        assert_eq!(last.stage, Stage::Failed);
        assert!(last.error.is_some_and(|e| e.is_cancelled()));
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path(), Some(INPUT));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = Pipeline::new(job).run(tx, CancellationToken::new()).await;
        assert!(result.is_err_and(|e| e.is_cancelled()));
    }

    /// One segment of `points` points, the usual shape of a recorded activity
    fn single_segment_document(points: usize) -> String {
        let mut document = String::from(
            "<?xml version=\"1.0\"?>\n<gpx version=\"1.1\" creator=\"test\">\n<trk><trkseg>\n",
        );
        for i in 0..points {
            let _ = writeln!(
                document,
                "<trkpt lat=\"{}\" lon=\"7.0\"><ele>{}</ele></trkpt>",
                45.0 + i as f64 * 1e-6,
                i % 500
            );
        }
        document.push_str("</trkseg></trk>\n</gpx>\n");
        document
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_progress_and_cancel_inside_long_segment() {
        let dir = tempfile::tempdir().unwrap();
        let document = single_segment_document(200_000);
        let total_bytes = document.len() as u64;
        let job = job_in(dir.path(), Some(&document));
        let token = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(
            Pipeline::new(job)
                .with_progress_interval(Duration::from_millis(5))
                .run(tx, token.clone()),
        );

        let mut header_bytes = None;
        let mut cancelled_at = None;
        let mut snapshots = Vec::new();
        while let Some(progress) = rx.recv().await {
            if progress.message.as_deref() == Some("Writing header") {
                header_bytes = Some(progress.processed_bytes);
            }
            let reading_mid_segment = progress.stage == Stage::Parsing
                && header_bytes.is_some_and(|bytes| progress.processed_bytes > bytes)
                && progress.processed_bytes < total_bytes;
            if cancelled_at.is_none() && reading_mid_segment {
                token.cancel();
                cancelled_at = Some(Instant::now());
            }
            snapshots.push(progress);
        }

        // No segment event was ever sent, yet progress moved and the cancel was honored
        let cancelled_at = cancelled_at.unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_secs(2));
        assert!(snapshots.iter().all(|p| p.stage != Stage::Compressing));
        let last = snapshots.last().unwrap();
        assert_eq!(last.stage, Stage::Failed);
        assert!(last.error.as_ref().is_some_and(|e| e.is_cancelled()));

        let result = task.await.unwrap();
        assert!(result.is_err_and(|e| e.is_cancelled()));
    }
}
