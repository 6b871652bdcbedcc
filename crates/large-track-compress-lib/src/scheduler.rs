//! Fleet-level scheduling of many jobs under one concurrency limit
//!
//! A batch is dispatched in submission order: every job is announced with a
//! `queued` snapshot, then admitted as soon as a permit of the scheduler's
//! semaphore frees up. A permit is released only after the job's pipeline has
//! published its terminal snapshot, so the progress stream never shows more
//! active jobs than the limit.

use crate::{
    CancellationToken, Job, JobId, JobSummary, Pipeline, ProcessingError, Progress, Result, Stage,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{self, JoinError, JoinHandle, JoinSet};

const DEFAULT_PROGRESS_CAPACITY: usize = 256;
const FALLBACK_PARALLELISM: usize = 4;

/// What a failing job does to the rest of its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// The first failure cancels every other job of the batch
    #[default]
    FailFast,
    /// Failures stay local to their job
    Isolate,
}

/// Outcome of a whole batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    /// Summaries of the completed jobs, ordered by id
    pub jobs: Vec<JobSummary>,
}

/// Admits jobs under a fixed concurrency limit
///
/// Clones share the same limit.
#[derive(Debug, Clone)]
pub struct Scheduler {
    limit: usize,
    semaphore: Arc<Semaphore>,
    policy: FailurePolicy,
    progress_capacity: usize,
}

impl Scheduler {
    /// Scheduler running at most `limit` jobs at once (at least one)
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            policy: FailurePolicy::default(),
            progress_capacity: DEFAULT_PROGRESS_CAPACITY,
        }
    }

    /// Scheduler sized to the number of available CPUs
    pub fn with_available_parallelism() -> Self {
        let limit = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_PARALLELISM);
        Self::new(limit)
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Depth of the progress channel of each batch
    pub fn with_progress_capacity(mut self, capacity: usize) -> Self {
        self.progress_capacity = capacity.max(1);
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Submit jobs and start dispatching them on the current tokio runtime
    ///
    /// Job ids are expected to be unique within a batch.
    pub fn enqueue(&self, jobs: impl IntoIterator<Item = Job>) -> Batch {
        let jobs: Vec<Job> = jobs.into_iter().collect();
        let token = CancellationToken::new();
        let tokens = Arc::new(DashMap::with_capacity(jobs.len()));
        for job in &jobs {
            tokens.insert(job.id, token.child_token());
        }

        let (tx, rx) = mpsc::channel(self.progress_capacity);
        tracing::info!(
            "Enqueued {} jobs (limit {}, {:?})",
            jobs.len(),
            self.limit,
            self.policy
        );

        let dispatcher = tokio::spawn(dispatch(Dispatch {
            jobs,
            semaphore: self.semaphore.clone(),
            tx,
            token: token.clone(),
            tokens: tokens.clone(),
            policy: self.policy,
        }));

        Batch {
            progress: rx,
            token,
            tokens,
            dispatcher,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::with_available_parallelism()
    }
}

/// Everything the dispatcher task owns
struct Dispatch {
    jobs: Vec<Job>,
    semaphore: Arc<Semaphore>,
    tx: mpsc::Sender<Progress>,
    token: CancellationToken,
    tokens: Arc<DashMap<JobId, CancellationToken>>,
    policy: FailurePolicy,
}

async fn dispatch(dispatch: Dispatch) -> Result<BatchSummary> {
    let Dispatch {
        jobs,
        semaphore,
        tx,
        token,
        tokens,
        policy,
    } = dispatch;

    for job in &jobs {
        let queued = Progress::new(job.id, Stage::Queued, job.input.clone(), Some(job.output.clone()));
        // A dropped receiver shows up as cancellation inside each pipeline
        let _ = tx.send(queued).await;
    }

    let mut summary = BatchSummary::default();
    let mut running = JoinSet::new();
    let mut admitted: HashMap<task::Id, Progress> = HashMap::new();

    for job in jobs {
        let job_token = tokens
            .get(&job.id)
            .map(|t| t.clone())
            .unwrap_or_else(|| token.child_token());

        let permit = tokio::select! {
            biased;
            _ = job_token.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            tracing::debug!("{} cancelled before admission", job.id);
            tokens.remove(&job.id);
            let cancelled = Progress::new(job.id, Stage::Queued, job.input, Some(job.output))
                .failed(Arc::new(ProcessingError::Cancelled));
            let _ = tx.send(cancelled).await;
            summary.failed += 1;
            continue;
        };

        let queued = Progress::new(job.id, Stage::Queued, job.input.clone(), Some(job.output.clone()));
        let handle = running.spawn(run_admitted(
            job,
            permit,
            tx.clone(),
            job_token,
            token.clone(),
            tokens.clone(),
            policy,
        ));
        admitted.insert(handle.id(), queued);
    }

    let mut first_error = None;
    while let Some(joined) = running.join_next().await {
        match joined {
            Ok(Ok(job_summary)) => {
                summary.completed += 1;
                summary.jobs.push(job_summary);
            }
            Ok(Err(error)) => {
                summary.failed += 1;
                if !error.is_cancelled() && first_error.is_none() {
                    first_error = Some(error);
                }
            }
            Err(join_error) => {
                summary.failed += 1;
                let queued = admitted.remove(&join_error.id());
                let error =
                    report_lost_job(join_error, queued, &tx, &token, &tokens, policy).await;
                first_error.get_or_insert(error);
            }
        }
    }
    drop(tx);
    summary.jobs.sort_by_key(|s| s.id);

    tracing::info!(
        "Batch finished: {} completed, {} failed",
        summary.completed,
        summary.failed
    );
    match (policy, first_error) {
        (FailurePolicy::FailFast, Some(error)) => Err(error),
        _ => Ok(summary),
    }
}

/// Publish the terminal snapshot of a job whose task died before reporting one
///
/// Under [`FailurePolicy::FailFast`] this cancels the batch like any other failure.
async fn report_lost_job(
    join_error: JoinError,
    queued: Option<Progress>,
    tx: &mpsc::Sender<Progress>,
    batch_token: &CancellationToken,
    tokens: &DashMap<JobId, CancellationToken>,
    policy: FailurePolicy,
) -> ProcessingError {
    let error = ProcessingError::InternalInconsistency(format!("job task failed: {}", join_error));
    if policy == FailurePolicy::FailFast {
        tracing::warn!("Job task failed, cancelling the rest of the batch");
        batch_token.cancel();
    }
    if let Some(queued) = queued {
        tracing::warn!("{} lost: {}", queued.id, error);
        tokens.remove(&queued.id);
        let _ = tx.send(queued.failed(Arc::new(error.clone()))).await;
    }
    error
}

/// Run one admitted job, releasing its permit only once it has fully finished
async fn run_admitted(
    job: Job,
    permit: OwnedSemaphorePermit,
    tx: mpsc::Sender<Progress>,
    job_token: CancellationToken,
    batch_token: CancellationToken,
    tokens: Arc<DashMap<JobId, CancellationToken>>,
    policy: FailurePolicy,
) -> Result<JobSummary> {
    let id = job.id;
    let result = Pipeline::new(job).run(tx, job_token).await;

    if let Err(error) = &result {
        if policy == FailurePolicy::FailFast && !error.is_cancelled() {
            tracing::warn!("{} failed, cancelling the rest of the batch", id);
            batch_token.cancel();
        }
    }

    tokens.remove(&id);
    drop(permit);
    result
}

/// Live view of an enqueued batch
pub struct Batch {
    progress: mpsc::Receiver<Progress>,
    token: CancellationToken,
    tokens: Arc<DashMap<JobId, CancellationToken>>,
    dispatcher: JoinHandle<Result<BatchSummary>>,
}

impl Batch {
    /// Next snapshot of any job; `None` once every job has finished
    ///
    /// Snapshots of one job arrive in order; snapshots of different jobs interleave.
    pub async fn next(&mut self) -> Option<Progress> {
        self.progress.recv().await
    }

    /// Cancel one job. Returns `false` if the job is unknown or already finished.
    pub fn cancel_job(&self, id: JobId) -> bool {
        match self.tokens.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every job of the batch, queued or running
    pub fn cancel_all(&self) {
        self.token.cancel();
    }

    /// Ids of the jobs that have not finished yet, sorted
    pub fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.tokens.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Wait for every job, discarding snapshots that were not consumed
    ///
    /// Under [`FailurePolicy::FailFast`] the first real failure is returned as the
    /// error; jobs cancelled by the caller only count as failed.
    pub async fn join(mut self) -> Result<BatchSummary> {
        while self.progress.recv().await.is_some() {}
        self.dispatcher.await.map_err(|e| {
            ProcessingError::InternalInconsistency(format!("dispatcher task failed: {}", e))
        })?
    }
}
