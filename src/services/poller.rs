use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::models::job::{AnalysisJob, JobStatus};

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Where the poller reads job status from.
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn fetch_job(&self, job_id: &str) -> Result<AnalysisJob, ClientError>;
}

/// Interval and attempt budget for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PollPolicy {
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.interval.is_zero() {
            return Err(ClientError::validation("poll interval must be greater than zero"));
        }
        if self.max_attempts == 0 {
            return Err(ClientError::validation("poll attempts must be at least 1"));
        }
        Ok(())
    }

    /// Total time spent waiting between queries before a timeout.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

type PollOutcome = Result<AnalysisJob, ClientError>;
type PollFuture = Shared<BoxFuture<'static, PollOutcome>>;
type Registry = Arc<Mutex<HashMap<String, InFlight>>>;

struct InFlight {
    future: PollFuture,
    cancel: CancellationToken,
    subscribers: usize,
    generation: u64,
}

/// Drives analysis jobs to a terminal state.
///
/// At most one poll loop runs per job id. Callers that ask for a job already
/// being polled share the running loop and its outcome; the loop is torn
/// down once it finishes or every caller has cancelled or gone away.
pub struct Poller {
    source: Arc<dyn JobStatusSource>,
    policy: PollPolicy,
    in_flight: Registry,
    next_generation: AtomicU64,
}

impl Poller {
    pub fn new(source: Arc<dyn JobStatusSource>, policy: PollPolicy) -> Self {
        Self {
            source,
            policy,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Number of jobs with a live poll loop.
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Wait for `job_id` to complete or fail using the default policy.
    pub async fn await_completion(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AnalysisJob, ClientError> {
        self.await_completion_with(job_id, self.policy, cancel).await
    }

    /// Wait for `job_id` to complete or fail.
    ///
    /// A `failed` job is returned, not raised. Runs out of attempts while the
    /// job is still queued or processing → [`ClientError::PollTimeout`].
    /// When joining a loop that is already running, that loop's policy wins.
    pub async fn await_completion_with(
        &self,
        job_id: &str,
        policy: PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<AnalysisJob, ClientError> {
        policy.validate()?;
        if cancel.is_cancelled() {
            return Err(cancelled(job_id));
        }

        let subscription = self.subscribe(job_id, policy);
        let future = subscription.future.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(job_id = %job_id, "Stopped waiting for job");
                Err(cancelled(job_id))
            }
            outcome = future => outcome,
        }
    }

    fn subscribe(&self, job_id: &str, policy: PollPolicy) -> Subscription {
        let mut registry = lock(&self.in_flight);

        if let Some(entry) = registry.get_mut(job_id) {
            entry.subscribers += 1;
            debug!(job_id = %job_id, subscribers = entry.subscribers, "Joining in-flight poll");
            return Subscription {
                future: entry.future.clone(),
                registry: Arc::clone(&self.in_flight),
                job_id: job_id.to_string(),
                generation: entry.generation,
            };
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let future = poll_until_terminal(
            Arc::clone(&self.source),
            job_id.to_string(),
            policy,
            cancel.clone(),
        )
        .boxed()
        .shared();

        registry.insert(
            job_id.to_string(),
            InFlight {
                future: future.clone(),
                cancel,
                subscribers: 1,
                generation,
            },
        );

        Subscription {
            future,
            registry: Arc::clone(&self.in_flight),
            job_id: job_id.to_string(),
            generation,
        }
    }
}

struct Subscription {
    future: PollFuture,
    registry: Registry,
    job_id: String,
    generation: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut registry = lock(&self.registry);
        let Some(entry) = registry.get_mut(&self.job_id) else {
            return;
        };
        if entry.generation != self.generation {
            return;
        }

        entry.subscribers -= 1;
        if entry.subscribers == 0 {
            entry.cancel.cancel();
            registry.remove(&self.job_id);
        }
    }
}

fn lock(registry: &Mutex<HashMap<String, InFlight>>) -> MutexGuard<'_, HashMap<String, InFlight>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cancelled(job_id: &str) -> ClientError {
    ClientError::Cancelled {
        job_id: job_id.to_string(),
    }
}

/// The poll state machine: query, return on a terminal status, otherwise
/// wait one interval and try again until the attempt budget runs out.
async fn poll_until_terminal(
    source: Arc<dyn JobStatusSource>,
    job_id: String,
    policy: PollPolicy,
    cancel: CancellationToken,
) -> PollOutcome {
    let started = Instant::now();
    let mut last_status: Option<JobStatus> = None;

    for attempt in 1..=policy.max_attempts {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(&job_id)),
            fetched = source.fetch_job(&job_id) => fetched?,
        };
        metrics::counter!("analysis_poll_attempts_total").increment(1);

        if let Some(previous) = last_status {
            if !previous.can_advance_to(job.status) {
                warn!(
                    job_id = %job_id,
                    from = %previous,
                    to = %job.status,
                    "Backend reported a status regression"
                );
            }
        }
        last_status = Some(job.status);

        if job.status.is_terminal() {
            metrics::histogram!("analysis_job_wait_seconds").record(started.elapsed().as_secs_f64());
            info!(
                job_id = %job_id,
                status = %job.status,
                attempt,
                "Job reached terminal state"
            );
            return Ok(job);
        }

        debug!(
            job_id = %job_id,
            status = %job.status,
            attempt,
            max_attempts = policy.max_attempts,
            "Job still running"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(&job_id)),
            _ = sleep(policy.interval) => {}
        }
    }

    metrics::counter!("analysis_poll_timeouts_total").increment(1);
    warn!(
        job_id = %job_id,
        attempts = policy.max_attempts,
        "Gave up waiting for job"
    );
    Err(ClientError::PollTimeout {
        job_id,
        attempts_made: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;

    /// Replays a fixed status sequence; the last status repeats forever.
    struct ScriptedSource {
        script: Mutex<VecDeque<JobStatus>>,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(statuses: &[JobStatus]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(statuses.iter().copied().collect()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JobStatusSource for ScriptedSource {
        async fn fetch_job(&self, job_id: &str) -> Result<AnalysisJob, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let status = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front().unwrap()
                } else {
                    *script.front().unwrap()
                }
            };
            Ok(job(job_id, status))
        }
    }

    struct FailingSource;

    #[async_trait]
    impl JobStatusSource for FailingSource {
        async fn fetch_job(&self, _job_id: &str) -> Result<AnalysisJob, ClientError> {
            Err(ClientError::Remote {
                status_code: 404,
                body: "Análise não encontrada".to_string(),
            })
        }
    }

    fn job(id: &str, status: JobStatus) -> AnalysisJob {
        AnalysisJob {
            id: id.to_string(),
            status,
            image_ref: None,
            analysis_type: None,
            result: None,
            error: (status == JobStatus::Failed).then(|| "image unreadable".to_string()),
            timestamp: None,
        }
    }

    fn policy(interval_ms: u64, max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(interval_ms),
            max_attempts,
        }
    }

    #[test]
    fn test_default_budget_is_thirty_seconds() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_millis(1000));
        assert_eq!(policy.max_attempts, 30);
        assert_eq!(policy.budget(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_at_first_terminal_status() {
        use JobStatus::*;
        let source = ScriptedSource::new(&[Queued, Processing, Processing, Completed, Processing]);
        let poller = Poller::new(source.clone(), PollPolicy::default());

        let start = Instant::now();
        let job = poller
            .await_completion("analysis_1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(job.status, Completed);
        assert_eq!(source.calls(), 4);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_millis(3100));
        assert_eq!(poller.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_returned_not_raised() {
        let source = ScriptedSource::new(&[JobStatus::Processing, JobStatus::Failed]);
        let poller = Poller::new(source.clone(), PollPolicy::default());

        let job = poller
            .await_completion("analysis_2", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failure_message(), Some("image unreadable"));
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_attempt_budget() {
        let source = ScriptedSource::new(&[JobStatus::Processing]);
        let poller = Poller::new(source.clone(), PollPolicy::default());

        let start = Instant::now();
        let err = poller
            .await_completion("analysis_3", &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ClientError::PollTimeout {
                job_id,
                attempts_made,
            } => {
                assert_eq!(job_id, "analysis_3");
                assert_eq!(attempts_made, 30);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(source.calls(), 30);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_millis(30100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy() {
        let source = ScriptedSource::new(&[JobStatus::Queued]);
        let poller = Poller::new(source.clone(), PollPolicy::default());

        let err = poller
            .await_completion_with("analysis_4", policy(200, 1), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::PollTimeout { attempts_made: 1, .. }));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_policy_is_rejected_without_queries() {
        let source = ScriptedSource::new(&[JobStatus::Completed]);
        let poller = Poller::new(source.clone(), PollPolicy::default());
        let token = CancellationToken::new();

        let zero_interval = poller.await_completion_with("a", policy(0, 5), &token).await;
        let zero_attempts = poller.await_completion_with("a", policy(100, 0), &token).await;

        assert!(matches!(zero_interval, Err(ClientError::Validation(_))));
        assert!(matches!(zero_attempts, Err(ClientError::Validation(_))));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_errors_propagate_immediately() {
        let poller = Poller::new(Arc::new(FailingSource), PollPolicy::default());

        let err = poller
            .await_completion("missing", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Remote { status_code: 404, .. }));
        assert_eq!(poller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_token_issues_no_query() {
        let source = ScriptedSource::new(&[JobStatus::Processing]);
        let poller = Poller::new(source.clone(), PollPolicy::default());
        let token = CancellationToken::new();
        token.cancel();

        let err = poller.await_completion("analysis_5", &token).await.unwrap_err();

        assert!(matches!(err, ClientError::Cancelled { .. }));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let source = ScriptedSource::new(&[JobStatus::Processing]);
        let poller = Poller::new(source.clone(), PollPolicy::default());
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(2500)).await;
            canceller.cancel();
        });

        let err = poller.await_completion("analysis_6", &token).await.unwrap_err();
        assert!(matches!(err, ClientError::Cancelled { .. }));
        assert_eq!(source.calls(), 3);
        assert_eq!(poller.in_flight(), 0);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_loop() {
        use JobStatus::*;
        let source = ScriptedSource::new(&[Processing, Processing, Completed]);
        let poller = Poller::new(source.clone(), PollPolicy::default());
        let first = CancellationToken::new();
        let second = CancellationToken::new();

        let (a, b) = tokio::join!(
            poller.await_completion("analysis_7", &first),
            poller.await_completion("analysis_7", &second),
        );

        assert_eq!(a.unwrap().status, Completed);
        assert_eq!(b.unwrap().status, Completed);
        assert_eq!(source.calls(), 3);
        assert_eq!(poller.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_caller_cancelling_leaves_the_other_polling() {
        use JobStatus::*;
        let source = ScriptedSource::new(&[Processing, Processing, Processing, Completed]);
        let poller = Poller::new(source.clone(), PollPolicy::default());
        let leaving = CancellationToken::new();
        let staying = CancellationToken::new();

        let canceller = leaving.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(1500)).await;
            canceller.cancel();
        });

        let (a, b) = tokio::join!(
            poller.await_completion("analysis_8", &leaving),
            poller.await_completion("analysis_8", &staying),
        );

        assert!(matches!(a, Err(ClientError::Cancelled { .. })));
        assert_eq!(b.unwrap().status, Completed);
        assert_eq!(source.calls(), 4);
        assert_eq!(poller.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_jobs_poll_independently() {
        let source = ScriptedSource::new(&[JobStatus::Completed]);
        let poller = Poller::new(source.clone(), PollPolicy::default());
        let token = CancellationToken::new();

        let (a, b) = tokio::join!(
            poller.await_completion("analysis_9", &token),
            poller.await_completion("analysis_10", &token),
        );

        assert_eq!(a.unwrap().id, "analysis_9");
        assert_eq!(b.unwrap().id, "analysis_10");
        assert_eq!(source.calls(), 2);
    }
}
