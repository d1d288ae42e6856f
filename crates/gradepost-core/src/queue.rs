//! Durable job queue. Handles async delivery jobs with persistence,
//! scheduled retries with exponential backoff, and dead-lettering.
//!
//! Delivery semantics are at-least-once: a job may run again after a crash,
//! but is never lost. Jobs that exhaust their retry budget (or fail
//! permanently) are moved to the dead-letter sink instead of being dropped.
//! The queue is purely a transport for work items; it never touches the
//! delivery log itself.

use async_trait::async_trait;
use itertools::Itertools;
use std::{
	collections::{BTreeMap, HashMap},
	fmt::Debug,
	sync::{Arc, Mutex, MutexGuard, RwLock},
};

use crate::prelude::*;
use gradepost_types::delivery_adapter::DeliveryAdapter;

pub type JobId = u64;

#[async_trait]
pub trait Job<S: Clone>: Send + Sync + Debug {
	fn kind() -> &'static str
	where
		Self: Sized;
	fn build(id: JobId, input: &str) -> GpResult<Arc<dyn Job<S>>>
	where
		Self: Sized;
	fn serialize(&self) -> String;
	fn kind_of(&self) -> &'static str;

	/// Run one attempt. `attempt` is 1-based and counts every prior attempt
	/// of this job, so handlers can record it without consulting the queue.
	async fn run(&self, state: &S, attempt: u16) -> GpResult<()>;
}

#[derive(Debug)]
pub enum JobStatus {
	Pending,
	Finished,
	DeadLettered,
}

pub struct JobData {
	pub id: JobId,
	pub kind: Box<str>,
	pub status: JobStatus,
	pub input: Box<str>,
	pub retry_data: Option<Box<str>>,
	pub next_at: Option<Timestamp>,
}

// RetryPolicy //
//*************//

/// Caller-configurable retry policy, passed to the queue at enqueue time.
/// `times` is the total attempt budget; `wait_min_max` bounds the backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	wait_min_max: (u64, u64),
	times: u16,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { wait_min_max: (60, 3600), times: 3 }
	}
}

impl RetryPolicy {
	pub fn new(wait_min_max: (u64, u64), times: u16) -> Self {
		Self { wait_min_max, times }
	}

	/// Fixed backoff: every retry waits the same amount.
	pub fn fixed(wait: u64, times: u16) -> Self {
		Self { wait_min_max: (wait, wait), times }
	}

	pub fn max_attempts(&self) -> u16 {
		self.times
	}

	/// Exponential backoff in seconds: min * 2^retries, capped at max.
	pub fn calculate_backoff(&self, retries: u16) -> u64 {
		let (min, max) = self.wait_min_max;
		let backoff = min.saturating_mul(1u64 << u64::from(retries.min(62)));
		backoff.min(max)
	}

	/// Whether another attempt fits in the budget after `attempt` attempts.
	pub fn should_retry(&self, attempt: u16) -> bool {
		attempt < self.times
	}
}

// JobStore //
//**********//

#[derive(Debug, Clone)]
pub struct JobMeta<S: Clone> {
	pub job: Arc<dyn Job<S>>,
	pub next_at: Option<Timestamp>,
	retry_count: u16,
	pub retry: Option<RetryPolicy>,
}

#[async_trait]
pub trait JobStore<S: Clone>: Send + Sync {
	async fn add(&self, job: &JobMeta<S>) -> GpResult<JobId>;
	async fn finished(&self, id: JobId, output: &str) -> GpResult<()>;
	async fn load(&self) -> GpResult<Vec<JobData>>;
	async fn update_job_error(
		&self,
		id: JobId,
		output: &str,
		next_at: Option<Timestamp>,
		retry: Option<&str>,
	) -> GpResult<()>;
	async fn dead_letter(&self, id: JobId, output: &str) -> GpResult<()>;
}

// InMemoryJobStore
//******************
/// Non-durable store for tests and embedded use; jobs do not survive a
/// restart.
pub struct InMemoryJobStore {
	last_id: Mutex<JobId>,
}

impl InMemoryJobStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self { last_id: Mutex::new(0) })
	}
}

#[async_trait]
impl<S: Clone> JobStore<S> for InMemoryJobStore {
	async fn add(&self, _job: &JobMeta<S>) -> GpResult<JobId> {
		let mut last_id = lock_mutex(&self.last_id, "last_id");
		*last_id += 1;
		Ok(*last_id)
	}

	async fn finished(&self, _id: JobId, _output: &str) -> GpResult<()> {
		Ok(())
	}

	async fn load(&self) -> GpResult<Vec<JobData>> {
		Ok(vec![])
	}

	async fn update_job_error(
		&self,
		_id: JobId,
		_output: &str,
		_next_at: Option<Timestamp>,
		_retry: Option<&str>,
	) -> GpResult<()> {
		Ok(())
	}

	async fn dead_letter(&self, _id: JobId, _output: &str) -> GpResult<()> {
		Ok(())
	}
}

// AdapterJobStore
//*****************
/// Durable store over the delivery adapter's jobs table.
pub struct AdapterJobStore {
	adapter: Arc<dyn DeliveryAdapter>,
}

impl AdapterJobStore {
	pub fn new(adapter: Arc<dyn DeliveryAdapter>) -> Arc<Self> {
		Arc::new(Self { adapter })
	}
}

#[async_trait]
impl<S: Clone> JobStore<S> for AdapterJobStore {
	async fn add(&self, job: &JobMeta<S>) -> GpResult<JobId> {
		self.adapter.create_job(job.job.kind_of(), &job.job.serialize()).await
	}

	async fn finished(&self, id: JobId, output: &str) -> GpResult<()> {
		self.adapter.job_finished(id, output).await
	}

	async fn load(&self) -> GpResult<Vec<JobData>> {
		let jobs = self.adapter.load_jobs().await?;
		Ok(jobs
			.into_iter()
			.map(|j| JobData {
				id: j.job_id,
				kind: j.kind,
				status: match j.status {
					'P' => JobStatus::Pending,
					'F' => JobStatus::Finished,
					// 'X' or unknown
					_ => JobStatus::DeadLettered,
				},
				input: j.input,
				retry_data: j.retry,
				next_at: j.next_at,
			})
			.collect())
	}

	async fn update_job_error(
		&self,
		id: JobId,
		output: &str,
		next_at: Option<Timestamp>,
		retry: Option<&str>,
	) -> GpResult<()> {
		self.adapter.job_error(id, output, next_at, retry).await
	}

	async fn dead_letter(&self, id: JobId, output: &str) -> GpResult<()> {
		self.adapter.job_dead_letter(id, output).await
	}
}

// Queue //
//*******//

type JobBuilder<S> = dyn Fn(JobId, &str) -> GpResult<Arc<dyn Job<S>>> + Send + Sync;
type JobBuilderRegistry<S> = HashMap<&'static str, Box<JobBuilder<S>>>;
type ScheduledJobMap<S> = BTreeMap<(Timestamp, JobId), JobMeta<S>>;

/// A job that exhausted its retry budget or failed permanently.
#[derive(Debug, Clone)]
pub struct DeadLetter {
	pub job_id: JobId,
	pub kind: Box<str>,
	pub error: Box<str>,
}

#[derive(Clone)]
pub struct Queue<S: Clone> {
	job_builders: Arc<RwLock<JobBuilderRegistry<S>>>,
	store: Arc<dyn JobStore<S>>,
	jobs_running: Arc<Mutex<HashMap<JobId, JobMeta<S>>>>,
	jobs_scheduled: Arc<Mutex<ScheduledJobMap<S>>>,
	tx_finish: flume::Sender<JobId>,
	rx_finish: flume::Receiver<JobId>,
	tx_dead: flume::Sender<DeadLetter>,
	rx_dead: flume::Receiver<DeadLetter>,
	notify_schedule: Arc<tokio::sync::Notify>,
}

fn lock_mutex<'a, T>(mutex: &'a Mutex<T>, name: &'static str) -> MutexGuard<'a, T> {
	match mutex.lock() {
		Ok(guard) => guard,
		Err(poisoned) => {
			error!("Mutex poisoned: {} (recovering)", name);
			poisoned.into_inner()
		}
	}
}

/// Retry bookkeeping persisted alongside the job: "count,min,max,times"
fn format_retry(retry_count: u16, policy: &RetryPolicy) -> String {
	format!("{},{},{},{}", retry_count, policy.wait_min_max.0, policy.wait_min_max.1, policy.times)
}

fn parse_retry(retry_str: &str) -> GpResult<(u16, RetryPolicy)> {
	let (count, min, max, times) = retry_str
		.split(',')
		.collect_tuple()
		.ok_or(Error::Internal("invalid retry data format".into()))?;
	let count: u16 = count.parse().map_err(|_| Error::Internal("retry count must be u16".into()))?;
	let policy = RetryPolicy {
		wait_min_max: (
			min.parse().map_err(|_| Error::Internal("retry min must be u64".into()))?,
			max.parse().map_err(|_| Error::Internal("retry max must be u64".into()))?,
		),
		times: times.parse().map_err(|_| Error::Internal("retry times must be u16".into()))?,
	};
	Ok((count, policy))
}

impl<S: Clone + Send + Sync + 'static> Queue<S> {
	pub fn new(store: Arc<dyn JobStore<S>>) -> Arc<Self> {
		let (tx_finish, rx_finish) = flume::unbounded();
		let (tx_dead, rx_dead) = flume::unbounded();

		Arc::new(Self {
			job_builders: Arc::new(RwLock::new(HashMap::new())),
			store,
			jobs_running: Arc::new(Mutex::new(HashMap::new())),
			jobs_scheduled: Arc::new(Mutex::new(BTreeMap::new())),
			tx_finish,
			rx_finish,
			tx_dead,
			rx_dead,
			notify_schedule: Arc::new(tokio::sync::Notify::new()),
		})
	}

	/// Receiver side of the dead-letter sink.
	pub fn dead_letters(&self) -> flume::Receiver<DeadLetter> {
		self.rx_dead.clone()
	}

	pub fn start(&self, state: S) {
		// Completion events: mark the job finished in the store, then
		// release the single-flight slot.
		let queue = self.clone();
		let rx_finish = self.rx_finish.clone();
		tokio::spawn(async move {
			while let Ok(id) = rx_finish.recv_async().await {
				debug!("Completed job {} (notified)", id);
				if let Err(e) = queue.store.finished(id, "").await {
					error!("Failed to mark job {} as finished: {}", id, e);
					continue;
				}
				lock_mutex(&queue.jobs_running, "jobs_running").remove(&id);
			}
		});

		// Scheduled jobs: spawn everything that is due, sleep until the
		// next due time or a schedule change.
		let queue = self.clone();
		tokio::spawn(async move {
			loop {
				let is_empty = lock_mutex(&queue.jobs_scheduled, "jobs_scheduled").is_empty();
				if is_empty {
					queue.notify_schedule.notified().await;
				}
				let time = Timestamp::now();
				if let Some((timestamp, _id)) = loop {
					let mut scheduled = lock_mutex(&queue.jobs_scheduled, "jobs_scheduled");
					if let Some((&(timestamp, id), _)) = scheduled.first_key_value() {
						if timestamp <= Timestamp::now() {
							debug!("Spawning job id {} (from schedule)", id);
							if let Some(meta) = scheduled.remove(&(timestamp, id)) {
								lock_mutex(&queue.jobs_running, "jobs_running")
									.insert(id, meta.clone());
								drop(scheduled);
								queue.spawn_job(state.clone(), id, meta);
							} else {
								error!("Job disappeared while being removed from schedule");
								break None;
							}
						} else {
							break Some((timestamp, id));
						}
					} else {
						break None;
					}
				} {
					let diff = timestamp.0 - time.0;
					let wait =
						tokio::time::Duration::from_secs(u64::try_from(diff).unwrap_or_default());
					tokio::select! {
						() = tokio::time::sleep(wait) => (),
						() = queue.notify_schedule.notified() => (),
					};
				}
			}
		});

		// Restore pending jobs from the durable store.
		let queue = self.clone();
		tokio::spawn(async move {
			if let Err(e) = queue.load().await {
				error!("Failed to load pending jobs: {}", e);
			}
		});
	}

	fn register_builder(
		&self,
		name: &'static str,
		builder: &'static JobBuilder<S>,
	) -> GpResult<&Self> {
		let mut builders = self
			.job_builders
			.write()
			.map_err(|_| Error::Internal("job_builders RwLock poisoned".into()))?;
		builders.insert(name, Box::new(builder));
		Ok(self)
	}

	pub fn register<J: Job<S>>(&self) -> GpResult<&Self> {
		info!("Registering job type {}", J::kind());
		self.register_builder(J::kind(), &|id: JobId, input: &str| J::build(id, input))?;
		Ok(self)
	}

	/// Enqueue without retry; a failure dead-letters immediately.
	pub async fn push(&self, job: Arc<dyn Job<S>>) -> GpResult<JobId> {
		self.push_job(job, None).await
	}

	/// Enqueue with a retry policy; returns once the job is durably stored.
	pub async fn push_with(&self, job: Arc<dyn Job<S>>, retry: RetryPolicy) -> GpResult<JobId> {
		self.push_job(job, Some(retry)).await
	}

	async fn push_job(&self, job: Arc<dyn Job<S>>, retry: Option<RetryPolicy>) -> GpResult<JobId> {
		let meta = JobMeta { job, next_at: None, retry_count: 0, retry };
		let id = self.store.add(&meta).await?;
		self.add_queue(id, meta)
	}

	fn add_queue(&self, id: JobId, meta: JobMeta<S>) -> GpResult<JobId> {
		// Single-flight per job id: if this job is mid-run, just update the
		// metadata; it will not be scheduled a second time concurrently.
		{
			let mut running = lock_mutex(&self.jobs_running, "jobs_running");
			if let Some(existing) = running.get_mut(&id) {
				debug!("Job {} is already running, updating metadata", id);
				*existing = meta;
				return Ok(id);
			}
		}

		// Drop a stale scheduled entry before re-queueing under a new time.
		{
			let mut scheduled = lock_mutex(&self.jobs_scheduled, "jobs_scheduled");
			if let Some(key) = scheduled
				.iter()
				.find(|((_, jid), _)| *jid == id)
				.map(|((ts, jid), _)| (*ts, *jid))
			{
				scheduled.remove(&key);
				debug!("Removed existing scheduled entry for job {} before re-queueing", id);
			}
		}

		let due = meta.next_at.unwrap_or(Timestamp(0));
		debug!("Scheduling job {} for {}", id, due);
		lock_mutex(&self.jobs_scheduled, "jobs_scheduled").insert((due, id), meta);
		self.notify_schedule.notify_one();
		Ok(id)
	}

	async fn load(&self) -> GpResult<()> {
		let jobs = self.store.load().await?;
		debug!("Loaded {} jobs from store", jobs.len());
		for j in jobs {
			if let JobStatus::Pending = j.status {
				debug!("Loading job {} {}", j.id, j.kind);
				let job = {
					let builder_map = self
						.job_builders
						.read()
						.map_err(|_| Error::Internal("job_builders RwLock poisoned".into()))?;
					let builder = builder_map.get(j.kind.as_ref()).ok_or(Error::Internal(
						format!("job builder not registered: {}", j.kind),
					))?;
					builder(j.id, &j.input)?
				};
				let (retry_count, retry) = match j.retry_data {
					Some(retry_str) => {
						let (count, policy) = parse_retry(&retry_str)?;
						(count, Some(policy))
					}
					None => (0, None),
				};
				let meta = JobMeta { job, next_at: j.next_at, retry_count, retry };
				self.add_queue(j.id, meta)?;
			}
		}
		Ok(())
	}

	fn spawn_job(&self, state: S, id: JobId, meta: JobMeta<S>) {
		let tx_finish = self.tx_finish.clone();
		let tx_dead = self.tx_dead.clone();
		let store = self.store.clone();
		let queue = self.clone();
		let job = meta.job.clone();
		tokio::spawn(async move {
			let attempt = meta.retry_count + 1;
			match job.run(&state, attempt).await {
				Ok(()) => {
					debug!("Job {} completed successfully (attempt {})", id, attempt);
					tx_finish.send(id).unwrap_or(());
				}
				Err(e) => {
					let retryable = !e.is_permanent()
						&& meta.retry.as_ref().is_some_and(|p| p.should_retry(attempt));
					if let (true, Some(policy)) = (retryable, &meta.retry) {
						let backoff = policy.calculate_backoff(meta.retry_count);
						let next_at = Timestamp::from_now(i64::try_from(backoff).unwrap_or(i64::MAX));

						info!(
							"Job {} failed (attempt {}/{}). Scheduling retry in {} seconds: {}",
							id, attempt, policy.max_attempts(), backoff, e
						);

						store
							.update_job_error(
								id,
								&e.to_string(),
								Some(next_at),
								Some(&format_retry(attempt, policy)),
							)
							.await
							.unwrap_or(());

						lock_mutex(&queue.jobs_running, "jobs_running").remove(&id);

						let mut retry_meta = meta.clone();
						retry_meta.retry_count = attempt;
						retry_meta.next_at = Some(next_at);
						queue.add_queue(id, retry_meta).unwrap_or(id);
					} else {
						if e.is_permanent() {
							error!("Job {} failed permanently: {}", id, e);
						} else {
							error!("Job {} failed after {} attempts: {}", id, attempt, e);
						}
						store.dead_letter(id, &e.to_string()).await.unwrap_or(());
						lock_mutex(&queue.jobs_running, "jobs_running").remove(&id);
						tx_dead
							.send(DeadLetter {
								job_id: id,
								kind: job.kind_of().into(),
								error: e.to_string().into(),
							})
							.unwrap_or(());
					}
				}
			}
		});
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU16, Ordering};

	type TestState = Arc<Mutex<Vec<u8>>>;

	fn init_tracing() {
		let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).try_init();
	}

	#[derive(Debug)]
	struct TestJob {
		num: u8,
	}

	#[async_trait]
	impl Job<TestState> for TestJob {
		fn kind() -> &'static str {
			"test"
		}

		fn build(_id: JobId, input: &str) -> GpResult<Arc<dyn Job<TestState>>> {
			let num = input.parse().map_err(|_| Error::Internal("bad input".into()))?;
			Ok(Arc::new(TestJob { num }))
		}

		fn serialize(&self) -> String {
			self.num.to_string()
		}

		fn kind_of(&self) -> &'static str {
			"test"
		}

		async fn run(&self, state: &TestState, _attempt: u16) -> GpResult<()> {
			state.lock().unwrap().push(self.num);
			Ok(())
		}
	}

	#[derive(Debug)]
	struct FlakyJob {
		fail_times: u16,
		attempts: AtomicU16,
	}

	#[async_trait]
	impl Job<TestState> for FlakyJob {
		fn kind() -> &'static str {
			"flaky"
		}

		fn build(_id: JobId, input: &str) -> GpResult<Arc<dyn Job<TestState>>> {
			let fail_times = input.parse().map_err(|_| Error::Internal("bad input".into()))?;
			Ok(Arc::new(FlakyJob { fail_times, attempts: AtomicU16::new(0) }))
		}

		fn serialize(&self) -> String {
			self.fail_times.to_string()
		}

		fn kind_of(&self) -> &'static str {
			"flaky"
		}

		async fn run(&self, state: &TestState, attempt: u16) -> GpResult<()> {
			let so_far = self.attempts.fetch_add(1, Ordering::SeqCst);
			if so_far < self.fail_times {
				return Err(Error::ServiceUnavailable("connection timed out".into()));
			}
			state.lock().unwrap().push(u8::try_from(attempt).unwrap_or(u8::MAX));
			Ok(())
		}
	}

	#[derive(Debug)]
	struct RejectedJob;

	#[async_trait]
	impl Job<TestState> for RejectedJob {
		fn kind() -> &'static str {
			"rejected"
		}

		fn build(_id: JobId, _input: &str) -> GpResult<Arc<dyn Job<TestState>>> {
			Ok(Arc::new(RejectedJob))
		}

		fn serialize(&self) -> String {
			String::new()
		}

		fn kind_of(&self) -> &'static str {
			"rejected"
		}

		async fn run(&self, _state: &TestState, _attempt: u16) -> GpResult<()> {
			Err(Error::Rejected("mailbox does not exist".into()))
		}
	}

	#[tokio::test]
	async fn test_push_and_run() {
		init_tracing();
		let state: TestState = Arc::new(Mutex::new(vec![]));
		let queue = Queue::new(InMemoryJobStore::new());
		queue.register::<TestJob>().unwrap();
		queue.start(state.clone());

		queue.push(Arc::new(TestJob { num: 7 })).await.unwrap();
		tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

		assert_eq!(*state.lock().unwrap(), vec![7]);
	}

	#[tokio::test]
	async fn test_retry_succeeds_after_transient_failures() {
		init_tracing();
		let state: TestState = Arc::new(Mutex::new(vec![]));
		let queue = Queue::new(InMemoryJobStore::new());
		queue.register::<FlakyJob>().unwrap();
		queue.start(state.clone());

		// Fails twice, succeeds on the third attempt.
		queue
			.push_with(
				Arc::new(FlakyJob { fail_times: 2, attempts: AtomicU16::new(0) }),
				RetryPolicy::fixed(1, 3),
			)
			.await
			.unwrap();
		tokio::time::sleep(tokio::time::Duration::from_secs(4)).await;

		assert_eq!(*state.lock().unwrap(), vec![3], "should succeed on attempt 3");
		assert!(queue.dead_letters().is_empty());
	}

	#[tokio::test]
	async fn test_dead_letter_after_exhausted_retries() {
		init_tracing();
		let state: TestState = Arc::new(Mutex::new(vec![]));
		let queue = Queue::new(InMemoryJobStore::new());
		queue.register::<FlakyJob>().unwrap();
		queue.start(state.clone());

		// Always fails; budget of 2 attempts.
		queue
			.push_with(
				Arc::new(FlakyJob { fail_times: 100, attempts: AtomicU16::new(0) }),
				RetryPolicy::fixed(1, 2),
			)
			.await
			.unwrap();
		tokio::time::sleep(tokio::time::Duration::from_secs(4)).await;

		assert!(state.lock().unwrap().is_empty());
		let dead = queue.dead_letters().try_recv().unwrap();
		assert_eq!(dead.kind.as_ref(), "flaky");
		assert!(dead.error.contains("connection timed out"));
	}

	#[tokio::test]
	async fn test_permanent_failure_skips_retries() {
		init_tracing();
		let state: TestState = Arc::new(Mutex::new(vec![]));
		let queue = Queue::new(InMemoryJobStore::new());
		queue.register::<RejectedJob>().unwrap();
		queue.start(state.clone());

		// Retry budget present, but a permanent error must not consume it.
		queue.push_with(Arc::new(RejectedJob), RetryPolicy::fixed(1, 5)).await.unwrap();
		tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

		let dead = queue.dead_letters().try_recv().unwrap();
		assert_eq!(dead.kind.as_ref(), "rejected");
		assert!(dead.error.contains("mailbox does not exist"));
	}

	#[test]
	fn test_backoff_doubles_and_caps() {
		let policy = RetryPolicy::new((30, 120), 5);
		assert_eq!(policy.calculate_backoff(0), 30);
		assert_eq!(policy.calculate_backoff(1), 60);
		assert_eq!(policy.calculate_backoff(2), 120);
		assert_eq!(policy.calculate_backoff(3), 120);
	}

	#[test]
	fn test_retry_data_roundtrip() {
		let policy = RetryPolicy::new((60, 3600), 3);
		let s = format_retry(2, &policy);
		assert_eq!(s, "2,60,3600,3");
		let (count, parsed) = parse_retry(&s).unwrap();
		assert_eq!(count, 2);
		assert_eq!(parsed.wait_min_max, (60, 3600));
		assert_eq!(parsed.times, 3);
	}
}

// vim: ts=4
