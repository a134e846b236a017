//! Interval scheduler for configured sync strategies
//!
//! Periodically triggers orchestrator runs (incremental every few minutes,
//! stale catch-up every few hours, ...) with jitter so that multiple tasks
//! do not hit the upstream at the same instant. Acts as the cron trigger.

use crate::config::{ScheduledSync, SchedulerSettings};
use crate::error::AppError;
use crate::orchestrator::{Orchestrator, SyncOptions};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

/// Timing configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Delay before the first run (seconds)
    pub initial_delay_secs: u64,
    /// Random jitter added to every scheduled run (seconds)
    pub jitter_secs: u64,
    /// Runs longer than this are reported as overrunning (seconds).
    /// The run itself is never cancelled so its sync run record always
    /// reaches a terminal status.
    pub sync_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 5,
            jitter_secs: 60,
            sync_timeout_secs: 900,
        }
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            initial_delay_secs: settings.initial_delay_secs,
            jitter_secs: settings.jitter_secs,
            sync_timeout_secs: settings.sync_timeout_secs,
        }
    }
}

/// Outcome of one triggered run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerOutcome {
    /// Records created or updated
    pub records_changed: u64,
    /// Errors captured per record
    pub errors: u64,
    /// Jobs written to the queue instead of running inline
    pub jobs_enqueued: u64,
    /// Nothing ran (every resource was fresh)
    pub skipped: bool,
}

/// Status of a scheduled task
#[derive(Debug, Clone, Default)]
pub struct TaskStatus {
    pub last_run: Option<std::time::SystemTime>,
    pub last_result: Option<Result<TriggerOutcome, String>>,
    pub next_run: Option<std::time::SystemTime>,
    pub in_progress: bool,
}

/// Something the scheduler can run on an interval
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    async fn run(&self) -> Result<TriggerOutcome, AppError>;
}

/// A configured strategy run against the orchestrator
pub struct StrategyTask {
    name: String,
    job: ScheduledSync,
    orchestrator: Arc<Orchestrator>,
}

impl StrategyTask {
    pub fn new(job: ScheduledSync, orchestrator: Arc<Orchestrator>) -> Self {
        let resources: Vec<&str> = job.resources.iter().map(|r| r.as_str()).collect();
        let name = if resources.is_empty() {
            format!("{}:all", job.strategy)
        } else {
            format!("{}:{}", job.strategy, resources.join(","))
        };
        Self {
            name,
            job,
            orchestrator,
        }
    }

    /// One task per configured job
    pub fn from_settings(
        settings: &SchedulerSettings,
        orchestrator: Arc<Orchestrator>,
    ) -> Vec<Arc<dyn ScheduledTask>> {
        settings
            .jobs
            .iter()
            .cloned()
            .map(|job| Arc::new(Self::new(job, orchestrator.clone())) as Arc<dyn ScheduledTask>)
            .collect()
    }
}

#[async_trait]
impl ScheduledTask for StrategyTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.job.interval_secs.max(1))
    }

    async fn run(&self) -> Result<TriggerOutcome, AppError> {
        let options = SyncOptions::new(self.job.strategy, self.job.resources.clone())
            .with_async(self.job.async_mode);

        let summary = self.orchestrator.sync(&options).await?;

        Ok(TriggerOutcome {
            records_changed: summary.totals.created + summary.totals.updated,
            errors: summary.error_count,
            jobs_enqueued: summary.jobs_enqueued.len() as u64,
            skipped: summary.resources.is_empty() && !summary.skipped.is_empty(),
        })
    }
}

struct ManualTrigger {
    task_name: String,
    response: mpsc::Sender<Result<TriggerOutcome, AppError>>,
}

/// Runs scheduled tasks until shutdown
pub struct SyncScheduler {
    config: SchedulerConfig,
    tasks: Vec<Arc<dyn ScheduledTask>>,
    status: Arc<RwLock<HashMap<String, TaskStatus>>>,
    shutdown_rx: broadcast::Receiver<()>,
    manual_rx: mpsc::Receiver<ManualTrigger>,
    manual_tx: mpsc::Sender<ManualTrigger>,
}

impl SyncScheduler {
    pub fn new(
        config: SchedulerConfig,
        tasks: Vec<Arc<dyn ScheduledTask>>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (manual_tx, manual_rx) = mpsc::channel(32);

        let status = tasks
            .iter()
            .map(|t| (t.name().to_string(), TaskStatus::default()))
            .collect();

        Self {
            config,
            tasks,
            status: Arc::new(RwLock::new(status)),
            shutdown_rx,
            manual_rx,
            manual_tx,
        }
    }

    /// Handle for triggering a task out of schedule
    pub fn manual_trigger_handle(&self) -> ManualTriggerHandle {
        ManualTriggerHandle {
            tx: self.manual_tx.clone(),
        }
    }

    pub async fn get_status(&self) -> HashMap<String, TaskStatus> {
        self.status.read().await.clone()
    }

    /// Run until the shutdown signal fires
    pub async fn run(mut self) {
        info!(tasks = self.tasks.len(), "Starting sync scheduler");

        if self.config.initial_delay_secs > 0 {
            debug!(
                delay_secs = self.config.initial_delay_secs,
                "Waiting for initial delay"
            );
            tokio::time::sleep(Duration::from_secs(self.config.initial_delay_secs)).await;
        }

        let mut handles = Vec::new();
        let (task_shutdown_tx, _) = broadcast::channel::<()>(1);

        for task in &self.tasks {
            let task = task.clone();
            let status = self.status.clone();
            let config = self.config.clone();
            let task_shutdown_rx = task_shutdown_tx.subscribe();

            handles.push(tokio::spawn(async move {
                Self::run_task_loop(task, status, config, task_shutdown_rx).await;
            }));
        }

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping sync scheduler");
                    let _ = task_shutdown_tx.send(());
                    break;
                }
                Some(request) = self.manual_rx.recv() => {
                    self.handle_manual_trigger(request).await;
                }
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("Sync scheduler stopped");
    }

    fn jitter(config: &SchedulerConfig) -> u64 {
        if config.jitter_secs > 0 {
            rand::thread_rng().gen_range(0..config.jitter_secs)
        } else {
            0
        }
    }

    async fn run_task_loop(
        task: Arc<dyn ScheduledTask>,
        status: Arc<RwLock<HashMap<String, TaskStatus>>>,
        config: SchedulerConfig,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let name = task.name().to_string();
        let interval = task.interval();

        info!(task = name, "Performing initial run");
        Self::perform_run(&task, &status, &config).await;

        let jitter = Self::jitter(&config);
        let first_tick = Instant::now() + interval + Duration::from_secs(jitter);
        debug!(
            task = name,
            interval_secs = interval.as_secs(),
            jitter_secs = jitter,
            "Scheduled next run"
        );

        let mut timer = interval_at(first_tick, interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(task = name, "Scheduled task shutting down");
                    break;
                }
                _ = timer.tick() => {
                    let jitter = Self::jitter(&config);
                    if jitter > 0 {
                        tokio::time::sleep(Duration::from_secs(jitter)).await;
                    }

                    info!(task = name, "Performing scheduled run");
                    Self::perform_run(&task, &status, &config).await;
                }
            }
        }
    }

    async fn perform_run(
        task: &Arc<dyn ScheduledTask>,
        status: &Arc<RwLock<HashMap<String, TaskStatus>>>,
        config: &SchedulerConfig,
    ) {
        let name = task.name().to_string();

        {
            let mut status_map = status.write().await;
            if let Some(s) = status_map.get_mut(&name) {
                s.in_progress = true;
            }
        }

        let mut run = task.run();
        let result =
            match tokio::time::timeout(Duration::from_secs(config.sync_timeout_secs), &mut run)
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        task = name,
                        timeout_secs = config.sync_timeout_secs,
                        "Scheduled run is overrunning, waiting for it to finish"
                    );
                    run.await
                }
            };

        let mut status_map = status.write().await;
        if let Some(s) = status_map.get_mut(&name) {
            s.in_progress = false;
            s.last_run = Some(std::time::SystemTime::now());

            match result {
                Ok(outcome) => {
                    if outcome.skipped {
                        debug!(task = name, "Run skipped (all resources fresh)");
                    } else {
                        info!(
                            task = name,
                            changed = outcome.records_changed,
                            errors = outcome.errors,
                            jobs_enqueued = outcome.jobs_enqueued,
                            "Scheduled run completed"
                        );
                    }
                    s.last_result = Some(Ok(outcome));
                }
                Err(err) => {
                    warn!(task = name, error = %err, "Scheduled run failed");
                    s.last_result = Some(Err(err.to_string()));
                }
            }

            s.next_run = Some(std::time::SystemTime::now() + task.interval());
        }
    }

    async fn handle_manual_trigger(&self, request: ManualTrigger) {
        let task = self.tasks.iter().find(|t| t.name() == request.task_name);

        match task {
            Some(task) => {
                info!(task = request.task_name, "Manual run triggered");
                Self::perform_run(task, &self.status, &self.config).await;

                let status_map = self.status.read().await;
                if let Some(status) = status_map.get(&request.task_name) {
                    let result = match &status.last_result {
                        Some(Ok(outcome)) => Ok(outcome.clone()),
                        Some(Err(e)) => Err(AppError::Internal(e.clone())),
                        None => Err(AppError::Internal("No result available".to_string())),
                    };
                    let _ = request.response.send(result).await;
                }
            }
            None => {
                warn!(task = request.task_name, "Manual run requested for unknown task");
                let _ = request
                    .response
                    .send(Err(AppError::Validation(format!(
                        "Unknown scheduled task: {}",
                        request.task_name
                    ))))
                    .await;
            }
        }
    }
}

/// Handle for triggering manual runs
#[derive(Clone)]
pub struct ManualTriggerHandle {
    tx: mpsc::Sender<ManualTrigger>,
}

impl ManualTriggerHandle {
    pub async fn trigger(&self, task_name: &str) -> Result<TriggerOutcome, AppError> {
        let (response_tx, mut response_rx) = mpsc::channel(1);

        self.tx
            .send(ManualTrigger {
                task_name: task_name.to_string(),
                response: response_tx,
            })
            .await
            .map_err(|_| AppError::Internal("Scheduler not running".to_string()))?;

        response_rx
            .recv()
            .await
            .ok_or_else(|| AppError::Internal("No response from scheduler".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::timeout;

    /// Counts invocations and returns a configurable result
    struct CountingTask {
        name: String,
        interval: Duration,
        runs: Arc<AtomicU32>,
        fail: bool,
        delay: Duration,
    }

    impl CountingTask {
        fn new(name: &str, interval_secs: u64) -> Self {
            Self {
                name: name.to_string(),
                interval: Duration::from_secs(interval_secs),
                runs: Arc::new(AtomicU32::new(0)),
                fail: false,
                delay: Duration::ZERO,
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn slow(mut self, secs: u64) -> Self {
            self.delay = Duration::from_secs(secs);
            self
        }

        fn runs(&self) -> Arc<AtomicU32> {
            self.runs.clone()
        }
    }

    #[async_trait]
    impl ScheduledTask for CountingTask {
        fn name(&self) -> &str {
            &self.name
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn run(&self) -> Result<TriggerOutcome, AppError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(AppError::Sync(SyncError::ServerError(503)));
            }
            Ok(TriggerOutcome {
                records_changed: 7,
                ..Default::default()
            })
        }
    }

    fn immediate() -> SchedulerConfig {
        SchedulerConfig {
            initial_delay_secs: 0,
            jitter_secs: 0,
            sync_timeout_secs: 10,
        }
    }

    // Test 1: Initial run on startup
    #[tokio::test]
    async fn test_initial_run_on_startup() {
        let task = CountingTask::new("incremental:bills", 3600);
        let runs = task.runs();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let scheduler = SyncScheduler::new(immediate(), vec![Arc::new(task)], shutdown_rx);
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
        let _ = timeout(Duration::from_secs(1), handle).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    // Test 2: Interval is respected
    #[tokio::test]
    async fn test_run_interval() {
        tokio::time::pause();

        let task = CountingTask::new("incremental:bills", 100);
        let runs = task.runs();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let scheduler = SyncScheduler::new(
            SchedulerConfig {
                sync_timeout_secs: 60,
                ..immediate()
            },
            vec![Arc::new(task)],
            shutdown_rx,
        );
        let handle = tokio::spawn(scheduler.run());

        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(101)).await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        shutdown_tx.send(()).unwrap();
        let _ = handle.await;
    }

    // Test 3: Graceful shutdown
    #[tokio::test]
    async fn test_graceful_shutdown() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let scheduler = SyncScheduler::new(
            immediate(),
            vec![Arc::new(CountingTask::new("stale:bills", 3600))],
            shutdown_rx,
        );
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        assert!(timeout(Duration::from_secs(2), handle).await.is_ok());
    }

    // Test 4: Manual trigger runs the task again
    #[tokio::test]
    async fn test_manual_trigger() {
        let task = CountingTask::new("priority:bills", 3600);
        let runs = task.runs();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let scheduler = SyncScheduler::new(immediate(), vec![Arc::new(task)], shutdown_rx);
        let manual = scheduler.manual_trigger_handle();
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let before = runs.load(Ordering::SeqCst);

        let outcome = manual.trigger("priority:bills").await.unwrap();
        assert_eq!(outcome.records_changed, 7);
        assert_eq!(runs.load(Ordering::SeqCst), before + 1);

        shutdown_tx.send(()).unwrap();
        let _ = handle.await;
    }

    // Test 5: Unknown task name
    #[tokio::test]
    async fn test_manual_trigger_unknown_task() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let scheduler = SyncScheduler::new(
            immediate(),
            vec![Arc::new(CountingTask::new("incremental:bills", 3600))],
            shutdown_rx,
        );
        let manual = scheduler.manual_trigger_handle();
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let result = manual.trigger("full:hearings").await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        shutdown_tx.send(()).unwrap();
        let _ = handle.await;
    }

    // Test 6: Failed runs are recorded in status
    #[tokio::test]
    async fn test_failure_recorded_in_status() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let scheduler = SyncScheduler::new(
            immediate(),
            vec![Arc::new(CountingTask::new("incremental:members", 3600).failing())],
            shutdown_rx,
        );
        let status_ref = scheduler.status.clone();
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(100)).await;

        {
            let status = status_ref.read().await;
            let task_status = status.get("incremental:members").unwrap();
            assert!(task_status.last_run.is_some());
            assert!(!task_status.in_progress);
            assert!(matches!(&task_status.last_result, Some(Err(msg)) if msg.contains("503")));
        }

        shutdown_tx.send(()).unwrap();
        let _ = handle.await;
    }

    // Test 7: Runs exceeding the timeout keep going until they finish
    #[tokio::test]
    async fn test_overrunning_run_completes() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = CountingTask::new("full:bills", 3600).slow(2);
        let runs = task.runs();
        let scheduler = SyncScheduler::new(
            SchedulerConfig {
                sync_timeout_secs: 1,
                ..immediate()
            },
            vec![Arc::new(task)],
            shutdown_rx,
        );
        let status_ref = scheduler.status.clone();
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_millis(1500)).await;

        {
            let status = status_ref.read().await;
            let task_status = status.get("full:bills").unwrap();
            assert!(task_status.in_progress);
            assert!(task_status.last_result.is_none());
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;

        {
            let status = status_ref.read().await;
            let task_status = status.get("full:bills").unwrap();
            assert!(!task_status.in_progress);
            assert!(matches!(&task_status.last_result, Some(Ok(_))));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        shutdown_tx.send(()).unwrap();
        let _ = handle.await;
    }

    // Test 8: Config derives from settings
    #[test]
    fn test_config_from_settings() {
        let settings = SchedulerSettings {
            initial_delay_secs: 30,
            jitter_secs: 10,
            sync_timeout_secs: 60,
            ..SchedulerSettings::default()
        };
        let config = SchedulerConfig::from(&settings);

        assert_eq!(config.initial_delay_secs, 30);
        assert_eq!(config.jitter_secs, 10);
        assert_eq!(config.sync_timeout_secs, 60);
    }
}
