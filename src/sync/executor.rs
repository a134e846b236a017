//! Bounded parallel executor
//!
//! Runs independent async operations under a concurrency ceiling with an
//! optional minimum spacing between operation starts and a bounded,
//! classification-free retry per operation. Results are placed by input index.

use futures::stream::{self, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::ExecutorConfig;

/// A permanently failed operation
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionFailure<E> {
    pub index: usize,
    pub error: E,
}

/// Aggregated outcome of a batch
#[derive(Debug)]
pub struct ExecutionReport<T, E> {
    /// Index-aligned with the inputs; `None` where the operation failed
    pub results: Vec<Option<T>>,
    pub failures: Vec<ExecutionFailure<E>>,
    pub completed: usize,
    pub failed: usize,
}

impl<T, E> ExecutionReport<T, E> {
    fn with_len(len: usize) -> Self {
        Self {
            results: (0..len).map(|_| None).collect(),
            failures: Vec::new(),
            completed: 0,
            failed: 0,
        }
    }

    fn absorb(&mut self, offset: usize, other: ExecutionReport<T, E>) {
        for (i, result) in other.results.into_iter().enumerate() {
            if result.is_some() {
                self.results[offset + i] = result;
            }
        }
        self.failures
            .extend(other.failures.into_iter().map(|f| ExecutionFailure {
                index: offset + f.index,
                error: f.error,
            }));
        self.completed += other.completed;
        self.failed += other.failed;
    }
}

/// Bounded parallel executor
#[derive(Debug, Clone)]
pub struct ParallelExecutor {
    config: ExecutorConfig,
}

impl ParallelExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `operation` over every input with at most `concurrency` in flight
    pub async fn execute<I, F, Fut, T, E>(&self, inputs: Vec<I>, operation: F) -> ExecutionReport<T, E>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let total = inputs.len();
        let mut report = ExecutionReport::with_len(total);
        if total == 0 {
            return report;
        }

        let concurrency = self.config.concurrency.max(1);
        let last_start: Mutex<Option<Instant>> = Mutex::new(None);
        let operation = &operation;
        let last_start = &last_start;

        debug!(total = total, concurrency = concurrency, "Executing batch");

        let outcomes: Vec<(usize, Result<T, E>)> = stream::iter(inputs.into_iter().enumerate())
            .map(|(index, input)| async move {
                self.wait_for_start_slot(last_start).await;
                (index, self.run_with_retries(index, input, operation).await)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (index, outcome) in outcomes {
            match outcome {
                Ok(value) => {
                    report.results[index] = Some(value);
                    report.completed += 1;
                }
                Err(error) => {
                    report.failures.push(ExecutionFailure { index, error });
                    report.failed += 1;
                }
            }
        }
        report.failures.sort_by_key(|f| f.index);

        debug!(
            completed = report.completed,
            failed = report.failed,
            "Batch finished"
        );

        report
    }

    /// Run inputs in sequential chunks of `chunk_size`, pausing between chunks
    pub async fn execute_chunked<I, F, Fut, T, E>(
        &self,
        inputs: Vec<I>,
        operation: F,
    ) -> ExecutionReport<T, E>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let total = inputs.len();
        let chunk_size = self.config.chunk_size.max(1);
        let mut report = ExecutionReport::with_len(total);

        let mut offset = 0;
        let mut remaining = inputs;
        while !remaining.is_empty() {
            let rest = remaining.split_off(chunk_size.min(remaining.len()));
            let chunk = std::mem::replace(&mut remaining, rest);
            let chunk_len = chunk.len();

            debug!(offset = offset, size = chunk_len, total = total, "Executing chunk");
            let chunk_report = self.execute(chunk, &operation).await;
            report.absorb(offset, chunk_report);
            offset += chunk_len;

            if !remaining.is_empty() && self.config.chunk_pause_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.chunk_pause_ms)).await;
            }
        }

        report
    }

    async fn wait_for_start_slot(&self, last_start: &Mutex<Option<Instant>>) {
        if self.config.start_delay_ms == 0 {
            return;
        }

        let spacing = Duration::from_millis(self.config.start_delay_ms);
        let mut last = last_start.lock().await;
        if let Some(previous) = *last {
            let next = previous + spacing;
            if next > Instant::now() {
                tokio::time::sleep_until(next).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn run_with_retries<I, F, Fut, T, E>(&self, index: usize, input: I, operation: &F) -> Result<T, E>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0u32;
        loop {
            match operation(input.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        index = index,
                        attempt = attempt,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
