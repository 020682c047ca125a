//! Bounded worker pool for fetch jobs.
//!
//! This module defines the [`Dispatcher`], which owns a fixed set of worker
//! tasks and a single routing task. Jobs are never pushed blindly at a worker.
//! Instead, routing goes through two blocking hand-offs:
//!
//! 1. Handlers place [`Job`]s on the bounded submission queue.
//! 2. Idle workers place their private inbox on the availability queue.
//!
//! The routing loop takes one job, then takes one idle inbox, and forwards the
//! job there. A job therefore only ever reaches a worker that has freshly
//! announced that it is idle, and no task polls.
//!
//! Shutdown is coordinated through a shared [`CancellationToken`] and all pool
//! tasks are tracked by a [`TaskTracker`].

use super::worker::{Inbox, worker_loop};
use core::time::Duration;
use fetchmux_core::{Error, Job, Result};
use tokio::{sync::mpsc, time::timeout};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Handle to the worker pool.
///
/// Cheap to share behind an `Arc`; every request handler submits through the
/// same instance.
#[derive(Debug)]
pub struct Dispatcher {
    submissions: mpsc::Sender<Job>,
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
    num_workers: usize,
    shutdown_timeout: Duration,
}

impl Dispatcher {
    /// Spawns `num_workers` workers and the routing loop on the current Tokio
    /// runtime.
    ///
    /// `queue_capacity` is the number of jobs that can be submitted before
    /// [`submit`](Self::submit) starts waiting for the routing loop.
    ///
    /// # Panics
    ///
    /// Panics if `num_workers` or `queue_capacity` is zero.
    pub fn start(num_workers: usize, queue_capacity: usize, shutdown_timeout: Duration) -> Self {
        assert!(num_workers > 0, "worker pool needs at least one worker");

        let (submissions_tx, submissions_rx) = mpsc::channel(queue_capacity);
        // Each worker has at most one outstanding announcement, so sending on
        // the availability queue never waits.
        let (available_tx, available_rx) = mpsc::channel(num_workers);
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        for worker_id in 0..num_workers {
            tracker.spawn(worker_loop(
                worker_id,
                available_tx.clone(),
                shutdown_token.child_token(),
            ));
        }
        drop(available_tx);

        tracker.spawn(route_jobs(
            submissions_rx,
            available_rx,
            shutdown_token.child_token(),
        ));
        tracker.close();

        tracing::debug!("Started worker pool with {num_workers} workers");

        Self {
            submissions: submissions_tx,
            shutdown_token,
            tracker,
            num_workers,
            shutdown_timeout,
        }
    }

    /// Number of workers in the pool.
    pub const fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Resolves once the pool starts shutting down.
    pub async fn stopped(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// Places `job` on the submission queue.
    ///
    /// Returns immediately while the queue has room, otherwise waits until the
    /// routing loop drains it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] if the pool is shutting down. The job
    /// is dropped in that case.
    pub async fn submit(&self, job: Job) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        tokio::select! {
            biased;
            () = self.shutdown_token.cancelled() => Err(Error::ServiceShutdown),
            sent = self.submissions.send(job) => sent.map_err(|_| Error::ServiceShutdown),
        }
    }

    /// Stops every worker and the routing loop.
    ///
    /// - Cancels the shared [`CancellationToken`] so no new job is accepted.
    /// - Jobs already handed to a worker run to completion.
    /// - Jobs still waiting in the submission queue may never run.
    /// - Waits up to the configured shutdown timeout for all tasks to exit.
    ///
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating worker pool shutdown");
        self.shutdown_token.cancel();

        match timeout(self.shutdown_timeout, self.tracker.wait()).await {
            Ok(()) => tracing::info!("Worker pool shutdown complete"),
            Err(_) => tracing::warn!(
                "Worker pool shutdown timed out ({} tasks still running)",
                self.tracker.len()
            ),
        }
    }
}

/// Routing loop: pairs each submitted job with the next idle worker.
async fn route_jobs(
    mut submissions: mpsc::Receiver<Job>,
    mut available: mpsc::Receiver<Inbox>,
    stop: CancellationToken,
) {
    tracing::trace!("Routing loop started");

    loop {
        let job = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            job = submissions.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let inbox = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            inbox = available.recv() => match inbox {
                Some(inbox) => inbox,
                None => {
                    job.fail(Error::ServiceShutdown).await;
                    break;
                }
            },
        };

        // The worker announced itself with an empty inbox of capacity one.
        if let Err(e) = inbox.try_send(job) {
            let (mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job)) = e;
            tracing::warn!("Failed to hand job {} to worker", job.id);
            job.fail(Error::ChannelError {
                context: "worker inbox unavailable".to_string(),
            })
            .await;
        }
    }

    tracing::trace!("Routing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchmux_core::{Fetch, JobOutput};
    use futures::future::BoxFuture;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use tokio::sync::Semaphore;

    /// Records how many fetches run at the same time.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
        total: AtomicUsize,
    }

    impl Fetch for Gauge {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, fetchmux_core::Result<String>> {
            Box::pin(async move {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                self.total.fetch_add(1, Ordering::SeqCst);
                Ok(url.to_string())
            })
        }
    }

    fn channels(
        n: usize,
    ) -> (
        (mpsc::Sender<JobOutput>, mpsc::Receiver<JobOutput>),
        (mpsc::Sender<Error>, mpsc::Receiver<Error>),
    ) {
        (mpsc::channel(n), mpsc::channel(n))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn never_runs_more_jobs_than_workers() {
        const WORKERS: usize = 3;
        const JOBS: usize = 60;

        let gauge = Arc::new(Gauge::default());
        let dispatcher = Dispatcher::start(WORKERS, 4, Duration::from_secs(1));
        let ((results_tx, mut results_rx), (errors_tx, _errors_rx)) = channels(JOBS);

        for id in 0..JOBS {
            let job = Job::new(
                id,
                format!("http://host/{id}"),
                results_tx.clone(),
                errors_tx.clone(),
                gauge.clone(),
            );
            dispatcher.submit(job).await.unwrap();
        }

        let mut seen = vec![false; JOBS];
        for _ in 0..JOBS {
            let output = results_rx.recv().await.unwrap();
            assert!(!seen[output.id], "job {} delivered twice", output.id);
            seen[output.id] = true;
        }

        assert!(seen.iter().all(|s| *s));
        assert_eq!(gauge.total.load(Ordering::SeqCst), JOBS);
        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= WORKERS, "peak concurrency {peak}");

        dispatcher.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submit_after_shutdown_fails() {
        let dispatcher = Dispatcher::start(2, 2, Duration::from_secs(1));
        dispatcher.shutdown().await;
        assert!(dispatcher.is_shutdown());

        let ((results_tx, _results_rx), (errors_tx, _errors_rx)) = channels(1);
        let job = Job::new(
            0,
            "http://a".into(),
            results_tx,
            errors_tx,
            Arc::new(Gauge::default()),
        );
        assert_eq!(dispatcher.submit(job).await, Err(Error::ServiceShutdown));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_lets_running_jobs_finish() {
        struct Slow;
        impl Fetch for Slow {
            fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, fetchmux_core::Result<String>> {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(url.to_string())
                })
            }
        }

        let dispatcher = Dispatcher::start(1, 1, Duration::from_secs(2));
        let ((results_tx, mut results_rx), (errors_tx, _errors_rx)) = channels(1);
        let job = Job::new(0, "http://a".into(), results_tx, errors_tx, Arc::new(Slow));
        dispatcher.submit(job).await.unwrap();

        // Give the routing loop time to hand the job over.
        tokio::time::sleep(Duration::from_millis(30)).await;
        dispatcher.shutdown().await;

        let output = results_rx.recv().await.unwrap();
        assert_eq!(output.url, "http://a");
    }

    /// Blocks every fetch until the gate opens.
    struct Gated {
        started: mpsc::Sender<()>,
        gate: Semaphore,
    }

    impl Fetch for Gated {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, fetchmux_core::Result<String>> {
            Box::pin(async move {
                let _ = self.started.send(()).await;
                let _permit = self.gate.acquire().await;
                Ok(url.to_string())
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn submit_waits_once_the_queue_is_full() {
        let (started_tx, mut started_rx) = mpsc::channel(8);
        let gated = Arc::new(Gated {
            started: started_tx,
            gate: Semaphore::new(0),
        });
        let dispatcher = Arc::new(Dispatcher::start(1, 1, Duration::from_secs(1)));
        let ((results_tx, mut results_rx), (errors_tx, _errors_rx)) = channels(4);
        let job = |id: usize| {
            Job::new(
                id,
                format!("http://host/{id}"),
                results_tx.clone(),
                errors_tx.clone(),
                gated.clone(),
            )
        };

        // The only worker is busy with job 0.
        dispatcher.submit(job(0)).await.unwrap();
        started_rx.recv().await.unwrap();

        // Job 1 is held by the routing loop, job 2 fills the queue.
        dispatcher.submit(job(1)).await.unwrap();
        dispatcher.submit(job(2)).await.unwrap();

        let blocked = {
            let dispatcher = Arc::clone(&dispatcher);
            let job = job(3);
            tokio::spawn(async move { dispatcher.submit(job).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!blocked.is_finished(), "submit returned while the queue was full");

        gated.gate.add_permits(16);
        assert_eq!(blocked.await.unwrap(), Ok(()));

        let mut ids: Vec<usize> = Vec::new();
        for _ in 0..4 {
            ids.push(results_rx.recv().await.unwrap().id);
        }
        ids.sort_unstable();
        assert_eq!(ids, [0, 1, 2, 3]);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn job_without_workers_fails_through_its_error_sink() {
        let (submit_tx, submit_rx) = mpsc::channel(1);
        let (available_tx, available_rx) = mpsc::channel::<Inbox>(1);
        // No worker will ever announce itself.
        drop(available_tx);

        let ((results_tx, _results_rx), (errors_tx, mut errors_rx)) = channels(1);
        let job = Job::new(
            0,
            "http://a".into(),
            results_tx,
            errors_tx,
            Arc::new(Gauge::default()),
        );
        submit_tx.send(job).await.unwrap();

        route_jobs(submit_rx, available_rx, CancellationToken::new()).await;

        assert_eq!(errors_rx.recv().await, Some(Error::ServiceShutdown));
    }

    #[tokio::test]
    async fn job_for_a_closed_inbox_fails_through_its_error_sink() {
        let (submit_tx, submit_rx) = mpsc::channel(1);
        let (available_tx, available_rx) = mpsc::channel::<Inbox>(1);
        let (inbox_tx, inbox_rx) = mpsc::channel::<Job>(1);
        drop(inbox_rx);
        available_tx.send(inbox_tx).await.unwrap();

        let gauge = Arc::new(Gauge::default());
        let ((results_tx, _results_rx), (errors_tx, mut errors_rx)) = channels(1);
        let job = Job::new(0, "http://a".into(), results_tx, errors_tx, gauge.clone());
        submit_tx.send(job).await.unwrap();
        drop(submit_tx);

        route_jobs(submit_rx, available_rx, CancellationToken::new()).await;

        assert!(matches!(
            errors_rx.recv().await,
            Some(Error::ChannelError { .. })
        ));
        assert_eq!(gauge.total.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_is_idempotent() {
        let dispatcher = Dispatcher::start(2, 2, Duration::from_secs(1));
        dispatcher.shutdown().await;
        dispatcher.shutdown().await;
        assert!(dispatcher.is_shutdown());
    }
}
