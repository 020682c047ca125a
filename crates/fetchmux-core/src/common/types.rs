//! # Jobs and the fetch operation
//!
//! A [`Job`] is the unit of work routed through the worker pool: one URL of a
//! client batch, the operation that fetches it, and the two sinks its outcome
//! is delivered to. Every job of a batch shares the same sinks, which the
//! request handler drains.
//!
//! Jobs are consumed by value. A worker calls [`Job::execute`] exactly once;
//! nothing is retried.

use crate::Error;
use core::fmt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Channel on which successful job outputs are delivered.
pub type ResultSink = mpsc::Sender<JobOutput>;

/// Channel on which job failures are delivered.
pub type ErrorSink = mpsc::Sender<Error>;

/// The operation a [`Job`] runs against its input.
///
/// The production implementation performs an HTTP GET and reads the full body.
/// Implementations must be cheap to share; a single instance is used by every
/// job of every request.
pub trait Fetch: Send + Sync + 'static {
    /// Fetches `url` and returns the body as text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] when the transfer fails or times out.
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, crate::Result<String>>;
}

/// Successful outcome of a single [`Job`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOutput {
    /// Batch position of the job that produced this output.
    pub id: usize,
    pub url: String,
    pub body: String,
}

/// One fetch task of a client batch.
pub struct Job {
    /// Position of this job within its batch. Not unique across requests.
    pub id: usize,
    /// URL to fetch.
    pub input: String,
    pub results: ResultSink,
    pub errors: ErrorSink,
    pub fetcher: Arc<dyn Fetch>,
}

impl Job {
    pub fn new(
        id: usize,
        input: String,
        results: ResultSink,
        errors: ErrorSink,
        fetcher: Arc<dyn Fetch>,
    ) -> Self {
        Self {
            id,
            input,
            results,
            errors,
            fetcher,
        }
    }

    /// Whether the request that produced this job has stopped listening.
    ///
    /// The handler drops its receivers after the first error, so a closed result
    /// sink means any outcome would be discarded anyway.
    pub fn is_abandoned(&self) -> bool {
        self.results.is_closed()
    }

    /// Runs the fetch and delivers the outcome to the matching sink.
    ///
    /// Abandoned jobs are skipped without fetching. Delivery failures are
    /// ignored since they only happen once the handler has already answered.
    pub async fn execute(self) {
        if self.is_abandoned() {
            return;
        }

        match self.fetcher.fetch(&self.input).await {
            Ok(body) => {
                let output = JobOutput {
                    id: self.id,
                    url: self.input,
                    body,
                };
                let _ = self.results.send(output).await;
            }
            Err(e) => {
                let _ = self.errors.send(e).await;
            }
        }
    }

    /// Reports `err` for this job without running it.
    pub async fn fail(self, err: Error) {
        let _ = self.errors.send(err).await;
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
    }

    impl Fetch for Echo {
        fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, crate::Result<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if url.starts_with("bad") {
                    Err(Error::Fetch {
                        url: url.to_string(),
                        reason: "connection refused".to_string(),
                    })
                } else {
                    Ok(url.to_uppercase())
                }
            })
        }
    }

    fn echo() -> Arc<Echo> {
        Arc::new(Echo {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn delivers_result_to_result_sink() {
        let (results_tx, mut results_rx) = mpsc::channel(1);
        let (errors_tx, mut errors_rx) = mpsc::channel(1);
        let job = Job::new(3, "http://a".into(), results_tx, errors_tx, echo());

        job.execute().await;

        let output = results_rx.recv().await.unwrap();
        assert_eq!(
            output,
            JobOutput {
                id: 3,
                url: "http://a".into(),
                body: "HTTP://A".into()
            }
        );
        assert!(errors_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivers_failure_to_error_sink() {
        let (results_tx, mut results_rx) = mpsc::channel(1);
        let (errors_tx, mut errors_rx) = mpsc::channel(1);
        let job = Job::new(0, "bad://x".into(), results_tx, errors_tx, echo());

        job.execute().await;

        let err = errors_rx.recv().await.unwrap();
        assert!(matches!(err, Error::Fetch { .. }));
        assert!(results_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn skips_abandoned_jobs() {
        let fetcher = echo();
        let (results_tx, results_rx) = mpsc::channel(1);
        let (errors_tx, _errors_rx) = mpsc::channel(1);
        drop(results_rx);

        let job = Job::new(0, "http://a".into(), results_tx, errors_tx, fetcher.clone());
        assert!(job.is_abandoned());
        job.execute().await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
