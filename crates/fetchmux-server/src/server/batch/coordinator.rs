use crate::server::pool::Dispatcher;
use fetchmux_core::{ErrorSink, Fetch, Job, ResultSink};
use std::sync::Arc;

/// Turns `urls` into jobs and submits them to the `dispatcher` in batch
/// order.
///
/// Every job shares the same `results` and `errors` sinks and `fetcher`. The
/// job id is the URL's position in the batch.
///
/// If the dispatcher refuses a job (it is shutting down), the refusal is
/// reported on `errors` and the remaining URLs are not submitted. The sinks are
/// dropped when this returns, so once every submitted job has finished the
/// collector observes closed channels rather than waiting forever.
pub async fn feed_jobs(
    urls: Vec<String>,
    dispatcher: Arc<Dispatcher>,
    fetcher: Arc<dyn Fetch>,
    results: ResultSink,
    errors: ErrorSink,
) {
    for (id, url) in urls.into_iter().enumerate() {
        let job = Job::new(
            id,
            url,
            results.clone(),
            errors.clone(),
            Arc::clone(&fetcher),
        );

        if let Err(e) = dispatcher.submit(job).await {
            tracing::warn!("Failed to submit job {id}: {e}");
            // Best effort: the handler may already have answered.
            let _ = errors.send(e).await;
            return;
        }
    }
}
