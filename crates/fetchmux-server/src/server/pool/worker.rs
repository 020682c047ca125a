use fetchmux_core::Job;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Private job channel of a single worker.
///
/// The routing loop receives a clone of this sender every time the worker
/// announces itself as idle.
pub type Inbox = mpsc::Sender<Job>;

/// Worker task that executes [`Job`]s one at a time.
///
/// Whenever idle, the worker publishes its own inbox on the pool-wide
/// availability queue and then waits for either a job on that inbox or the
/// stop signal. Because it only announces itself after finishing the previous
/// job, it is never listed as available while executing.
///
/// # Arguments
///
/// - `worker_id`: Numeric identifier for this worker (used for logs).
/// - `available`: Sender half of the shared availability queue.
/// - `stop`: Pool-wide stop signal.
///
/// # Shutdown
///
/// A job already sitting in the inbox is executed before the stop signal is
/// honoured. An availability announcement that was never consumed is simply
/// discarded with the channel.
pub async fn worker_loop(worker_id: usize, available: mpsc::Sender<Inbox>, stop: CancellationToken) {
    tracing::trace!("Worker {worker_id} started");

    let (inbox_tx, mut inbox_rx) = mpsc::channel::<Job>(1);

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            sent = available.send(inbox_tx.clone()) => {
                if sent.is_err() {
                    tracing::debug!("Worker {worker_id} availability queue closed");
                    break;
                }
            }
        }

        let job = tokio::select! {
            biased;
            job = inbox_rx.recv() => job,
            () = stop.cancelled() => None,
        };

        let Some(job) = job else {
            break;
        };

        tracing::trace!("Worker {worker_id} executing job {} ({})", job.id, job.input);
        job.execute().await;
        crate::server::telemetry::increment_jobs_executed();
    }

    tracing::trace!("Worker {worker_id} stopped");
}
