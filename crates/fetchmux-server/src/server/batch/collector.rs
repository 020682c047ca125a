use super::BatchResponse;
use crate::server::pool::Dispatcher;
use fetchmux_core::{Error, JobOutput, Result};
use std::collections::BTreeMap;
use tokio::sync::mpsc;

/// Waits for `total` job outcomes and assembles them into a [`BatchResponse`].
///
/// Outputs are keyed by the job id (the URL's position in the batch), so the
/// response layout does not depend on which fetch finished first.
///
/// # Errors
///
/// - The first error received is returned immediately. The receivers are
///   dropped on return, which lets jobs that have not started yet skip their
///   fetch; fetches already running finish and their outcome is discarded.
/// - [`Error::ServiceShutdown`] if the pool shuts down while waiting.
/// - [`Error::ChannelError`] if every sender is gone before `total` outputs
///   arrived.
pub async fn collect_outputs(
    total: usize,
    mut results: mpsc::Receiver<JobOutput>,
    mut errors: mpsc::Receiver<Error>,
    dispatcher: &Dispatcher,
) -> Result<BatchResponse> {
    let mut response = BatchResponse::new();
    let mut received = 0;
    let mut results_open = true;
    let mut errors_open = true;

    while received < total {
        tokio::select! {
            biased;
            err = errors.recv(), if errors_open => match err {
                Some(err) => return Err(err),
                None => errors_open = false,
            },
            output = results.recv(), if results_open => match output {
                Some(JobOutput { id, url, body }) => {
                    response.insert(id, BTreeMap::from([(url, body)]));
                    received += 1;
                }
                None => results_open = false,
            },
            () = dispatcher.stopped() => return Err(Error::ServiceShutdown),
        }

        if !results_open && !errors_open {
            return Err(Error::ChannelError {
                context: format!("{} of {total} jobs never completed", total - received),
            });
        }
    }

    Ok(response)
}
