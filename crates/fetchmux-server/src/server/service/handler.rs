//! HTTP entry point of the URL multiplexer.
//!
//! [`MultiplexService`] holds everything a request needs: the shared
//! [`Dispatcher`], the [`Fetch`] implementation jobs run, and the batch limit.
//! [`multiplex`] is the axum handler bound to `/`.
//!
//! ## Request flow
//!
//! 1. Validate: method, then body, then batch size. The first failure is
//!    returned and nothing is submitted. The method is checked before any of
//!    the body is read.
//! 2. Fan out: a spawned task submits one job per URL so the handler can start
//!    draining outcomes immediately.
//! 3. Fan in: wait for one outcome per URL, answering `500` on the first
//!    failure without waiting for the rest.

use crate::server::{
    batch::{BatchResponse, collector::collect_outputs, coordinator::feed_jobs},
    pool::Dispatcher,
    telemetry::{
        increment_fetch_errors, increment_requests, record_request_duration,
        record_urls_per_request,
    },
};
use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use core::time::Duration;
use fetchmux_core::{Error, Fetch, Result};
use std::{sync::Arc, time::Instant};
use tokio::{sync::mpsc, time::timeout};

/// Largest request body accepted. A batch at the default URL limit is a tiny
/// fraction of this.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Default deadline for receiving the whole request body.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state of the multiplexing endpoint.
#[derive(Clone)]
pub struct MultiplexService {
    dispatcher: Arc<Dispatcher>,
    fetcher: Arc<dyn Fetch>,
    max_urls: usize,
    read_timeout: Duration,
}

impl MultiplexService {
    pub fn new(dispatcher: Arc<Dispatcher>, fetcher: Arc<dyn Fetch>, max_urls: usize) -> Self {
        Self {
            dispatcher,
            fetcher,
            max_urls,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Sets the deadline for receiving the request body.
    #[must_use]
    pub const fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Validates a raw request and decodes its URL batch.
    ///
    /// # Errors
    ///
    /// - [`Error::MethodNotAllowed`] for anything but `POST`.
    /// - [`Error::InvalidRequest`] with the decoder message for a body that is
    ///   not a JSON array of strings.
    /// - [`Error::TooManyUrls`] when the batch exceeds the configured limit.
    pub fn decode(&self, method: &Method, body: &[u8]) -> Result<Vec<String>> {
        if *method != Method::POST {
            return Err(Error::MethodNotAllowed);
        }

        // `null` decodes as an empty batch.
        let urls: Vec<String> = serde_json::from_slice::<Option<Vec<String>>>(body)
            .map_err(|e| Error::InvalidRequest {
                reason: e.to_string(),
            })?
            .unwrap_or_default();

        if urls.len() > self.max_urls {
            return Err(Error::TooManyUrls);
        }

        Ok(urls)
    }

    /// Fetches every URL through the worker pool.
    ///
    /// # Errors
    ///
    /// Returns the first job failure, or [`Error::ServiceShutdown`] when the
    /// pool stops while the batch is pending.
    #[tracing::instrument(skip_all, fields(urls = urls.len()))]
    pub async fn fetch_all(&self, urls: Vec<String>) -> Result<BatchResponse> {
        let total = urls.len();
        if total == 0 {
            return Ok(BatchResponse::new());
        }

        // Sized so that a job never waits to deliver its single outcome.
        let (results_tx, results_rx) = mpsc::channel(total);
        let (errors_tx, errors_rx) = mpsc::channel(total);

        tokio::spawn(feed_jobs(
            urls,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.fetcher),
            results_tx,
            errors_tx,
        ));

        collect_outputs(total, results_rx, errors_rx, &self.dispatcher).await
    }

    /// Buffers the request body, bounded in size and in time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the body is larger than
    /// [`MAX_BODY_BYTES`], fails mid-stream, or is not complete within the read
    /// timeout.
    pub async fn read_body(&self, body: Body) -> Result<Bytes> {
        match timeout(self.read_timeout, to_bytes(body, MAX_BODY_BYTES)).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(Error::InvalidRequest {
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::InvalidRequest {
                reason: "timed out reading request body".to_string(),
            }),
        }
    }

    /// Full request path: validate, fan out, fan in, render.
    pub async fn handle(&self, method: &Method, body: Body) -> Result<Response> {
        if *method != Method::POST {
            return Err(Error::MethodNotAllowed);
        }

        let body = self.read_body(body).await?;
        let urls = self.decode(method, &body)?;
        record_urls_per_request(urls.len() as f64);

        let response = self.fetch_all(urls).await?;
        let json = serde_json::to_vec(&response).map_err(|e| Error::Serialization {
            reason: e.to_string(),
        })?;

        Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            json,
        )
            .into_response())
    }
}

/// axum handler for `/`.
///
/// Accepts every method so that non-`POST` requests get `405` with
/// `Allow: POST` from the same validation path. The body is taken unbuffered
/// so that nothing is read before the method is checked.
pub async fn multiplex(
    State(service): State<MultiplexService>,
    method: Method,
    body: Body,
) -> Response {
    let start = Instant::now();
    increment_requests();

    let response = match service.handle(&method, body).await {
        Ok(response) => response,
        Err(e) => {
            if let Error::Fetch { .. } = e {
                increment_fetch_errors();
            }
            tracing::debug!("Request failed with {}: {e}", e.status());
            e.into_response()
        }
    };

    record_request_duration(start.elapsed().as_millis() as f64);
    response
}
