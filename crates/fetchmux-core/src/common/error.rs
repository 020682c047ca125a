//! Error types for the URL multiplexing service.
//!
//! This module defines the central `Error` enum, which captures every
//! reportable failure of a batch request. It implements [`IntoResponse`] so
//! handlers can return it directly and clients receive exactly one status code
//! and a plain-text body per request.
//!
//! ## Error Cases
//! - `MethodNotAllowed`: The request used a method other than `POST`.
//! - `InvalidRequest`: The request body was not a JSON array of strings.
//! - `TooManyUrls`: The batch exceeded the configured URL limit.
//! - `Fetch`: Fetching one of the URLs failed or timed out.
//! - `Overloaded`: The admission limiter had no free permit.
//! - `ServiceShutdown`: The worker pool is shutting down.
//! - `ChannelError`: An internal communication failure between tasks.
//! - `Serialization`: The aggregated response could not be encoded.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

pub type Result<T> = core::result::Result<T, Error>;

/// Body returned with `400` when a batch holds more URLs than allowed.
pub const UNSUPPORTED_NUMBER_OF_URLS: &str = "unsupported number of urls";

/// Body returned with `503` when the admission limiter rejects a request.
pub const TOO_BUSY: &str = "too busy";

/// Unified error type for the multiplexing service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Only `POST` is served.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// The client request body could not be decoded.
    #[error("{reason}")]
    InvalidRequest { reason: String },

    /// The batch is larger than the configured maximum.
    #[error("unsupported number of urls")]
    TooManyUrls,

    /// A single fetch failed. `reason` carries the transport error text.
    #[error("Get \"{url}\": {reason}")]
    Fetch { url: String, reason: String },

    /// No admission permit was available.
    #[error("too busy")]
    Overloaded,

    /// The worker pool has been shut down.
    #[error("service is shutting down")]
    ServiceShutdown,

    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("channel error: {context}")]
    ChannelError { context: String },

    /// The aggregated response failed to serialize.
    #[error("serialization error: {reason}")]
    Serialization { reason: String },
}

impl Error {
    /// HTTP status code reported for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Error::InvalidRequest { .. } | Error::TooManyUrls => StatusCode::BAD_REQUEST,
            Error::Overloaded | Error::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
            Error::Fetch { .. } | Error::ChannelError { .. } | Error::Serialization { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Error::MethodNotAllowed = self {
            let mut response = status.into_response();
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("POST"));
            return response;
        }
        (status, self.to_string()).into_response()
    }
}
