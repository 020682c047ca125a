//! HTTP implementation of the [`Fetch`] operation.

use core::time::Duration;
use fetchmux_core::{Error, Fetch, Result};
use futures::future::BoxFuture;

/// Fetches URLs with a plain `GET` and returns the full body as text.
///
/// The response status is not inspected: whatever body the remote returns is
/// what ends up in the batch response. Connection, timeout and read failures
/// are reported as [`Error::Fetch`].
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Builds a fetcher whose requests time out after `timeout`, covering
    /// connect, headers and body.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fetchmux/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(url, e))?;

        let body = response.bytes().await.map_err(|e| fetch_error(url, e))?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

impl Fetch for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.get(url))
    }
}

/// Flattens a `reqwest` error and its sources into a single line.
fn fetch_error(url: &str, err: reqwest::Error) -> Error {
    let err = err.without_url();
    let mut reason = err.to_string();

    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }

    Error::Fetch {
        url: url.to_string(),
        reason,
    }
}
