use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `fetchmux-server` binary.
///
/// These settings control admission, batch limits, fetch timeouts and the
/// size of the worker pool. All values are parsed from CLI arguments or
/// environment variables (a `.env` file is loaded first), with defaults
/// suitable for a small deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fetchmux-server",
    version,
    about = "An HTTP service that fetches batches of URLs through a bounded worker pool"
)]
pub struct CliArgs {
    /// TCP address the server will bind to.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(short = 'b', long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Maximum number of client requests served at the same time.
    ///
    /// Requests beyond this limit are rejected immediately with `503`. `0`
    /// disables the limit, leaving the server bound by system resources.
    ///
    /// Environment variable: `MAX_CONNECTIONS`
    #[arg(short = 'c', long, env = "MAX_CONNECTIONS", default_value_t = 100)]
    pub max_connections: usize,

    /// Maximum number of URLs accepted in a single request.
    ///
    /// Environment variable: `MAX_URLS`
    #[arg(short = 'u', long, env = "MAX_URLS", default_value_t = 20)]
    pub max_urls: usize,

    /// Timeout for each individual fetch, in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[arg(short = 't', long, env = "REQUEST_TIMEOUT", default_value_t = 1)]
    pub request_timeout: u64,

    /// Number of worker tasks executing fetches concurrently.
    ///
    /// This bounds the number of outgoing requests across all clients.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(short = 'w', long, env = "NUM_WORKERS", default_value_t = 4)]
    pub num_workers: usize,

    /// Capacity of the job submission queue in front of the worker pool.
    ///
    /// Submitting handlers only wait once this many jobs are queued.
    ///
    /// Environment variable: `QUEUE_CAPACITY`
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 64)]
    pub queue_capacity: usize,

    /// Seconds a client gets to send the complete request head.
    ///
    /// Environment variable: `READ_HEADER_TIMEOUT`
    #[arg(long, env = "READ_HEADER_TIMEOUT", default_value_t = 5)]
    pub read_header_timeout: u64,

    /// Seconds a client gets to send the complete request body.
    ///
    /// Environment variable: `READ_TIMEOUT`
    #[arg(long, env = "READ_TIMEOUT", default_value_t = 10)]
    pub read_timeout: u64,

    /// Seconds allowed for stopping the worker pool and, separately, for
    /// draining open HTTP connections on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    /// `None` means unlimited.
    pub max_connections: Option<usize>,
    pub max_urls: usize,
    pub request_timeout: Duration,
    pub num_workers: usize,
    pub queue_capacity: usize,
    pub read_header_timeout: Duration,
    pub read_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("0.0.0.0:8080"),
            max_connections: Some(100),
            max_urls: 20,
            request_timeout: Duration::from_secs(1),
            num_workers: 4,
            queue_capacity: 64,
            read_header_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.queue_capacity == 0 {
            bail!("QUEUE_CAPACITY must be greater than 0");
        }

        if args.request_timeout == 0 {
            bail!("REQUEST_TIMEOUT must be at least 1 second");
        }

        if args.read_header_timeout == 0 || args.read_timeout == 0 {
            bail!("READ_HEADER_TIMEOUT and READ_TIMEOUT must be at least 1 second");
        }

        Ok(Self {
            server_addr: args.server_addr,
            max_connections: (args.max_connections > 0).then_some(args.max_connections),
            max_urls: args.max_urls,
            request_timeout: Duration::from_secs(args.request_timeout),
            num_workers: args.num_workers,
            queue_capacity: args.queue_capacity,
            read_header_timeout: Duration::from_secs(args.read_header_timeout),
            read_timeout: Duration::from_secs(args.read_timeout),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
