//! Readiness checks against the service's health surface
//!
//! One probe is a single `GET http://localhost:<port>/health` with a 2 second
//! timeout; only a 2xx response counts. Network errors and timeouts are
//! "not ready", never errors.

use futures_util::future::BoxFuture;
use log::debug;
use std::time::{Duration, Instant};

/// Per-attempt timeout
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Delay between readiness polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Total readiness budget during start
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

pub trait HealthProbe: Send + Sync {
    /// One bounded attempt; true only when the service answered 2xx
    fn probe(&self) -> BoxFuture<'_, bool>;
}

pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpHealthProbe {
    pub fn new(url: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| format!("Failed to build health client: {}", e))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl HealthProbe for HttpHealthProbe {
    fn probe(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            match self.client.get(&self.url).send().await {
                Ok(response) => response.status().is_success(),
                Err(e) => {
                    debug!("Health probe {} failed: {}", self.url, e);
                    false
                }
            }
        })
    }
}

/// Poll cadence for readiness
#[derive(Debug, Clone, Copy)]
pub struct PollTimings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollTimings {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            timeout: READY_TIMEOUT,
        }
    }
}

/// Outcome of waiting for readiness
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
    /// The process went away while we were waiting
    Exited(String),
}

/// Probe until ready, the child exits, or the budget is spent.
///
/// `exited` is checked after every failed probe and returns a description
/// once the child is gone.
pub async fn wait_until_ready<F>(probe: &dyn HealthProbe, timings: PollTimings, mut exited: F) -> Readiness
where
    F: FnMut() -> Option<String>,
{
    let deadline = Instant::now() + timings.timeout;
    loop {
        if probe.probe().await {
            return Readiness::Ready;
        }
        if let Some(reason) = exited() {
            return Readiness::Exited(reason);
        }
        if Instant::now() + timings.interval > deadline {
            return Readiness::TimedOut;
        }
        tokio::time::sleep(timings.interval).await;
    }
}
