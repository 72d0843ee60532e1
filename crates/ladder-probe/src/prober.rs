//! HTTP metric probe with a bounded retry budget.
//!
//! A probe issues GET requests until one yields a usable response or the
//! budget runs out. Budget knobs mirror the usual curl flags:
//!
//! - `connect_timeout`: TCP connect bound per attempt
//! - `max_time`: bound on a whole attempt, body included
//! - `retries`: extra attempts after the first
//! - `retry_delay`: pause between attempts
//! - `retry_max_time`: no new attempt starts once this much time has passed
//!
//! Connection errors, timeouts and 408/429/500/502/503/504 responses are
//! transient and retried. Right after an install the service is often not
//! ready yet, and the budget absorbs that.

use std::fmt;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use ladder_core::Metric;
use ladder_core::config::ProbeConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ProbeError, ProbeResult};

/// Retry budget and timeouts for one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub connect_timeout: Duration,
    pub max_time: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub retry_max_time: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_time: Duration::from_secs(5),
            retries: 5,
            retry_delay: Duration::from_secs(5),
            retry_max_time: Duration::from_secs(30),
        }
    }
}

impl ProbeSettings {
    pub fn from_config(config: &ProbeConfig) -> ProbeResult<Self> {
        Ok(Self {
            connect_timeout: config.connect_timeout()?,
            max_time: config.max_time()?,
            retries: config.retries,
            retry_delay: config.retry_delay()?,
            retry_max_time: config.retry_max_time()?,
        })
    }
}

/// What one probe observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub metric: Metric,
    pub url: String,
    pub status: u16,
    pub total_time: Duration,
    pub size_download: u64,
    pub attempts: u32,
}

impl Measurement {
    /// The requested metric, rendered the way curl's `-w` would.
    pub fn value(&self) -> String {
        match self.metric {
            Metric::StatusCode => self.status.to_string(),
            Metric::TotalTime => format!("{:.6}", self.total_time.as_secs_f64()),
            Metric::SizeDownload => self.size_download.to_string(),
        }
    }

    /// A status-code probe fails on a client or server error. The other
    /// metrics are informational and pass whenever a response arrived.
    pub fn passed(&self) -> bool {
        match self.metric {
            Metric::StatusCode => self.status < 400,
            Metric::TotalTime | Metric::SizeDownload => true,
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} = {}", self.url, self.metric, self.value())
    }
}

/// One response, before metric selection.
#[derive(Debug, Clone, Copy)]
struct Exchange {
    status: u16,
    elapsed: Duration,
    bytes: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Prober {
    settings: ProbeSettings,
}

impl Prober {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Probe `url` and extract `metric`.
    ///
    /// Returns the last response received once it is no longer transient
    /// or the budget is spent. Fails with [`ProbeError::Exhausted`] only if
    /// no attempt got a response at all.
    pub async fn probe(&self, url: &str, metric: Metric) -> ProbeResult<Measurement> {
        let target = Target::parse(url)?;
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut last_error = String::new();
        let mut last_exchange = None;

        loop {
            attempts += 1;
            match self.attempt(&target).await {
                Ok(exchange) if !is_transient_status(exchange.status) => {
                    last_exchange = Some(exchange);
                    break;
                }
                Ok(exchange) => {
                    debug!(%url, status = exchange.status, attempt = attempts, "transient status");
                    last_error = format!("status {}", exchange.status);
                    last_exchange = Some(exchange);
                }
                Err(e) => {
                    debug!(%url, error = %e, attempt = attempts, "probe attempt failed");
                    last_error = e;
                }
            }

            if attempts > self.settings.retries {
                break;
            }
            if started.elapsed() + self.settings.retry_delay > self.settings.retry_max_time {
                debug!(%url, attempts, "retry window exhausted");
                break;
            }
            tokio::time::sleep(self.settings.retry_delay).await;
        }

        let Some(exchange) = last_exchange else {
            warn!(%url, attempts, error = %last_error, "probe exhausted");
            return Err(ProbeError::Exhausted {
                url: url.to_string(),
                attempts,
                elapsed: started.elapsed(),
                last_error,
            });
        };

        let measurement = Measurement {
            metric,
            url: url.to_string(),
            status: exchange.status,
            total_time: exchange.elapsed,
            size_download: exchange.bytes,
            attempts,
        };
        info!(%url, %metric, value = %measurement.value(), attempts, "probe measured");
        Ok(measurement)
    }

    async fn attempt(&self, target: &Target) -> Result<Exchange, String> {
        let started = Instant::now();
        let exchange = tokio::time::timeout(self.settings.max_time, async {
            let stream = tokio::time::timeout(
                self.settings.connect_timeout,
                tokio::net::TcpStream::connect(&target.authority),
            )
            .await
            .map_err(|_| "connect timed out".to_string())?
            .map_err(|e| format!("connect failed: {e}"))?;

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| format!("handshake failed: {e}"))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method("GET")
                .uri(target.path.as_str())
                .header("host", target.authority.as_str())
                .header("user-agent", "ladder-probe/0.1")
                .body(Empty::<Bytes>::new())
                .map_err(|e| format!("bad request: {e}"))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| format!("request failed: {e}"))?;
            let status = resp.status().as_u16();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| format!("body read failed: {e}"))?
                .to_bytes();

            Ok::<_, String>(Exchange {
                status,
                elapsed: started.elapsed(),
                bytes: body.len() as u64,
            })
        })
        .await
        .map_err(|_| "operation timed out".to_string())??;

        Ok(exchange)
    }
}

/// Transient statuses retried the way curl's `--retry` does.
fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// A parsed plain-HTTP target.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    /// `host:port`, always with an explicit port.
    authority: String,
    /// Path and query, at least `/`.
    path: String,
}

impl Target {
    fn parse(url: &str) -> ProbeResult<Self> {
        let invalid = |reason: &str| ProbeError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let uri: http::Uri = url.parse().map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
        match uri.scheme_str() {
            Some("http") => {}
            Some(other) => return Err(invalid(&format!("unsupported scheme {other}"))),
            None => return Err(invalid("missing scheme")),
        }
        let host = uri.host().ok_or_else(|| invalid("missing host"))?;
        let port = uri.port_u16().unwrap_or(80);
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string());

        Ok(Self {
            authority: format!("{host}:{port}"),
            path,
        })
    }
}
