//! HTTP/HTTPS Connector for the Observation Collector
//!
//! ## Overview
//!
//! The collector takes one observation per request as a query string:
//!
//! ```text
//! GET https://pws.meteo.cam/v1/observe/<key>/<id>?dateutc=now&tempc=21.0&...
//! ```
//!
//! and answers with a short plain-text body. Anything carrying `OK` counts
//! as accepted; any other body, a non-2xx status, or no answer at all is a
//! failed attempt for the worker to retry.
//!
//! ## Implementation Choices
//!
//! Connection handling:
//! - Blocking `ureq` client, the worker already owns a dedicated thread
//! - One agent per connector so connections are kept alive between posts
//! - The per-request timeout covers connect, send and read

use std::error::Error as _;
use std::io;
use std::time::Duration;

use crate::{ConnectionStats, Connector, ConnectorError, Delivery};

/// Literal the collector puts in its body when it accepts an observation
pub const SUCCESS_MARKER: &str = "OK";

/// Interpret a response body
///
/// Accepted iff some line contains [`SUCCESS_MARKER`]. The rejection reason
/// is the body's lines joined with `, `.
pub fn check_response(body: &str) -> Delivery {
    if body.lines().any(|line| line.contains(SUCCESS_MARKER)) {
        return Delivery::Delivered;
    }

    let reason = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    Delivery::RejectedByServer(format!("server returned '{}'", reason))
}

/// HTTP connector using lightweight ureq client
pub struct HttpConnector {
    agent: ureq::Agent,
    timeout: Duration,
    stats: ConnectionStats,
}

impl HttpConnector {
    /// Create new HTTP connector with a per-request timeout
    pub fn new(timeout: Duration) -> Self {
        Self::with_user_agent(timeout, &format!("meteorelay/{}", env!("CARGO_PKG_VERSION")))
    }

    /// Create connector announcing a custom user agent
    pub fn with_user_agent(timeout: Duration, user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(user_agent)
            .build();

        Self {
            agent,
            timeout,
            stats: ConnectionStats::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn get(&self, url: &str) -> Delivery {
        match self.agent.get(url).call() {
            Ok(resp) => match resp.into_string() {
                Ok(body) => check_response(&body),
                Err(e) => Delivery::TransportFailure(classify_io(&e)),
            },
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Delivery::RejectedByServer(format!("HTTP {}: {}", code, body.trim()))
            }
            Err(ureq::Error::Transport(t)) => Delivery::TransportFailure(classify_transport(&t)),
        }
    }
}

impl Connector for HttpConnector {
    fn send(&mut self, url: &str) -> Delivery {
        let delivery = self.get(url);
        self.stats.record(url, &delivery);
        delivery
    }

    fn stats(&self) -> ConnectionStats {
        self.stats.clone()
    }
}

fn classify_io(err: &io::Error) -> ConnectorError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ConnectorError::Timeout,
        _ => ConnectorError::ProtocolError(err.to_string()),
    }
}

fn classify_transport(t: &ureq::Transport) -> ConnectorError {
    let timed_out = t
        .source()
        .and_then(|source| source.downcast_ref::<io::Error>())
        .map(|io_err| matches!(io_err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
        .unwrap_or(false);

    if timed_out {
        ConnectorError::Timeout
    } else {
        ConnectorError::Transport(t.to_string())
    }
}
