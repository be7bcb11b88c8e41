//! Controller client: submits payloads to the relay and polls adaptively for
//! their outcomes, converting stalls into the distinct failure modes a caller
//! can actually act on.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, warn};

use tabrelay_core::{ClientConfig, Error, HealthPayload, Notification, Result, ResultPayload};

const INITIAL_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const POLL_BACKOFF_FACTOR: f64 = 1.5;

/// How long a request may sit pending before the one-shot security-policy
/// probe fires.
const STALL_PROBE_AFTER: Duration = Duration::from_secs(2);
const PROBE_BUDGET: Duration = Duration::from_millis(1500);
const PROBE_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Snippet reading the flag the in-page agent raises when page security
/// policy stopped it from relaying. The probe runs in the agent's own
/// context, which is why it can still answer while the page itself cannot.
pub const POLICY_PROBE_CODE: &str =
    "typeof window.__tabrelay_csp_blocked !== 'undefined' && window.__tabrelay_csp_blocked === true";

/// Final outcome of an executed payload, as reported by the tab. `ok: false`
/// is a script-level failure, not a relay failure.
#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub ok: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
}

enum Poll {
    Completed(ExecuteOutcome),
    Pending,
    NoBrowser(String),
    Unknown,
}

pub struct Controller {
    http: reqwest::Client,
    base_url: String,
    expected_version: String,
    version_checked: bool,
    cached_version: Option<String>,
}

impl Controller {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            expected_version: config.expected_agent_version.clone(),
            version_checked: false,
            cached_version: None,
        })
    }

    /// Submits a payload and polls until the tab reports an outcome, a
    /// distinct failure is diagnosed, or the timeout elapses.
    pub async fn execute(&mut self, code: &str, timeout: Duration) -> Result<ExecuteOutcome> {
        let health = self.preflight().await?;
        self.check_agent_version(&health);

        let request_id = self.submit(code).await?;
        debug!(request = %request_id, "Payload submitted");

        let started = Instant::now();
        let mut interval = INITIAL_POLL_INTERVAL;
        let mut probed = false;
        loop {
            match self.fetch_result(&request_id).await? {
                Poll::Completed(outcome) => return Ok(outcome),
                Poll::NoBrowser(error) => {
                    return Err(Error::NoBrowser(format!(
                        "{} (the relay is up at {} but no tab has opened a channel)",
                        error, self.base_url
                    )))
                }
                Poll::Unknown => {
                    return Err(Error::UnknownRequest(format!(
                        "request {} is gone from the relay (likely reaped); retry the call",
                        request_id
                    )))
                }
                Poll::Pending => {}
            }

            if !probed && started.elapsed() >= STALL_PROBE_AFTER {
                probed = true;
                if self.probe_policy_block().await {
                    return Err(Error::PolicyBlocked(
                        "the tab is connected but its page blocks script relaying \
                         (content security policy); navigate the tab to a different page \
                         and retry; waiting longer will not help"
                            .to_string(),
                    ));
                }
            }

            if started.elapsed() >= timeout {
                return Err(Error::Timeout(format!(
                    "no result for request {} within {:?}; the tab may be busy or the page \
                     unresponsive; re-run with a longer timeout or check the tab",
                    request_id, timeout
                )));
            }

            tokio::time::sleep(interval).await;
            interval = next_poll_interval(interval);
        }
    }

    /// Version the tab reported at the first health check, if any.
    pub fn agent_version(&self) -> Option<&str> {
        self.cached_version.as_deref()
    }

    /// Reachability check, so "server not running" stays its own failure
    /// mode instead of surfacing as a timeout.
    pub async fn preflight(&self) -> Result<HealthPayload> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| {
                Error::ServerUnreachable(format!(
                    "{}; start it with `tabrelay serve` ({})",
                    self.base_url, e
                ))
            })?;
        if !resp.status().is_success() {
            return Err(Error::ServerUnreachable(format!(
                "{} answered {} to a health check",
                self.base_url,
                resp.status()
            )));
        }
        resp.json().await.map_err(|e| Error::Http(e.to_string()))
    }

    pub async fn notifications(&self) -> Result<Vec<Notification>> {
        let url = format!("{}/notifications", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::ServerUnreachable(format!("{} ({})", self.base_url, e)))?;
        let body: Value = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        let items = body.get("notifications").cloned().unwrap_or_else(|| json!([]));
        Ok(serde_json::from_value(items)?)
    }

    /// Asks the server to synthesize and dispatch a fresh initialization
    /// payload; returns its request id.
    pub async fn reinit(&self, config: &Value) -> Result<String> {
        let url = format!("{}/reinit-control", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&json!({"config": config}))
            .send()
            .await
            .map_err(|e| Error::ServerUnreachable(format!("{} ({})", self.base_url, e)))?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            let error = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("reinit rejected")
                .to_string();
            return Err(Error::Validation(error));
        }
        body.get("request_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Http("reinit response missing request_id".to_string()))
    }

    /// One-time, non-fatal: compares the tab-reported agent version against
    /// the expected one. An extension-style install is always compatible.
    fn check_agent_version(&mut self, health: &HealthPayload) {
        if self.version_checked {
            return;
        }
        let Some(info) = health.browsers.first() else {
            // nothing reported yet; the one shot stays unspent
            return;
        };
        self.version_checked = true;
        self.cached_version = info.version.clone();
        if info.kind.as_deref() == Some("extension") {
            debug!("Extension install reported; skipping version comparison");
            return;
        }
        match info.version.as_deref() {
            Some(v) if v == self.expected_version => {}
            Some(v) => warn!(
                reported = v,
                expected = %self.expected_version,
                "Agent version mismatch; continuing anyway"
            ),
            None => debug!("Tab reported no agent version"),
        }
    }

    async fn submit(&self, code: &str) -> Result<String> {
        let url = format!("{}/run", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&json!({"code": code}))
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            let error = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("submission rejected")
                .to_string();
            return Err(Error::Validation(error));
        }
        body.get("request_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Http("run response missing request_id".to_string()))
    }

    async fn fetch_result(&self, request_id: &str) -> Result<Poll> {
        let url = format!("{}/result", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("request_id", request_id)])
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Poll::Unknown);
        }
        let payload: ResultPayload = resp.json().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok(match payload.status.as_deref() {
            Some("pending") => Poll::Pending,
            Some("no_browser") => Poll::NoBrowser(
                payload
                    .error
                    .unwrap_or_else(|| "no browser connected".to_string()),
            ),
            _ => Poll::Completed(ExecuteOutcome {
                ok: payload.ok,
                result: payload.result,
                error: payload.error,
                url: payload.url,
                title: payload.title,
            }),
        })
    }

    /// One-shot stall diagnosis. Swallows transport errors: an inconclusive
    /// probe must not kill an otherwise recoverable wait.
    async fn probe_policy_block(&self) -> bool {
        debug!("Request stalled; probing for a security-policy block");
        let probe_id = match self.submit(POLICY_PROBE_CODE).await {
            Ok(id) => id,
            Err(e) => {
                debug!(error = %e, "Probe submission failed");
                return false;
            }
        };
        let deadline = Instant::now() + PROBE_BUDGET;
        while Instant::now() < deadline {
            match self.fetch_result(&probe_id).await {
                Ok(Poll::Completed(outcome)) => {
                    return outcome.ok && outcome.result == Some(Value::Bool(true));
                }
                Ok(Poll::Pending) => {}
                Ok(_) | Err(_) => return false,
            }
            tokio::time::sleep(PROBE_POLL_INTERVAL).await;
        }
        false
    }
}

/// Adaptive poll pacing: 100ms start, ×1.5 per pending response, 1s cap.
fn next_poll_interval(current: Duration) -> Duration {
    current.mul_f64(POLL_BACKOFF_FACTOR).min(MAX_POLL_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_interval_progression() {
        let mut interval = INITIAL_POLL_INTERVAL;
        let mut seen = vec![interval];
        for _ in 0..8 {
            interval = next_poll_interval(interval);
            seen.push(interval);
        }
        assert_eq!(seen[1], Duration::from_millis(150));
        assert_eq!(seen[2], Duration::from_millis(225));
        for pair in seen.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert_eq!(*seen.last().unwrap(), MAX_POLL_INTERVAL);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let cfg = ClientConfig {
            server_url: "http://127.0.0.1:8787/".to_string(),
            expected_agent_version: "0.1.0".to_string(),
        };
        let controller = Controller::new(&cfg).unwrap();
        assert_eq!(controller.base_url, "http://127.0.0.1:8787");
    }
}
