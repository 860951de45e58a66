use std::time::Duration;

use run_protocol::health_path;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::ReadinessError;

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(250);

/// Polls a supervisor's health endpoint until it answers with a 2xx status.
///
/// Connection failures and non-success answers are expected while the
/// container boots and are retried every `poll_interval`. The probe only
/// gives up once `timeout` has fully elapsed. Dropping the returned future
/// cancels the wait.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    client: reqwest::Client,
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self::new(DEFAULT_READY_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

impl ReadinessProbe {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            poll_interval,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until `{base_url}/health` succeeds. Returns how long it took.
    pub async fn wait_until_ready(&self, base_url: &str) -> Result<Duration, ReadinessError> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), health_path());
        let started = Instant::now();
        let deadline = started + self.timeout;
        let attempt_timeout = self.poll_interval.max(MIN_ATTEMPT_TIMEOUT);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.client.get(&url).timeout(attempt_timeout).send().await {
                Ok(response) if response.status().is_success() => {
                    let waited = started.elapsed();
                    info!(%url, attempts, waited_ms = waited.as_millis() as u64, "supervisor is ready");
                    return Ok(waited);
                }
                Ok(response) => {
                    debug!(%url, status = %response.status(), attempts, "supervisor not ready yet");
                }
                Err(err) if err.is_builder() => {
                    return Err(ReadinessError::InvalidUrl {
                        url,
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    debug!(%url, error = %err, attempts, "supervisor unreachable; will retry");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ReadinessError::Timeout {
                    url,
                    waited: started.elapsed(),
                    attempts,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_probe_waits_thirty_seconds_polling_every_second() {
        let probe = ReadinessProbe::default();
        assert_eq!(probe.timeout(), Duration::from_secs(30));
        assert_eq!(probe.poll_interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn malformed_base_url_fails_without_retrying() {
        let probe = ReadinessProbe::new(Duration::from_secs(5), Duration::from_millis(10));
        let err = probe.wait_until_ready("not a url").await.unwrap_err();
        assert!(matches!(err, ReadinessError::InvalidUrl { .. }));
    }
}
