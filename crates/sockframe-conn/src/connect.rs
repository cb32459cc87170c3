use std::os::fd::AsRawFd;
use std::path::Path;
use std::time::Duration;

use sockframe_transport::fd::set_cloexec;
use sockframe_transport::UnixDomainSocket;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::error::{ConnectionError, Result};

/// Resolved attempt count and fixed delay for a connect retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    /// Apply the defaulting rules: zero attempts is invalid, negative
    /// attempts or timeout fall back to `config`.
    pub fn resolve(num_retries: i32, timeout_ms: i64, config: &ConnectionConfig) -> Result<Self> {
        if num_retries == 0 {
            return Err(ConnectionError::InvalidRetryCount);
        }
        let attempts = if num_retries < 0 {
            config.connect_num_attempts
        } else {
            num_retries
        };
        let attempts = u32::try_from(attempts)
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConnectionError::InvalidRetryCount)?;
        let timeout_ms = if timeout_ms < 0 {
            config.connect_timeout_ms.max(0)
        } else {
            timeout_ms
        };
        Ok(Self {
            attempts,
            interval: Duration::from_millis(timeout_ms as u64),
        })
    }

    /// Run `attempt` until it succeeds or the attempts are used up,
    /// sleeping `interval` between attempts.
    pub fn run<T, E>(
        &self,
        endpoint: &Path,
        mut attempt: impl FnMut() -> std::result::Result<T, E>,
    ) -> Result<T>
    where
        E: Into<ConnectionError> + std::fmt::Display,
    {
        let mut num_attempts = 0u32;
        loop {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    num_attempts += 1;
                    if num_attempts >= self.attempts {
                        return Err(err.into());
                    }
                    log_retry(endpoint, num_attempts, &err);
                    std::thread::sleep(self.interval);
                }
            }
        }
    }
}

fn log_retry(endpoint: &Path, num_attempts: u32, err: &dyn std::fmt::Display) {
    // The first failure is expected while the peer is still starting.
    if num_attempts > 1 {
        info!(
            endpoint = %endpoint.display(),
            attempt = num_attempts,
            error = %err,
            "retrying connection"
        );
    } else {
        debug!(endpoint = %endpoint.display(), error = %err, "connect failed, retrying");
    }
}

/// Connect to `endpoint`, retrying at a fixed interval.
///
/// `num_retries` is the total number of attempts; `0` is rejected and a
/// negative value uses `config.connect_num_attempts`. A negative
/// `timeout_ms` uses `config.connect_timeout_ms`.
pub fn connect_retry(
    endpoint: impl AsRef<Path>,
    num_retries: i32,
    timeout_ms: i64,
    config: &ConnectionConfig,
) -> Result<std::os::unix::net::UnixStream> {
    let endpoint = endpoint.as_ref();
    let policy = RetryPolicy::resolve(num_retries, timeout_ms, config)?;
    policy.run(endpoint, || UnixDomainSocket::connect(endpoint))
}

/// Async counterpart of [`connect_retry`]; sleeps on the runtime timer.
pub async fn connect_retry_async(
    endpoint: impl AsRef<Path>,
    num_retries: i32,
    timeout_ms: i64,
    config: &ConnectionConfig,
) -> Result<tokio::net::UnixStream> {
    let endpoint = endpoint.as_ref();
    let policy = RetryPolicy::resolve(num_retries, timeout_ms, config)?;
    let mut num_attempts = 0u32;
    loop {
        let err = match tokio::net::UnixStream::connect(endpoint).await {
            Ok(stream) => {
                set_cloexec(stream.as_raw_fd())?;
                return Ok(stream);
            }
            Err(err) => err,
        };
        num_attempts += 1;
        if num_attempts >= policy.attempts {
            return Err(err.into());
        }
        log_retry(endpoint, num_attempts, &err);
        tokio::time::sleep(policy.interval).await;
    }
}
