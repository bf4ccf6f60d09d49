//! Retry, backoff and timeout for remote calls.
//!
//! Every call runs under a bounded timeout. Transient failures and
//! timeouts are retried with exponential backoff until the attempt budget
//! is spent. Everything else (offline, rejection, and version conflicts,
//! which are outcomes rather than errors) is returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use regionsync_core::config::RemoteConfig;
use regionsync_core::{NewRegion, Region, RegionWrite, RoleDefault, WriteOutcome};

use crate::client::{RemoteFuture, RemoteStore};
use crate::error::{RemoteError, RemoteResult};

/// Retry budget and timing for remote calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RemoteConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            request_timeout: config.request_timeout(),
        }
    }

    /// A fresh backoff tracker for one call.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            attempts: 0,
            max_attempts: self.max_attempts,
            current: self.initial_backoff,
            max: self.max_backoff,
        }
    }
}

/// Tracks failed attempts of a single call and the delay before the next.
#[derive(Debug)]
pub struct Backoff {
    attempts: u32,
    max_attempts: u32,
    current: Duration,
    max: Duration,
}

impl Backoff {
    /// Record a failed attempt.
    ///
    /// Returns the delay before the next attempt, or `None` once the
    /// attempt budget is spent.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            return None;
        }
        let delay = self.current;
        // Exponential backoff: double the interval up to max.
        self.current = (self.current * 2).min(self.max);
        Some(delay)
    }

    /// Failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Run `call` under `policy`, retrying retryable failures.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    op: &'static str,
    mut call: F,
) -> RemoteResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    let mut backoff = policy.backoff();
    loop {
        let result = match tokio::time::timeout(policy.request_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(policy.request_timeout)),
        };

        match result {
            Ok(value) => {
                if backoff.attempts() > 0 {
                    debug!(op, attempts = backoff.attempts() + 1, "remote call recovered");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() => match backoff.record_failure() {
                Some(delay) => {
                    warn!(
                        op,
                        attempt = backoff.attempts(),
                        ?delay,
                        error = %e,
                        "remote call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    warn!(
                        op,
                        attempts = backoff.attempts(),
                        error = %e,
                        "remote call failed; retries exhausted"
                    );
                    return Err(e);
                }
            },
            Err(e) => return Err(e),
        }
    }
}

/// Decorates a [`RemoteStore`] with timeouts and retry/backoff.
pub struct RetryingRemote<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: RemoteStore> RetryingRemote<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl<R: RemoteStore> RemoteStore for RetryingRemote<R> {
    fn list<'a>(&'a self, layout_id: &'a str) -> RemoteFuture<'a, Vec<Region>> {
        Box::pin(retry(&self.policy, "list", move || self.inner.list(layout_id)))
    }

    fn create<'a>(
        &'a self,
        layout_id: &'a str,
        region: &'a NewRegion,
    ) -> RemoteFuture<'a, Region> {
        Box::pin(retry(&self.policy, "create", move || {
            self.inner.create(layout_id, region)
        }))
    }

    fn update<'a>(
        &'a self,
        layout_id: &'a str,
        region_id: &'a str,
        write: &'a RegionWrite,
    ) -> RemoteFuture<'a, WriteOutcome<Region>> {
        Box::pin(retry(&self.policy, "update", move || {
            self.inner.update(layout_id, region_id, write)
        }))
    }

    fn delete<'a>(
        &'a self,
        layout_id: &'a str,
        region_id: &'a str,
        expected_version: u64,
    ) -> RemoteFuture<'a, WriteOutcome<()>> {
        Box::pin(retry(&self.policy, "delete", move || {
            self.inner.delete(layout_id, region_id, expected_version)
        }))
    }

    fn role_defaults<'a>(&'a self, role: &'a str) -> RemoteFuture<'a, Vec<RoleDefault>> {
        Box::pin(retry(&self.policy, "role_defaults", move || {
            self.inner.role_defaults(role)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRemote, RemoteCall};
    use regionsync_core::RegionPatch;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(400),
            request_timeout: Duration::from_secs(10),
        }
    }

    fn new_region() -> NewRegion {
        NewRegion {
            region_type: "kpi".to_string(),
            grid_row: 0,
            grid_col: 0,
            row_span: 2,
            col_span: 3,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = policy(10).backoff();
        assert_eq!(backoff.record_failure(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.record_failure(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.record_failure(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.record_failure(), Some(Duration::from_millis(400)));
        assert_eq!(backoff.attempts(), 4);
    }

    #[test]
    fn backoff_budget_is_bounded() {
        let mut backoff = policy(3).backoff();
        assert!(backoff.record_failure().is_some());
        assert!(backoff.record_failure().is_some());
        assert_eq!(backoff.record_failure(), None);
    }

    #[test]
    fn policy_from_config_never_drops_below_one_attempt() {
        let config = RemoteConfig {
            max_attempts: 0,
            ..RemoteConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let remote = RetryingRemote::new(MemoryRemote::new(), policy(4));
        remote.inner().fail_next(RemoteError::Transient("reset".into()));
        remote.inner().fail_next(RemoteError::Transient("reset".into()));

        let region = remote.create("layout-1", &new_region()).await.unwrap();
        assert_eq!(region.version, 1);
        assert_eq!(remote.inner().calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust_and_surface_error() {
        let remote = RetryingRemote::new(MemoryRemote::new(), policy(2));
        for _ in 0..5 {
            remote.inner().fail_next(RemoteError::Transient("503".into()));
        }

        let err = remote.list("layout-1").await.unwrap_err();
        assert_eq!(err, RemoteError::Transient("503".into()));
        assert_eq!(remote.inner().calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_is_not_retried() {
        let remote = RetryingRemote::new(MemoryRemote::new(), policy(4));
        remote.inner().set_online(false);

        let err = remote.list("layout-1").await.unwrap_err();
        assert!(err.is_offline());
        assert_eq!(remote.inner().calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out_and_retry() {
        let mut p = policy(2);
        p.request_timeout = Duration::from_millis(50);
        let remote = RetryingRemote::new(MemoryRemote::new(), p);
        remote.inner().set_latency(Some(Duration::from_secs(1)));

        let err = remote.list("layout-1").await.unwrap_err();
        assert_eq!(err, RemoteError::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test(start_paused = true)]
    async fn conflicts_are_returned_without_retry() {
        let remote = RetryingRemote::new(MemoryRemote::new(), policy(4));
        let region = remote.create("layout-1", &new_region()).await.unwrap();

        let stale = RegionWrite::new(region.version + 5, RegionPatch::locked(true));
        let outcome = remote.update("layout-1", &region.id, &stale).await.unwrap();
        assert!(outcome.is_conflict());

        let updates = remote
            .inner()
            .calls()
            .into_iter()
            .filter(|c| matches!(c, RemoteCall::Update { .. }))
            .count();
        assert_eq!(updates, 1);
    }
}
