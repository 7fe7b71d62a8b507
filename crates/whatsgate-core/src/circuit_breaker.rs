//! Circuit Breaker - Fails fast when an account's remote calls keep failing
//!
//! Each account moves Closed -> Open after `failure_threshold` consecutive
//! failures. Once the cooldown expires the next call is let through as the
//! single Half-Open probe; its outcome closes the breaker or reopens it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};
use whatsgate_common::config::CircuitBreakerConfig;
use whatsgate_common::types::AccountId;
use whatsgate_common::{Error, Result};

/// Call timeout assumed until `with_call_timeout` is given the client's
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Slack on top of the call timeout before an unanswered probe is replaced
const PROBE_MARGIN: Duration = Duration::from_secs(5);

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// How a call was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    Probe,
}

#[derive(Debug)]
struct AccountBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<DateTime<Utc>>,
    open_until: Option<Instant>,
    probe_started: Option<Instant>,
    total_failures: u64,
    total_successes: u64,
    times_opened: u64,
}

impl Default for AccountBreaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            open_until: None,
            probe_started: None,
            total_failures: 0,
            total_successes: 0,
            times_opened: 0,
        }
    }
}

/// Point-in-time view of one account's breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub account_id: AccountId,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    /// Milliseconds left in the cooldown while Open
    pub retry_after_ms: u64,
    pub total_failures: u64,
    pub total_successes: u64,
    pub times_opened: u64,
}

/// Per-account circuit breaker registry
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    probe_timeout: Duration,
    breakers: Mutex<HashMap<AccountId, AccountBreaker>>,
}

/// Hands the Half-Open slot back if a probe call is dropped before it
/// reports an outcome
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    account_id: AccountId,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // falls back to the probe timeout when the registry is busy
        if let Ok(mut breakers) = self.breaker.breakers.try_lock() {
            if let Some(breaker) = breakers.get_mut(&self.account_id) {
                if breaker.state == BreakerState::HalfOpen {
                    warn!(account_id = %self.account_id, "Probe cancelled, releasing half-open slot");
                    breaker.probe_started = None;
                }
            }
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker registry
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        let cooldown = Duration::from_secs(config.cooldown_secs);
        Self {
            failure_threshold: config.failure_threshold.max(1),
            cooldown,
            probe_timeout: Self::probe_timeout_for(cooldown, DEFAULT_CALL_TIMEOUT),
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Keep a Half-Open probe reserved for as long as the guarded call may run
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Self::probe_timeout_for(self.cooldown, timeout);
        self
    }

    fn probe_timeout_for(cooldown: Duration, call_timeout: Duration) -> Duration {
        cooldown.max(call_timeout) + PROBE_MARGIN
    }

    /// Run `call` if the breaker admits it, recording its outcome
    pub async fn call<F, T>(&self, account_id: AccountId, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let admission = self.try_acquire(account_id).await?;
        let mut guard = ProbeGuard {
            breaker: self,
            account_id,
            armed: admission == Admission::Probe,
        };
        let result = call.await;
        guard.armed = false;
        match &result {
            Ok(_) => self.record_success(account_id, admission).await,
            Err(e) => {
                warn!(%account_id, error = %e, "Remote call failed");
                self.record_failure(account_id, admission).await
            }
        }
        result
    }

    /// Ask to make a call; fails with `CircuitOpen` while Open or while
    /// another Half-Open probe is in flight
    pub async fn try_acquire(&self, account_id: AccountId) -> Result<Admission> {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(account_id).or_default();
        let now = Instant::now();

        match breaker.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::Open => {
                let open_until = breaker.open_until.unwrap_or(now);
                if now < open_until {
                    return Err(Error::CircuitOpen {
                        account_id,
                        retry_after_ms: (open_until - now).as_millis() as u64,
                    });
                }
                info!(%account_id, "Circuit breaker half-open, admitting probe");
                breaker.state = BreakerState::HalfOpen;
                breaker.probe_started = Some(now);
                Ok(Admission::Probe)
            }
            BreakerState::HalfOpen => {
                // a probe that outlived the call timeout never reported back
                let probe_deadline = breaker
                    .probe_started
                    .map(|started| started + self.probe_timeout)
                    .filter(|deadline| now < *deadline);
                match probe_deadline {
                    Some(deadline) => Err(Error::CircuitOpen {
                        account_id,
                        retry_after_ms: (deadline - now).as_millis() as u64,
                    }),
                    None => {
                        breaker.probe_started = Some(now);
                        Ok(Admission::Probe)
                    }
                }
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self, account_id: AccountId, admission: Admission) {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(account_id).or_default();
        breaker.total_successes += 1;

        match (breaker.state, admission) {
            (BreakerState::Closed, _) => breaker.consecutive_failures = 0,
            (BreakerState::HalfOpen, Admission::Probe) => {
                info!(%account_id, "Circuit breaker closed after successful probe");
                breaker.state = BreakerState::Closed;
                breaker.consecutive_failures = 0;
                breaker.open_until = None;
                breaker.probe_started = None;
            }
            // late results of calls admitted before the breaker opened
            _ => {}
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self, account_id: AccountId, admission: Admission) {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(account_id).or_default();
        let now = Instant::now();
        breaker.total_failures += 1;
        breaker.last_failure = Some(Utc::now());

        match (breaker.state, admission) {
            (BreakerState::Closed, _) => {
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= self.failure_threshold {
                    warn!(
                        %account_id,
                        failures = breaker.consecutive_failures,
                        "Circuit breaker opened"
                    );
                    breaker.state = BreakerState::Open;
                    breaker.open_until = Some(now + self.cooldown);
                    breaker.times_opened += 1;
                }
            }
            (BreakerState::HalfOpen, Admission::Probe) => {
                warn!(%account_id, "Probe failed, circuit breaker reopened");
                breaker.consecutive_failures += 1;
                breaker.state = BreakerState::Open;
                breaker.open_until = Some(now + self.cooldown);
                breaker.probe_started = None;
                breaker.times_opened += 1;
            }
            _ => {}
        }
    }

    /// Current view of one account's breaker
    pub async fn snapshot(&self, account_id: AccountId) -> BreakerSnapshot {
        let breakers = self.breakers.lock().await;
        match breakers.get(&account_id) {
            Some(breaker) => Self::to_snapshot(account_id, breaker),
            None => Self::to_snapshot(account_id, &AccountBreaker::default()),
        }
    }

    /// Views of every account seen so far
    pub async fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.lock().await;
        breakers
            .iter()
            .map(|(id, breaker)| Self::to_snapshot(*id, breaker))
            .collect()
    }

    /// Forget all state of an account
    pub async fn reset(&self, account_id: AccountId) {
        self.breakers.lock().await.remove(&account_id);
    }

    /// Open the breaker for one cooldown regardless of failures
    pub async fn force_open(&self, account_id: AccountId) {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(account_id).or_default();
        warn!(%account_id, "Circuit breaker forced open");
        breaker.state = BreakerState::Open;
        breaker.open_until = Some(Instant::now() + self.cooldown);
        breaker.probe_started = None;
        breaker.times_opened += 1;
    }

    /// Close the breaker and clear its failure count
    pub async fn force_close(&self, account_id: AccountId) {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(account_id).or_default();
        info!(%account_id, "Circuit breaker forced closed");
        breaker.state = BreakerState::Closed;
        breaker.consecutive_failures = 0;
        breaker.open_until = None;
        breaker.probe_started = None;
    }

    fn to_snapshot(account_id: AccountId, breaker: &AccountBreaker) -> BreakerSnapshot {
        let retry_after_ms = match (breaker.state, breaker.open_until) {
            (BreakerState::Open, Some(until)) => {
                until.saturating_duration_since(Instant::now()).as_millis() as u64
            }
            _ => 0,
        };
        BreakerSnapshot {
            account_id,
            state: breaker.state,
            consecutive_failures: breaker.consecutive_failures,
            last_failure: breaker.last_failure,
            retry_after_ms,
            total_failures: breaker.total_failures,
            total_successes: breaker.total_successes,
            times_opened: breaker.times_opened,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(&CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown_secs: 30,
        })
    }

    async fn fail(breaker: &CircuitBreaker, account: AccountId) -> Result<()> {
        breaker
            .call(account, async { Err::<(), _>(Error::transport("timed out")) })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker, account: AccountId) -> Result<()> {
        breaker.call(account, async { Ok(()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_failures() {
        let breaker = breaker();
        let account = Uuid::new_v4();

        for _ in 0..2 {
            assert!(matches!(fail(&breaker, account).await, Err(Error::RemoteApi { .. })));
        }
        assert_eq!(breaker.snapshot(account).await.state, BreakerState::Closed);

        assert!(fail(&breaker, account).await.is_err());
        let snapshot = breaker.snapshot(account).await;
        assert_eq!(snapshot.state, BreakerState::Open);
        assert_eq!(snapshot.consecutive_failures, 3);

        match succeed(&breaker, account).await {
            Err(Error::CircuitOpen { retry_after_ms, .. }) => assert_eq!(retry_after_ms, 30_000),
            other => panic!("expected open circuit, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let breaker = breaker();
        let account = Uuid::new_v4();

        fail(&breaker, account).await.ok();
        fail(&breaker, account).await.ok();
        succeed(&breaker, account).await.unwrap();
        fail(&breaker, account).await.ok();
        fail(&breaker, account).await.ok();

        let snapshot = breaker.snapshot(account).await;
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.consecutive_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_cooldown() {
        let breaker = breaker();
        let account = Uuid::new_v4();
        breaker.force_open(account).await;

        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(breaker.try_acquire(account).await.unwrap(), Admission::Probe);
        assert!(matches!(
            breaker.try_acquire(account).await,
            Err(Error::CircuitOpen { .. })
        ));
        assert_eq!(breaker.snapshot(account).await.state, BreakerState::HalfOpen);

        breaker.record_success(account, Admission::Probe).await;
        let snapshot = breaker.snapshot(account).await;
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(breaker.try_acquire(account).await.unwrap(), Admission::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_restarts_cooldown() {
        let breaker = breaker();
        let account = Uuid::new_v4();
        for _ in 0..3 {
            fail(&breaker, account).await.ok();
        }

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(matches!(fail(&breaker, account).await, Err(Error::RemoteApi { .. })));

        let snapshot = breaker.snapshot(account).await;
        assert_eq!(snapshot.state, BreakerState::Open);
        assert_eq!(snapshot.retry_after_ms, 30_000);
        assert_eq!(snapshot.times_opened, 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(
            succeed(&breaker, account).await,
            Err(Error::CircuitOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_does_not_extend_open_state() {
        let breaker = breaker();
        let account = Uuid::new_v4();
        let admission = breaker.try_acquire(account).await.unwrap();
        for _ in 0..3 {
            fail(&breaker, account).await.ok();
        }
        tokio::time::advance(Duration::from_secs(20)).await;
        breaker.record_failure(account, admission).await;

        assert_eq!(breaker.snapshot(account).await.retry_after_ms, 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_is_held_for_the_call_timeout() {
        let breaker = CircuitBreaker::new(&CircuitBreakerConfig {
            failure_threshold: 3,
            cooldown_secs: 5,
        })
        .with_call_timeout(Duration::from_secs(30));
        let account = Uuid::new_v4();
        breaker.force_open(account).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(breaker.try_acquire(account).await.unwrap(), Admission::Probe);

        // first probe still in flight past one cooldown
        tokio::time::advance(Duration::from_secs(6)).await;
        match breaker.try_acquire(account).await {
            Err(Error::CircuitOpen { retry_after_ms, .. }) => assert_eq!(retry_after_ms, 29_000),
            other => panic!("expected open circuit, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(breaker.try_acquire(account).await.unwrap(), Admission::Probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_releases_slot() {
        let breaker = breaker();
        let account = Uuid::new_v4();
        breaker.force_open(account).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let hung = breaker.call(account, std::future::pending::<Result<()>>());
        let timed_out = tokio::time::timeout(Duration::from_secs(1), hung).await;
        assert!(timed_out.is_err());
        assert_eq!(breaker.snapshot(account).await.state, BreakerState::HalfOpen);

        assert_eq!(breaker.try_acquire(account).await.unwrap(), Admission::Probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_close_and_reset() {
        let breaker = breaker();
        let account = Uuid::new_v4();
        breaker.force_open(account).await;
        breaker.force_close(account).await;
        assert!(succeed(&breaker, account).await.is_ok());

        breaker.reset(account).await;
        let snapshot = breaker.snapshot(account).await;
        assert_eq!(snapshot.total_successes, 0);
        assert!(breaker.snapshots().await.is_empty());
    }
}
