//! Rate Limiter - Controls the outbound call rate per account
//!
//! Admission never blocks: a denied call gets `RateLimitExceeded` with the
//! time until a slot frees up.

use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;
use whatsgate_common::config::{RateLimitConfig, WindowKind};
use whatsgate_common::types::AccountId;
use whatsgate_common::{Error, Result};

/// Counting state of one account
#[derive(Debug)]
enum AccountWindow {
    /// Aligned window starting at `start_ms`
    Fixed { start_ms: u64, count: u32 },
    /// Admission instants inside the rolling window, oldest first
    Sliding { admitted: VecDeque<u64> },
}

/// Proof that a call was admitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatePermit {
    pub account_id: AccountId,
    /// Calls still admissible in the current window
    pub remaining: u32,
}

/// Remaining quota for an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemainingQuota {
    pub limit: u32,
    pub remaining: u32,
    /// Milliseconds until the quota grows again (0 when nothing is used)
    pub resets_in_ms: u64,
}

impl RemainingQuota {
    /// Whether no call would be admitted right now
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

/// Per-account rate limiter
pub struct RateLimiter {
    enabled: bool,
    max_calls: u32,
    window_ms: u64,
    kind: WindowKind,
    windows: Mutex<HashMap<AccountId, AccountWindow>>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_calls: config.max_calls.max(1),
            window_ms: config.window_ms.max(1),
            kind: config.window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Whether limiting is switched on
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Admit one call for the account, or fail with `RateLimitExceeded`
    pub async fn acquire(&self, account_id: AccountId) -> Result<RatePermit> {
        self.acquire_at(account_id, now_ms()).await
    }

    /// `acquire` against an explicit clock reading (epoch milliseconds)
    pub async fn acquire_at(&self, account_id: AccountId, now: u64) -> Result<RatePermit> {
        if !self.enabled {
            return Ok(RatePermit {
                account_id,
                remaining: u32::MAX,
            });
        }

        let mut windows = self.windows.lock().await;
        let window = windows
            .entry(account_id)
            .or_insert_with(|| self.empty_window(now));
        self.roll(window, now);

        match window {
            AccountWindow::Fixed { start_ms, count } => {
                if *count >= self.max_calls {
                    let retry_after_ms = (*start_ms + self.window_ms).saturating_sub(now);
                    debug!(%account_id, retry_after_ms, "Rate limit hit (fixed window)");
                    return Err(Error::RateLimitExceeded {
                        account_id,
                        retry_after_ms,
                    });
                }
                *count += 1;
                Ok(RatePermit {
                    account_id,
                    remaining: self.max_calls - *count,
                })
            }
            AccountWindow::Sliding { admitted } => {
                if admitted.len() as u32 >= self.max_calls {
                    let oldest = admitted.front().copied().unwrap_or(now);
                    let retry_after_ms = (oldest + self.window_ms).saturating_sub(now);
                    debug!(%account_id, retry_after_ms, "Rate limit hit (sliding window)");
                    return Err(Error::RateLimitExceeded {
                        account_id,
                        retry_after_ms,
                    });
                }
                admitted.push_back(now);
                Ok(RatePermit {
                    account_id,
                    remaining: self.max_calls - admitted.len() as u32,
                })
            }
        }
    }

    /// Remaining quota for the account
    pub async fn remaining(&self, account_id: AccountId) -> RemainingQuota {
        self.remaining_at(account_id, now_ms()).await
    }

    /// `remaining` against an explicit clock reading (epoch milliseconds)
    pub async fn remaining_at(&self, account_id: AccountId, now: u64) -> RemainingQuota {
        if !self.enabled {
            return RemainingQuota {
                limit: u32::MAX,
                remaining: u32::MAX,
                resets_in_ms: 0,
            };
        }

        let mut windows = self.windows.lock().await;
        let Some(window) = windows.get_mut(&account_id) else {
            return RemainingQuota {
                limit: self.max_calls,
                remaining: self.max_calls,
                resets_in_ms: 0,
            };
        };
        self.roll(window, now);

        let (used, resets_in_ms) = match window {
            AccountWindow::Fixed { start_ms, count } => (
                *count,
                if *count == 0 {
                    0
                } else {
                    (*start_ms + self.window_ms).saturating_sub(now)
                },
            ),
            AccountWindow::Sliding { admitted } => (
                admitted.len() as u32,
                admitted
                    .front()
                    .map(|oldest| (oldest + self.window_ms).saturating_sub(now))
                    .unwrap_or(0),
            ),
        };

        RemainingQuota {
            limit: self.max_calls,
            remaining: self.max_calls.saturating_sub(used),
            resets_in_ms,
        }
    }

    /// Drop idle account state as of now
    pub async fn prune_idle(&self) -> usize {
        self.prune(now_ms()).await
    }

    /// Drop state of accounts with nothing counted in their current window
    pub async fn prune(&self, now: u64) -> usize {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, window| {
            self.roll(window, now);
            match window {
                AccountWindow::Fixed { count, .. } => *count > 0,
                AccountWindow::Sliding { admitted } => !admitted.is_empty(),
            }
        });
        before - windows.len()
    }

    fn empty_window(&self, now: u64) -> AccountWindow {
        match self.kind {
            WindowKind::Fixed => AccountWindow::Fixed {
                start_ms: self.align(now),
                count: 0,
            },
            WindowKind::Sliding => AccountWindow::Sliding {
                admitted: VecDeque::new(),
            },
        }
    }

    fn align(&self, now: u64) -> u64 {
        now - now % self.window_ms
    }

    /// Bring a window up to `now`: reset a fixed window past its boundary,
    /// expire sliding entries outside `(now - W, now]`.
    fn roll(&self, window: &mut AccountWindow, now: u64) {
        match window {
            AccountWindow::Fixed { start_ms, count } => {
                let aligned = self.align(now);
                if aligned != *start_ms {
                    *start_ms = aligned;
                    *count = 0;
                }
            }
            AccountWindow::Sliding { admitted } => {
                while let Some(&oldest) = admitted.front() {
                    if oldest + self.window_ms <= now {
                        admitted.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
    }
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
