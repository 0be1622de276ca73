//! Authentication rate limiting and progressive lockout.
//!
//! Failures are counted per typed key (`ip:`, `user:`, `apikey:`) inside a
//! sliding window. Crossing `maxFailedAttempts` engages a lockout whose
//! duration grows geometrically with each successive lockout:
//! `base * multiplier^(lockoutCount - 1)`, capped at `maxLockoutMs`.
//! Clearing a lockout (admin action, or its own expiry) never resets
//! `lockoutCount` — a repeat offender keeps escalating.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{AuthRateLimitConfig, ResiliencyConfig};
use crate::error::Result;

use super::storage::{with_timeout_fallback, FailedAttemptRepository};

/// The three kinds of identity a failed attempt can be charged against.
#[derive(Debug, Clone, Copy)]
pub enum LockoutSubject<'a> {
    Ip(&'a str),
    User(&'a str),
    ApiKey(&'a str),
}

impl LockoutSubject<'_> {
    pub fn key(&self) -> String {
        match self {
            Self::Ip(v) => format!("ip:{v}"),
            Self::User(v) => format!("user:{v}"),
            Self::ApiKey(v) => format!("apikey:{v}"),
        }
    }
}

/// Outcome of recording a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Below threshold; the caller may try again.
    Allowed { attempts: u32 },
    /// Threshold crossed; locked out until `until`.
    Locked { until: DateTime<Utc>, lockout_count: u32 },
}

/// Current lockout state for a key.
#[derive(Debug, Clone, PartialEq)]
pub struct LockoutStatus {
    pub expires_at: DateTime<Utc>,
    pub lockout_count: u32,
    pub reason: Option<String>,
}

pub struct AuthRateLimiter {
    repo: Arc<dyn FailedAttemptRepository>,
    config: AuthRateLimitConfig,
    storage_timeout: Duration,
}

impl AuthRateLimiter {
    pub fn new(repo: Arc<dyn FailedAttemptRepository>, config: AuthRateLimitConfig, resiliency: ResiliencyConfig) -> Self {
        let storage_timeout = Duration::from_millis(resiliency.redis_operation_timeout_ms);
        Self { repo, config, storage_timeout }
    }

    /// The configured failed-attempt threshold, surfaced for the
    /// `X-RateLimit-Limit` response header.
    pub fn max_failed_attempts(&self) -> u32 {
        self.config.max_failed_attempts
    }

    /// `None` if the store is unreachable or the key is not locked out —
    /// both fail open, since a sick store must never lock out a
    /// legitimate caller.
    pub async fn check_locked(&self, subject: LockoutSubject<'_>) -> Option<LockoutStatus> {
        let key = subject.key();
        let repo = self.repo.clone();
        with_timeout_fallback(
            self.storage_timeout,
            async move { repo.get_lockout(&key).await },
            || None,
        )
        .await
        .map(|(expires_at, lockout_count, reason)| LockoutStatus { expires_at, lockout_count, reason })
    }

    /// Records a failed attempt, engaging a lockout if the sliding-window
    /// count crosses `maxFailedAttempts`.
    pub async fn record_failure(&self, subject: LockoutSubject<'_>) -> Result<FailureOutcome> {
        let key = subject.key();
        let window = Duration::from_secs(self.config.window_secs);
        let attempts = self.repo.increment(&key, window).await?;

        if attempts < self.config.max_failed_attempts {
            return Ok(FailureOutcome::Allowed { attempts });
        }

        let prior_count = self.repo.get_lockout_count(&key).await?;
        let lockout_count = prior_count + 1;
        let duration = self.lockout_duration(lockout_count);
        self.repo.set_lockout(&key, duration, lockout_count, None).await?;
        self.repo.clear_attempts(&key).await?;

        let until = Utc::now() + chrono::Duration::from_std(duration).unwrap_or_default();
        Ok(FailureOutcome::Locked { until, lockout_count })
    }

    /// `base * multiplier^(lockoutCount - 1)`, capped at `maxLockoutMs`.
    fn lockout_duration(&self, lockout_count: u32) -> Duration {
        let exponent = lockout_count.saturating_sub(1) as i32;
        let ms = (self.config.base_lockout_ms as f64 * self.config.multiplier.powi(exponent))
            .min(self.config.max_lockout_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }

    /// Call on a successful authentication: clears the failure counter but
    /// leaves `lockoutCount` untouched.
    pub async fn record_success(&self, subject: LockoutSubject<'_>) -> Result<()> {
        self.repo.clear_attempts(&subject.key()).await
    }

    /// Admin override: lifts a lockout immediately. `lockoutCount` is
    /// preserved so a repeat offender's next lockout still escalates.
    pub async fn clear_lockout(&self, subject: LockoutSubject<'_>) -> Result<()> {
        self.repo.clear_lockout(&subject.key()).await
    }

    pub async fn list_active_lockouts(&self) -> Result<Vec<String>> {
        self.repo.list_lockout_keys().await
    }

    /// Looks up a lockout by its already-typed key (e.g. `"ip:1.2.3.4"`,
    /// as returned by [`Self::list_active_lockouts`]) rather than a
    /// [`LockoutSubject`] — the admin surface works from keys it has
    /// already listed, not from a kind it has to reconstruct.
    pub async fn lockout_status_by_key(&self, key: &str) -> Result<Option<LockoutStatus>> {
        Ok(self
            .repo
            .get_lockout(key)
            .await?
            .map(|(expires_at, lockout_count, reason)| LockoutStatus { expires_at, lockout_count, reason }))
    }

    pub async fn clear_lockout_by_key(&self, key: &str) -> Result<()> {
        self.repo.clear_lockout(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::storage::MemoryFailedAttemptRepository;

    fn limiter(config: AuthRateLimitConfig) -> AuthRateLimiter {
        AuthRateLimiter::new(Arc::new(MemoryFailedAttemptRepository::default()), config, ResiliencyConfig::default())
    }

    fn fast_config() -> AuthRateLimitConfig {
        AuthRateLimitConfig {
            max_failed_attempts: 3,
            window_secs: 60,
            base_lockout_ms: 1000,
            multiplier: 2.0,
            max_lockout_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn locks_out_after_max_failed_attempts() {
        let limiter = limiter(fast_config());
        let subject = LockoutSubject::Ip("1.2.3.4");
        assert!(matches!(limiter.record_failure(subject).await.unwrap(), FailureOutcome::Allowed { attempts: 1 }));
        assert!(matches!(limiter.record_failure(subject).await.unwrap(), FailureOutcome::Allowed { attempts: 2 }));
        let outcome = limiter.record_failure(subject).await.unwrap();
        assert!(matches!(outcome, FailureOutcome::Locked { lockout_count: 1, .. }));
        assert!(limiter.check_locked(subject).await.is_some());
    }

    #[tokio::test]
    async fn lockout_duration_escalates_geometrically_across_cycles() {
        let limiter = limiter(fast_config());
        let subject = LockoutSubject::User("u1");
        for _ in 0..3 {
            limiter.record_failure(subject).await.unwrap();
        }
        let first = limiter.check_locked(subject).await.unwrap();
        assert_eq!(first.lockout_count, 1);

        limiter.clear_lockout(subject).await.unwrap();
        for _ in 0..3 {
            limiter.record_failure(subject).await.unwrap();
        }
        let second = limiter.check_locked(subject).await.unwrap();
        assert_eq!(second.lockout_count, 2);
        assert!(second.expires_at > first.expires_at);
    }

    #[tokio::test]
    async fn success_clears_attempts_but_not_lockout_count() {
        let limiter = limiter(fast_config());
        let subject = LockoutSubject::ApiKey("key1");
        limiter.record_failure(subject).await.unwrap();
        limiter.record_failure(subject).await.unwrap();
        limiter.record_success(subject).await.unwrap();
        let outcome = limiter.record_failure(subject).await.unwrap();
        assert!(matches!(outcome, FailureOutcome::Allowed { attempts: 1 }));
    }

    #[tokio::test]
    async fn unlocked_key_reports_no_status() {
        let limiter = limiter(fast_config());
        assert!(limiter.check_locked(LockoutSubject::Ip("9.9.9.9")).await.is_none());
    }
}
