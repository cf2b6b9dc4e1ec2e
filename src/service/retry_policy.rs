//! 口令重试策略
//!
//! 进程内、按账户计数的失败解锁次数。达到上限后该账户在本进程剩余生命周期内
//! 一律返回 `LockedOut`，不持久化。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    config::RetryConfig,
    error::{CustodyError, CustodyResult},
    infrastructure::shutdown::Shutdown,
};

/// 第 `failures` 次失败后的退避时长：`base * 2^(n-1)`，封顶 `max`
pub fn backoff_delay(failures: u32, base_ms: u64, max_ms: u64) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let factor = 2u64.saturating_pow(failures - 1);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

pub struct RetryPolicy {
    config: RetryConfig,
    failures: Mutex<HashMap<String, u32>>,
    shutdown: Option<Arc<Shutdown>>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
            shutdown: None,
        }
    }

    /// 退避等待可被关闭信号打断
    pub fn with_shutdown(mut self, shutdown: Arc<Shutdown>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn counters(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn failures(&self, name: &str) -> u32 {
        self.counters().get(name).copied().unwrap_or(0)
    }

    pub fn is_locked_out(&self, name: &str) -> bool {
        self.failures(name) >= self.config.max_retries
    }

    pub fn remaining_attempts(&self, name: &str) -> u32 {
        self.config.max_retries.saturating_sub(self.failures(name))
    }

    /// 已锁定时返回 `LockedOut`
    pub fn ensure_not_locked_out(&self, name: &str) -> CustodyResult<()> {
        if self.is_locked_out(name) {
            return Err(CustodyError::LockedOut {
                name: name.to_string(),
                attempts: self.failures(name),
            });
        }
        Ok(())
    }

    /// 执行一次解锁尝试
    ///
    /// - 已锁定：不调用 `op`，直接返回 `LockedOut`
    /// - `AuthenticationFailed`：计数加一；未达上限时退避后再返回该错误
    /// - 成功：计数清零
    /// - 其他错误原样返回，不计数
    pub async fn attempt<T, F>(&self, name: &str, op: F) -> CustodyResult<T>
    where
        F: FnOnce() -> CustodyResult<T>,
    {
        let max = self.config.max_retries;
        self.ensure_not_locked_out(name)?;

        match op() {
            Ok(value) => {
                self.counters().remove(name);
                Ok(value)
            }
            Err(CustodyError::AuthenticationFailed) => {
                let failures = {
                    let mut counters = self.counters();
                    let n = counters.entry(name.to_string()).or_insert(0);
                    *n += 1;
                    *n
                };

                if failures >= max {
                    tracing::warn!(name = %name, attempts = failures, "Account locked out for this process");
                    return Err(CustodyError::AuthenticationFailed);
                }

                tracing::warn!(
                    name = %name,
                    attempt = failures,
                    max_retries = max,
                    "Unlock failed"
                );

                if !self.config.ci_mode {
                    let delay =
                        backoff_delay(failures, self.config.backoff_ms, self.config.max_backoff_ms);
                    self.pause(delay).await?;
                }
                Err(CustodyError::AuthenticationFailed)
            }
            Err(other) => Err(other),
        }
    }

    async fn pause(&self, delay: Duration) -> CustodyResult<()> {
        if delay.is_zero() {
            return Ok(());
        }
        match &self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(()),
                    _ = shutdown.wait() => Err(CustodyError::Interrupted),
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_retries: u32, ci_mode: bool) -> RetryConfig {
        RetryConfig {
            max_retries,
            backoff_ms: 100,
            max_backoff_ms: 1_000,
            ci_mode,
        }
    }

    #[test]
    fn test_backoff_escalates_and_caps() {
        assert_eq!(backoff_delay(0, 100, 1_000), Duration::ZERO);
        assert_eq!(backoff_delay(1, 100, 1_000), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, 100, 1_000), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, 100, 1_000), Duration::from_millis(400));
        assert_eq!(backoff_delay(10, 100, 1_000), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(80, 100, 1_000), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_lockout_after_max_failures() {
        let policy = RetryPolicy::new(config(3, true));

        for _ in 0..3 {
            let r: CustodyResult<()> = policy
                .attempt("alice", || Err(CustodyError::AuthenticationFailed))
                .await;
            assert!(matches!(r, Err(CustodyError::AuthenticationFailed)));
        }

        // 正确口令也被拒绝，且不会调用 op
        let mut called = false;
        let r = policy
            .attempt("alice", || {
                called = true;
                Ok(())
            })
            .await;
        assert!(matches!(r, Err(CustodyError::LockedOut { attempts: 3, .. })));
        assert!(!called);

        // 其他账户不受影响
        assert!(policy.attempt("bob", || Ok(())).await.is_ok());
    }

    #[tokio::test]
    async fn test_ensure_not_locked_out_tracks_last_allowed_failure() {
        let policy = RetryPolicy::new(config(2, true));
        assert!(policy.ensure_not_locked_out("alice").is_ok());

        let _: CustodyResult<()> = policy
            .attempt("alice", || Err(CustodyError::AuthenticationFailed))
            .await;
        assert!(policy.ensure_not_locked_out("alice").is_ok());

        let _: CustodyResult<()> = policy
            .attempt("alice", || Err(CustodyError::AuthenticationFailed))
            .await;
        assert_eq!(policy.remaining_attempts("alice"), 0);
        assert!(matches!(
            policy.ensure_not_locked_out("alice"),
            Err(CustodyError::LockedOut { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let policy = RetryPolicy::new(config(3, true));
        let _: CustodyResult<()> = policy
            .attempt("alice", || Err(CustodyError::AuthenticationFailed))
            .await;
        assert_eq!(policy.failures("alice"), 1);

        policy.attempt("alice", || Ok(())).await.unwrap();
        assert_eq!(policy.failures("alice"), 0);
        assert_eq!(policy.remaining_attempts("alice"), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_counted() {
        let policy = RetryPolicy::new(config(3, true));
        let r: CustodyResult<()> = policy
            .attempt("ghost", || Err(CustodyError::NotFound("ghost".into())))
            .await;
        assert!(matches!(r, Err(CustodyError::NotFound(_))));
        assert_eq!(policy.failures("ghost"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interactive_mode_waits_before_returning() {
        let policy = RetryPolicy::new(config(5, false));
        let start = tokio::time::Instant::now();

        let _: CustodyResult<()> = policy
            .attempt("alice", || Err(CustodyError::AuthenticationFailed))
            .await;
        assert!(start.elapsed() >= Duration::from_millis(100));

        let _: CustodyResult<()> = policy
            .attempt("alice", || Err(CustodyError::AuthenticationFailed))
            .await;
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_backoff_is_interrupted_by_shutdown() {
        let shutdown = Arc::new(Shutdown::new());
        let mut cfg = config(5, false);
        cfg.backoff_ms = 60_000;
        cfg.max_backoff_ms = 60_000;
        let policy = RetryPolicy::new(cfg).with_shutdown(shutdown.clone());

        shutdown.trigger();
        let r: CustodyResult<()> = policy
            .attempt("alice", || Err(CustodyError::AuthenticationFailed))
            .await;
        assert!(matches!(r, Err(CustodyError::Interrupted)));
        assert_eq!(policy.failures("alice"), 1);
    }
}
