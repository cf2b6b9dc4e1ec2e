//! 解锁会话守卫
//!
//! 每个账户名最多一个会话，状态机：`Locked → Unlocking → Unlocked → Locked`。
//! 所有会话由同一把互斥锁持有；签名在锁内进行，清除（空闲超时或信号）
//! 与签名互斥。会话被移出映射表即被丢弃，私钥缓冲区随之清零。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot, Notify},
    task::JoinHandle,
    time::Instant,
};

use crate::{
    domain::crypto_provider::{SecretBytes, SignatureAlgorithm},
    error::{CustodyError, CustodyResult},
    infrastructure::shutdown::Shutdown,
    service::keystore_manager::UnlockedKey,
    utils::error_codes::ErrorCode,
};

/// 已解锁的会话
pub struct UnlockSession {
    name: String,
    address: String,
    algorithm: SignatureAlgorithm,
    public_key: Vec<u8>,
    secret_key: SecretBytes,
    created_at: DateTime<Utc>,
    expires_at: Instant,
}

impl UnlockSession {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn secret_key(&self) -> &[u8] {
        self.secret_key.as_slice()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for UnlockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockSession")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("algorithm", &self.algorithm)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

enum Slot {
    /// KDF + 解密进行中
    Unlocking,
    Unlocked(UnlockSession),
}

/// 会话状态（对外只读视图）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Locked,
    Unlocking,
    Unlocked {
        address: String,
        remaining_secs: u64,
    },
}

struct GuardInner {
    slots: Mutex<HashMap<String, Slot>>,
    idle_timeout: Duration,
    changed: Notify,
}

/// 会话守卫（可克隆，共享同一份状态）
#[derive(Clone)]
pub struct SessionGuard {
    inner: Arc<GuardInner>,
}

impl SessionGuard {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                slots: Mutex::new(HashMap::new()),
                idle_timeout,
                changed: Notify::new(),
            }),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // 持锁线程 panic 后映射表仍然一致（只有整条插入/移除），继续使用
        self.inner
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 进入 `Unlocking`：先清除该账户的旧会话
    ///
    /// 返回的句柄未 `install` 就被丢弃时自动回到 `Locked`
    pub fn begin_unlock(&self, name: &str) -> UnlockAttempt {
        let previous = self.slots().insert(name.to_string(), Slot::Unlocking);
        if matches!(previous, Some(Slot::Unlocked(_))) {
            tracing::info!(name = %name, "Previous session purged by new unlock");
        }
        drop(previous);

        UnlockAttempt {
            guard: self.clone(),
            name: name.to_string(),
            finished: false,
        }
    }

    fn install(&self, key: UnlockedKey) -> SessionState {
        let now = Instant::now();
        let session = UnlockSession {
            name: key.name.clone(),
            address: key.address,
            algorithm: key.algorithm,
            public_key: key.public_key,
            secret_key: key.secret_key,
            created_at: Utc::now(),
            expires_at: now + self.inner.idle_timeout,
        };
        let state = SessionState::Unlocked {
            address: session.address.clone(),
            remaining_secs: self.inner.idle_timeout.as_secs(),
        };

        self.slots().insert(key.name, Slot::Unlocked(session));
        self.inner.changed.notify_one();
        state
    }

    fn abort_unlock(&self, name: &str) {
        let mut slots = self.slots();
        if matches!(slots.get(name), Some(Slot::Unlocking)) {
            slots.remove(name);
        }
    }

    /// 在锁内使用会话密钥；成功后延长空闲期限
    ///
    /// 会话不存在、正在解锁或已过期时返回 `SessionNotUnlocked`
    pub fn with_secret<T, F>(&self, name: &str, f: F) -> CustodyResult<T>
    where
        F: FnOnce(&UnlockSession) -> CustodyResult<T>,
    {
        let mut slots = self.slots();
        let now = Instant::now();

        let expired = match slots.get(name) {
            Some(Slot::Unlocked(session)) => session.is_expired(now),
            _ => return Err(CustodyError::SessionNotUnlocked(name.to_string())),
        };
        if expired {
            slots.remove(name);
            tracing::info!(name = %name, "Session expired");
            return Err(CustodyError::SessionNotUnlocked(name.to_string()));
        }

        let Some(Slot::Unlocked(session)) = slots.get_mut(name) else {
            return Err(CustodyError::SessionNotUnlocked(name.to_string()));
        };
        let result = f(session)?;
        session.expires_at = Instant::now() + self.inner.idle_timeout;
        Ok(result)
    }

    /// 显式锁定；返回是否确有会话被清除
    pub fn lock(&self, name: &str) -> bool {
        let removed = self.slots().remove(name).is_some();
        if removed {
            tracing::info!(name = %name, "Session locked");
        }
        removed
    }

    /// 清除全部会话
    pub fn purge_all(&self) -> usize {
        let drained: Vec<Slot> = self.slots().drain().map(|(_, slot)| slot).collect();
        let count = drained.len();
        drop(drained);
        if count > 0 {
            tracing::info!(count, "All sessions purged");
        }
        count
    }

    /// 清除已过期会话
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|name, slot| match slot {
            Slot::Unlocked(session) if session.is_expired(now) => {
                tracing::info!(name = %name, "Session expired");
                false
            }
            _ => true,
        });
        before - slots.len()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.slots()
            .values()
            .filter_map(|slot| match slot {
                Slot::Unlocked(session) => Some(session.expires_at),
                Slot::Unlocking => None,
            })
            .min()
    }

    pub fn is_unlocked(&self, name: &str) -> bool {
        matches!(self.state(name), SessionState::Unlocked { .. })
    }

    pub fn state(&self, name: &str) -> SessionState {
        let now = Instant::now();
        match self.slots().get(name) {
            None => SessionState::Locked,
            Some(Slot::Unlocking) => SessionState::Unlocking,
            Some(Slot::Unlocked(session)) if session.is_expired(now) => SessionState::Locked,
            Some(Slot::Unlocked(session)) => SessionState::Unlocked {
                address: session.address.clone(),
                remaining_secs: session.expires_at.saturating_duration_since(now).as_secs(),
            },
        }
    }

    /// 启动空闲超时清理任务
    pub fn spawn_reaper(&self) -> ReaperHandle {
        let (tx, mut rx) = mpsc::channel::<GuardCommand>(8);
        let guard = self.clone();

        let task = tokio::spawn(async move {
            loop {
                let next = guard.next_deadline();
                let deadline = async move {
                    match next {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(GuardCommand::PurgeAll { ack }) => {
                            let purged = guard.purge_all();
                            let _ = ack.send(purged);
                        }
                        None => break,
                    },
                    _ = deadline => {
                        guard.purge_expired();
                    }
                    _ = guard.inner.changed.notified() => {}
                }
            }
            tracing::debug!("Session reaper stopped");
        });

        ReaperHandle {
            tx,
            guard: self.clone(),
            task,
        }
    }
}

/// 进行中的解锁
pub struct UnlockAttempt {
    guard: SessionGuard,
    name: String,
    finished: bool,
}

impl UnlockAttempt {
    /// 解锁成功：安装会话
    pub fn install(mut self, key: UnlockedKey) -> SessionState {
        self.finished = true;
        self.guard.install(key)
    }
}

impl Drop for UnlockAttempt {
    fn drop(&mut self) {
        if !self.finished {
            self.guard.abort_unlock(&self.name);
        }
    }
}

/// 发往清理任务的命令
#[derive(Debug)]
pub enum GuardCommand {
    PurgeAll { ack: oneshot::Sender<usize> },
}

/// 清理任务句柄
pub struct ReaperHandle {
    tx: mpsc::Sender<GuardCommand>,
    guard: SessionGuard,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// 请求清理任务清除全部会话并等待确认
    pub async fn purge_all(&self) -> usize {
        let (ack, done) = oneshot::channel();
        if self.tx.send(GuardCommand::PurgeAll { ack }).await.is_err() {
            return self.guard.purge_all();
        }
        match done.await {
            Ok(purged) => purged,
            Err(_) => self.guard.purge_all(),
        }
    }

    /// 停止清理任务
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

/// 安装信号处理：收到 SIGINT/SIGTERM 后先清除所有会话，再退出进程
pub fn install_signal_purge(reaper: ReaperHandle, shutdown: Arc<Shutdown>) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.trigger();

        let purged = reaper.purge_all().await;
        tracing::warn!(purged, "Termination signal received, sessions purged");

        std::process::exit(i32::from(ErrorCode::EXIT_INTERRUPTED));
    })
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
