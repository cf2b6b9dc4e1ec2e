//! 托管门面
//!
//! 串联密钥库、重试策略与会话守卫：解锁请求先经过重试策略，
//! 成功后写入会话守卫；签名只从会话守卫取用私钥。

use std::sync::Arc;

use crate::{
    config::Config,
    domain::{
        crypto_provider::SignatureAlgorithm,
        keystore_record::KeystoreRecord,
        transaction::{build_signed_envelope, Msg, SignedEnvelope, Transaction},
    },
    error::{CustodyError, CustodyResult},
    infrastructure::shutdown::Shutdown,
    repository::keystore_repository::FileKeystoreRepository,
    service::{
        keystore_manager::KeystoreManager,
        retry_policy::RetryPolicy,
        session_guard::{SessionGuard, SessionState},
    },
};

pub struct Custody {
    keystore: KeystoreManager,
    sessions: SessionGuard,
    retry: RetryPolicy,
    default_algorithm: SignatureAlgorithm,
}

impl Custody {
    pub fn new(
        keystore: KeystoreManager,
        sessions: SessionGuard,
        retry: RetryPolicy,
        default_algorithm: SignatureAlgorithm,
    ) -> Self {
        Self {
            keystore,
            sessions,
            retry,
            default_algorithm,
        }
    }

    /// 按配置组装（文件密钥库）
    pub fn from_config(config: &Config, shutdown: Arc<Shutdown>) -> CustodyResult<Self> {
        let repo = Arc::new(FileKeystoreRepository::open(&config.keystore.dir)?);
        let keystore = KeystoreManager::new(
            repo,
            config.chain.address_prefix.clone(),
            config.keystore.kdf_settings(),
        );
        let sessions = SessionGuard::new(config.session.idle_timeout());
        let retry = RetryPolicy::new(config.retry.clone()).with_shutdown(shutdown);
        let default_algorithm = SignatureAlgorithm::from_id(&config.keystore.default_algorithm)?;

        Ok(Self::new(keystore, sessions, retry, default_algorithm))
    }

    pub fn keystore(&self) -> &KeystoreManager {
        &self.keystore
    }

    pub fn sessions(&self) -> &SessionGuard {
        &self.sessions
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn create_account(
        &self,
        name: &str,
        algorithm: Option<SignatureAlgorithm>,
        passphrase: &str,
    ) -> CustodyResult<KeystoreRecord> {
        self.keystore
            .create(name, algorithm.unwrap_or(self.default_algorithm), passphrase)
    }

    /// 解锁账户并打开会话
    pub async fn unlock(&self, name: &str, passphrase: &str) -> CustodyResult<SessionState> {
        let attempt = self.sessions.begin_unlock(name);
        let key = self
            .retry
            .attempt(name, || self.keystore.unlock(name, passphrase))
            .await?;

        let state = attempt.install(key);
        tracing::info!(name = %name, "Account unlocked");
        Ok(state)
    }

    pub fn lock(&self, name: &str) -> bool {
        self.sessions.lock(name)
    }

    /// 已解锁会话的地址
    pub fn session_address(&self, name: &str) -> CustodyResult<String> {
        match self.sessions.state(name) {
            SessionState::Unlocked { address, .. } => Ok(address),
            _ => Err(CustodyError::SessionNotUnlocked(name.to_string())),
        }
    }

    /// 用会话密钥对交易签名
    ///
    /// 所有消息的发送方必须是该账户地址
    pub fn sign_transaction(&self, name: &str, tx: &Transaction) -> CustodyResult<SignedEnvelope> {
        tx.validate()?;

        self.sessions.with_secret(name, |session| {
            for (index, msg) in tx.msgs.iter().enumerate() {
                let Msg::Send { from, .. } = msg;
                if from != session.address() {
                    return Err(CustodyError::InvalidTransaction(format!(
                        "message {}: sender {} is not the address of `{}`",
                        index, from, name
                    )));
                }
            }
            build_signed_envelope(
                tx,
                session.secret_key(),
                session.public_key(),
                session.algorithm(),
            )
        })
    }

    /// 修改口令（旧口令验证同样受重试策略约束）
    pub async fn change_passphrase(
        &self,
        name: &str,
        old_passphrase: &str,
        new_passphrase: &str,
    ) -> CustodyResult<()> {
        self.retry
            .attempt(name, || {
                self.keystore
                    .change_passphrase(name, old_passphrase, new_passphrase)
            })
            .await
    }

    /// 删除账户并清除其会话
    pub async fn delete_account(&self, name: &str, passphrase: &str) -> CustodyResult<()> {
        self.retry
            .attempt(name, || self.keystore.delete(name, passphrase))
            .await?;
        self.sessions.lock(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::RetryConfig,
        domain::transaction::{verify_envelope, Denom},
        infrastructure::pbkdf2::{KdfDigest, KdfSettings},
    };

    fn custody(dir: &std::path::Path) -> Custody {
        let repo = Arc::new(FileKeystoreRepository::open(dir).unwrap());
        Custody::new(
            KeystoreManager::new(
                repo,
                "dyt",
                KdfSettings {
                    iterations: 1_000,
                    digest: KdfDigest::Sha256,
                },
            ),
            SessionGuard::new(Duration::from_secs(60)),
            RetryPolicy::new(RetryConfig {
                max_retries: 3,
                backoff_ms: 0,
                max_backoff_ms: 0,
                ci_mode: true,
            }),
            SignatureAlgorithm::Ed25519,
        )
    }

    #[tokio::test]
    async fn test_sign_requires_unlocked_session() {
        let dir = tempfile::tempdir().unwrap();
        let c = custody(dir.path());
        let record = c.create_account("alice", None, "p1").unwrap();

        let tx = Transaction::new(
            "dyt-1",
            1,
            vec![Msg::send(&record.address, "dyt1b", Denom::DGT, "100")],
            "1",
            "",
        );
        assert!(matches!(
            c.sign_transaction("alice", &tx),
            Err(CustodyError::SessionNotUnlocked(_))
        ));

        c.unlock("alice", "p1").await.unwrap();
        let env = c.sign_transaction("alice", &tx).unwrap();
        assert!(verify_envelope(&env));

        c.lock("alice");
        assert!(c.sign_transaction("alice", &tx).is_err());
    }

    #[tokio::test]
    async fn test_sign_rejects_foreign_sender() {
        let dir = tempfile::tempdir().unwrap();
        let c = custody(dir.path());
        c.create_account("alice", None, "p1").unwrap();
        c.unlock("alice", "p1").await.unwrap();

        let tx = Transaction::new(
            "dyt-1",
            1,
            vec![Msg::send("dyt1someoneelse", "dyt1b", Denom::DGT, "1")],
            "0",
            "",
        );
        assert!(matches!(
            c.sign_transaction("alice", &tx),
            Err(CustodyError::InvalidTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_unlock_leaves_account_locked() {
        let dir = tempfile::tempdir().unwrap();
        let c = custody(dir.path());
        c.create_account("alice", None, "p1").unwrap();

        c.unlock("alice", "p1").await.unwrap();
        assert!(c.unlock("alice", "bad").await.is_err());
        // 新的解锁请求已清除旧会话
        assert_eq!(c.sessions().state("alice"), SessionState::Locked);
    }
}
