//! 测试辅助模块
//! 提供低迭代次数的托管实例与内存中的链节点替身

#![allow(dead_code)]

use std::{
    collections::HashSet,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use dytvault::{
    config::RetryConfig,
    domain::{crypto_provider::SignatureAlgorithm, transaction::SignedEnvelope},
    error::{CustodyError, CustodyResult},
    infrastructure::pbkdf2::{KdfDigest, KdfSettings},
    repository::keystore_repository::FileKeystoreRepository,
    service::{
        chain_client::{AccountStateClient, BroadcastClient, BroadcastReceipt},
        custody::Custody,
        keystore_manager::KeystoreManager,
        retry_policy::RetryPolicy,
        session_guard::SessionGuard,
    },
};

/// 测试用 KDF 设置（迭代次数压到最低）
pub fn fast_kdf() -> KdfSettings {
    KdfSettings {
        iterations: 1_000,
        digest: KdfDigest::Sha256,
    }
}

pub fn ci_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        backoff_ms: 0,
        max_backoff_ms: 0,
        ci_mode: true,
    }
}

/// 创建测试托管实例
pub fn test_custody(dir: &Path, retry: RetryConfig, idle_timeout: Duration) -> Arc<Custody> {
    let repo = Arc::new(FileKeystoreRepository::open(dir).expect("open keystore dir"));
    Arc::new(Custody::new(
        KeystoreManager::new(repo, "dyt", fast_kdf()),
        SessionGuard::new(idle_timeout),
        RetryPolicy::new(retry),
        SignatureAlgorithm::Ed25519,
    ))
}

/// 内存链节点：固定 nonce，可指定第几次提交失败
pub struct FakeChain {
    pub nonce: u64,
    pub fail_on: HashSet<usize>,
    pub submitted: Mutex<Vec<SignedEnvelope>>,
    pub nonce_queries: Mutex<Vec<String>>,
}

impl FakeChain {
    pub fn new(nonce: u64) -> Arc<Self> {
        Self::failing(nonce, &[])
    }

    pub fn failing(nonce: u64, fail_on: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            nonce,
            fail_on: fail_on.iter().copied().collect(),
            submitted: Mutex::new(Vec::new()),
            nonce_queries: Mutex::new(Vec::new()),
        })
    }

    pub fn submitted_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl AccountStateClient for FakeChain {
    async fn account_nonce(&self, address: &str) -> CustodyResult<u64> {
        self.nonce_queries.lock().unwrap().push(address.to_string());
        Ok(self.nonce)
    }
}

#[async_trait]
impl BroadcastClient for FakeChain {
    async fn submit(&self, envelope: &SignedEnvelope) -> CustodyResult<BroadcastReceipt> {
        let mut submitted = self.submitted.lock().unwrap();
        let call_index = submitted.len();
        if self.fail_on.contains(&call_index) {
            return Err(CustodyError::Rpc("HTTP 503 Service Unavailable".into()));
        }
        submitted.push(envelope.clone());
        Ok(BroadcastReceipt {
            hash: format!("0xhash{}", envelope.tx.nonce),
            status: "pending".into(),
        })
    }
}
