//! 密钥库管理器
//!
//! 创建、导入、解锁、改口令、导出公开信息、删除账户。
//! 私钥明文只出现在生成、解密成功与会话缓冲区三处，从不落盘。

use std::sync::Arc;

use chrono::Utc;

use crate::{
    domain::{
        address::derive_address,
        crypto_provider::{SecretBytes, SignatureAlgorithm},
        keystore_record::{AccountSummary, KeystoreRecord, PublicExport},
    },
    error::{CustodyError, CustodyResult},
    infrastructure::{
        encryption::{decrypt_data, encrypt_data},
        pbkdf2::{derive_key, generate_salt, KdfSettings},
    },
    repository::keystore_repository::{validate_account_name, KeystoreRepository},
};

/// 导入时用于检验密钥对是否匹配的探测消息
const IMPORT_PROBE: &[u8] = b"dytvault-import-probe";

/// 解锁得到的密钥材料
#[derive(Debug)]
pub struct UnlockedKey {
    pub name: String,
    pub address: String,
    pub algorithm: SignatureAlgorithm,
    pub public_key: Vec<u8>,
    pub secret_key: SecretBytes,
}

/// 密钥库管理器
pub struct KeystoreManager {
    repo: Arc<dyn KeystoreRepository>,
    address_prefix: String,
    kdf: KdfSettings,
}

impl KeystoreManager {
    pub fn new(
        repo: Arc<dyn KeystoreRepository>,
        address_prefix: impl Into<String>,
        kdf: KdfSettings,
    ) -> Self {
        Self {
            repo,
            address_prefix: address_prefix.into(),
            kdf,
        }
    }

    pub fn address_prefix(&self) -> &str {
        &self.address_prefix
    }

    /// 生成新密钥对并加密保存
    pub fn create(
        &self,
        name: &str,
        algorithm: SignatureAlgorithm,
        passphrase: &str,
    ) -> CustodyResult<KeystoreRecord> {
        validate_account_name(name)?;
        // KDF 前先检查重名，insert_new 仍会在竞争时拦截
        if self.repo.exists(name)? {
            return Err(CustodyError::NameCollision(name.to_string()));
        }

        let keypair = algorithm.keypair();
        let record = self.seal_record(
            name,
            algorithm,
            &keypair.public_key,
            &keypair.secret_key,
            passphrase,
            Utc::now(),
        )?;
        self.repo.insert_new(&record)?;

        tracing::info!(
            name = %name,
            address = %record.address,
            algorithm = %algorithm,
            "Keystore account created"
        );
        Ok(record)
    }

    /// 导入外部生成的密钥对
    pub fn import(
        &self,
        name: &str,
        algorithm: SignatureAlgorithm,
        public_key: &[u8],
        secret_key: &SecretBytes,
        passphrase: &str,
    ) -> CustodyResult<KeystoreRecord> {
        validate_account_name(name)?;
        if self.repo.exists(name)? {
            return Err(CustodyError::NameCollision(name.to_string()));
        }

        if public_key.len() != algorithm.public_key_len()
            || secret_key.len() != algorithm.secret_key_len()
        {
            return Err(CustodyError::Crypto(format!(
                "key lengths do not match {}",
                algorithm
            )));
        }
        let probe = algorithm.sign(secret_key.as_slice(), IMPORT_PROBE)?;
        if !algorithm.verify(public_key, IMPORT_PROBE, &probe) {
            return Err(CustodyError::Crypto(
                "secret key does not match public key".into(),
            ));
        }

        let record = self.seal_record(
            name,
            algorithm,
            public_key,
            secret_key,
            passphrase,
            Utc::now(),
        )?;
        self.repo.insert_new(&record)?;

        tracing::info!(name = %name, address = %record.address, "Keystore account imported");
        Ok(record)
    }

    /// 用口令解密私钥
    ///
    /// 口令错误与记录损坏都返回 `AuthenticationFailed`
    pub fn unlock(&self, name: &str, passphrase: &str) -> CustodyResult<UnlockedKey> {
        let record = self.load_sealed(name)?;
        self.open_record(&record, passphrase)
    }

    /// 按地址线性查找
    pub fn find_by_address(&self, address: &str) -> CustodyResult<Option<KeystoreRecord>> {
        Ok(self
            .repo
            .list()?
            .into_iter()
            .find(|r| r.address == address))
    }

    /// 修改口令：新盐值、新 IV，原子替换记录
    pub fn change_passphrase(
        &self,
        name: &str,
        old_passphrase: &str,
        new_passphrase: &str,
    ) -> CustodyResult<()> {
        let record = self.load_sealed(name)?;
        let unlocked = self.open_record(&record, old_passphrase)?;

        let mut updated = self.seal_record(
            name,
            unlocked.algorithm,
            &unlocked.public_key,
            &unlocked.secret_key,
            new_passphrase,
            record.created_at,
        )?;
        // 地址在创建时确定，之后不随前缀配置变化
        updated.address = record.address;
        self.repo.replace(&updated)?;

        tracing::info!(name = %name, "Keystore passphrase changed");
        Ok(())
    }

    pub fn list(&self) -> CustodyResult<Vec<AccountSummary>> {
        Ok(self.repo.list()?.iter().map(KeystoreRecord::summary).collect())
    }

    pub fn load(&self, name: &str) -> CustodyResult<KeystoreRecord> {
        self.repo.load(name)
    }

    pub fn export_public(&self, name: &str) -> CustodyResult<PublicExport> {
        Ok(self.repo.load(name)?.public_export())
    }

    /// 删除账户（必须先通过口令验证）
    pub fn delete(&self, name: &str, passphrase: &str) -> CustodyResult<()> {
        let record = self.load_sealed(name)?;
        drop(self.open_record(&record, passphrase)?);
        self.repo.remove(name)?;

        tracing::info!(name = %name, "Keystore account deleted");
        Ok(())
    }

    /// 需要口令的操作读取记录：结构损坏与口令错误不可区分
    fn load_sealed(&self, name: &str) -> CustodyResult<KeystoreRecord> {
        match self.repo.load(name) {
            Err(CustodyError::InvalidRecord(detail)) => {
                tracing::warn!(name = %name, error = %detail, "Keystore record is unreadable");
                Err(CustodyError::AuthenticationFailed)
            }
            other => other,
        }
    }

    fn seal_record(
        &self,
        name: &str,
        algorithm: SignatureAlgorithm,
        public_key: &[u8],
        secret_key: &SecretBytes,
        passphrase: &str,
        created_at: chrono::DateTime<Utc>,
    ) -> CustodyResult<KeystoreRecord> {
        let address = derive_address(public_key, &self.address_prefix)?;
        let salt = generate_salt();
        let key = derive_key(passphrase, &salt, self.kdf.iterations, self.kdf.digest)?;
        let sealed = encrypt_data(secret_key.as_slice(), &key)?;

        Ok(KeystoreRecord::seal(
            name,
            address,
            public_key,
            algorithm,
            &salt,
            self.kdf.iterations,
            self.kdf.digest,
            &sealed,
            created_at,
        ))
    }

    fn open_record(&self, record: &KeystoreRecord, passphrase: &str) -> CustodyResult<UnlockedKey> {
        let opaque = |_| CustodyError::AuthenticationFailed;

        let algorithm = record.algorithm().map_err(opaque)?;
        let public_key = record.public_key().map_err(opaque)?;
        let salt = record.salt().map_err(opaque)?;
        let sealed = record.sealed_secret().map_err(opaque)?;

        let key = derive_key(passphrase, &salt, record.kdf.iter, record.kdf.digest).map_err(opaque)?;
        let secret_key = SecretBytes::new(decrypt_data(&sealed, &key)?);

        if secret_key.len() != algorithm.secret_key_len() {
            return Err(CustodyError::AuthenticationFailed);
        }

        Ok(UnlockedKey {
            name: record.name.clone(),
            address: record.address.clone(),
            algorithm,
            public_key,
            secret_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        infrastructure::pbkdf2::KdfDigest, repository::keystore_repository::FileKeystoreRepository,
    };

    fn manager(dir: &std::path::Path) -> KeystoreManager {
        let repo = Arc::new(FileKeystoreRepository::open(dir).unwrap());
        KeystoreManager::new(
            repo,
            "dyt",
            KdfSettings {
                iterations: 1_000,
                digest: KdfDigest::Sha256,
            },
        )
    }

    #[test]
    fn test_create_then_unlock() {
        let dir = tempfile::tempdir().unwrap();
        let km = manager(dir.path());

        let record = km.create("alice", SignatureAlgorithm::Ed25519, "p1").unwrap();
        assert!(record.address.starts_with("dyt1"));

        let unlocked = km.unlock("alice", "p1").unwrap();
        assert_eq!(unlocked.address, record.address);
        assert_eq!(unlocked.secret_key.len(), 32);
    }

    #[test]
    fn test_wrong_passphrase_is_authentication_failed() {
        let dir = tempfile::tempdir().unwrap();
        let km = manager(dir.path());
        km.create("alice", SignatureAlgorithm::Ed25519, "p1").unwrap();

        assert!(matches!(
            km.unlock("alice", "wrong"),
            Err(CustodyError::AuthenticationFailed)
        ));
        assert!(matches!(
            km.unlock("nobody", "p1"),
            Err(CustodyError::NotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let km = manager(dir.path());
        km.create("alice", SignatureAlgorithm::Ed25519, "p1").unwrap();

        assert!(matches!(
            km.create("alice", SignatureAlgorithm::Ed25519, "p2"),
            Err(CustodyError::NameCollision(_))
        ));
        // 原记录仍可用旧口令解锁
        assert!(km.unlock("alice", "p1").is_ok());
    }

    #[test]
    fn test_corrupted_record_is_indistinguishable() {
        let dir = tempfile::tempdir().unwrap();
        let km = manager(dir.path());
        km.create("alice", SignatureAlgorithm::Ed25519, "p1").unwrap();

        let path = dir.path().join("alice.json");
        let mut record: KeystoreRecord =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        record.ciphertext_b64 = "AAAA".into();
        std::fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();

        assert!(matches!(
            km.unlock("alice", "p1"),
            Err(CustodyError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_unparsable_record_fails_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let km = manager(dir.path());
        km.create("alice", SignatureAlgorithm::Ed25519, "p1").unwrap();

        let path = dir.path().join("alice.json");
        let raw = std::fs::read(&path).unwrap();
        std::fs::write(&path, &raw[..raw.len() / 2]).unwrap();

        for passphrase in ["p1", "wrong"] {
            assert!(matches!(
                km.unlock("alice", passphrase),
                Err(CustodyError::AuthenticationFailed)
            ));
        }
        assert!(matches!(
            km.change_passphrase("alice", "p1", "p2"),
            Err(CustodyError::AuthenticationFailed)
        ));
        assert!(matches!(
            km.delete("alice", "p1"),
            Err(CustodyError::AuthenticationFailed)
        ));
        assert!(path.exists());
    }

    #[test]
    fn test_record_under_wrong_name_fails_authentication() {
        let dir = tempfile::tempdir().unwrap();
        let km = manager(dir.path());
        km.create("alice", SignatureAlgorithm::Ed25519, "p1").unwrap();
        std::fs::copy(dir.path().join("alice.json"), dir.path().join("bob.json")).unwrap();

        assert!(matches!(
            km.unlock("bob", "p1"),
            Err(CustodyError::AuthenticationFailed)
        ));
        assert!(matches!(
            km.unlock("bad name", "p1"),
            Err(CustodyError::InvalidAccountName(_))
        ));
    }

    #[test]
    fn test_import_checks_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let km = manager(dir.path());
        let algo = SignatureAlgorithm::Ed25519;

        let a = algo.keypair();
        let b = algo.keypair();
        assert!(km.import("mixed", algo, &a.public_key, &b.secret_key, "p").is_err());

        let record = km.import("good", algo, &a.public_key, &a.secret_key, "p").unwrap();
        let unlocked = km.unlock("good", "p").unwrap();
        assert_eq!(unlocked.public_key, a.public_key);
        assert_eq!(unlocked.address, record.address);
    }

    #[test]
    fn test_delete_requires_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let km = manager(dir.path());
        km.create("alice", SignatureAlgorithm::Ed25519, "p1").unwrap();

        assert!(km.delete("alice", "nope").is_err());
        assert_eq!(km.list().unwrap().len(), 1);

        km.delete("alice", "p1").unwrap();
        assert!(km.list().unwrap().is_empty());
    }
}
