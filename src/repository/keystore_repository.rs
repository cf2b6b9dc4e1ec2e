//! 密钥库持久化
//!
//! 每个账户一个 `<name>.json`，整条记录写入临时文件后原子重命名。
//! 不做跨进程加锁：多个进程同时修改同一账户时后写者覆盖先写者。

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use crate::{
    domain::keystore_record::KeystoreRecord,
    error::{CustodyError, CustodyResult},
};

const RECORD_EXTENSION: &str = "json";
const MAX_NAME_LENGTH: usize = 64;

/// 账户名即文件名，只允许 `[A-Za-z0-9_.-]{1,64}` 且不能以 `.` 开头
pub fn validate_account_name(name: &str) -> CustodyResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));

    if valid {
        Ok(())
    } else {
        Err(CustodyError::InvalidAccountName(name.to_string()))
    }
}

/// 密钥库存储抽象
pub trait KeystoreRepository: Send + Sync {
    /// 所有可解析的记录（按名称排序）
    fn list(&self) -> CustodyResult<Vec<KeystoreRecord>>;

    /// 读取记录；不存在时返回 `NotFound`
    fn load(&self, name: &str) -> CustodyResult<KeystoreRecord>;

    fn exists(&self, name: &str) -> CustodyResult<bool>;

    /// 写入新记录；已存在时返回 `NameCollision`，绝不覆盖
    fn insert_new(&self, record: &KeystoreRecord) -> CustodyResult<()>;

    /// 原子替换已有记录
    fn replace(&self, record: &KeystoreRecord) -> CustodyResult<()>;

    fn remove(&self, name: &str) -> CustodyResult<()>;
}

/// 基于目录的实现
#[derive(Debug, Clone)]
pub struct FileKeystoreRepository {
    dir: PathBuf,
}

impl FileKeystoreRepository {
    /// 打开（必要时创建）密钥库目录
    pub fn open(dir: impl Into<PathBuf>) -> CustodyResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        }

        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, RECORD_EXTENSION))
    }

    fn read_record(path: &Path) -> CustodyResult<KeystoreRecord> {
        let raw = fs::read(path)?;
        serde_json::from_slice(&raw).map_err(|e| {
            CustodyError::InvalidRecord(format!("{}: {}", path.display(), e))
        })
    }

    /// 写入同目录下的临时文件（0600），返回待重命名的句柄
    fn write_temp(&self, record: &KeystoreRecord) -> CustodyResult<NamedTempFile> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        let body = serde_json::to_vec_pretty(record)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }
}

impl KeystoreRepository for FileKeystoreRepository {
    fn list(&self) -> CustodyResult<Vec<KeystoreRecord>> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_record = path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
                && path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|stem| validate_account_name(stem).is_ok());
            if !is_record {
                continue;
            }

            match Self::read_record(&path) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable keystore record");
                }
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    fn load(&self, name: &str) -> CustodyResult<KeystoreRecord> {
        validate_account_name(name)?;
        let path = self.record_path(name);

        let record = match Self::read_record(&path) {
            Err(CustodyError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CustodyError::NotFound(name.to_string()));
            }
            other => other?,
        };

        if record.name != name {
            return Err(CustodyError::InvalidRecord(format!(
                "record in {} is named `{}`",
                path.display(),
                record.name
            )));
        }
        Ok(record)
    }

    fn exists(&self, name: &str) -> CustodyResult<bool> {
        validate_account_name(name)?;
        Ok(self.record_path(name).exists())
    }

    fn insert_new(&self, record: &KeystoreRecord) -> CustodyResult<()> {
        validate_account_name(&record.name)?;
        let tmp = self.write_temp(record)?;

        tmp.persist_noclobber(self.record_path(&record.name))
            .map_err(|e| {
                if e.error.kind() == io::ErrorKind::AlreadyExists {
                    CustodyError::NameCollision(record.name.clone())
                } else {
                    CustodyError::Io(e.error)
                }
            })?;
        Ok(())
    }

    fn replace(&self, record: &KeystoreRecord) -> CustodyResult<()> {
        if !self.exists(&record.name)? {
            return Err(CustodyError::NotFound(record.name.clone()));
        }
        let tmp = self.write_temp(record)?;
        tmp.persist(self.record_path(&record.name))
            .map_err(|e| CustodyError::Io(e.error))?;
        Ok(())
    }

    fn remove(&self, name: &str) -> CustodyResult<()> {
        validate_account_name(name)?;
        match fs::remove_file(self.record_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CustodyError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{
        domain::crypto_provider::SignatureAlgorithm,
        infrastructure::{encryption::SealedSecret, pbkdf2::KdfDigest},
    };

    fn record(name: &str) -> KeystoreRecord {
        KeystoreRecord::seal(
            name,
            format!("dyt1{}", name),
            &[1; 32],
            SignatureAlgorithm::Ed25519,
            &[2; 16],
            1_000,
            KdfDigest::Sha256,
            &SealedSecret {
                iv: vec![3; 12],
                tag: vec![4; 16],
                ciphertext: vec![5; 32],
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_insert_load_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileKeystoreRepository::open(dir.path()).unwrap();

        let alice = record("alice");
        repo.insert_new(&record("bob")).unwrap();
        repo.insert_new(&alice).unwrap();

        assert_eq!(repo.load("alice").unwrap(), alice);
        let names: Vec<String> = repo.list().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        repo.remove("alice").unwrap();
        assert!(!repo.exists("alice").unwrap());
        assert!(matches!(
            repo.load("alice"),
            Err(CustodyError::NotFound(_))
        ));
    }

    #[test]
    fn test_insert_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileKeystoreRepository::open(dir.path()).unwrap();

        let original = record("alice");
        repo.insert_new(&original).unwrap();

        let mut other = record("alice");
        other.address = "dyt1other".into();
        assert!(matches!(
            repo.insert_new(&other),
            Err(CustodyError::NameCollision(_))
        ));
        assert_eq!(repo.load("alice").unwrap().address, original.address);
    }

    #[test]
    fn test_replace_requires_existing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileKeystoreRepository::open(dir.path()).unwrap();

        assert!(matches!(
            repo.replace(&record("ghost")),
            Err(CustodyError::NotFound(_))
        ));

        repo.insert_new(&record("alice")).unwrap();
        let mut updated = record("alice");
        updated.kdf.iter = 2_000;
        repo.replace(&updated).unwrap();
        assert_eq!(repo.load("alice").unwrap().kdf.iter, 2_000);

        // 没有残留的临时文件
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_list_skips_garbage_files() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileKeystoreRepository::open(dir.path()).unwrap();
        repo.insert_new(&record("alice")).unwrap();
        fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        let records = repo.list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "alice");
    }

    #[test]
    fn test_account_name_rules() {
        for ok in ["alice", "a", "bob_2", "my.key-1"] {
            assert!(validate_account_name(ok).is_ok(), "{}", ok);
        }
        let too_long = "a".repeat(65);
        for bad in ["", ".hidden", "../etc", "a/b", "sp ace", too_long.as_str()] {
            assert!(validate_account_name(bad).is_err(), "{:?}", bad);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_record_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let repo = FileKeystoreRepository::open(dir.path()).unwrap();
        repo.insert_new(&record("alice")).unwrap();

        let mode = fs::metadata(dir.path().join("alice.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
