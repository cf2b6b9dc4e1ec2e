//! PBKDF2 密钥派生模块
//! 用于从账户口令派生 AES-256 加密密钥

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};

use crate::{
    error::{CustodyError, CustodyResult},
    infrastructure::encryption::{EncryptionKey, KEY_LENGTH},
};

/// PBKDF2 密钥派生参数
pub const DEFAULT_ITERATIONS: u32 = 100_000; // 100,000次迭代
pub const MIN_ITERATIONS: u32 = 1_000;
pub const SALT_LENGTH: usize = 16; // 16字节盐值

/// HMAC 摘要算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KdfDigest {
    Sha256,
    Sha512,
}

impl KdfDigest {
    pub fn as_str(&self) -> &'static str {
        match self {
            KdfDigest::Sha256 => "sha256",
            KdfDigest::Sha512 => "sha512",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Some(KdfDigest::Sha256),
            "sha512" | "sha-512" => Some(KdfDigest::Sha512),
            _ => None,
        }
    }
}

/// 新建记录时使用的派生设置
#[derive(Debug, Clone, Copy)]
pub struct KdfSettings {
    pub iterations: u32,
    pub digest: KdfDigest,
}

impl Default for KdfSettings {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            digest: KdfDigest::Sha256,
        }
    }
}

/// 生成随机盐值
pub fn generate_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// 从口令和盐值派生密钥
///
/// # Arguments
/// * `passphrase` - 账户口令
/// * `salt` - 盐值（记录中保存）
/// * `iterations` - 迭代次数（记录中保存，旧记录按原参数解密）
/// * `digest` - HMAC 摘要算法
pub fn derive_key(
    passphrase: &str,
    salt: &[u8],
    iterations: u32,
    digest: KdfDigest,
) -> CustodyResult<EncryptionKey> {
    if salt.len() != SALT_LENGTH {
        return Err(CustodyError::Crypto(format!(
            "salt must be {} bytes",
            SALT_LENGTH
        )));
    }
    if iterations == 0 {
        return Err(CustodyError::Crypto("iteration count must be positive".into()));
    }

    let mut key = [0u8; KEY_LENGTH];
    match digest {
        KdfDigest::Sha256 => {
            pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut key)
        }
        KdfDigest::Sha512 => {
            pbkdf2_hmac::<Sha512>(passphrase.as_bytes(), salt, iterations, &mut key)
        }
    }

    let derived = EncryptionKey::new(key);
    zeroize::Zeroize::zeroize(&mut key);
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pbkdf2_derive() {
        let salt = generate_salt();
        let key1 = derive_key("test_password_123", &salt, 1_000, KdfDigest::Sha256).unwrap();
        assert_eq!(key1.as_slice().len(), KEY_LENGTH);

        // 使用相同口令和盐值应该得到相同密钥
        let key2 = derive_key("test_password_123", &salt, 1_000, KdfDigest::Sha256).unwrap();
        assert_eq!(key1.as_slice(), key2.as_slice());

        // 不同口令应该得到不同密钥
        let key3 = derive_key("different_password", &salt, 1_000, KdfDigest::Sha256).unwrap();
        assert_ne!(key1.as_slice(), key3.as_slice());

        // 不同摘要算法应该得到不同密钥
        let key4 = derive_key("test_password_123", &salt, 1_000, KdfDigest::Sha512).unwrap();
        assert_ne!(key1.as_slice(), key4.as_slice());
    }

    #[test]
    fn test_rfc6070_style_vector() {
        // PBKDF2-HMAC-SHA256("password", "salt", 1) 的前 32 字节
        let mut out = [0u8; 32];
        pbkdf2_hmac::<Sha256>(b"password", b"salt", 1, &mut out);
        assert_eq!(
            hex::encode(out),
            "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
        );
    }

    #[test]
    fn test_rejects_bad_salt_and_zero_iterations() {
        assert!(derive_key("pw", &[0u8; 8], 1_000, KdfDigest::Sha256).is_err());
        assert!(derive_key("pw", &generate_salt(), 0, KdfDigest::Sha256).is_err());
    }

    #[test]
    fn test_digest_parse() {
        assert_eq!(KdfDigest::parse("SHA256"), Some(KdfDigest::Sha256));
        assert_eq!(KdfDigest::parse("sha-512"), Some(KdfDigest::Sha512));
        assert_eq!(KdfDigest::parse("md5"), None);
    }
}
