//! 密钥库记录
//!
//! 每个账户一个 JSON 文件，私钥只以 AES-256-GCM 密文形式出现。

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::crypto_provider::SignatureAlgorithm,
    error::{CustodyError, CustodyResult},
    infrastructure::{
        encryption::{SealedSecret, CIPHER_ALG, KEY_LENGTH},
        pbkdf2::KdfDigest,
    },
};

/// 加密参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherParams {
    pub alg: String,
    pub iv_b64: String,
    pub tag_b64: String,
}

/// 密钥派生参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub salt_b64: String,
    pub iter: u32,
    pub dklen: u32,
    pub digest: KdfDigest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoreRecord {
    pub name: String,
    pub address: String,
    pub pubkey_b64: String,
    pub algo: String,
    pub cipher: CipherParams,
    pub kdf: KdfParams,
    pub ciphertext_b64: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// 列表/导出用的公开视图（不含任何密文字段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub name: String,
    pub address: String,
    pub algo: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// 公开导出（地址 + 公钥）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicExport {
    pub name: String,
    pub address: String,
    pub pubkey_b64: String,
    pub algo: String,
}

impl KeystoreRecord {
    /// 从加密结果组装记录
    #[allow(clippy::too_many_arguments)]
    pub fn seal(
        name: &str,
        address: String,
        public_key: &[u8],
        algorithm: SignatureAlgorithm,
        salt: &[u8],
        iterations: u32,
        digest: KdfDigest,
        sealed: &SealedSecret,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.to_string(),
            address,
            pubkey_b64: STANDARD.encode(public_key),
            algo: algorithm.id().to_string(),
            cipher: CipherParams {
                alg: CIPHER_ALG.to_string(),
                iv_b64: STANDARD.encode(&sealed.iv),
                tag_b64: STANDARD.encode(&sealed.tag),
            },
            kdf: KdfParams {
                salt_b64: STANDARD.encode(salt),
                iter: iterations,
                dklen: KEY_LENGTH as u32,
                digest,
            },
            ciphertext_b64: STANDARD.encode(&sealed.ciphertext),
            created_at,
        }
    }

    pub fn algorithm(&self) -> CustodyResult<SignatureAlgorithm> {
        SignatureAlgorithm::from_id(&self.algo)
    }

    pub fn public_key(&self) -> CustodyResult<Vec<u8>> {
        STANDARD
            .decode(&self.pubkey_b64)
            .map_err(|e| CustodyError::InvalidRecord(format!("pubkey_b64: {}", e)))
    }

    pub fn salt(&self) -> CustodyResult<Vec<u8>> {
        STANDARD
            .decode(&self.kdf.salt_b64)
            .map_err(|e| CustodyError::InvalidRecord(format!("salt_b64: {}", e)))
    }

    /// 解出密文三元组；字段损坏返回 `InvalidRecord`
    pub fn sealed_secret(&self) -> CustodyResult<SealedSecret> {
        if self.cipher.alg != CIPHER_ALG {
            return Err(CustodyError::InvalidRecord(format!(
                "unsupported cipher `{}`",
                self.cipher.alg
            )));
        }
        if self.kdf.dklen as usize != KEY_LENGTH {
            return Err(CustodyError::InvalidRecord(format!(
                "unsupported dklen {}",
                self.kdf.dklen
            )));
        }

        let decode = |field: &str, v: &str| {
            STANDARD
                .decode(v)
                .map_err(|e| CustodyError::InvalidRecord(format!("{}: {}", field, e)))
        };

        Ok(SealedSecret {
            iv: decode("iv_b64", &self.cipher.iv_b64)?,
            tag: decode("tag_b64", &self.cipher.tag_b64)?,
            ciphertext: decode("ciphertext_b64", &self.ciphertext_b64)?,
        })
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            name: self.name.clone(),
            address: self.address.clone(),
            algo: self.algo.clone(),
            created_at: self.created_at,
        }
    }

    pub fn public_export(&self) -> PublicExport {
        PublicExport {
            name: self.name.clone(),
            address: self.address.clone(),
            pubkey_b64: self.pubkey_b64.clone(),
            algo: self.algo.clone(),
        }
    }
}
