//! 签名原语提供者
//!
//! 按算法标识区分的签名能力：`keypair` / `sign` / `verify`。
//! 私钥字节一律以 [`SecretBytes`] 返回，离开作用域即清零。

use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use pqcrypto_dilithium::dilithium3;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CustodyError, CustodyResult};

/// 私钥字节（使用Zeroize保护）
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes({} bytes)", self.0.len())
    }
}

/// 新生成的密钥对
#[derive(Debug)]
pub struct KeyPair {
    pub public_key: Vec<u8>,
    pub secret_key: SecretBytes,
}

/// 支持的签名算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    /// 后量子签名（默认）
    Dilithium3,
    Ed25519,
}

impl SignatureAlgorithm {
    pub fn id(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Dilithium3 => "dilithium3",
            SignatureAlgorithm::Ed25519 => "ed25519",
        }
    }

    pub fn parse(id: &str) -> Option<Self> {
        match id.to_ascii_lowercase().as_str() {
            "dilithium3" | "dilithium" => Some(SignatureAlgorithm::Dilithium3),
            "ed25519" => Some(SignatureAlgorithm::Ed25519),
            _ => None,
        }
    }

    /// 解析失败时返回 `UnsupportedAlgorithm`
    pub fn from_id(id: &str) -> CustodyResult<Self> {
        Self::parse(id).ok_or_else(|| CustodyError::UnsupportedAlgorithm(id.to_string()))
    }

    pub fn all_ids() -> [&'static str; 2] {
        ["dilithium3", "ed25519"]
    }

    pub fn public_key_len(&self) -> usize {
        match self {
            SignatureAlgorithm::Dilithium3 => dilithium3::public_key_bytes(),
            SignatureAlgorithm::Ed25519 => ed25519_dalek::PUBLIC_KEY_LENGTH,
        }
    }

    pub fn secret_key_len(&self) -> usize {
        match self {
            SignatureAlgorithm::Dilithium3 => dilithium3::secret_key_bytes(),
            SignatureAlgorithm::Ed25519 => ed25519_dalek::SECRET_KEY_LENGTH,
        }
    }

    /// 生成密钥对
    pub fn keypair(&self) -> KeyPair {
        match self {
            SignatureAlgorithm::Dilithium3 => {
                let (pk, sk) = dilithium3::keypair();
                KeyPair {
                    public_key: pk.as_bytes().to_vec(),
                    secret_key: SecretBytes::new(sk.as_bytes().to_vec()),
                }
            }
            SignatureAlgorithm::Ed25519 => {
                let mut seed = [0u8; ed25519_dalek::SECRET_KEY_LENGTH];
                rand::rngs::OsRng.fill_bytes(&mut seed);
                let signing_key = SigningKey::from_bytes(&seed);
                seed.zeroize();
                KeyPair {
                    public_key: signing_key.verifying_key().to_bytes().to_vec(),
                    secret_key: SecretBytes::new(signing_key.to_bytes().to_vec()),
                }
            }
        }
    }

    /// 对消息生成分离签名
    pub fn sign(&self, secret_key: &[u8], message: &[u8]) -> CustodyResult<Vec<u8>> {
        match self {
            SignatureAlgorithm::Dilithium3 => {
                let sk = dilithium3::SecretKey::from_bytes(secret_key)
                    .map_err(|_| CustodyError::Crypto("malformed dilithium3 secret key".into()))?;
                Ok(dilithium3::detached_sign(message, &sk).as_bytes().to_vec())
            }
            SignatureAlgorithm::Ed25519 => {
                let mut seed: [u8; ed25519_dalek::SECRET_KEY_LENGTH] = secret_key
                    .try_into()
                    .map_err(|_| CustodyError::Crypto("malformed ed25519 secret key".into()))?;
                let signing_key = SigningKey::from_bytes(&seed);
                seed.zeroize();
                Ok(signing_key.sign(message).to_bytes().to_vec())
            }
        }
    }

    /// 验证签名；任何格式错误都按验证失败处理
    pub fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        match self {
            SignatureAlgorithm::Dilithium3 => {
                let (Ok(pk), Ok(sig)) = (
                    dilithium3::PublicKey::from_bytes(public_key),
                    dilithium3::DetachedSignature::from_bytes(signature),
                ) else {
                    return false;
                };
                dilithium3::verify_detached_signature(&sig, message, &pk).is_ok()
            }
            SignatureAlgorithm::Ed25519 => {
                let Ok(pk_bytes) = <[u8; ed25519_dalek::PUBLIC_KEY_LENGTH]>::try_from(public_key)
                else {
                    return false;
                };
                let Ok(vk) = VerifyingKey::from_bytes(&pk_bytes) else {
                    return false;
                };
                let Ok(sig) = Ed25519Signature::from_slice(signature) else {
                    return false;
                };
                vk.verify(message, &sig).is_ok()
            }
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}
