//! AES-256-GCM 加密/解密模块
//! 用于密钥库中私钥的加密存储（IV 与认证标签分开保存）

use aes_gcm::{
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
    Aes256Gcm, Nonce, Tag,
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CustodyError, CustodyResult};

/// 算法标识（写入记录的 `cipher.alg`）
pub const CIPHER_ALG: &str = "aes-256-gcm";
pub const KEY_LENGTH: usize = 32;
pub const IV_LENGTH: usize = 12;
pub const TAG_LENGTH: usize = 16;

/// 加密密钥（使用Zeroize保护）
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_LENGTH],
}

impl EncryptionKey {
    pub fn new(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.key
    }
}

/// 加密结果
#[derive(Debug, Clone)]
pub struct SealedSecret {
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// 加密数据
///
/// 每次调用都生成新的随机 IV
pub fn encrypt_data(data: &[u8], key: &EncryptionKey) -> CustodyResult<SealedSecret> {
    let cipher = Aes256Gcm::new_from_slice(key.as_slice())
        .map_err(|e| CustodyError::Crypto(format!("invalid key: {}", e)))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut buffer = data.to_vec();
    let tag = match cipher.encrypt_in_place_detached(&nonce, b"", &mut buffer) {
        Ok(tag) => tag,
        Err(e) => {
            buffer.zeroize();
            return Err(CustodyError::Crypto(format!("encryption failed: {}", e)));
        }
    };

    Ok(SealedSecret {
        iv: nonce.to_vec(),
        tag: tag.to_vec(),
        ciphertext: buffer,
    })
}

/// 解密数据
///
/// 任何长度错误或标签不匹配都返回 `AuthenticationFailed`，不会返回部分明文
pub fn decrypt_data(sealed: &SealedSecret, key: &EncryptionKey) -> CustodyResult<Vec<u8>> {
    if sealed.iv.len() != IV_LENGTH || sealed.tag.len() != TAG_LENGTH {
        return Err(CustodyError::AuthenticationFailed);
    }

    let cipher =
        Aes256Gcm::new_from_slice(key.as_slice()).map_err(|_| CustodyError::AuthenticationFailed)?;

    let nonce = Nonce::from_slice(&sealed.iv);
    let tag = Tag::from_slice(&sealed.tag);

    let mut buffer = sealed.ciphertext.clone();
    if cipher
        .decrypt_in_place_detached(nonce, b"", &mut buffer, tag)
        .is_err()
    {
        buffer.zeroize();
        return Err(CustodyError::AuthenticationFailed);
    }

    Ok(buffer)
}
