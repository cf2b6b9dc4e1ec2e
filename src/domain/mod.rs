//! Domain 模块
//!
//! 签名原语、地址、规范化编码、交易模型与密钥库记录

pub mod address;
pub mod canonical;
pub mod crypto_provider;
pub mod keystore_record;
pub mod transaction;

// 重新导出常用类型
pub use address::{derive_address, validate_address, DEFAULT_PREFIX};
pub use crypto_provider::{KeyPair, SecretBytes, SignatureAlgorithm};
pub use keystore_record::{AccountSummary, KeystoreRecord, PublicExport};
pub use transaction::{
    build_signed_envelope, decode_envelope, encode, encode_envelope, signing_bytes, tx_hash,
    verify_envelope, Denom, Msg, SignedEnvelope, Transaction,
};
