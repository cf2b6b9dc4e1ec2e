//! 统一错误类型
//!
//! 密钥托管核心的错误分类。密码学失败（`AuthenticationFailed`、
//! `SignatureVerificationFailed`）不携带任何关于密钥、密文或口令的细节。

use thiserror::Error;

use crate::utils::error_codes::ErrorCode;

pub type CustodyResult<T> = Result<T, CustodyError>;

#[derive(Debug, Error)]
pub enum CustodyError {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 密钥库
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    #[error("account `{0}` already exists")]
    NameCollision(String),

    #[error("account `{0}` not found")]
    NotFound(String),

    /// 口令错误或记录损坏（刻意不区分）
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("account `{name}` is locked out after {attempts} failed unlock attempts")]
    LockedOut { name: String, attempts: u32 },

    #[error("account `{0}` is not unlocked or its session has expired")]
    SessionNotUnlocked(String),

    #[error("invalid account name `{0}`")]
    InvalidAccountName(String),

    #[error("invalid keystore record: {0}")]
    InvalidRecord(String),

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 交易校验
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    #[error("message {index}: unsupported denom `{denom}` (valid: DGT, DRT)")]
    UnsupportedDenom { index: usize, denom: String },

    #[error("message {index}: invalid amount `{amount}`")]
    InvalidAmount { index: usize, amount: String },

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 签名
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("unsupported signature algorithm `{0}`")]
    UnsupportedAlgorithm(String),

    #[error("crypto operation failed: {0}")]
    Crypto(String),

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 外部协作方
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// 批量广播在 `failed_index` 处失败；`submitted` 为此前已成功提交的交易哈希
    #[error(
        "broadcast failed at envelope {failed_index}: {reason} ({} submitted, {not_submitted} not submitted)",
        .submitted.len()
    )]
    BroadcastFailed {
        failed_index: usize,
        reason: String,
        submitted: Vec<String>,
        not_submitted: usize,
    },

    #[error("rpc error: {0}")]
    Rpc(String),

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 环境
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation interrupted by shutdown signal")]
    Interrupted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CustodyError {
    /// 标准错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NameCollision(_) => ErrorCode::NameCollision,
            Self::NotFound(_) => ErrorCode::AccountNotFound,
            Self::AuthenticationFailed => ErrorCode::AuthenticationFailed,
            Self::LockedOut { .. } => ErrorCode::LockedOut,
            Self::SessionNotUnlocked(_) => ErrorCode::SessionNotUnlocked,
            Self::InvalidAccountName(_) => ErrorCode::InvalidAccountName,
            Self::InvalidRecord(_) => ErrorCode::InvalidRecord,
            Self::UnsupportedDenom { .. } => ErrorCode::UnsupportedDenom,
            Self::InvalidAmount { .. } => ErrorCode::InvalidAmount,
            Self::InvalidTransaction(_) => ErrorCode::InvalidTransaction,
            Self::EncodingError(_) => ErrorCode::EncodingError,
            Self::SignatureVerificationFailed => ErrorCode::SignatureVerificationFailed,
            Self::UnsupportedAlgorithm(_) => ErrorCode::UnsupportedAlgorithm,
            Self::Crypto(_) => ErrorCode::CryptoFailure,
            Self::BroadcastFailed { .. } => ErrorCode::BroadcastFailed,
            Self::Rpc(_) => ErrorCode::RpcUnavailable,
            Self::Config(_) => ErrorCode::ConfigurationError,
            Self::Interrupted => ErrorCode::Interrupted,
            Self::Io(_) => ErrorCode::IoError,
            Self::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// CLI 退出码
    pub fn exit_code(&self) -> u8 {
        self.code().exit_code()
    }

    /// 是否为校验类错误（在任何密码学操作之前检出）
    pub fn is_validation(&self) -> bool {
        self.code().exit_code() == ErrorCode::EXIT_VALIDATION
    }
}
