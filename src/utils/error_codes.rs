//! 统一错误代码标准
//! 标准化错误代码与 CLI 退出码，便于脚本和钱包前端处理

use serde::{Deserialize, Serialize};

/// 标准错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 校验错误（1xxx）
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// 不支持的币种
    UnsupportedDenom = 1001,
    /// 金额格式错误
    InvalidAmount = 1002,
    /// 交易格式错误
    InvalidTransaction = 1003,
    /// 无法规范化编码
    EncodingError = 1004,
    /// 会话未解锁或已过期
    SessionNotUnlocked = 1005,
    /// 账户名已存在
    NameCollision = 1006,
    /// 账户不存在
    AccountNotFound = 1007,
    /// 账户名非法
    InvalidAccountName = 1008,
    /// 密钥库记录格式错误
    InvalidRecord = 1009,
    /// 不支持的签名算法
    UnsupportedAlgorithm = 1010,

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 认证错误（2xxx）
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// 口令错误或记录损坏
    AuthenticationFailed = 2001,
    /// 重试次数耗尽
    LockedOut = 2002,
    /// 签名验证失败
    SignatureVerificationFailed = 2003,

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 外部错误（3xxx）
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// 广播失败
    BroadcastFailed = 3001,
    /// RPC不可用
    RpcUnavailable = 3002,

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 内部错误（4xxx）
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    /// 配置错误
    ConfigurationError = 4001,
    /// 密码学原语失败
    CryptoFailure = 4002,
    /// 文件读写失败
    IoError = 4003,
    /// 序列化失败
    SerializationError = 4004,
    /// 被信号中断
    Interrupted = 4005,
}

impl ErrorCode {
    pub const EXIT_GENERIC: u8 = 1;
    pub const EXIT_VALIDATION: u8 = 2;
    pub const EXIT_AUTHENTICATION: u8 = 3;
    pub const EXIT_LOCKED_OUT: u8 = 4;
    pub const EXIT_BROADCAST: u8 = 5;
    pub const EXIT_VERIFICATION: u8 = 6;
    pub const EXIT_INTERRUPTED: u8 = 130;

    /// CLI 退出码（0 保留给成功）
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorCode::UnsupportedDenom
            | ErrorCode::InvalidAmount
            | ErrorCode::InvalidTransaction
            | ErrorCode::EncodingError
            | ErrorCode::SessionNotUnlocked
            | ErrorCode::NameCollision
            | ErrorCode::AccountNotFound
            | ErrorCode::InvalidAccountName
            | ErrorCode::InvalidRecord
            | ErrorCode::UnsupportedAlgorithm
            | ErrorCode::ConfigurationError => Self::EXIT_VALIDATION,

            ErrorCode::AuthenticationFailed => Self::EXIT_AUTHENTICATION,
            ErrorCode::LockedOut => Self::EXIT_LOCKED_OUT,
            ErrorCode::BroadcastFailed | ErrorCode::RpcUnavailable => Self::EXIT_BROADCAST,
            ErrorCode::SignatureVerificationFailed => Self::EXIT_VERIFICATION,
            ErrorCode::Interrupted => Self::EXIT_INTERRUPTED,

            ErrorCode::CryptoFailure | ErrorCode::IoError | ErrorCode::SerializationError => {
                Self::EXIT_GENERIC
            }
        }
    }

    /// 获取错误消息（英文）
    pub fn message_en(&self) -> &'static str {
        match self {
            ErrorCode::UnsupportedDenom => "Unsupported denomination",
            ErrorCode::InvalidAmount => "Invalid amount",
            ErrorCode::InvalidTransaction => "Invalid transaction",
            ErrorCode::EncodingError => "Value cannot be canonically encoded",
            ErrorCode::SessionNotUnlocked => "Account is locked. Please unlock first",
            ErrorCode::NameCollision => "Account name already exists",
            ErrorCode::AccountNotFound => "Account not found",
            ErrorCode::InvalidAccountName => "Invalid account name",
            ErrorCode::InvalidRecord => "Keystore record is malformed",
            ErrorCode::UnsupportedAlgorithm => "Signature algorithm not supported",
            ErrorCode::AuthenticationFailed => "Authentication failed",
            ErrorCode::LockedOut => "Too many failed unlock attempts",
            ErrorCode::SignatureVerificationFailed => "Signature verification failed",
            ErrorCode::BroadcastFailed => "Transaction broadcast failed",
            ErrorCode::RpcUnavailable => "Blockchain RPC unavailable",
            ErrorCode::ConfigurationError => "Configuration error",
            ErrorCode::CryptoFailure => "Cryptographic operation failed",
            ErrorCode::IoError => "Filesystem error",
            ErrorCode::SerializationError => "Serialization error",
            ErrorCode::Interrupted => "Interrupted",
        }
    }

    /// 获取错误消息（中文）
    pub fn message_zh(&self) -> &'static str {
        match self {
            ErrorCode::UnsupportedDenom => "不支持的币种",
            ErrorCode::InvalidAmount => "金额格式错误",
            ErrorCode::InvalidTransaction => "交易格式错误",
            ErrorCode::EncodingError => "无法规范化编码",
            ErrorCode::SessionNotUnlocked => "账户已锁定，请先解锁",
            ErrorCode::NameCollision => "账户名已存在",
            ErrorCode::AccountNotFound => "账户不存在",
            ErrorCode::InvalidAccountName => "账户名非法",
            ErrorCode::InvalidRecord => "密钥库记录格式错误",
            ErrorCode::UnsupportedAlgorithm => "不支持的签名算法",
            ErrorCode::AuthenticationFailed => "认证失败",
            ErrorCode::LockedOut => "解锁失败次数过多",
            ErrorCode::SignatureVerificationFailed => "签名验证失败",
            ErrorCode::BroadcastFailed => "交易广播失败",
            ErrorCode::RpcUnavailable => "区块链节点不可用",
            ErrorCode::ConfigurationError => "配置错误",
            ErrorCode::CryptoFailure => "密码学操作失败",
            ErrorCode::IoError => "文件读写失败",
            ErrorCode::SerializationError => "序列化失败",
            ErrorCode::Interrupted => "操作被中断",
        }
    }

    /// 获取错误消息（多语言）
    pub fn message(&self, lang: &str) -> &'static str {
        match lang {
            "zh" | "zh-CN" | "zh-TW" => self.message_zh(),
            _ => self.message_en(),
        }
    }

    /// 获取恢复建议（英文）
    pub fn recovery_hint_en(&self) -> Option<&'static str> {
        match self {
            ErrorCode::SessionNotUnlocked => Some("Unlock the account with its passphrase"),
            ErrorCode::AuthenticationFailed => Some("Check the passphrase and try again"),
            ErrorCode::LockedOut => Some("Restart the process to reset the retry budget"),
            ErrorCode::UnsupportedDenom => Some("Use DGT or DRT"),
            _ => None,
        }
    }

    /// 获取恢复建议（中文）
    pub fn recovery_hint_zh(&self) -> Option<&'static str> {
        match self {
            ErrorCode::SessionNotUnlocked => Some("请使用口令解锁账户"),
            ErrorCode::AuthenticationFailed => Some("请检查口令后重试"),
            ErrorCode::LockedOut => Some("请重新启动进程以重置重试次数"),
            ErrorCode::UnsupportedDenom => Some("请使用 DGT 或 DRT"),
            _ => None,
        }
    }

    /// 是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RpcUnavailable | ErrorCode::BroadcastFailed | ErrorCode::AuthenticationFailed
        )
    }
}

/// 错误响应体（`--output json` 时输出到 stderr）
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: u32,
    /// 错误消息（技术）
    pub message: String,
    /// 用户友好消息
    pub user_message: String,
    /// 恢复建议
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_hint: Option<String>,
    /// 是否可重试
    pub retryable: bool,
    /// 详细信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// 创建错误响应
    pub fn new(code: ErrorCode, details: Option<serde_json::Value>, lang: &str) -> Self {
        Self {
            code: code as u32,
            message: code.message_en().to_string(),
            user_message: code.message(lang).to_string(),
            recovery_hint: match lang {
                "zh" | "zh-CN" | "zh-TW" => code.recovery_hint_zh().map(|s| s.to_string()),
                _ => code.recovery_hint_en().map(|s| s.to_string()),
            },
            retryable: code.is_retryable(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::UnsupportedDenom as u32, 1001);
        assert_eq!(ErrorCode::AuthenticationFailed as u32, 2001);
        assert_eq!(ErrorCode::BroadcastFailed as u32, 3001);
        assert_eq!(ErrorCode::ConfigurationError as u32, 4001);
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(ErrorCode::InvalidAmount.exit_code(), 2);
        assert_eq!(ErrorCode::AuthenticationFailed.exit_code(), 3);
        assert_eq!(ErrorCode::LockedOut.exit_code(), 4);
        assert_eq!(ErrorCode::BroadcastFailed.exit_code(), 5);
        assert_eq!(ErrorCode::SignatureVerificationFailed.exit_code(), 6);
    }

    #[test]
    fn test_multilingual_messages() {
        assert_eq!(ErrorCode::LockedOut.message("en"), "Too many failed unlock attempts");
        assert_eq!(ErrorCode::LockedOut.message("zh"), "解锁失败次数过多");
    }

    #[test]
    fn test_error_response_shape() {
        let resp = ErrorResponse::new(ErrorCode::SessionNotUnlocked, None, "en");
        assert_eq!(resp.code, 1005);
        assert_eq!(
            resp.recovery_hint.as_deref(),
            Some("Unlock the account with its passphrase")
        );
        assert!(!resp.retryable);
    }

    #[test]
    fn test_error_response_in_chinese() {
        let resp = ErrorResponse::new(ErrorCode::UnsupportedDenom, None, "zh");
        assert_eq!(resp.message, "Unsupported denomination");
        assert_eq!(resp.recovery_hint.as_deref(), Some("请使用 DGT 或 DRT"));
    }
}
