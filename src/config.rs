//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::{path::Path, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    domain::crypto_provider::SignatureAlgorithm,
    infrastructure::pbkdf2::{KdfDigest, KdfSettings, DEFAULT_ITERATIONS, MIN_ITERATIONS},
};

/// 应用配置结构体
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub keystore: KeystoreConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 密钥库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    pub dir: PathBuf,
    pub kdf_iterations: u32,
    pub kdf_digest: String,
    /// 新账户默认签名算法
    pub default_algorithm: String,
}

/// 解锁会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
}

/// 口令重试配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 非交互模式：不提示、不重复询问、不等待退避（认证本身不跳过）
    pub ci_mode: bool,
}

/// 链配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: String,
    pub rpc_url: String,
    pub address_prefix: String,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn default_keystore_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dytvault")
        .join("keystore")
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            dir: std::env::var("DYT_KEYSTORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_keystore_dir()),
            kdf_iterations: env_parse("DYT_KDF_ITERATIONS").unwrap_or(DEFAULT_ITERATIONS),
            kdf_digest: std::env::var("DYT_KDF_DIGEST").unwrap_or_else(|_| "sha256".into()),
            default_algorithm: std::env::var("DYT_ALGORITHM")
                .unwrap_or_else(|_| SignatureAlgorithm::Dilithium3.id().into()),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: env_parse("DYT_IDLE_TIMEOUT_SECS").unwrap_or(300), // 5分钟
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: env_parse("DYT_MAX_RETRIES").unwrap_or(5),
            backoff_ms: env_parse("DYT_RETRY_BACKOFF_MS").unwrap_or(500),
            max_backoff_ms: env_parse("DYT_MAX_BACKOFF_MS").unwrap_or(8_000),
            ci_mode: env_flag("DYT_CI_MODE").unwrap_or(false),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: std::env::var("DYT_CHAIN_ID").unwrap_or_else(|_| "dyt-1".into()),
            rpc_url: std::env::var("DYT_RPC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:3030".into()),
            address_prefix: std::env::var("DYT_ADDRESS_PREFIX").unwrap_or_else(|_| "dyt".into()),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl KeystoreConfig {
    /// 解析为 KDF 设置（未知摘要算法在 `validate` 中已拦截）
    pub fn kdf_settings(&self) -> KdfSettings {
        KdfSettings {
            iterations: self.kdf_iterations,
            digest: KdfDigest::parse(&self.kdf_digest).unwrap_or(KdfDigest::Sha256),
        }
    }
}

impl Config {
    /// 从环境变量加载配置（先读取 `.env`）
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            keystore: KeystoreConfig::default(),
            session: SessionConfig::default(),
            retry: RetryConfig::default(),
            chain: ChainConfig::default(),
            logging: LoggingConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_retries == 0 {
            anyhow::bail!("DYT_MAX_RETRIES must be at least 1");
        }

        if self.session.idle_timeout_secs == 0 {
            anyhow::bail!("DYT_IDLE_TIMEOUT_SECS must be at least 1");
        }

        if self.keystore.kdf_iterations < MIN_ITERATIONS {
            anyhow::bail!("DYT_KDF_ITERATIONS must be at least {}", MIN_ITERATIONS);
        }

        if KdfDigest::parse(&self.keystore.kdf_digest).is_none() {
            anyhow::bail!("DYT_KDF_DIGEST must be 'sha256' or 'sha512'");
        }

        if SignatureAlgorithm::parse(&self.keystore.default_algorithm).is_none() {
            anyhow::bail!(
                "DYT_ALGORITHM must be one of: {:?}",
                SignatureAlgorithm::all_ids()
            );
        }

        if self.chain.address_prefix.is_empty()
            || !self
                .chain
                .address_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            anyhow::bail!("DYT_ADDRESS_PREFIX must be non-empty lowercase ascii");
        }

        if self.chain.chain_id.is_empty() {
            anyhow::bail!("DYT_CHAIN_ID must not be empty");
        }

        // 验证日志级别
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        // 验证日志格式
        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        Ok(())
    }
}
