//! 口令包装与读取
//! 口令只在内存中短暂存在，离开作用域即清零

use std::path::Path;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CustodyError, CustodyResult};

/// CI 模式下读取口令的环境变量
pub const PASSPHRASE_ENV: &str = "DYT_PASSPHRASE";

/// 口令包装器（使用Zeroize保护）
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(passphrase: String) -> Self {
        Self(passphrase)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 从文件读取（去掉末尾换行）
    pub fn from_file(path: &Path) -> CustodyResult<Self> {
        let mut raw = std::fs::read_to_string(path)?;
        let trimmed = raw.trim_end_matches(['\r', '\n']).to_string();
        raw.zeroize();
        Ok(Self(trimmed))
    }

    /// 从环境变量读取
    pub fn from_env() -> Option<Self> {
        std::env::var(PASSPHRASE_ENV).ok().map(Self)
    }

    /// 交互式读取（不回显）
    pub fn prompt(prompt: &str) -> CustodyResult<Self> {
        let value = rpassword::prompt_password(prompt)?;
        if value.is_empty() {
            return Err(CustodyError::Config("empty passphrase".into()));
        }
        Ok(Self(value))
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase(***)")
    }
}
