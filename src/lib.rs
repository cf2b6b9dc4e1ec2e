//! dytvault - Dytallix 密钥托管与交易签名核心
//!
//! 私钥只以 AES-256-GCM 密文落盘；解锁后的私钥只存在于有空闲期限的会话中

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod repository;
pub mod service;
pub mod utils;

// 重新导出常用类型
pub use error::{CustodyError, CustodyResult};

pub mod prelude {
    pub use crate::{
        config::Config,
        domain::{Denom, Msg, SignatureAlgorithm, SignedEnvelope, Transaction},
        error::{CustodyError, CustodyResult},
        service::{BatchBuilder, BatchJob, Custody, SessionGuard},
    };
}
