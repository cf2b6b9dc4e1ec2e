//! 链节点客户端
//!
//! 账户 nonce 查询与已签名信封广播。节点本身是外部协作方，
//! 这里只定义接口与基于 HTTP 的默认实现。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{
    domain::transaction::SignedEnvelope,
    error::{CustodyError, CustodyResult},
};

/// 广播回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReceipt {
    pub hash: String,
    pub status: String,
}

/// 账户状态查询
#[async_trait]
pub trait AccountStateClient: Send + Sync {
    /// 当前链上 nonce；账户尚不存在时为 0
    async fn account_nonce(&self, address: &str) -> CustodyResult<u64>;
}

/// 交易广播
#[async_trait]
pub trait BroadcastClient: Send + Sync {
    async fn submit(&self, envelope: &SignedEnvelope) -> CustodyResult<BroadcastReceipt>;
}

#[derive(Deserialize)]
struct NonceResponse {
    nonce: u64,
}

/// 依次尝试的广播路径，404 时回退到下一个
const SUBMIT_PATHS: [&str; 2] = ["/submit", "/tx/broadcast"];

/// HTTP 节点客户端
pub struct RpcClient {
    base: String,
    http_client: reqwest::Client,
}

impl RpcClient {
    pub fn new(base: &str) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base: base.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }
}

fn rpc_error(e: reqwest::Error) -> CustodyError {
    CustodyError::Rpc(e.to_string())
}

#[async_trait]
impl AccountStateClient for RpcClient {
    async fn account_nonce(&self, address: &str) -> CustodyResult<u64> {
        let url = format!("{}/account/nonce/{}", self.base, address);
        let resp = self.http_client.get(&url).send().await.map_err(rpc_error)?;

        if resp.status() == StatusCode::NOT_FOUND {
            tracing::debug!(address = %address, "Account not found on chain, using nonce 0");
            return Ok(0);
        }
        if !resp.status().is_success() {
            return Err(CustodyError::Rpc(format!(
                "nonce query failed: HTTP {}",
                resp.status()
            )));
        }

        let body: NonceResponse = resp
            .json()
            .await
            .map_err(|e| CustodyError::Rpc(format!("malformed nonce response: {}", e)))?;
        Ok(body.nonce)
    }
}

#[async_trait]
impl BroadcastClient for RpcClient {
    async fn submit(&self, envelope: &SignedEnvelope) -> CustodyResult<BroadcastReceipt> {
        let body = serde_json::json!({ "signed_tx": envelope });

        for path in SUBMIT_PATHS {
            let url = format!("{}{}", self.base, path);
            let resp = self
                .http_client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(rpc_error)?;

            if resp.status() == StatusCode::NOT_FOUND {
                tracing::debug!(url = %url, "Broadcast endpoint not found, trying fallback");
                continue;
            }
            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(CustodyError::Rpc(format!(
                    "broadcast failed: HTTP {}: {}",
                    status, text
                )));
            }

            let receipt: BroadcastReceipt = resp
                .json()
                .await
                .map_err(|e| CustodyError::Rpc(format!("malformed broadcast response: {}", e)))?;
            tracing::info!(hash = %receipt.hash, status = %receipt.status, "Transaction submitted");
            return Ok(receipt);
        }

        Err(CustodyError::Rpc("no broadcast endpoint available".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_trimmed() {
        let client = RpcClient::new("http://127.0.0.1:3030/");
        assert_eq!(client.base_url(), "http://127.0.0.1:3030");
    }

    #[test]
    fn test_receipt_deserializes() {
        let r: BroadcastReceipt =
            serde_json::from_str(r#"{"hash":"0xabc","status":"pending"}"#).unwrap();
        assert_eq!(r.hash, "0xabc");
        assert_eq!(r.status, "pending");
    }

    #[tokio::test]
    async fn test_unreachable_node_is_rpc_error() {
        // 端口 9 (discard) 通常无人监听
        let client = RpcClient::new("http://127.0.0.1:9");
        assert!(matches!(
            client.account_nonce("dyt1abc").await,
            Err(CustodyError::Rpc(_))
        ));
    }
}
