//! 批量交易构建
//!
//! 流程：会话检查 → 币种校验 → 金额校验 → 其他字段校验 → 确定 nonce → 全部签名 →（可选）按序广播。
//! 广播之前没有任何副作用；任一校验失败都不会产生信封。

use std::{io::Read, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    domain::transaction::{
        is_non_negative_decimal, is_positive_decimal, tx_hash, Denom, Msg, SignedEnvelope,
        Transaction,
    },
    error::{CustodyError, CustodyResult},
    service::{
        chain_client::{AccountStateClient, BroadcastClient, BroadcastReceipt},
        custody::Custody,
    },
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 批量任务描述
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `"auto"` 或显式整数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonceSpec {
    #[default]
    Auto,
    Exact(u64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Int(u64),
    Text(String),
}

impl<'de> Deserialize<'de> for NonceSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawScalar::deserialize(deserializer)? {
            RawScalar::Int(n) => Ok(NonceSpec::Exact(n)),
            RawScalar::Text(s) if s.eq_ignore_ascii_case("auto") => Ok(NonceSpec::Auto),
            RawScalar::Text(s) => s
                .parse()
                .map(NonceSpec::Exact)
                .map_err(|_| serde::de::Error::custom(format!("invalid nonce `{}`", s))),
        }
    }
}

impl Serialize for NonceSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            NonceSpec::Auto => serializer.serialize_str("auto"),
            NonceSpec::Exact(n) => serializer.serialize_u64(*n),
        }
    }
}

/// 金额/手续费接受字符串或整数
fn decimal_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match RawScalar::deserialize(deserializer)? {
        RawScalar::Int(n) => n.to_string(),
        RawScalar::Text(s) => s,
    })
}

fn default_msg_type() -> String {
    "send".to_string()
}

/// 批量任务中的单条消息（发送方由任务的 `from` 决定）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMessage {
    #[serde(rename = "type", default = "default_msg_type")]
    pub kind: String,
    pub to: String,
    pub denom: String,
    #[serde(deserialize_with = "decimal_string")]
    pub amount: String,
}

/// 拆分方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchSplit {
    /// 所有消息放进一笔交易（一个 nonce）
    #[default]
    Single,
    /// 每条消息一笔交易，nonce 依次递增
    PerMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    /// 为空时使用配置中的链 ID
    #[serde(default)]
    pub chain_id: String,
    /// 账户名
    pub from: String,
    #[serde(default)]
    pub nonce: NonceSpec,
    #[serde(deserialize_with = "decimal_string")]
    pub fee: String,
    #[serde(default)]
    pub memo: String,
    pub messages: Vec<BatchMessage>,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default)]
    pub split: BatchSplit,
}

/// 从文件读取批量任务；`-` 表示标准输入
pub fn read_batch(source: &str) -> CustodyResult<BatchJob> {
    let raw = if source == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(source)?
    };
    parse_batch(&raw)
}

pub fn parse_batch(raw: &str) -> CustodyResult<BatchJob> {
    serde_json::from_str(raw)
        .map_err(|e| CustodyError::InvalidTransaction(format!("malformed batch job: {}", e)))
}

/// 纯校验（不需要会话）：币种 → 金额 → 其他字段，返回规范化后的币种
///
/// 错误携带第一个违规消息的下标
pub fn validate_job(job: &BatchJob) -> CustodyResult<Vec<Denom>> {
    let mut denoms = Vec::with_capacity(job.messages.len());
    for (index, m) in job.messages.iter().enumerate() {
        let denom: Denom = m.denom.parse().map_err(|_| CustodyError::UnsupportedDenom {
            index,
            denom: m.denom.clone(),
        })?;
        denoms.push(denom);
    }

    for (index, m) in job.messages.iter().enumerate() {
        if !is_positive_decimal(&m.amount) {
            return Err(CustodyError::InvalidAmount {
                index,
                amount: m.amount.clone(),
            });
        }
    }

    if job.messages.is_empty() {
        return Err(CustodyError::InvalidTransaction(
            "batch has no messages".into(),
        ));
    }
    if !is_non_negative_decimal(&job.fee) {
        return Err(CustodyError::InvalidTransaction(format!(
            "invalid fee `{}`",
            job.fee
        )));
    }
    for (index, m) in job.messages.iter().enumerate() {
        if m.kind != "send" {
            return Err(CustodyError::InvalidTransaction(format!(
                "message {}: unsupported type `{}`",
                index, m.kind
            )));
        }
        if m.to.is_empty() {
            return Err(CustodyError::InvalidTransaction(format!(
                "message {}: empty recipient",
                index
            )));
        }
    }

    Ok(denoms)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 广播报告
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 按序广播的结果；批量广播对外部节点而言不是事务性的
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// 已被节点接受的回执（按信封顺序）
    pub submitted: Vec<BroadcastReceipt>,
    /// 第一个失败的信封下标
    pub failed_at: Option<usize>,
    pub failure_reason: Option<String>,
    /// 未被接受的信封下标（含失败的那一个）
    pub not_submitted: Vec<usize>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed_at.is_none()
    }

    pub fn into_result(self) -> CustodyResult<Vec<BroadcastReceipt>> {
        match self.failed_at {
            None => Ok(self.submitted),
            Some(failed_index) => Err(CustodyError::BroadcastFailed {
                failed_index,
                reason: self.failure_reason.unwrap_or_default(),
                submitted: self.submitted.into_iter().map(|r| r.hash).collect(),
                not_submitted: self.not_submitted.len(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub envelopes: Vec<SignedEnvelope>,
    /// 各信封的交易哈希
    pub hashes: Vec<String>,
    /// 仅在 `broadcast = true` 时存在
    pub receipts: Option<Vec<BroadcastReceipt>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 构建器
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BatchBuilder {
    custody: Arc<Custody>,
    accounts: Arc<dyn AccountStateClient>,
    broadcaster: Arc<dyn BroadcastClient>,
    default_chain_id: String,
}

impl BatchBuilder {
    pub fn new(
        custody: Arc<Custody>,
        accounts: Arc<dyn AccountStateClient>,
        broadcaster: Arc<dyn BroadcastClient>,
        default_chain_id: impl Into<String>,
    ) -> Self {
        Self {
            custody,
            accounts,
            broadcaster,
            default_chain_id: default_chain_id.into(),
        }
    }

    /// 校验并签名，不产生任何外部副作用（`auto` nonce 查询除外）
    pub async fn prepare(&self, job: &BatchJob) -> CustodyResult<Vec<SignedEnvelope>> {
        // 1. 会话
        let sender = self.custody.session_address(&job.from)?;

        // 2-4. 币种、金额与其他字段
        let denoms = validate_job(job)?;

        // 5. nonce
        let base_nonce = match job.nonce {
            NonceSpec::Exact(n) => n,
            NonceSpec::Auto => self.accounts.account_nonce(&sender).await?,
        };

        let chain_id = if job.chain_id.is_empty() {
            self.default_chain_id.clone()
        } else {
            job.chain_id.clone()
        };

        let msgs: Vec<Msg> = job
            .messages
            .iter()
            .zip(denoms)
            .map(|(m, denom)| Msg::send(&sender, &m.to, denom, &m.amount))
            .collect();

        let txs = match job.split {
            BatchSplit::Single => vec![Transaction::new(
                chain_id,
                base_nonce,
                msgs,
                job.fee.clone(),
                job.memo.clone(),
            )],
            BatchSplit::PerMessage => msgs
                .into_iter()
                .enumerate()
                .map(|(i, msg)| {
                    let nonce = base_nonce.checked_add(i as u64).ok_or_else(|| {
                        CustodyError::InvalidTransaction("nonce overflow".into())
                    })?;
                    Ok(Transaction::new(
                        chain_id.clone(),
                        nonce,
                        vec![msg],
                        job.fee.clone(),
                        job.memo.clone(),
                    ))
                })
                .collect::<CustodyResult<Vec<_>>>()?,
        };

        // 6. 签名（全部成功才返回）
        let envelopes = txs
            .iter()
            .map(|tx| self.custody.sign_transaction(&job.from, tx))
            .collect::<CustodyResult<Vec<_>>>()?;

        tracing::info!(
            from = %job.from,
            envelopes = envelopes.len(),
            messages = job.messages.len(),
            base_nonce,
            "Batch prepared"
        );
        Ok(envelopes)
    }

    /// 按序广播，遇到第一个失败即停止
    pub async fn dispatch(&self, envelopes: &[SignedEnvelope]) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (index, envelope) in envelopes.iter().enumerate() {
            match self.broadcaster.submit(envelope).await {
                Ok(receipt) => report.submitted.push(receipt),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Batch broadcast stopped");
                    report.failed_at = Some(index);
                    report.failure_reason = Some(e.to_string());
                    report.not_submitted = (index..envelopes.len()).collect();
                    break;
                }
            }
        }

        if report.is_complete() {
            tracing::info!(submitted = report.submitted.len(), "Batch dispatched");
        }
        report
    }

    pub async fn run(&self, job: &BatchJob) -> CustodyResult<BatchOutcome> {
        let envelopes = self.prepare(job).await?;
        let hashes = envelopes
            .iter()
            .map(|e| tx_hash(&e.tx))
            .collect::<CustodyResult<Vec<_>>>()?;

        let receipts = if job.broadcast {
            Some(self.dispatch(&envelopes).await.into_result()?)
        } else {
            None
        };

        Ok(BatchOutcome {
            envelopes,
            hashes,
            receipts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_schema() {
        let job = parse_batch(
            r#"{
                "chain_id": "dyt-1",
                "from": "alice",
                "nonce": "auto",
                "fee": "1",
                "messages": [
                    {"type": "send", "to": "dyt1b", "denom": "drt", "amount": "5"},
                    {"to": "dyt1c", "denom": "DGT", "amount": 7}
                ],
                "broadcast": true
            }"#,
        )
        .unwrap();

        assert_eq!(job.nonce, NonceSpec::Auto);
        assert_eq!(job.memo, "");
        assert_eq!(job.split, BatchSplit::Single);
        assert_eq!(job.messages[1].kind, "send");
        assert_eq!(job.messages[1].amount, "7");
        assert!(job.broadcast);
    }

    #[test]
    fn test_nonce_spec_forms() {
        let n: NonceSpec = serde_json::from_str("42").unwrap();
        assert_eq!(n, NonceSpec::Exact(42));
        let n: NonceSpec = serde_json::from_str(r#""AUTO""#).unwrap();
        assert_eq!(n, NonceSpec::Auto);
        let n: NonceSpec = serde_json::from_str(r#""9""#).unwrap();
        assert_eq!(n, NonceSpec::Exact(9));
        assert!(serde_json::from_str::<NonceSpec>(r#""soon""#).is_err());
        assert!(serde_json::from_str::<NonceSpec>("-1").is_err());
        assert_eq!(serde_json::to_string(&NonceSpec::Auto).unwrap(), r#""auto""#);
    }

    #[test]
    fn test_split_parses() {
        let job = parse_batch(
            r#"{"from":"a","nonce":3,"fee":"0","messages":[],"split":"per_message"}"#,
        )
        .unwrap();
        assert_eq!(job.split, BatchSplit::PerMessage);
        assert_eq!(job.nonce, NonceSpec::Exact(3));
    }

    #[test]
    fn test_validate_job_reports_first_bad_index() {
        let job = parse_batch(
            r#"{"from":"a","fee":"1","messages":[
                {"to":"dyt1b","denom":"drt","amount":"5"},
                {"to":"dyt1c","denom":"XYZ","amount":"abc"}
            ]}"#,
        )
        .unwrap();
        // 币种在金额之前检查
        assert!(matches!(
            validate_job(&job),
            Err(CustodyError::UnsupportedDenom { index: 1, .. })
        ));

        let job = parse_batch(
            r#"{"from":"a","fee":"1","messages":[
                {"to":"dyt1b","denom":"drt","amount":"0"}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(
            validate_job(&job),
            Err(CustodyError::InvalidAmount { index: 0, .. })
        ));
    }

    #[test]
    fn test_report_into_result() {
        let report = DispatchReport {
            submitted: vec![BroadcastReceipt {
                hash: "0xaa".into(),
                status: "ok".into(),
            }],
            failed_at: Some(1),
            failure_reason: Some("http 500".into()),
            not_submitted: vec![1, 2],
        };
        match report.into_result() {
            Err(CustodyError::BroadcastFailed {
                failed_index,
                submitted,
                not_submitted,
                ..
            }) => {
                assert_eq!(failed_index, 1);
                assert_eq!(submitted, vec!["0xaa".to_string()]);
                assert_eq!(not_submitted, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
