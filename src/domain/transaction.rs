//! 交易模型与规范化编解码
//!
//! 签名载荷固定为 `{chain_id, fee, memo, msgs, nonce}` 五个字段的规范化编码。
//! 外部验证方重新编码 `tx` 并验证签名，因此这里的字节输出必须稳定。

use std::{fmt, str::FromStr};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use sha3::{Digest, Sha3_256};

use crate::{
    domain::{canonical, crypto_provider::SignatureAlgorithm},
    error::{CustodyError, CustodyResult},
};

/// 信封格式版本
pub const ENVELOPE_VERSION: u32 = 1;

/// 签名载荷包含的字段
const SIGNING_FIELDS: [&str; 5] = ["chain_id", "fee", "memo", "msgs", "nonce"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 币种
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 白名单币种（治理币 DGT / 奖励币 DRT）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Denom {
    DGT,
    DRT,
}

impl Denom {
    pub fn as_str(&self) -> &'static str {
        match self {
            Denom::DGT => "DGT",
            Denom::DRT => "DRT",
        }
    }
}

impl FromStr for Denom {
    type Err = String;

    /// 大小写不敏感，统一为大写
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DGT" => Ok(Denom::DGT),
            "DRT" => Ok(Denom::DRT),
            _ => Err(format!("unsupported denom `{}` (valid: DGT, DRT)", s)),
        }
    }
}

impl fmt::Display for Denom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Denom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 反序列化只接受规范写法；大小写归一只发生在输入端（[`Transaction::from_input_json`]）
impl<'de> Deserialize<'de> for Denom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "DGT" => Ok(Denom::DGT),
            "DRT" => Ok(Denom::DRT),
            _ => Err(serde::de::Error::custom(format!(
                "unsupported denom `{}` (valid: DGT, DRT)",
                raw
            ))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 金额
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 十进制字符串：`digits` 或 `digits.digits`，无符号、无空白、无指数
fn is_decimal(s: &str) -> bool {
    let mut parts = s.splitn(2, '.');
    let int_part = parts.next().unwrap_or_default();
    let frac_part = parts.next();

    let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());

    all_digits(int_part) && frac_part.map_or(true, all_digits)
}

/// 正的十进制字符串（至少一位非零数字）
pub fn is_positive_decimal(s: &str) -> bool {
    is_decimal(s) && s.bytes().any(|b| (b'1'..=b'9').contains(&b))
}

/// 非负的十进制字符串（允许 "0"）
pub fn is_non_negative_decimal(s: &str) -> bool {
    is_decimal(s)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 交易
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 交易消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Msg {
    Send {
        from: String,
        to: String,
        denom: Denom,
        amount: String,
    },
}

impl Msg {
    pub fn send(
        from: impl Into<String>,
        to: impl Into<String>,
        denom: Denom,
        amount: impl Into<String>,
    ) -> Self {
        Msg::Send {
            from: from.into(),
            to: to.into(),
            denom,
            amount: amount.into(),
        }
    }
}

/// 未签名交易
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub chain_id: String,
    pub nonce: u64,
    pub msgs: Vec<Msg>,
    pub fee: String,
    #[serde(default)]
    pub memo: String,
}

impl Transaction {
    pub fn new(
        chain_id: impl Into<String>,
        nonce: u64,
        msgs: Vec<Msg>,
        fee: impl Into<String>,
        memo: impl Into<String>,
    ) -> Self {
        Self {
            chain_id: chain_id.into(),
            nonce,
            msgs,
            fee: fee.into(),
            memo: memo.into(),
        }
    }

    /// 签名前的语义校验
    ///
    /// 空 `msgs` 可以编码，但不允许签名
    pub fn validate(&self) -> CustodyResult<()> {
        if self.chain_id.is_empty() {
            return Err(CustodyError::InvalidTransaction("chain_id is empty".into()));
        }
        if self.msgs.is_empty() {
            return Err(CustodyError::InvalidTransaction(
                "transaction has no messages".into(),
            ));
        }
        if !is_non_negative_decimal(&self.fee) {
            return Err(CustodyError::InvalidTransaction(format!(
                "invalid fee `{}`",
                self.fee
            )));
        }

        for (index, msg) in self.msgs.iter().enumerate() {
            match msg {
                Msg::Send {
                    from, to, amount, ..
                } => {
                    if from.is_empty() || to.is_empty() {
                        return Err(CustodyError::InvalidTransaction(format!(
                            "message {}: empty sender or recipient",
                            index
                        )));
                    }
                    if !is_positive_decimal(amount) {
                        return Err(CustodyError::InvalidAmount {
                            index,
                            amount: amount.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// 解析用户提供的未签名交易 JSON，币种大小写不敏感
    pub fn from_input_json(raw: &str) -> CustodyResult<Self> {
        let mut value: Value = serde_json::from_str(raw)
            .map_err(|e| CustodyError::InvalidTransaction(e.to_string()))?;

        if let Some(msgs) = value.get_mut("msgs").and_then(Value::as_array_mut) {
            for (index, msg) in msgs.iter_mut().enumerate() {
                let Some(field) = msg.get_mut("denom") else {
                    continue;
                };
                let Some(text) = field.as_str() else {
                    continue;
                };
                let denom: Denom = text.parse().map_err(|_| CustodyError::UnsupportedDenom {
                    index,
                    denom: text.to_string(),
                })?;
                *field = Value::String(denom.as_str().to_string());
            }
        }

        serde_json::from_value(value).map_err(|e| CustodyError::InvalidTransaction(e.to_string()))
    }

    /// 首条消息的发送方
    pub fn sender(&self) -> Option<&str> {
        self.msgs.first().map(|m| match m {
            Msg::Send { from, .. } => from.as_str(),
        })
    }
}

/// 已签名交易信封
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub tx: Transaction,
    /// base64
    pub public_key: String,
    /// base64
    pub signature: String,
    pub algorithm: String,
    pub version: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 编解码
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 交易的完整规范化编码
pub fn encode(tx: &Transaction) -> CustodyResult<Vec<u8>> {
    canonical::to_canonical_bytes(tx)
}

/// 签名载荷：只取签名字段，与内存中的字段顺序无关
pub fn signing_bytes(tx: &Transaction) -> CustodyResult<Vec<u8>> {
    let value =
        serde_json::to_value(tx).map_err(|e| CustodyError::EncodingError(e.to_string()))?;
    let Value::Object(full) = value else {
        return Err(CustodyError::EncodingError(
            "transaction did not serialize to an object".into(),
        ));
    };

    let mut selected = Map::new();
    for field in SIGNING_FIELDS {
        let v = full.get(field).cloned().ok_or_else(|| {
            CustodyError::EncodingError(format!("missing signing field `{}`", field))
        })?;
        selected.insert(field.to_string(), v);
    }

    canonical::canonicalize_value(&Value::Object(selected)).map(String::into_bytes)
}

/// 交易哈希：`0x` + hex(SHA3-256(encode(tx)))
pub fn tx_hash(tx: &Transaction) -> CustodyResult<String> {
    let bytes = encode(tx)?;
    Ok(format!("0x{}", hex::encode(Sha3_256::digest(&bytes))))
}

/// 信封的规范化编码（线上格式）
pub fn encode_envelope(envelope: &SignedEnvelope) -> CustodyResult<Vec<u8>> {
    canonical::to_canonical_bytes(envelope)
}

pub fn decode_envelope(bytes: &[u8]) -> CustodyResult<SignedEnvelope> {
    serde_json::from_slice(bytes)
        .map_err(|e| CustodyError::EncodingError(format!("malformed envelope: {}", e)))
}

/// 对交易签名并组装信封
pub fn build_signed_envelope(
    tx: &Transaction,
    secret_key: &[u8],
    public_key: &[u8],
    algorithm: SignatureAlgorithm,
) -> CustodyResult<SignedEnvelope> {
    let payload = signing_bytes(tx)?;
    let signature = algorithm.sign(secret_key, &payload)?;

    Ok(SignedEnvelope {
        tx: tx.clone(),
        public_key: STANDARD.encode(public_key),
        signature: STANDARD.encode(signature),
        algorithm: algorithm.id().to_string(),
        version: ENVELOPE_VERSION,
    })
}

/// 重新计算签名载荷并验证签名
pub fn verify_envelope(envelope: &SignedEnvelope) -> bool {
    ensure_verified(envelope).is_ok()
}

/// 同 [`verify_envelope`]，失败时返回 `SignatureVerificationFailed`
pub fn ensure_verified(envelope: &SignedEnvelope) -> CustodyResult<()> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(CustodyError::SignatureVerificationFailed);
    }
    let algorithm = SignatureAlgorithm::parse(&envelope.algorithm)
        .ok_or(CustodyError::SignatureVerificationFailed)?;
    let public_key = STANDARD
        .decode(&envelope.public_key)
        .map_err(|_| CustodyError::SignatureVerificationFailed)?;
    let signature = STANDARD
        .decode(&envelope.signature)
        .map_err(|_| CustodyError::SignatureVerificationFailed)?;
    let payload =
        signing_bytes(&envelope.tx).map_err(|_| CustodyError::SignatureVerificationFailed)?;

    if algorithm.verify(&public_key, &payload, &signature) {
        Ok(())
    } else {
        Err(CustodyError::SignatureVerificationFailed)
    }
}
