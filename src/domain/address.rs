//! 地址派生
//!
//! `address = bech32(prefix, RIPEMD160(SHA256(public_key)))`

use bech32::{Bech32, Hrp};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use crate::error::{CustodyError, CustodyResult};

/// 默认地址前缀
pub const DEFAULT_PREFIX: &str = "dyt";
/// 地址负载长度（RIPEMD-160）
pub const ADDRESS_PAYLOAD_LENGTH: usize = 20;

fn parse_prefix(prefix: &str) -> CustodyResult<Hrp> {
    Hrp::parse(prefix).map_err(|e| CustodyError::Config(format!("invalid address prefix: {}", e)))
}

/// 从公钥派生地址（确定性，无随机性）
pub fn derive_address(public_key: &[u8], prefix: &str) -> CustodyResult<String> {
    let hrp = parse_prefix(prefix)?;

    let sha = Sha256::digest(public_key);
    let condensed = Ripemd160::digest(sha);

    bech32::encode::<Bech32>(hrp, &condensed)
        .map_err(|e| CustodyError::EncodingError(format!("bech32 encoding failed: {}", e)))
}

/// 验证地址格式：前缀、校验和与负载长度
pub fn validate_address(address: &str, prefix: &str) -> bool {
    let Ok((hrp, data)) = bech32::decode(address) else {
        return false;
    };
    hrp.as_str() == prefix && data.len() == ADDRESS_PAYLOAD_LENGTH
}

/// 逐条检查收款地址，错误携带第一个非法地址的消息下标
pub fn ensure_recipients<'a, I>(recipients: I, prefix: &str) -> CustodyResult<()>
where
    I: IntoIterator<Item = &'a str>,
{
    for (index, to) in recipients.into_iter().enumerate() {
        if !validate_address(to, prefix) {
            return Err(CustodyError::InvalidTransaction(format!(
                "message {}: `{}` is not a valid {} address",
                index, to, prefix
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let pk = [7u8; 32];
        let a = derive_address(&pk, DEFAULT_PREFIX).unwrap();
        let b = derive_address(&pk, DEFAULT_PREFIX).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("dyt1"));
        assert!(validate_address(&a, DEFAULT_PREFIX));
    }

    #[test]
    fn test_different_keys_give_different_addresses() {
        let a = derive_address(&[1u8; 32], DEFAULT_PREFIX).unwrap();
        let b = derive_address(&[2u8; 32], DEFAULT_PREFIX).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_prefix_is_configurable() {
        let addr = derive_address(&[9u8; 32], "dyttest").unwrap();
        assert!(addr.starts_with("dyttest1"));
        assert!(validate_address(&addr, "dyttest"));
        assert!(!validate_address(&addr, DEFAULT_PREFIX));
    }

    #[test]
    fn test_validate_rejects_corrupted_checksum() {
        let mut addr = derive_address(&[3u8; 32], DEFAULT_PREFIX).unwrap();
        let last = addr.pop().unwrap();
        addr.push(if last == 'q' { 'p' } else { 'q' });
        assert!(!validate_address(&addr, DEFAULT_PREFIX));
        assert!(!validate_address("not-an-address", DEFAULT_PREFIX));
    }

    #[test]
    fn test_ensure_recipients_reports_first_bad_index() {
        let good = derive_address(&[4u8; 32], DEFAULT_PREFIX).unwrap();
        let foreign = derive_address(&[5u8; 32], "cosmos").unwrap();

        assert!(ensure_recipients([good.as_str()], DEFAULT_PREFIX).is_ok());
        match ensure_recipients([good.as_str(), foreign.as_str(), "junk"], DEFAULT_PREFIX) {
            Err(CustodyError::InvalidTransaction(msg)) => assert!(msg.starts_with("message 1:")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
