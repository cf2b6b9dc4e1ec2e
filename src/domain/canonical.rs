//! 规范化 JSON 编码
//!
//! 规则：
//! - 数组保持元素顺序
//! - 对象的键在每一层按字节序排序
//! - 紧凑输出（无多余空白），UTF-8 字节
//! - 只允许整数；浮点数无法跨实现稳定编码，返回 `EncodingError`

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CustodyError, CustodyResult};

/// 将任意可序列化值编码为规范化字节
pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> CustodyResult<Vec<u8>> {
    let value = serde_json::to_value(value)
        .map_err(|e| CustodyError::EncodingError(e.to_string()))?;
    canonicalize_value(&value).map(String::into_bytes)
}

/// 将 JSON 值编码为规范化字符串
pub fn canonicalize_value(value: &Value) -> CustodyResult<String> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut String) -> CustodyResult<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if !(n.is_i64() || n.is_u64()) {
                return Err(CustodyError::EncodingError(format!(
                    "non-integer number `{}` cannot be canonicalized",
                    n
                )));
            }
            out.push_str(&n.to_string());
        }
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => write_object(map, out)?,
    }
    Ok(())
}

fn write_object(map: &Map<String, Value>, out: &mut String) -> CustodyResult<()> {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(key, out)?;
        out.push(':');
        write_value(value, out)?;
    }
    out.push('}');
    Ok(())
}

fn write_string(s: &str, out: &mut String) -> CustodyResult<()> {
    let escaped =
        serde_json::to_string(s).map_err(|e| CustodyError::EncodingError(e.to_string()))?;
    out.push_str(&escaped);
    Ok(())
}
