use serde_json::Value;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{NodeError, Result};

/// interpreter 的产物：索引就绪的文档
#[derive(Clone, Debug)]
pub struct IndexedDoc {
    pub uid: u64,
    pub body: Value,
}

/// 事件体 -> 可索引文档 的转换边界（核心索引器的 interpreter 协作者）。
pub trait EventInterpreter: Send + Sync {
    fn interpret(&self, body: &Value) -> Result<IndexedDoc>;
}

/// 从事件体提取 uid：数值原样；字符串 xxh3 哈希成 u64（稳定、无碰撞保证，
/// 正确性不依赖哈希唯一，仅作为路由/主键投影）。
pub fn uid_of(body: &Value, uid_field: &str) -> Option<u64> {
    match body.get(uid_field)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => Some(xxh3_64(s.as_bytes())),
        _ => None,
    }
}

/// 默认 interpreter：要求事件体为 JSON object 且带可解析 uid。
pub struct JsonInterpreter {
    uid_field: String,
}

impl JsonInterpreter {
    pub fn new(uid_field: impl Into<String>) -> Self {
        Self {
            uid_field: uid_field.into(),
        }
    }
}

impl EventInterpreter for JsonInterpreter {
    fn interpret(&self, body: &Value) -> Result<IndexedDoc> {
        if !body.is_object() {
            return Err(NodeError::EventRejected(
                "event body is not a JSON object".to_string(),
            ));
        }
        let uid = uid_of(body, &self.uid_field).ok_or_else(|| {
            NodeError::EventRejected(format!("missing or unparsable '{}'", self.uid_field))
        })?;
        Ok(IndexedDoc {
            uid,
            body: body.clone(),
        })
    }
}
