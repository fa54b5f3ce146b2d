use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// skip 哨兵的 type 值：engine 已完全吸收该事件，核心索引必须跳过
pub const SKIP_TYPE: &str = "skip";

/// ingestion 事件：半结构化 JSON 文档 + 外部版本 token。
///
/// body 约定为 JSON object；version 不透明，由注入的比较器建立全序。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestEvent {
    pub body: Value,
    pub version: String,
}

impl IngestEvent {
    pub fn new(body: Value, version: impl Into<String>) -> Self {
        Self {
            body,
            version: version.into(),
        }
    }
}

/// skip 哨兵文档：`{"type":"skip"}`
pub fn skip_sentinel() -> Value {
    json!({ "type": SKIP_TYPE })
}

/// 判断事件体是否为 skip 哨兵
pub fn is_skip(body: &Value) -> bool {
    body.get("type").and_then(Value::as_str) == Some(SKIP_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_sentinel_is_recognized() {
        assert!(is_skip(&skip_sentinel()));
        assert!(is_skip(&json!({"type": "skip", "extra": 1})));
    }

    #[test]
    fn ordinary_documents_are_not_skip() {
        assert!(!is_skip(&json!({"uid": 1, "type": "doc"})));
        assert!(!is_skip(&json!({"uid": 1})));
        assert!(!is_skip(&json!(null)));
    }
}
