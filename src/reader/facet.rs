use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::snapshot::RawSnapshot;

/// facet 值 -> 命中计数
pub type FacetCounts = BTreeMap<String, u64>;

/// 命名的 facet 能力：对一个快照计算 facet 值计数。
///
/// ## 契约（重要）
/// - handler 在配置期创建一次，跨每次 decorate/redecorate 复用，进程生命周期内常驻。
/// - 对快照是无状态的：`count` 不得缓存跨快照的可变状态。
/// - 必须剔除快照 pending-delete 集合内的 uid。
pub trait FacetHandler: Send + Sync {
    fn name(&self) -> &str;
    fn count(&self, snapshot: &RawSnapshot) -> FacetCounts;
}

/// 按查询配置生成 handler 的工厂（facet 配置逐查询变化时使用）
pub trait RuntimeFacetHandlerFactory: Send + Sync {
    fn name(&self) -> &str;
    fn create(&self, params: &Value) -> Arc<dyn FacetHandler>;
}

/// 基于文档字段值的通用 facet handler（核心 schema facet 的默认实现）。
///
/// 字段值为字符串取原值；数值转十进制字符串；数组逐元素计数。
pub struct FieldFacetHandler {
    name: String,
    field: String,
}

impl FieldFacetHandler {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
        }
    }

    /// facet 与字段同名的常见情形
    pub fn for_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            name: field.clone(),
            field,
        }
    }

    fn bump(counts: &mut FacetCounts, value: &Value) {
        let key = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return,
        };
        *counts.entry(key).or_insert(0) += 1;
    }
}

/// 数值字段按查询给定边界分桶的 runtime facet 工厂。
///
/// 桶边界逐查询变化，无法在配置期固定成一个常驻 handler；
/// 每次查询用 `create` 实例化一个一次性 handler。
pub struct RangeFacetHandlerFactory {
    name: String,
    field: String,
}

impl RangeFacetHandlerFactory {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
        }
    }

    pub fn for_field(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            name: field.clone(),
            field,
        }
    }
}

impl RuntimeFacetHandlerFactory for RangeFacetHandlerFactory {
    fn name(&self) -> &str {
        &self.name
    }

    /// params 形如 `{"bounds": [10, 100]}`（升序桶边界）。
    /// 缺失或不合法的边界按空处理：所有命中文档落入单一 "all" 桶。
    fn create(&self, params: &Value) -> Arc<dyn FacetHandler> {
        let mut bounds: Vec<i64> = params
            .get("bounds")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default();
        bounds.sort_unstable();
        bounds.dedup();
        Arc::new(RangeFacetHandler {
            name: self.name.clone(),
            field: self.field.clone(),
            bounds,
        })
    }
}

struct RangeFacetHandler {
    name: String,
    field: String,
    bounds: Vec<i64>,
}

impl RangeFacetHandler {
    fn bucket(&self, v: i64) -> String {
        let Some(first) = self.bounds.first() else {
            return "all".to_string();
        };
        if v < *first {
            return format!("<{first}");
        }
        for w in self.bounds.windows(2) {
            if v < w[1] {
                return format!("{}-{}", w[0], w[1] - 1);
            }
        }
        format!("{}+", self.bounds[self.bounds.len() - 1])
    }
}

impl FacetHandler for RangeFacetHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn count(&self, snapshot: &RawSnapshot) -> FacetCounts {
        let mut counts = FacetCounts::new();
        for (_, doc) in snapshot.live_docs() {
            if let Some(v) = doc.get(&self.field).and_then(Value::as_i64) {
                *counts.entry(self.bucket(v)).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl FacetHandler for FieldFacetHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn count(&self, snapshot: &RawSnapshot) -> FacetCounts {
        let mut counts = FacetCounts::new();
        for (_, doc) in snapshot.live_docs() {
            match doc.get(&self.field) {
                Some(Value::Array(items)) => {
                    for item in items {
                        Self::bump(&mut counts, item);
                    }
                }
                Some(v) => Self::bump(&mut counts, v),
                None => {}
            }
        }
        counts
    }
}
