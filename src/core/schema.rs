use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// 核心 schema 的边界表示：字段名与 facet 名集合。
///
/// schema 的定义/解析在本 crate 之外；这里只消费 decoration setup
/// 所需的名字集合与 uid 字段名。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Schema {
    /// 文档唯一键字段（数值，或由 interpreter 哈希成 u64 的字符串）
    pub uid_field: String,
    pub fields: BTreeSet<String>,
    pub facets: BTreeSet<String>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            uid_field: "uid".to_string(),
            fields: BTreeSet::new(),
            facets: BTreeSet::new(),
        }
    }
}

impl Schema {
    pub fn new(uid_field: impl Into<String>) -> Self {
        Self {
            uid_field: uid_field.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into());
        self
    }

    /// facet 通常与同名字段配对：同时登记两边
    pub fn with_facet(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.fields.insert(name.clone());
        self.facets.insert(name);
        self
    }
}
