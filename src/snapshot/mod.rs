use std::collections::BTreeMap;
use std::sync::Arc;

use roaring::RoaringTreemap;
use serde_json::Value;

use crate::core::PartitionId;

/// 不可变、带版本的单分区快照。
///
/// 由核心索引器在每次 flush 时产出；发布后只被替代、从不修改。
/// 通过 `Arc` 引用计数：查询方持有旧快照时，新快照发布不影响其可见性，
/// 旧快照在最后一个持有者释放后回收。
#[derive(Debug)]
pub struct RawSnapshot {
    partition: PartitionId,
    version: String,
    docs: BTreeMap<u64, Value>,
    /// pending delete 集合：已标记删除、facet 计算必须剔除的 uid
    deleted: RoaringTreemap,
}

impl RawSnapshot {
    pub fn new(
        partition: PartitionId,
        version: impl Into<String>,
        docs: BTreeMap<u64, Value>,
        deleted: RoaringTreemap,
    ) -> Arc<Self> {
        Arc::new(Self {
            partition,
            version: version.into(),
            docs,
            deleted,
        })
    }

    /// 空分区快照（version 为起始 token）
    pub fn empty(partition: PartitionId, version: impl Into<String>) -> Arc<Self> {
        Self::new(partition, version, BTreeMap::new(), RoaringTreemap::new())
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// 存活文档数（剔除 pending delete）
    pub fn live_count(&self) -> usize {
        self.docs
            .keys()
            .filter(|uid| !self.deleted.contains(**uid))
            .count()
    }

    pub fn get(&self, uid: u64) -> Option<&Value> {
        if self.deleted.contains(uid) {
            return None;
        }
        self.docs.get(&uid)
    }

    pub fn is_deleted(&self, uid: u64) -> bool {
        self.deleted.contains(uid)
    }

    pub fn has_deletes(&self) -> bool {
        !self.deleted.is_empty()
    }

    pub fn deleted(&self) -> &RoaringTreemap {
        &self.deleted
    }

    /// 遍历存活文档（uid 升序）
    pub fn live_docs(&self) -> impl Iterator<Item = (u64, &Value)> {
        self.docs
            .iter()
            .filter(|(uid, _)| !self.deleted.contains(**uid))
            .map(|(uid, doc)| (*uid, doc))
    }
}
