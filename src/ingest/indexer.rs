use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use roaring::RoaringTreemap;
use serde_json::Value;

use crate::core::version::max_version;
use crate::core::{PartitionId, VersionComparator};
use crate::error::Result;
use crate::ingest::interpreter::IndexedDoc;
use crate::snapshot::RawSnapshot;

/// 原始 NRT 索引引擎的边界（外部协作者）。
///
/// flush 产出下一个不可变快照（无变更时 None）；快照携带本次周期内
/// 标记的 pending delete，供 decoration 侧按需处理。
pub trait CoreIndexer: Send + Sync {
    fn index(&self, doc: IndexedDoc, version: &str) -> Result<()>;
    fn delete(&self, uids: &[u64]) -> Result<()>;
    fn flush(&self) -> Result<Option<Arc<RawSnapshot>>>;
    fn current_version(&self) -> String;
}

struct MemState {
    docs: BTreeMap<u64, Value>,
    pending_deletes: RoaringTreemap,
    version: String,
    dirty: bool,
}

/// 内存版核心索引器：协议参考实现兼测试载体。
///
/// 删除语义：delete 只标记 pending；文档在下一次 flush 时物理剔除，
/// 产出的快照同时携带 pending 集合（facet 计算据此排除）。
pub struct MemIndexer {
    partition: PartitionId,
    cmp: VersionComparator,
    inner: Mutex<MemState>,
}

impl MemIndexer {
    pub fn new(partition: PartitionId, cmp: VersionComparator, start_version: &str) -> Self {
        Self {
            partition,
            cmp,
            inner: Mutex::new(MemState {
                docs: BTreeMap::new(),
                pending_deletes: RoaringTreemap::new(),
                version: start_version.to_string(),
                dirty: false,
            }),
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }
}

impl CoreIndexer for MemIndexer {
    fn index(&self, doc: IndexedDoc, version: &str) -> Result<()> {
        let mut st = self.inner.lock();
        // 重建同 uid 文档会抵消未 flush 的删除标记
        st.pending_deletes.remove(doc.uid);
        st.docs.insert(doc.uid, doc.body);
        st.version = max_version(
            &self.cmp,
            Some(std::mem::take(&mut st.version)),
            Some(version.to_string()),
        )
        .unwrap_or_default();
        st.dirty = true;
        Ok(())
    }

    fn delete(&self, uids: &[u64]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let mut st = self.inner.lock();
        for uid in uids {
            if st.docs.contains_key(uid) {
                st.pending_deletes.insert(*uid);
                st.dirty = true;
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<Option<Arc<RawSnapshot>>> {
        let mut st = self.inner.lock();
        if !st.dirty {
            return Ok(None);
        }

        let snapshot = RawSnapshot::new(
            self.partition,
            st.version.clone(),
            st.docs.clone(),
            st.pending_deletes.clone(),
        );

        // flush 后物理剔除：下一个快照不再携带这些删除
        let pending = std::mem::take(&mut st.pending_deletes);
        st.docs.retain(|uid, _| !pending.contains(*uid));
        st.dirty = false;

        tracing::debug!(
            partition = self.partition,
            version = snapshot.version(),
            docs = snapshot.doc_count(),
            deletes = pending.len(),
            "core indexer flushed"
        );
        Ok(Some(snapshot))
    }

    fn current_version(&self) -> String {
        self.inner.lock().version.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::numeric_comparator;
    use serde_json::json;

    fn doc(uid: u64) -> IndexedDoc {
        IndexedDoc {
            uid,
            body: json!({ "uid": uid }),
        }
    }

    fn indexer() -> MemIndexer {
        MemIndexer::new(0, numeric_comparator(), "0")
    }

    #[test]
    fn flush_is_none_without_changes() {
        let ix = indexer();
        assert!(ix.flush().unwrap().is_none());

        ix.index(doc(1), "1").unwrap();
        assert!(ix.flush().unwrap().is_some());
        // 无新变更：再次 flush 不产出快照
        assert!(ix.flush().unwrap().is_none());
    }

    #[test]
    fn version_advances_monotonically_via_comparator() {
        let ix = indexer();
        ix.index(doc(1), "10").unwrap();
        ix.index(doc(2), "9").unwrap(); // 乱序到达不回退
        assert_eq!(ix.current_version(), "10");
        let snap = ix.flush().unwrap().unwrap();
        assert_eq!(snap.version(), "10");
    }

    #[test]
    fn first_flush_after_delete_carries_pending_then_drops() {
        let ix = indexer();
        ix.index(doc(1), "1").unwrap();
        ix.index(doc(2), "2").unwrap();
        ix.flush().unwrap().unwrap();

        ix.delete(&[1]).unwrap();
        let snap = ix.flush().unwrap().unwrap();
        // 本周期快照携带 pending delete 信息
        assert!(snap.has_deletes());
        assert!(snap.is_deleted(1));
        assert_eq!(snap.live_count(), 1);

        // 下一周期：物理剔除完成，不再携带
        ix.index(doc(3), "3").unwrap();
        let snap2 = ix.flush().unwrap().unwrap();
        assert!(!snap2.has_deletes());
        assert_eq!(snap2.doc_count(), 2);
    }

    #[test]
    fn reindex_cancels_pending_delete() {
        let ix = indexer();
        ix.index(doc(1), "1").unwrap();
        ix.delete(&[1]).unwrap();
        ix.index(doc(1), "2").unwrap();
        let snap = ix.flush().unwrap().unwrap();
        assert!(!snap.is_deleted(1));
        assert_eq!(snap.live_count(), 1);
    }

    #[test]
    fn delete_of_unknown_uid_is_ignored() {
        let ix = indexer();
        ix.delete(&[99]).unwrap();
        assert!(ix.flush().unwrap().is_none());
    }
}
