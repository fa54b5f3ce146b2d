use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::core::PartitionId;
use crate::error::Result;
use crate::reader::decorator::{DecoratedReader, ReaderDecorator};
use crate::snapshot::RawSnapshot;

/// 每分区唯一的 reader 槽位。
///
/// ## 并发契约
/// - 任一时刻逻辑上只有一个 DecoratedReader 关联本槽位；refresh 只换内容不换身份。
/// - refresh（redecorate）按槽位串行（refresh_gate）；但与已持有旧快照的查询并发，
///   查询永远看不到撕裂的切换。
/// - redecorate 失败后旧 reader 不可信：槽位清空，下次 refresh 从头 decorate。
pub struct ReaderSlot {
    partition: PartitionId,
    current: ArcSwapOption<DecoratedReader>,
    refresh_gate: Mutex<()>,
}

impl ReaderSlot {
    pub fn new(partition: PartitionId) -> Self {
        Self {
            partition,
            current: ArcSwapOption::const_empty(),
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// 当前 reader（wait-free；空分区尚未 decorate 时为 None）
    pub fn reader(&self) -> Option<Arc<DecoratedReader>> {
        self.current.load_full()
    }

    /// 用新快照刷新槽位：已有 reader 走 redecorate（增量 rebind），
    /// 否则从头 decorate。
    pub fn refresh(
        &self,
        decorator: &ReaderDecorator,
        snapshot: Arc<RawSnapshot>,
        with_deletes: bool,
    ) -> Result<()> {
        let _g = self.refresh_gate.lock();

        match self.current.load_full() {
            None => {
                let reader = decorator.decorate(Some(snapshot.clone()));
                self.current.store(reader);
                tracing::info!(
                    partition = self.partition,
                    version = snapshot.version(),
                    docs = snapshot.doc_count(),
                    "reader slot decorated"
                );
                Ok(())
            }
            Some(reader) => {
                match decorator.redecorate(&reader, snapshot.clone(), with_deletes) {
                    Ok(_same) => {
                        tracing::debug!(
                            partition = self.partition,
                            version = snapshot.version(),
                            "reader slot redecorated"
                        );
                        Ok(())
                    }
                    Err(e) => {
                        // 失败后 reader 不可用：清空槽位，调用方 drop 并重建
                        self.current.store(None);
                        tracing::warn!(
                            partition = self.partition,
                            error = %e,
                            "redecorate failed, reader slot dropped"
                        );
                        Err(e)
                    }
                }
            }
        }
    }
}
