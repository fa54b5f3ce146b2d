use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::core::{IngestEvent, PartitionId, ShardingStrategy};
use crate::engine::EngineSet;
use crate::error::{NodeError, Result};
use crate::factory::IndexSystemFactory;
use crate::ingest::interpreter::uid_of;
use crate::stats::IngestStats;

/// ingestion 主链路：
/// 事件 → uid/分区路由 → 按注册顺序提供给引擎链（skip 哨兵短路）→
/// 核心索引消费 → 周期性 flush + reader 刷新。
///
/// 删除走同链路的同步路径，保证同一文档上 on_delete 相对 accept_event
/// 的顺序不被重排。
pub struct IngestPipeline {
    factory: Arc<IndexSystemFactory>,
    engines: Arc<EngineSet>,
    sharding: Arc<dyn ShardingStrategy>,
    partitions: BTreeSet<PartitionId>,
    uid_field: String,
    stats: Arc<IngestStats>,
}

impl IngestPipeline {
    pub fn new(
        factory: Arc<IndexSystemFactory>,
        engines: Arc<EngineSet>,
        sharding: Arc<dyn ShardingStrategy>,
        partitions: BTreeSet<PartitionId>,
        uid_field: impl Into<String>,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            factory,
            engines,
            sharding,
            partitions,
            uid_field: uid_field.into(),
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// 处理单条事件（同步核心；async 循环与测试共用）
    pub fn apply(&self, event: IngestEvent) -> Result<()> {
        IngestStats::bump(&self.stats.events_total);

        let Some(uid) = uid_of(&event.body, &self.uid_field) else {
            IngestStats::bump(&self.stats.rejected_total);
            tracing::warn!(version = event.version, "event without routable uid dropped");
            return Ok(());
        };
        let partition = self.sharding.partition_for(uid);

        // 引擎链先于核心索引：skip 哨兵 = 引擎已完全吸收
        let offered = self.engines.offer(partition, event.body, &event.version);
        let Some(body) = offered else {
            IngestStats::bump(&self.stats.skipped_total);
            return Ok(());
        };

        if !self.partitions.contains(&partition) {
            // 非本节点分区：只为 all-partitions 引擎转了一圈，核心不落盘
            IngestStats::bump(&self.stats.unowned_total);
            return Ok(());
        }

        let system = self.factory.system_for(partition)?;
        system.consume(&body, &event.version)
    }

    /// 核心删除路径：标记核心索引删除，并同步扇出给引擎。
    /// 零 uid 调用无副作用。
    pub fn delete(&self, partition: PartitionId, uids: &[u64]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        if !self.partitions.contains(&partition) {
            return Err(NodeError::Config(format!(
                "delete for partition {partition} not owned by this node"
            )));
        }
        IngestStats::bump(&self.stats.delete_batches);

        let system = self.factory.system_for(partition)?;
        system.delete(uids)?;
        // 引擎看到的是当前 raw reader 的快照句柄
        self.engines.on_delete(&system.current_snapshot(), uids);
        Ok(())
    }

    /// flush 所有自有分区并刷新 reader；返回产出新快照的分区数。
    /// decoration failure 只影响该分区（槽位已清空待重建），不打断其余分区。
    pub fn refresh_all(&self) -> usize {
        let mut refreshed = 0;
        for partition in &self.partitions {
            let system = match self.factory.system_for(*partition) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(partition, error = %e, "partition system unavailable");
                    continue;
                }
            };
            match system.flush_and_refresh() {
                Ok(true) => {
                    refreshed += 1;
                    IngestStats::bump(&self.stats.refreshes);
                }
                Ok(false) => {}
                Err(e) => {
                    IngestStats::bump(&self.stats.refresh_failures);
                    tracing::warn!(partition, error = %e, "refresh failed, reader dropped");
                }
            }
        }
        refreshed
    }

    /// 事件循环：mpsc 接收 + 周期 refresh tick；通道关闭时做最终 flush 退出。
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<IngestEvent>, interval: Duration) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if let Err(e) = self.apply(event) {
                                tracing::warn!(error = %e, "event application failed");
                            }
                        }
                        None => {
                            self.refresh_all();
                            tracing::info!("ingest channel closed, pipeline draining done");
                            break;
                        }
                    }
                }
                _ = tick.tick() => {
                    self.refresh_all();
                }
            }
        }
    }
}
