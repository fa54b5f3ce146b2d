pub type PartitionId = u32;

/// 分区路由策略（外部协作者，仅在边界上指定）。
///
/// 核心只依赖 uid -> partition 的确定性映射；分片分配与集群成员
/// 管理不在本层。
pub trait ShardingStrategy: Send + Sync {
    fn partition_for(&self, uid: u64) -> PartitionId;
    /// 总分区数（全集群，不是本节点拥有的子集）
    fn total_partitions(&self) -> u32;
}

/// 取模分片：uid % total
#[derive(Clone, Debug)]
pub struct ModShard {
    total: u32,
}

impl ModShard {
    pub fn new(total: u32) -> Self {
        Self {
            total: total.max(1),
        }
    }
}

impl ShardingStrategy for ModShard {
    fn partition_for(&self, uid: u64) -> PartitionId {
        (uid % self.total as u64) as PartitionId
    }

    fn total_partitions(&self) -> u32 {
        self.total
    }
}
