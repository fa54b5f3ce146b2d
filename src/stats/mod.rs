use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// ingestion / refresh 链路计数（宽松原子，只用于观测）
#[derive(Debug, Default)]
pub struct IngestStats {
    /// 到达的事件总数
    pub events_total: AtomicU64,
    /// 被 engine 吸收（skip 哨兵）而跳过核心索引的事件数
    pub skipped_total: AtomicU64,
    /// 数据不合约定被丢弃的事件数
    pub rejected_total: AtomicU64,
    /// 非本节点分区、仅提供给 all-partitions 引擎后丢弃的事件数
    pub unowned_total: AtomicU64,
    /// 删除批次数
    pub delete_batches: AtomicU64,
    /// 成功的 reader 刷新（decorate + redecorate）次数
    pub refreshes: AtomicU64,
    /// 刷新失败（decoration failure）次数
    pub refresh_failures: AtomicU64,
}

impl IngestStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl fmt::Display for IngestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ingest stats:")?;
        writeln!(f, "  events:          {:>10}", Self::get(&self.events_total))?;
        writeln!(f, "  skipped:         {:>10}", Self::get(&self.skipped_total))?;
        writeln!(f, "  rejected:        {:>10}", Self::get(&self.rejected_total))?;
        writeln!(f, "  unowned:         {:>10}", Self::get(&self.unowned_total))?;
        writeln!(f, "  delete batches:  {:>10}", Self::get(&self.delete_batches))?;
        writeln!(f, "  refreshes:       {:>10}", Self::get(&self.refreshes))?;
        write!(
            f,
            "  refresh failures:{:>10}",
            Self::get(&self.refresh_failures)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_render() {
        let s = IngestStats::default();
        IngestStats::bump(&s.events_total);
        IngestStats::bump(&s.events_total);
        IngestStats::bump(&s.skipped_total);
        assert_eq!(IngestStats::get(&s.events_total), 2);

        let rendered = s.to_string();
        assert!(rendered.contains("events:"));
        assert!(rendered.contains("2"));
    }
}
