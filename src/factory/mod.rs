use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;

use crate::core::{PartitionId, VersionComparator};
use crate::error::{NodeError, Result};
use crate::ingest::indexer::{CoreIndexer, MemIndexer};
use crate::ingest::interpreter::EventInterpreter;
use crate::reader::{DecoratedReader, ReaderDecorator, ReaderSlot};
use crate::snapshot::RawSnapshot;

/// 每分区索引系统的装配配置
#[derive(Clone)]
pub struct SystemConfig {
    /// flush/refresh 周期（NRT 刷新粒度）
    pub refresh_interval: Duration,
    /// 起始版本 token
    pub start_version: String,
    pub comparator: VersionComparator,
}

impl SystemConfig {
    pub fn new(comparator: VersionComparator) -> Self {
        Self {
            refresh_interval: Duration::from_secs(1),
            start_version: "0".to_string(),
            comparator,
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }
}

/// 一个分区的完整索引装配：目录 + interpreter + decorator + 核心索引器 + reader 槽位。
pub struct IndexSystem {
    partition: PartitionId,
    dir: PathBuf,
    interpreter: Arc<dyn EventInterpreter>,
    decorator: Arc<ReaderDecorator>,
    indexer: MemIndexer,
    slot: ReaderSlot,
}

impl IndexSystem {
    /// 目录必须已存在：缺失按"not found"上报（部署/配置问题，非数据问题）
    pub fn open(
        partition: PartitionId,
        dir: PathBuf,
        interpreter: Arc<dyn EventInterpreter>,
        decorator: Arc<ReaderDecorator>,
        config: &SystemConfig,
    ) -> Result<Self> {
        if !dir.is_dir() {
            return Err(NodeError::IndexDirNotFound(dir));
        }
        Ok(Self {
            partition,
            dir,
            interpreter,
            decorator,
            indexer: MemIndexer::new(partition, config.comparator.clone(), &config.start_version),
            slot: ReaderSlot::new(partition),
        })
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 消费一条事件体进核心索引
    pub fn consume(&self, body: &Value, version: &str) -> Result<()> {
        let doc = self.interpreter.interpret(body)?;
        self.indexer.index(doc, version)
    }

    /// 核心删除路径（同步）
    pub fn delete(&self, uids: &[u64]) -> Result<()> {
        self.indexer.delete(uids)
    }

    /// flush 核心索引器并刷新 reader 槽位。
    /// 返回 true 表示产出了新快照（槽位已切换到新版本）。
    pub fn flush_and_refresh(&self) -> Result<bool> {
        match self.indexer.flush()? {
            None => Ok(false),
            Some(snapshot) => {
                let with_deletes = snapshot.has_deletes();
                self.slot.refresh(&self.decorator, snapshot, with_deletes)?;
                Ok(true)
            }
        }
    }

    pub fn reader(&self) -> Option<Arc<DecoratedReader>> {
        self.slot.reader()
    }

    /// 当前 raw 快照（未 flush 过的分区返回空快照）
    pub fn current_snapshot(&self) -> Arc<RawSnapshot> {
        match self.reader() {
            Some(r) => r.snapshot(),
            None => RawSnapshot::empty(self.partition, &self.indexer.current_version()),
        }
    }

    pub fn current_version(&self) -> String {
        self.indexer.current_version()
    }
}

/// 工厂键策略：通用的按分区缓存，或退化的单实例钉死模式。
///
/// Pinned 是同一组件的退化配置而非子类链：忽略传入的分区键，
/// 所有请求都命中第一个构造出的实例（单一非分片索引的演示/覆盖用法）。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FactoryMode {
    PerPartition,
    Pinned,
}

/// 每分区恰好绑定一个长生命周期索引系统的工厂。
///
/// 缓存 write-once-per-key、进程生命周期内不逐出；并发首次访问通过
/// DashMap entry 锁保证恰好构造一次（构造两次会破坏磁盘状态）。
pub struct IndexSystemFactory {
    root: PathBuf,
    mode: FactoryMode,
    interpreter: Arc<dyn EventInterpreter>,
    decorator: Arc<ReaderDecorator>,
    config: SystemConfig,
    systems: DashMap<PartitionId, Arc<IndexSystem>>,
}

const PINNED_KEY: PartitionId = 0;

impl IndexSystemFactory {
    pub fn new(
        root: PathBuf,
        mode: FactoryMode,
        interpreter: Arc<dyn EventInterpreter>,
        decorator: Arc<ReaderDecorator>,
        config: SystemConfig,
    ) -> Self {
        Self {
            root,
            mode,
            interpreter,
            decorator,
            config,
            systems: DashMap::new(),
        }
    }

    pub fn mode(&self) -> FactoryMode {
        self.mode
    }

    pub fn decorator(&self) -> &Arc<ReaderDecorator> {
        &self.decorator
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    fn path_for(&self, partition: PartitionId) -> PathBuf {
        match self.mode {
            FactoryMode::PerPartition => self.root.join(format!("shard-{partition}")),
            FactoryMode::Pinned => self.root.clone(),
        }
    }

    /// 首次请求构造并缓存；此后无条件返回缓存实例。
    /// Pinned 模式下即使换分区参数也命中同一实例。
    pub fn system_for(&self, partition: PartitionId) -> Result<Arc<IndexSystem>> {
        let key = match self.mode {
            FactoryMode::PerPartition => partition,
            FactoryMode::Pinned => PINNED_KEY,
        };

        if let Some(sys) = self.systems.get(&key) {
            return Ok(sys.clone());
        }

        // entry 持锁构造：并发首次访问只允许一个赢家
        match self.systems.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(e) => Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let dir = self.path_for(partition);
                let sys = Arc::new(IndexSystem::open(
                    partition,
                    dir,
                    self.interpreter.clone(),
                    self.decorator.clone(),
                    &self.config,
                )?);
                tracing::info!(
                    partition,
                    dir = %sys.dir().display(),
                    mode = ?self.mode,
                    "index system constructed"
                );
                v.insert(sys.clone());
                Ok(sys)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::numeric_comparator;
    use crate::ingest::interpreter::JsonInterpreter;
    use crate::reader::FieldFacetHandler;
    use serde_json::json;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("facet-node-{}-{}", tag, nanos));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn factory(root: PathBuf, mode: FactoryMode) -> IndexSystemFactory {
        IndexSystemFactory::new(
            root,
            mode,
            Arc::new(JsonInterpreter::new("uid")),
            Arc::new(ReaderDecorator::new(
                vec![Arc::new(FieldFacetHandler::for_field("color"))],
                Vec::new(),
            )),
            SystemConfig::new(numeric_comparator()),
        )
    }

    #[test]
    fn missing_index_dir_is_a_not_found_config_error() {
        let root = unique_tmp_dir("missing");
        let f = factory(root, FactoryMode::PerPartition);
        // shard-5 子目录不存在
        let err = f.system_for(5).err().unwrap();
        assert!(matches!(err, NodeError::IndexDirNotFound(_)));
        assert!(err.is_fatal_at_setup());
    }

    #[test]
    fn pinned_factory_returns_same_instance_for_any_partition() {
        let root = unique_tmp_dir("pinned");
        let f = factory(root, FactoryMode::Pinned);

        let a = f.system_for(0).unwrap();
        // 不同分区参数：仍然命中同一缓存实例
        let b = f.system_for(3).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.partition(), 0);
    }

    #[test]
    fn per_partition_factory_caches_exactly_once_per_key() {
        let root = unique_tmp_dir("perpart");
        std::fs::create_dir_all(root.join("shard-0")).unwrap();
        std::fs::create_dir_all(root.join("shard-1")).unwrap();
        let f = factory(root, FactoryMode::PerPartition);

        let a1 = f.system_for(0).unwrap();
        let a2 = f.system_for(0).unwrap();
        let b = f.system_for(1).unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }

    #[test]
    fn concurrent_first_access_resolves_to_single_winner() {
        let root = unique_tmp_dir("race");
        std::fs::create_dir_all(root.join("shard-0")).unwrap();
        let f = Arc::new(factory(root, FactoryMode::PerPartition));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let f = f.clone();
                std::thread::spawn(move || f.system_for(0).unwrap())
            })
            .collect();

        let systems: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for s in &systems[1..] {
            assert!(Arc::ptr_eq(&systems[0], s));
        }
    }

    #[test]
    fn system_consume_flush_exposes_decorated_reader() {
        let root = unique_tmp_dir("system");
        let f = factory(root, FactoryMode::Pinned);
        let sys = f.system_for(0).unwrap();

        assert!(sys.reader().is_none());
        sys.consume(&json!({"uid": 1, "color": "red"}), "1").unwrap();
        assert!(sys.flush_and_refresh().unwrap());

        let reader = sys.reader().unwrap();
        assert_eq!(reader.snapshot().version(), "1");
        assert_eq!(reader.facet_counts("color").unwrap().get("red"), Some(&1));

        // 无变更：不产出新快照
        assert!(!sys.flush_and_refresh().unwrap());
    }
}
