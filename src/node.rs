use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{
    numeric_comparator, IngestEvent, ModShard, PartitionId, Schema, VersionComparator,
};
use crate::engine::{EngineHandle, EngineInit, EngineSet};
use crate::error::Result;
use crate::factory::{FactoryMode, IndexSystem, IndexSystemFactory, SystemConfig};
use crate::ingest::{IngestPipeline, JsonInterpreter};
use crate::reader::{
    DecoratedReader, FacetCounts, FacetHandler, FieldFacetHandler, ReaderDecorator,
    RuntimeFacetHandlerFactory,
};
use crate::stats::IngestStats;

/// 节点装配参数。
///
/// `partitions` 是本节点自有的分区集合；`total_partitions` 决定 uid 的
/// mod 路由。Pinned 模式下分区键被忽略，全部请求命中同一个索引实例。
#[derive(Clone)]
pub struct NodeConfig {
    pub node_id: u32,
    pub index_root: PathBuf,
    pub mode: FactoryMode,
    pub partitions: BTreeSet<PartitionId>,
    pub total_partitions: u32,
    pub schema: Schema,
    pub comparator: VersionComparator,
    pub refresh_interval: Duration,
    /// 逐查询实例化的 facet 工厂（桶边界等配置随查询变化的 facet）
    pub runtime_factories: Vec<Arc<dyn RuntimeFacetHandlerFactory>>,
}

impl NodeConfig {
    pub fn new(node_id: u32, index_root: impl Into<PathBuf>) -> Self {
        Self {
            node_id,
            index_root: index_root.into(),
            mode: FactoryMode::PerPartition,
            partitions: BTreeSet::new(),
            total_partitions: 1,
            schema: Schema::default(),
            comparator: numeric_comparator(),
            refresh_interval: Duration::from_secs(1),
            runtime_factories: Vec::new(),
        }
    }

    pub fn with_runtime_factory(mut self, factory: Arc<dyn RuntimeFacetHandlerFactory>) -> Self {
        self.runtime_factories.push(factory);
        self
    }

    pub fn with_partitions(
        mut self,
        partitions: impl IntoIterator<Item = PartitionId>,
        total: u32,
    ) -> Self {
        self.partitions = partitions.into_iter().collect();
        self.total_partitions = total;
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_mode(mut self, mode: FactoryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_comparator(mut self, comparator: VersionComparator) -> Self {
        self.comparator = comparator;
        self
    }
}

/// 开放给引擎的核心搜索面：按分区取 decorated reader。
///
/// `start` 回调拿到的就是它；引擎由此挂接自己的查询路径，
/// 不触碰核心索引器内部。
pub struct SearchContext {
    node_id: u32,
    partitions: BTreeSet<PartitionId>,
    systems: BTreeMap<PartitionId, Arc<IndexSystem>>,
}

impl SearchContext {
    /// 无分区的空上下文（引擎单测用）
    pub fn empty(node_id: u32) -> Self {
        Self {
            node_id,
            partitions: BTreeSet::new(),
            systems: BTreeMap::new(),
        }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn partitions(&self) -> &BTreeSet<PartitionId> {
        &self.partitions
    }

    /// 该分区当前的 decorated reader；尚未产出快照时为 None
    pub fn reader(&self, partition: PartitionId) -> Option<Arc<DecoratedReader>> {
        self.systems.get(&partition).and_then(|s| s.reader())
    }

    /// 全部分区的当前 reader（缺席的分区被跳过）
    pub fn readers(&self) -> Vec<Arc<DecoratedReader>> {
        self.systems.values().filter_map(|s| s.reader()).collect()
    }

    pub fn system(&self, partition: PartitionId) -> Option<&Arc<IndexSystem>> {
        self.systems.get(&partition)
    }
}

/// 分区化搜索节点：核心索引 + 注册引擎的完整装配。
///
/// ## 启动顺序
/// 所有权校验（致命）→ 引擎 init 扇出（单引擎失败被禁用，不致命）→
/// decoration 能力集合并 → 各分区索引打开（目录缺失致命）→
/// 搜索上下文就绪 → 引擎 start 扇出。
pub struct SearchNode {
    config: NodeConfig,
    engines: Arc<EngineSet>,
    pipeline: Arc<IngestPipeline>,
    context: Arc<SearchContext>,
    stats: Arc<IngestStats>,
}

impl SearchNode {
    pub fn open(config: NodeConfig, engines: Vec<Arc<EngineHandle>>) -> Result<Self> {
        let set = Arc::new(EngineSet::new(engines, config.partitions.clone()));

        // setup 致命类：field 与 facet 命名空间内的重复声明
        set.validate_ownership(&config.schema)?;

        let schema = Arc::new(config.schema.clone());
        let sharding = Arc::new(ModShard::new(config.total_partitions));
        set.init_all(&EngineInit {
            index_dir: config.index_root.clone(),
            node_id: config.node_id,
            schema: schema.clone(),
            comparator: config.comparator.clone(),
            registry: set.registry().clone(),
            sharding: sharding.clone(),
        });

        // decoration 能力集：核心 facet（去掉被引擎独占的名字）+ 引擎贡献
        let engine_facets: BTreeSet<String> = set
            .handles()
            .iter()
            .flat_map(|h| h.facet_names())
            .collect();
        let mut handlers: Vec<Arc<dyn FacetHandler>> = config
            .schema
            .facets
            .iter()
            .filter(|f| !engine_facets.contains(*f))
            .map(|f| Arc::new(FieldFacetHandler::for_field(f)) as Arc<dyn FacetHandler>)
            .collect();
        handlers.extend(set.collect_facet_handlers());

        let decorator = Arc::new(ReaderDecorator::new(
            handlers,
            config.runtime_factories.clone(),
        ));
        let factory = Arc::new(IndexSystemFactory::new(
            config.index_root.clone(),
            config.mode,
            Arc::new(JsonInterpreter::new(&config.schema.uid_field)),
            decorator,
            SystemConfig::new(config.comparator.clone())
                .with_refresh_interval(config.refresh_interval),
        ));

        // 各分区索引先于引擎 start 打开：目录缺失在这里致命
        let mut systems = BTreeMap::new();
        for p in &config.partitions {
            systems.insert(*p, factory.system_for(*p)?);
        }
        let context = Arc::new(SearchContext {
            node_id: config.node_id,
            partitions: config.partitions.clone(),
            systems,
        });

        let stats = Arc::new(IngestStats::default());
        let pipeline = Arc::new(IngestPipeline::new(
            factory.clone(),
            set.clone(),
            sharding,
            config.partitions.clone(),
            config.schema.uid_field.clone(),
            stats.clone(),
        ));

        set.start_all(&context);
        tracing::info!(
            node_id = config.node_id,
            partitions = ?config.partitions,
            engines = set.handles().len(),
            "search node open"
        );

        Ok(Self {
            config,
            engines: set,
            pipeline,
            context,
            stats,
        })
    }

    pub fn context(&self) -> &Arc<SearchContext> {
        &self.context
    }

    pub fn pipeline(&self) -> &Arc<IngestPipeline> {
        &self.pipeline
    }

    pub fn engines(&self) -> &Arc<EngineSet> {
        &self.engines
    }

    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    pub fn reader(&self, partition: PartitionId) -> Option<Arc<DecoratedReader>> {
        self.context.reader(partition)
    }

    /// 同步送入单条事件（流式接入走 pipeline 的 run 循环）
    pub fn ingest(&self, event: IngestEvent) -> Result<()> {
        self.pipeline.apply(event)
    }

    pub fn delete(&self, partition: PartitionId, uids: &[u64]) -> Result<()> {
        self.pipeline.delete(partition, uids)
    }

    /// flush + reader 刷新；返回产出新快照的分区数
    pub fn refresh(&self) -> usize {
        self.pipeline.refresh_all()
    }

    /// 该分区的核心索引版本高水位
    pub fn core_version(&self, partition: PartitionId) -> Option<String> {
        self.context.system(partition).map(|s| s.current_version())
    }

    /// 参与版本跟踪的引擎中最落后者；None = 没有引擎跟踪版本
    pub fn engine_progress(&self) -> Option<String> {
        self.engines.progress_version(&self.config.comparator)
    }

    /// facet 聚合便捷入口（跨 handler 查询走 reader 本身）
    pub fn facet_counts(&self, partition: PartitionId, facet: &str) -> Option<FacetCounts> {
        self.reader(partition)?.facet_counts(facet)
    }

    /// 关停：最终 flush 后把所有引擎驱动到 Stopped
    pub fn stop(&self) {
        self.pipeline.refresh_all();
        self.engines.stop_all();
        tracing::info!(node_id = self.config.node_id, "search node stopped");
    }
}
