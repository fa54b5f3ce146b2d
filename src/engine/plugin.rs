use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::core::{PartitionId, Schema, ShardingStrategy, VersionComparator};
use crate::engine::registry::PluginRegistry;
use crate::error::{NodeError, Result};
use crate::node::SearchContext;
use crate::reader::FacetHandler;
use crate::snapshot::RawSnapshot;

/// `init` 注入的上下文：索引目录、节点 id、schema、版本比较器、
/// 插件注册表（查找兄弟插件）、分片策略（判定分区归属）。
#[derive(Clone)]
pub struct EngineInit {
    pub index_dir: PathBuf,
    pub node_id: u32,
    pub schema: Arc<Schema>,
    pub comparator: VersionComparator,
    pub registry: Arc<PluginRegistry>,
    pub sharding: Arc<dyn ShardingStrategy>,
}

/// 可插拔搜索引擎契约。
///
/// 第三方引擎实现本 trait 即可挂载到节点的 ingestion 与查询链路，
/// 无需编译进核心索引器。所有可选方法都有显式默认行为。
///
/// ## 生命周期
/// Uninitialized → Initialized → Started → Stopped（终态）。
/// 状态迁移由 [`EngineHandle`] 统一执行，实现方只需响应回调。
pub trait PluggableEngine: Send + Sync {
    /// 注册名（进程内稳定，作为 registry key）
    fn name(&self) -> &str;

    /// 初始化回调：每实例恰好一次
    fn init(&self, args: EngineInit) -> Result<()>;

    /// 节点核心搜索上下文就绪后调用；之后引擎才可对自己的存储提供查询
    fn start(&self, core: Arc<SearchContext>) -> Result<()>;

    /// 释放全部资源。上游初始化失败时可能没有配对的 start，
    /// 实现必须容忍从任意非终态直接 stop。
    fn stop(&self) -> Result<()>;

    /// 每条 ingestion 事件调用一次（引擎在此写入自己的存储）。
    ///
    /// 返回要进核心索引的事件（可变换），或 `{"type":"skip"}` 哨兵
    /// 表示事件已被本引擎完全吸收、核心索引必须跳过。
    /// 同一引擎的调用按 ingestion 顺序串行。
    fn accept_event(&self, event: Value, version: &str) -> Result<Value>;

    /// true：无视本地分区归属，接收所有分区的事件（单一非分片索引的引擎用）
    fn accept_events_for_all_partitions(&self) -> bool {
        false
    }

    /// 本引擎独占的 schema 字段名：核心 schema/query 层必须跳过，避免重复注册
    fn field_names(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// 本引擎独占的 facet 名
    fn facet_names(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// decoration setup 时调用一次；返回的 handler 并入所有 DecoratedReader 的能力集
    fn create_facet_handlers(&self) -> Vec<Arc<dyn FacetHandler>> {
        Vec::new()
    }

    /// 核心索引器标记删除时回调，把删除传播进引擎自己的带外存储。
    /// 零个或多个 uid 一次传入；零个时必须无副作用。
    fn on_delete(&self, _reader: &RawSnapshot, _uids: &[u64]) -> Result<()> {
        Ok(())
    }

    /// 本引擎已持久吸收的最高版本 token；None = 不参与版本跟踪，
    /// 节点计算整体 readiness 时不等待本引擎。
    fn version(&self) -> Option<String> {
        None
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
}

/// 注册引擎的运行时包装：状态机 + 每引擎 accept 串行门 + 故障计数。
///
/// 生命周期误用（重复 init、未 init 先 start）按 engine fault 上报，
/// 由调用方隔离处理，不传染其他引擎。
pub struct EngineHandle {
    engine: Arc<dyn PluggableEngine>,
    state: Mutex<EngineState>,
    accept_gate: Mutex<()>,
    /// 显式指定的服务分区（空 = 跟随节点自有分区）
    designated: BTreeSet<PartitionId>,
    faults: AtomicU64,
}

impl EngineHandle {
    pub fn new(engine: Arc<dyn PluggableEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            state: Mutex::new(EngineState::Uninitialized),
            accept_gate: Mutex::new(()),
            designated: BTreeSet::new(),
            faults: AtomicU64::new(0),
        })
    }

    /// 指定引擎只服务给定分区（默认为节点自有的全部分区）
    pub fn with_partitions(
        engine: Arc<dyn PluggableEngine>,
        partitions: impl IntoIterator<Item = PartitionId>,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine,
            state: Mutex::new(EngineState::Uninitialized),
            accept_gate: Mutex::new(()),
            designated: partitions.into_iter().collect(),
            faults: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    /// 底层引擎实现（注册表登记用）
    pub fn plugin(&self) -> Arc<dyn PluggableEngine> {
        self.engine.clone()
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub fn fault_count(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    pub(crate) fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    /// 引擎当前是否参与 ingestion/decoration（init 成功且未停止）
    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            EngineState::Initialized | EngineState::Started
        )
    }

    /// 本引擎是否接收该分区的事件
    pub fn accepts_partition(
        &self,
        partition: PartitionId,
        node_partitions: &BTreeSet<PartitionId>,
    ) -> bool {
        if self.engine.accept_events_for_all_partitions() {
            return true;
        }
        if self.designated.is_empty() {
            node_partitions.contains(&partition)
        } else {
            self.designated.contains(&partition)
        }
    }

    pub fn init(&self, args: EngineInit) -> Result<()> {
        let mut state = self.state.lock();
        if *state != EngineState::Uninitialized {
            self.record_fault();
            return Err(NodeError::engine_fault(
                self.name(),
                format!("init called twice (state {:?})", *state),
            ));
        }
        self.engine.init(args).inspect_err(|_| self.record_fault())?;
        *state = EngineState::Initialized;
        tracing::info!(engine = self.name(), "engine initialized");
        Ok(())
    }

    pub fn start(&self, core: Arc<SearchContext>) -> Result<()> {
        let mut state = self.state.lock();
        if *state != EngineState::Initialized {
            self.record_fault();
            return Err(NodeError::engine_fault(
                self.name(),
                format!("start from state {:?}", *state),
            ));
        }
        self.engine.start(core).inspect_err(|_| self.record_fault())?;
        *state = EngineState::Started;
        tracing::info!(engine = self.name(), "engine started");
        Ok(())
    }

    /// 任意非终态可 stop；到达 Stopped 后幂等
    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state == EngineState::Stopped {
            return Ok(());
        }
        let r = self.engine.stop().inspect_err(|_| self.record_fault());
        *state = EngineState::Stopped;
        tracing::info!(engine = self.name(), "engine stopped");
        r
    }

    /// 按 ingestion 顺序串行执行 accept_event
    pub fn accept(&self, event: Value, version: &str) -> Result<Value> {
        if !self.is_active() {
            self.record_fault();
            return Err(NodeError::engine_fault(
                self.name(),
                format!("accept_event in state {:?}", self.state()),
            ));
        }
        let _g = self.accept_gate.lock();
        self.engine
            .accept_event(event, version)
            .inspect_err(|_| self.record_fault())
    }

    pub fn on_delete(&self, reader: &RawSnapshot, uids: &[u64]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }
        self.engine
            .on_delete(reader, uids)
            .inspect_err(|_| self.record_fault())
    }

    pub fn field_names(&self) -> BTreeSet<String> {
        self.engine.field_names()
    }

    pub fn facet_names(&self) -> BTreeSet<String> {
        self.engine.facet_names()
    }

    pub fn create_facet_handlers(&self) -> Vec<Arc<dyn FacetHandler>> {
        self.engine.create_facet_handlers()
    }

    pub fn version(&self) -> Option<String> {
        self.engine.version()
    }
}
