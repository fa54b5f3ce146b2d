use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::core::event::is_skip;
use crate::core::{PartitionId, Schema, VersionComparator};
use crate::engine::plugin::{EngineHandle, EngineInit, PluggableEngine};
use crate::error::{NodeError, Result};
use crate::node::SearchContext;
use crate::reader::FacetHandler;
use crate::snapshot::RawSnapshot;

/// 进程内插件注册表：引擎通过它查找兄弟插件。
#[derive(Default)]
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<String, Arc<dyn PluggableEngine>>>,
}

impl PluginRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, engine: Arc<dyn PluggableEngine>) {
        self.plugins
            .write()
            .insert(engine.name().to_string(), engine);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PluggableEngine>> {
        self.plugins.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.read().keys().cloned().collect()
    }
}

/// 节点持有的全部注册引擎，按同一套契约驱动。
///
/// ## 故障隔离
/// 单个引擎的生命周期/事件回调失败只记账并告警，该引擎对本次操作的
/// 贡献视为缺席；核心索引与其他引擎照常推进。
pub struct EngineSet {
    handles: Vec<Arc<EngineHandle>>,
    registry: Arc<PluginRegistry>,
    node_partitions: BTreeSet<PartitionId>,
}

impl EngineSet {
    pub fn new(
        handles: Vec<Arc<EngineHandle>>,
        node_partitions: BTreeSet<PartitionId>,
    ) -> Self {
        let registry = PluginRegistry::new();
        for h in &handles {
            registry.register(h.plugin());
        }
        Self {
            handles,
            registry,
            node_partitions,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn handles(&self) -> &[Arc<EngineHandle>] {
        &self.handles
    }

    pub fn node_partitions(&self) -> &BTreeSet<PartitionId> {
        &self.node_partitions
    }

    pub fn total_faults(&self) -> u64 {
        self.handles.iter().map(|h| h.fault_count()).sum()
    }

    /// 所有权校验：field 与 facet 各自是独立命名空间；任一名字被两个
    /// owner（engine/engine 或 engine/core schema）声明即 setup 期致命。
    pub fn validate_ownership(&self, schema: &Schema) -> Result<()> {
        let mut field_owner: BTreeMap<String, String> = schema
            .fields
            .iter()
            .map(|f| (f.clone(), "core".to_string()))
            .collect();
        let mut facet_owner: BTreeMap<String, String> = schema
            .facets
            .iter()
            .map(|f| (f.clone(), "core".to_string()))
            .collect();

        for h in &self.handles {
            for name in h.field_names() {
                if let Some(first) = field_owner.get(&name) {
                    return Err(NodeError::OwnershipConflict {
                        namespace: "field",
                        name,
                        first: first.clone(),
                        second: h.name().to_string(),
                    });
                }
                field_owner.insert(name, h.name().to_string());
            }
            for name in h.facet_names() {
                if let Some(first) = facet_owner.get(&name) {
                    return Err(NodeError::OwnershipConflict {
                        namespace: "facet",
                        name,
                        first: first.clone(),
                        second: h.name().to_string(),
                    });
                }
                facet_owner.insert(name, h.name().to_string());
            }
        }
        Ok(())
    }

    /// init 扇出。失败的引擎保持 Uninitialized（贡献缺席），不阻断其余引擎。
    pub fn init_all(&self, args: &EngineInit) {
        for h in &self.handles {
            if let Err(e) = h.init(args.clone()) {
                tracing::warn!(engine = h.name(), error = %e, "engine init failed, disabled");
            }
        }
    }

    pub fn start_all(&self, core: &Arc<SearchContext>) {
        for h in &self.handles {
            if !h.is_active() {
                continue;
            }
            if let Err(e) = h.start(core.clone()) {
                tracing::warn!(engine = h.name(), error = %e, "engine start failed");
            }
        }
    }

    /// stop 扇出：无论既往状态/故障，每个引擎都会被驱动到 Stopped
    pub fn stop_all(&self) {
        for h in &self.handles {
            if let Err(e) = h.stop() {
                tracing::warn!(engine = h.name(), error = %e, "engine stop failed");
            }
        }
    }

    /// 把事件按注册顺序链式提供给接收该分区的引擎。
    ///
    /// 返回 None 表示某个引擎吸收了事件（skip 哨兵）：核心索引必须跳过，
    /// 剩余链路短路。单引擎失败被隔离：事件以未变换形态继续传递。
    pub fn offer(
        &self,
        partition: PartitionId,
        body: Value,
        version: &str,
    ) -> Option<Value> {
        let mut current = body;
        for h in &self.handles {
            if !h.is_active() || !h.accepts_partition(partition, &self.node_partitions) {
                continue;
            }
            match h.accept(current.clone(), version) {
                Ok(out) => {
                    if is_skip(&out) {
                        tracing::debug!(
                            engine = h.name(),
                            partition,
                            version,
                            "event absorbed by engine"
                        );
                        return None;
                    }
                    current = out;
                }
                Err(e) => {
                    tracing::warn!(
                        engine = h.name(),
                        partition,
                        error = %e,
                        "accept_event fault isolated, passing event through"
                    );
                }
            }
        }
        Some(current)
    }

    /// decoration setup：合并所有活跃引擎贡献的 facet handler（注册顺序）
    pub fn collect_facet_handlers(&self) -> Vec<Arc<dyn FacetHandler>> {
        self.handles
            .iter()
            .filter(|h| h.is_active())
            .flat_map(|h| h.create_facet_handlers())
            .collect()
    }

    /// 删除扇出：零 uid 无副作用；单引擎失败隔离。
    /// 分区过滤与 offer 一致：引擎只看到自己接收分区的删除。
    pub fn on_delete(&self, reader: &RawSnapshot, uids: &[u64]) {
        if uids.is_empty() {
            return;
        }
        for h in &self.handles {
            if !h.is_active()
                || !h.accepts_partition(reader.partition(), &self.node_partitions)
            {
                continue;
            }
            if let Err(e) = h.on_delete(reader, uids) {
                tracing::warn!(engine = h.name(), error = %e, "on_delete fault isolated");
            }
        }
    }

    /// 节点整体 readiness 高水位：跟踪版本的引擎中最小者。
    /// 全部 opt-out（None）时返回 None，节点不等待任何引擎。
    pub fn progress_version(&self, cmp: &VersionComparator) -> Option<String> {
        self.handles
            .iter()
            .filter(|h| h.is_active())
            .filter_map(|h| h.version())
            .min_by(|a, b| cmp(a, b))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::event::skip_sentinel;
    use crate::core::{numeric_comparator, ModShard};
    use crate::engine::plugin::EngineState;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::path::PathBuf;

    /// 记录收到的事件版本；可配置 skip/fault 行为
    pub(crate) struct ProbeEngine {
        name: String,
        pub seen: Mutex<Vec<String>>,
        pub deleted: Mutex<Vec<u64>>,
        all_partitions: bool,
        skip_all: bool,
        fail_accept: bool,
        untracked: bool,
        fields: BTreeSet<String>,
        version: Mutex<Option<String>>,
    }

    impl ProbeEngine {
        pub(crate) fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
                seen: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
                all_partitions: false,
                skip_all: false,
                fail_accept: false,
                untracked: false,
                fields: BTreeSet::new(),
                version: Mutex::new(None),
            }
        }

        pub(crate) fn all_partitions(mut self) -> Self {
            self.all_partitions = true;
            self
        }

        pub(crate) fn skipping(mut self) -> Self {
            self.skip_all = true;
            self
        }

        pub(crate) fn faulty(mut self) -> Self {
            self.fail_accept = true;
            self
        }

        /// 无条件退出版本跟踪（version() 恒为 None）
        pub(crate) fn untracked(mut self) -> Self {
            self.untracked = true;
            self
        }

        pub(crate) fn owning_field(mut self, f: &str) -> Self {
            self.fields.insert(f.to_string());
            self
        }
    }

    impl PluggableEngine for ProbeEngine {
        fn name(&self) -> &str {
            &self.name
        }

        fn init(&self, _args: EngineInit) -> Result<()> {
            Ok(())
        }

        fn start(&self, _core: Arc<SearchContext>) -> Result<()> {
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            Ok(())
        }

        fn accept_event(&self, event: Value, version: &str) -> Result<Value> {
            if self.fail_accept {
                return Err(NodeError::engine_fault(&self.name, "injected fault"));
            }
            self.seen.lock().push(version.to_string());
            *self.version.lock() = Some(version.to_string());
            if self.skip_all {
                return Ok(skip_sentinel());
            }
            Ok(event)
        }

        fn accept_events_for_all_partitions(&self) -> bool {
            self.all_partitions
        }

        fn field_names(&self) -> BTreeSet<String> {
            self.fields.clone()
        }

        fn on_delete(&self, _reader: &RawSnapshot, uids: &[u64]) -> Result<()> {
            self.deleted.lock().extend_from_slice(uids);
            Ok(())
        }

        fn version(&self) -> Option<String> {
            if self.untracked {
                return None;
            }
            self.version.lock().clone()
        }
    }

    pub(crate) fn init_args() -> EngineInit {
        EngineInit {
            index_dir: PathBuf::from("/tmp"),
            node_id: 1,
            schema: Arc::new(Schema::default()),
            comparator: numeric_comparator(),
            registry: PluginRegistry::new(),
            sharding: Arc::new(ModShard::new(3)),
        }
    }

    fn set_of(handles: Vec<Arc<EngineHandle>>) -> EngineSet {
        let set = EngineSet::new(handles, [0u32, 1, 2].into_iter().collect());
        set.init_all(&init_args());
        set
    }

    #[test]
    fn ownership_conflict_with_core_schema_is_rejected() {
        // 场景：engine 声明字段 activityCount，核心 schema 也定义了它
        let schema = Schema::new("uid").with_field("activityCount");
        let e = EngineHandle::new(Arc::new(
            ProbeEngine::named("activity").owning_field("activityCount"),
        ));
        let set = EngineSet::new(vec![e], BTreeSet::new());

        let err = set.validate_ownership(&schema).unwrap_err();
        match err {
            NodeError::OwnershipConflict { namespace, name, first, second } => {
                assert_eq!(namespace, "field");
                assert_eq!(name, "activityCount");
                assert_eq!(first, "core");
                assert_eq!(second, "activity");
            }
            other => panic!("expected ownership conflict, got {other:?}"),
        }
        assert!(err_is_fatal(&set, &schema));
    }

    fn err_is_fatal(set: &EngineSet, schema: &Schema) -> bool {
        set.validate_ownership(schema)
            .unwrap_err()
            .is_fatal_at_setup()
    }

    #[test]
    fn ownership_conflict_between_engines_is_rejected() {
        let a = EngineHandle::new(Arc::new(ProbeEngine::named("a").owning_field("x")));
        let b = EngineHandle::new(Arc::new(ProbeEngine::named("b").owning_field("x")));
        let set = EngineSet::new(vec![a, b], BTreeSet::new());
        assert!(matches!(
            set.validate_ownership(&Schema::default()),
            Err(NodeError::OwnershipConflict { .. })
        ));
    }

    #[test]
    fn disjoint_ownership_passes() {
        let schema = Schema::new("uid").with_facet("color");
        let e = EngineHandle::new(Arc::new(
            ProbeEngine::named("activity").owning_field("activityCount"),
        ));
        let set = EngineSet::new(vec![e], BTreeSet::new());
        set.validate_ownership(&schema).unwrap();
    }

    #[test]
    fn all_partitions_engine_sees_foreign_partition_events() {
        // 场景：引擎指定分区 0 但 accept_all=true，节点拥有 {0,1,2}，
        // 发往分区 2 的事件仍要提供给它
        let probe = Arc::new(ProbeEngine::named("global").all_partitions());
        let h = EngineHandle::with_partitions(probe.clone() as Arc<dyn PluggableEngine>, [0]);
        let set = set_of(vec![h]);

        let out = set.offer(2, json!({"uid": 2}), "1");
        assert!(out.is_some());
        assert_eq!(probe.seen.lock().len(), 1);
    }

    #[test]
    fn partition_scoped_engine_ignores_foreign_partitions() {
        let probe = Arc::new(ProbeEngine::named("local"));
        let h = EngineHandle::with_partitions(probe.clone() as Arc<dyn PluggableEngine>, [0]);
        let set = set_of(vec![h]);

        assert!(set.offer(2, json!({"uid": 2}), "1").is_some());
        assert!(probe.seen.lock().is_empty());

        set.offer(0, json!({"uid": 0}), "2");
        assert_eq!(probe.seen.lock().len(), 1);
    }

    #[test]
    fn skip_sentinel_short_circuits_chain_and_core() {
        let skipper = EngineHandle::new(Arc::new(ProbeEngine::named("skipper").skipping()));
        let later = Arc::new(ProbeEngine::named("later"));
        let set = set_of(vec![
            skipper,
            EngineHandle::new(later.clone() as Arc<dyn PluggableEngine>),
        ]);

        // None = 核心必须跳过该事件
        assert!(set.offer(0, json!({"uid": 3}), "1").is_none());
        // 链路短路：后续引擎没收到
        assert!(later.seen.lock().is_empty());
    }

    #[test]
    fn engine_fault_is_isolated_and_counted() {
        let faulty = EngineHandle::new(Arc::new(ProbeEngine::named("bad").faulty()));
        let good = Arc::new(ProbeEngine::named("good"));
        let set = set_of(vec![
            faulty.clone(),
            EngineHandle::new(good.clone() as Arc<dyn PluggableEngine>),
        ]);

        // 故障引擎不阻断：事件原样继续，核心仍然索引
        let out = set.offer(0, json!({"uid": 3, "k": "v"}), "1");
        assert_eq!(out.unwrap(), json!({"uid": 3, "k": "v"}));
        assert_eq!(good.seen.lock().len(), 1);
        assert_eq!(faulty.fault_count(), 1);
    }

    #[test]
    fn on_delete_zero_uids_is_a_noop() {
        let probe = Arc::new(ProbeEngine::named("p"));
        let set = set_of(vec![EngineHandle::new(probe.clone() as Arc<dyn PluggableEngine>)]);

        let snap = RawSnapshot::empty(0, "0");
        set.on_delete(&snap, &[]);
        assert!(probe.deleted.lock().is_empty());

        set.on_delete(&snap, &[7, 8]);
        assert_eq!(*probe.deleted.lock(), vec![7, 8]);
    }

    #[test]
    fn on_delete_respects_engine_partition_scoping() {
        let local = Arc::new(ProbeEngine::named("local"));
        let global = Arc::new(ProbeEngine::named("global").all_partitions());
        let set = set_of(vec![
            EngineHandle::with_partitions(local.clone() as Arc<dyn PluggableEngine>, [0]),
            EngineHandle::new(global.clone() as Arc<dyn PluggableEngine>),
        ]);

        // 分区 1 的删除：指定分区 0 的引擎不可见，all-partitions 引擎可见
        let foreign = RawSnapshot::empty(1, "1");
        set.on_delete(&foreign, &[7]);
        assert!(local.deleted.lock().is_empty());
        assert_eq!(*global.deleted.lock(), vec![7]);

        let owned = RawSnapshot::empty(0, "2");
        set.on_delete(&owned, &[8]);
        assert_eq!(*local.deleted.lock(), vec![8]);
    }

    #[test]
    fn progress_version_is_minimum_over_tracking_engines() {
        let a = Arc::new(ProbeEngine::named("a"));
        let b = Arc::new(ProbeEngine::named("b"));
        // 无条件 opt-out：见过事件也不参与版本跟踪，不拖 readiness
        let opt_out = Arc::new(ProbeEngine::named("c").untracked());
        let set = set_of(vec![
            EngineHandle::new(a.clone() as Arc<dyn PluggableEngine>),
            EngineHandle::new(b.clone() as Arc<dyn PluggableEngine>),
            EngineHandle::new(opt_out.clone() as Arc<dyn PluggableEngine>),
        ]);

        let cmp = numeric_comparator();
        assert_eq!(set.progress_version(&cmp), None);

        set.offer(0, json!({"uid": 1}), "10");
        assert_eq!(opt_out.seen.lock().len(), 1);
        // b 落后：只喂到 9
        *b.version.lock() = Some("9".to_string());
        assert_eq!(set.progress_version(&cmp), Some("9".to_string()));
    }

    #[test]
    fn lifecycle_state_machine_is_enforced() {
        let h = EngineHandle::new(Arc::new(ProbeEngine::named("lc")));
        // start 前必须 init
        assert!(matches!(
            h.start(Arc::new(SearchContext::empty(1))),
            Err(NodeError::EngineFault { .. })
        ));

        h.init(init_args()).unwrap();
        assert_eq!(h.state(), EngineState::Initialized);
        // 重复 init 是 fault
        assert!(h.init(init_args()).is_err());

        h.start(Arc::new(SearchContext::empty(1))).unwrap();
        assert_eq!(h.state(), EngineState::Started);

        h.stop().unwrap();
        assert_eq!(h.state(), EngineState::Stopped);
        // 终态幂等
        h.stop().unwrap();
    }

    #[test]
    fn stop_is_tolerated_from_any_non_terminal_state() {
        // 上游初始化失败：没有配对的 start
        let h = EngineHandle::new(Arc::new(ProbeEngine::named("s")));
        h.stop().unwrap();
        assert_eq!(h.state(), EngineState::Stopped);

        let h2 = EngineHandle::new(Arc::new(ProbeEngine::named("s2")));
        h2.init(init_args()).unwrap();
        h2.stop().unwrap();
        assert_eq!(h2.state(), EngineState::Stopped);
    }
}
