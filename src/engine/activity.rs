use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::event::skip_sentinel;
use crate::core::version::max_version;
use crate::core::VersionComparator;
use crate::engine::plugin::{EngineInit, PluggableEngine};
use crate::error::{NodeError, Result};
use crate::node::SearchContext;
use crate::reader::{FacetCounts, FacetHandler};
use crate::snapshot::RawSnapshot;

pub const ACTIVITY_FIELD: &str = "activityCount";
/// 纯活动更新事件的 type 值：被本引擎完全吸收，核心索引跳过
pub const ACTIVITY_EVENT_TYPE: &str = "activity-update";

const STORE_FILE: &str = "activity.bin";

/// 落盘格式：计数表和已吸收版本一起持久化，二者永远一致
#[derive(Serialize, Deserialize)]
struct PersistedActivity {
    counts: HashMap<u64, i64>,
    version: Option<String>,
}

struct ActivityState {
    uid_field: String,
    comparator: Option<VersionComparator>,
    store_path: Option<PathBuf>,
    last_version: Option<String>,
}

/// 内置示例引擎：把每文档的活动计数搬出核心索引，存进自己的带外存储。
///
/// - 独占字段/facet `activityCount`：核心 schema/query 层不得再注册同名 handler。
/// - `accept_event`：纯活动更新（`{"type":"activity-update"}`）完全吸收并返回
///   skip 哨兵；混合事件剥离 activityCount 字段后把剩余部分交还核心索引。
/// - 存储：`DashMap<uid, count>`，每次接受更新后 bincode 落盘
///   （tmp + rename 原子替换），init 时回载。版本高水位随存储一起持久化，
///   `version()` 只报告已成功落盘的 token。
pub struct ActivityEngine {
    counts: Arc<DashMap<u64, i64>>,
    state: Mutex<ActivityState>,
}

impl Default for ActivityEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityEngine {
    pub fn new() -> Self {
        Self {
            counts: Arc::new(DashMap::new()),
            state: Mutex::new(ActivityState {
                uid_field: "uid".to_string(),
                comparator: None,
                store_path: None,
                last_version: None,
            }),
        }
    }

    /// 查询一个文档的活动计数（引擎自己的查询面）
    pub fn activity(&self, uid: u64) -> Option<i64> {
        self.counts.get(&uid).map(|v| *v)
    }

    pub fn tracked_docs(&self) -> usize {
        self.counts.len()
    }

    fn apply_value(&self, uid: u64, value: &Value) -> bool {
        match value {
            // 绝对值：直接覆盖
            Value::Number(n) => match n.as_i64() {
                Some(v) => {
                    self.counts.insert(uid, v);
                    true
                }
                None => false,
            },
            // "+N"：相对增量（activity 更新流的常见形态）
            Value::String(s) => match s.strip_prefix('+').and_then(|d| d.parse::<i64>().ok()) {
                Some(delta) => {
                    *self.counts.entry(uid).or_insert(0) += delta;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    fn load_store(&self, path: &PathBuf) -> Result<Option<String>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(path)?;
        let persisted: PersistedActivity = bincode::deserialize(&bytes)
            .map_err(|e| NodeError::engine_fault(ACTIVITY_FIELD, e))?;
        if !persisted.counts.is_empty() {
            tracing::info!(docs = persisted.counts.len(), "activity store reloaded");
        }
        for (uid, v) in persisted.counts {
            self.counts.insert(uid, v);
        }
        Ok(persisted.version)
    }

    fn persist_store(&self, path: &PathBuf, version: &Option<String>) -> Result<()> {
        let store = PersistedActivity {
            counts: self
                .counts
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect(),
            version: version.clone(),
        };
        let bytes = bincode::serialize(&store)
            .map_err(|e| NodeError::engine_fault(ACTIVITY_FIELD, e))?;
        // tmp + rename 原子替换，崩溃时旧存储不受影响
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl PluggableEngine for ActivityEngine {
    fn name(&self) -> &str {
        "activity"
    }

    fn init(&self, args: EngineInit) -> Result<()> {
        let store_path = args.index_dir.join(STORE_FILE);
        let persisted_version = self.load_store(&store_path)?;

        let mut st = self.state.lock();
        st.uid_field = args.schema.uid_field.clone();
        st.comparator = Some(args.comparator.clone());
        st.store_path = Some(store_path);
        st.last_version = persisted_version;
        Ok(())
    }

    fn start(&self, _core: Arc<SearchContext>) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let (path, version) = {
            let st = self.state.lock();
            (st.store_path.clone(), st.last_version.clone())
        };
        if let Some(path) = path {
            self.persist_store(&path, &version)?;
            tracing::info!(docs = self.counts.len(), "activity store persisted");
        }
        Ok(())
    }

    fn accept_event(&self, event: Value, version: &str) -> Result<Value> {
        let (uid_field, cmp) = {
            let st = self.state.lock();
            (st.uid_field.clone(), st.comparator.clone())
        };

        let Some(uid) = event.get(&uid_field).and_then(Value::as_u64) else {
            return Ok(event);
        };
        let Some(value) = event.get(ACTIVITY_FIELD) else {
            return Ok(event);
        };

        if !self.apply_value(uid, value) {
            return Err(NodeError::engine_fault(
                self.name(),
                format!("unparsable {ACTIVITY_FIELD} value for uid {uid}: {value}"),
            ));
        }

        // 版本只在存储落盘成功后推进：version() 的承诺是"已持久吸收"
        let (store_path, next_version) = {
            let st = self.state.lock();
            let next = match &cmp {
                Some(cmp) => max_version(
                    cmp,
                    st.last_version.clone(),
                    Some(version.to_string()),
                ),
                None => st.last_version.clone(),
            };
            (st.store_path.clone(), next)
        };
        if let Some(path) = &store_path {
            self.persist_store(path, &next_version)?;
        }
        self.state.lock().last_version = next_version;

        let is_pure_update =
            event.get("type").and_then(Value::as_str) == Some(ACTIVITY_EVENT_TYPE);
        if is_pure_update {
            // 完全吸收：核心索引不需要看到这条事件
            return Ok(skip_sentinel());
        }

        // 混合事件：剥离本引擎独占的字段，剩余部分交还核心
        let mut stripped = event;
        if let Some(obj) = stripped.as_object_mut() {
            obj.remove(ACTIVITY_FIELD);
        }
        Ok(stripped)
    }

    fn field_names(&self) -> BTreeSet<String> {
        [ACTIVITY_FIELD.to_string()].into()
    }

    fn facet_names(&self) -> BTreeSet<String> {
        [ACTIVITY_FIELD.to_string()].into()
    }

    fn create_facet_handlers(&self) -> Vec<Arc<dyn FacetHandler>> {
        vec![Arc::new(ActivityFacetHandler {
            counts: self.counts.clone(),
        })]
    }

    fn on_delete(&self, _reader: &RawSnapshot, uids: &[u64]) -> Result<()> {
        for uid in uids {
            self.counts.remove(uid);
        }
        Ok(())
    }

    fn version(&self) -> Option<String> {
        self.state.lock().last_version.clone()
    }
}

/// activity 计数的分桶 facet：对快照内存活文档按数量级聚合
pub struct ActivityFacetHandler {
    counts: Arc<DashMap<u64, i64>>,
}

impl ActivityFacetHandler {
    fn bucket(count: i64) -> &'static str {
        match count {
            i64::MIN..=0 => "0",
            1..=9 => "1-9",
            10..=99 => "10-99",
            _ => "100+",
        }
    }
}

impl FacetHandler for ActivityFacetHandler {
    fn name(&self) -> &str {
        ACTIVITY_FIELD
    }

    fn count(&self, snapshot: &RawSnapshot) -> FacetCounts {
        let mut out = FacetCounts::new();
        for (uid, _) in snapshot.live_docs() {
            let count = self.counts.get(&uid).map(|v| *v).unwrap_or(0);
            *out.entry(Self::bucket(count).to_string()).or_insert(0) += 1;
        }
        out
    }
}
