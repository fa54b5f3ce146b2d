use std::sync::Arc;

use arc_swap::ArcSwap;
use rayon::prelude::*;
use serde_json::Value;

use crate::error::{NodeError, Result};
use crate::reader::facet::{FacetCounts, FacetHandler, RuntimeFacetHandlerFactory};
use crate::snapshot::RawSnapshot;

/// 已装饰的 reader：raw 快照 + facet 能力集。
///
/// 快照引用是显式的可更新间接层（ArcSwap）：redecorate 只替换内部快照指针，
/// reader 身份不变（调用方可按 reader 身份做缓存 key）。handler/factory 集合
/// 由 decorator 配置持有并共享，跨每次装饰引用相等。
pub struct DecoratedReader {
    snapshot: ArcSwap<RawSnapshot>,
    facet_handlers: Arc<Vec<Arc<dyn FacetHandler>>>,
    runtime_factories: Arc<Vec<Arc<dyn RuntimeFacetHandlerFactory>>>,
}

impl DecoratedReader {
    /// 固定当前快照（查询期间持有，保证不被替换影响）
    pub fn snapshot(&self) -> Arc<RawSnapshot> {
        self.snapshot.load_full()
    }

    pub fn facet_handlers(&self) -> &Arc<Vec<Arc<dyn FacetHandler>>> {
        &self.facet_handlers
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn FacetHandler>> {
        self.facet_handlers
            .iter()
            .find(|h| h.name() == name)
            .cloned()
    }

    /// 按查询参数实例化 runtime handler
    pub fn runtime_handler(&self, name: &str, params: &Value) -> Option<Arc<dyn FacetHandler>> {
        self.runtime_factories
            .iter()
            .find(|f| f.name() == name)
            .map(|f| f.create(params))
    }

    /// 单个 facet 的计数（快照在整次计算内固定）
    pub fn facet_counts(&self, name: &str) -> Option<FacetCounts> {
        let snap = self.snapshot();
        self.handler(name).map(|h| h.count(&snap))
    }

    /// 全部 facet 的计数：handler 维度并行，所有 handler 看到同一快照
    pub fn all_facet_counts(&self) -> Vec<(String, FacetCounts)> {
        let snap = self.snapshot();
        self.facet_handlers
            .par_iter()
            .map(|h| (h.name().to_string(), h.count(&snap)))
            .collect()
    }
}

/// Reader 装饰协议。
///
/// decorate：从 raw 快照构造 facet-capable reader（配置期注册的能力，原样暴露）。
/// redecorate：把已有 reader rebind 到更新的快照——比从头 decorate 便宜，
/// 因为 handler 绑定不重建（NRT refresh 可达秒级频率）。
pub struct ReaderDecorator {
    facet_handlers: Arc<Vec<Arc<dyn FacetHandler>>>,
    runtime_factories: Arc<Vec<Arc<dyn RuntimeFacetHandlerFactory>>>,
}

impl ReaderDecorator {
    pub fn new(
        facet_handlers: Vec<Arc<dyn FacetHandler>>,
        runtime_factories: Vec<Arc<dyn RuntimeFacetHandlerFactory>>,
    ) -> Self {
        Self {
            facet_handlers: Arc::new(facet_handlers),
            runtime_factories: Arc::new(runtime_factories),
        }
    }

    pub fn handler_count(&self) -> usize {
        self.facet_handlers.len()
    }

    /// 无快照（空分区）时返回 None 而非失败
    pub fn decorate(&self, snapshot: Option<Arc<RawSnapshot>>) -> Option<Arc<DecoratedReader>> {
        let snapshot = snapshot?;
        Some(Arc::new(DecoratedReader {
            snapshot: ArcSwap::from(snapshot),
            facet_handlers: self.facet_handlers.clone(),
            runtime_factories: self.runtime_factories.clone(),
        }))
    }

    /// 就地 rebind 到新快照，返回同一 reader 身份。
    ///
    /// rebind 失败（新快照不属于该 reader 的分区：slot 被污染）按 I/O 失败类
    /// 上报；失败后调用方不得继续使用旧 reader（drop 并重建）。
    pub fn redecorate(
        &self,
        reader: &Arc<DecoratedReader>,
        new_snapshot: Arc<RawSnapshot>,
        with_deletes: bool,
    ) -> Result<Arc<DecoratedReader>> {
        let current = reader.snapshot.load();
        if current.partition() != new_snapshot.partition() {
            return Err(NodeError::decoration(format!(
                "rebind across partitions: reader holds {} but snapshot is {}",
                current.partition(),
                new_snapshot.partition()
            )));
        }
        if with_deletes && !new_snapshot.has_deletes() {
            tracing::debug!(
                partition = new_snapshot.partition(),
                "redecorate flagged with_deletes but snapshot carries none"
            );
        }
        reader.snapshot.store(new_snapshot);
        Ok(reader.clone())
    }
}
