use std::path::PathBuf;

/// 错误分级：
/// - Configuration / OwnershipConflict：setup 阶段致命，节点启动必须失败
/// - Decoration / EngineFault：调用点可恢复，不允许打断 ingest/query 链路
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// 索引目录缺失：部署/配置问题，对应分区启动失败
    #[error("index directory not found: {0}")]
    IndexDirNotFound(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    /// 同名 field/facet 被多个 owner 声明（engine/engine 或 engine/core schema）
    #[error("ownership conflict: {namespace} '{name}' claimed by both '{first}' and '{second}'")]
    OwnershipConflict {
        namespace: &'static str,
        name: String,
        first: String,
        second: String,
    },

    /// redecorate 无法 rebind 到新快照；旧 reader 失败后不可继续使用
    #[error("reader decoration failed")]
    Decoration(#[source] std::io::Error),

    /// 单个 engine 调用失败：按 engine 隔离，不传染其他 engine 或核心索引
    #[error("engine '{engine}' fault: {reason}")]
    EngineFault { engine: String, reason: String },

    /// 事件数据不合约定（缺 uid / 非 object 等）：丢弃该事件并告警
    #[error("event rejected: {0}")]
    EventRejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NodeError {
    pub fn engine_fault(engine: impl Into<String>, reason: impl ToString) -> Self {
        Self::EngineFault {
            engine: engine.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decoration(reason: impl ToString) -> Self {
        Self::Decoration(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            reason.to_string(),
        ))
    }

    /// setup 阶段是否致命（节点初始化必须中止）
    pub fn is_fatal_at_setup(&self) -> bool {
        matches!(
            self,
            Self::IndexDirNotFound(_) | Self::Config(_) | Self::OwnershipConflict { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
