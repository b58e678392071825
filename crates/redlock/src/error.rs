//! 统一错误处理模块
//!
//! 定义锁库的所有错误类型，使用 thiserror 提供良好的错误信息。
//! 注意：普通的锁竞争不是错误——`lock()` 返回 false。

use thiserror::Error;

/// 锁库错误类型
#[derive(Debug, Error)]
pub enum RedlockError {
    // ==================== 配置错误（构造期，无残留状态） ====================
    #[error("Redis 节点重复: {identity}")]
    DuplicateNode { identity: String },

    #[error("Redis 节点数必须为奇数，当前为 {count}")]
    EvenNodeCount { count: usize },

    // ==================== 多数派错误（构造期） ====================
    #[error("成功连接的 Redis 节点数不足多数派: 已连接 {connected}, 需要 {quorum}")]
    QuorumUnavailable { connected: usize, quorum: usize },

    // ==================== 传输错误 ====================
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, RedlockError>;

impl RedlockError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateNode { .. } => "DUPLICATE_NODE",
            Self::EvenNodeCount { .. } => "EVEN_NODE_COUNT",
            Self::QuorumUnavailable { .. } => "QUORUM_UNAVAILABLE",
            Self::Redis(_) => "REDIS_ERROR",
        }
    }

    /// 是否为构造期的配置错误（节点列表本身不合法）
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateNode { .. } | Self::EvenNodeCount { .. }
        )
    }
}
