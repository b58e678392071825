//! 配置管理模块
//!
//! 节点描述符与锁管理器参数，提供 Default 默认值与链式覆盖方法。

use std::time::Duration;

use serde::Deserialize;

/// 单个 Redis 节点描述符
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    /// AUTH 密码，可选
    pub password: Option<String>,
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// 节点身份标识，用于去重校验和日志
    pub fn identity(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 构造 redis crate 可识别的连接 URL
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/", password, self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }
}

/// 锁管理器配置
///
/// 默认值沿用经典 RedLock 参数：租约 30 秒、最多重试 200 次、
/// 固定退避 100 毫秒、节点连接超时 50 毫秒。
#[derive(Debug, Clone, Deserialize)]
pub struct RedlockConfig {
    /// 被保护资源的 key，所有竞争方共用同一个 key
    pub resource_key: String,
    /// 锁的租约时长（TTL），到期后锁在节点侧自动过期
    #[serde(with = "duration_millis")]
    pub lease: Duration,
    /// 获取锁的最大尝试次数
    pub retry_count: u32,
    /// 两次尝试之间的固定退避时间
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,
    /// 单个节点的连接超时时间
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
}

impl Default for RedlockConfig {
    /// 默认配置：资源 key "default"，租约 30 秒、重试 200 次、
    /// 退避 100 毫秒、连接超时 50 毫秒
    fn default() -> Self {
        Self {
            resource_key: "default".to_string(),
            lease: Duration::from_millis(30_000),
            retry_count: 200,
            retry_delay: Duration::from_millis(100),
            connect_timeout: Duration::from_millis(50),
        }
    }
}

impl RedlockConfig {
    pub fn new(resource_key: impl Into<String>) -> Self {
        Self {
            resource_key: resource_key.into(),
            ..Default::default()
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

/// Duration 以毫秒整数反序列化
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_identity_and_url() {
        let node = NodeConfig::new("127.0.0.1", 6391);
        assert_eq!(node.identity(), "127.0.0.1:6391");
        assert_eq!(node.url(), "redis://127.0.0.1:6391/");

        let node = node.with_password("88888888");
        assert_eq!(node.url(), "redis://:88888888@127.0.0.1:6391/");
    }

    #[test]
    fn test_default_impl() {
        let config = RedlockConfig::default();
        assert_eq!(config.resource_key, "default");
        assert_eq!(config.lease, Duration::from_millis(30_000));
        assert_eq!(config.retry_count, 200);
    }

    #[test]
    fn test_default_lock_config() {
        let config = RedlockConfig::new("my_distributed_lock");
        assert_eq!(config.resource_key, "my_distributed_lock");
        assert_eq!(config.lease, Duration::from_millis(30_000));
        assert_eq!(config.retry_count, 200);
        assert_eq!(config.retry_delay, Duration::from_millis(100));
        assert_eq!(config.connect_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_builder_overrides() {
        let config = RedlockConfig::new("job")
            .with_lease(Duration::from_secs(5))
            .with_retry_count(3)
            .with_retry_delay(Duration::from_millis(10));
        assert_eq!(config.lease, Duration::from_secs(5));
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(10));
    }
}
