//! Redis 节点客户端
//!
//! 定义锁管理器依赖的最小节点操作集合（NodeClient trait），并提供基于
//! redis crate 多路复用异步连接的默认实现。锁的正确性只依赖 trait 契约，
//! 测试中可以用内存 Mock 替换真实节点。

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use tracing::debug;

use crate::config::NodeConfig;
use crate::error::Result;

/// "比较 token 再删除" 的 Lua 脚本
///
/// 必须在节点侧单条原子执行：先 GET 再 DEL 两次往返之间租约可能到期、
/// 锁被其他持有者抢走，非原子实现会误删别人的锁。
const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end"#;

/// 单个键值存储节点的操作契约
///
/// `set_nx_px` 与 `compare_and_delete` 都要求节点侧原子执行。
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// 节点身份标识（host:port 或注入实例自带的标识）
    fn identity(&self) -> &str;

    /// 读取 key 当前的值，key 不存在时返回 None
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 仅当 key 不存在时写入 value 并设置毫秒级 TTL，返回是否写入成功
    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// 原子地比较 key 的值与 expected，相等则删除；返回是否实际删除
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    /// 关闭连接，只应在管理器显式销毁时调用
    async fn close(&self);
}

/// 基于 redis crate 的节点实现
///
/// 多路复用连接可廉价克隆，每次操作克隆一份避免 &mut self。
pub struct RedisNode {
    identity: String,
    conn: MultiplexedConnection,
    cad_script: Script,
}

impl RedisNode {
    /// 连接单个节点并完成认证（密码通过 URL 传入）
    ///
    /// 连接超时由调用方（NodePool）通过 tokio::time::timeout 控制。
    pub async fn connect(config: &NodeConfig) -> Result<Self> {
        let client = Client::open(config.url().as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        debug!(node = %config.identity(), "Redis 节点连接成功");
        Ok(Self {
            identity: config.identity(),
            conn,
            cad_script: Script::new(COMPARE_AND_DELETE_SCRIPT),
        })
    }
}

#[async_trait]
impl NodeClient for RedisNode {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .cad_script
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn close(&self) {
        // 多路复用连接在最后一个克隆释放时关闭底层 socket，
        // 此处仅记录显式关闭事件。
        debug!(node = %self.identity, "Redis 节点连接关闭");
    }
}
