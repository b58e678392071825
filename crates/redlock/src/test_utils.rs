//! 测试工具模块
//!
//! 提供无外部依赖的内存 Mock 节点和测试辅助函数：带 TTL 语义的单键槽位、
//! 按操作类型的调用计数器，以及可配置的拒绝/故障/延迟注入，
//! 用于验证锁算法的调用次数与回滚行为。

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::RedlockConfig;
use crate::error::{RedlockError, Result};
use crate::node::NodeClient;
use crate::token::TokenSource;

// ==================== Mock 节点 ====================

/// 槽位：值 + 过期时刻
struct Slot {
    value: String,
    expires_at: Instant,
}

struct MockNodeInner {
    slot: Mutex<Option<Slot>>,
    get_calls: AtomicU32,
    set_nx_calls: AtomicU32,
    cad_calls: AtomicU32,
    close_calls: AtomicU32,
    reject_set_nx: AtomicBool,
    fail_set_nx: AtomicBool,
    fail_cad: AtomicBool,
    /// set_nx 前注入的延迟（毫秒），用于模拟慢节点
    set_nx_delay_ms: AtomicU32,
}

/// 内存 Mock 节点
///
/// Clone 共享同一份内部状态，便于测试方保留句柄做断言。
#[derive(Clone)]
pub struct MockNode {
    identity: String,
    inner: Arc<MockNodeInner>,
}

impl MockNode {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            inner: Arc::new(MockNodeInner {
                slot: Mutex::new(None),
                get_calls: AtomicU32::new(0),
                set_nx_calls: AtomicU32::new(0),
                cad_calls: AtomicU32::new(0),
                close_calls: AtomicU32::new(0),
                reject_set_nx: AtomicBool::new(false),
                fail_set_nx: AtomicBool::new(false),
                fail_cad: AtomicBool::new(false),
                set_nx_delay_ms: AtomicU32::new(0),
            }),
        }
    }

    /// 之后的 set_nx 一律返回 false（模拟键被其他持有者占用）
    pub fn reject_set_nx(&self) {
        self.inner.reject_set_nx.store(true, Ordering::SeqCst);
    }

    /// 之后的 set_nx 一律返回 I/O 错误
    pub fn fail_set_nx(&self) {
        self.inner.fail_set_nx.store(true, Ordering::SeqCst);
    }

    /// 之后的 compare_and_delete 一律返回 I/O 错误
    pub fn fail_cad(&self) {
        self.inner.fail_cad.store(true, Ordering::SeqCst);
    }

    /// 每次 set_nx 前先等待指定时长（模拟慢节点，配合暂停时钟使用）
    pub fn set_nx_delay(&self, delay: Duration) {
        self.inner
            .set_nx_delay_ms
            .store(delay.as_millis() as u32, Ordering::SeqCst);
    }

    /// 外部直接写入槽位（模拟其他持有者已加锁）
    pub fn preset_value(&self, value: impl Into<String>, ttl: Duration) {
        *self.inner.slot.lock() = Some(Slot {
            value: value.into(),
            expires_at: Instant::now() + ttl,
        });
    }

    /// 当前未过期的值
    pub fn value(&self) -> Option<String> {
        let mut slot = self.inner.slot.lock();
        match slot.as_ref() {
            Some(s) if s.expires_at > Instant::now() => Some(s.value.clone()),
            Some(_) => {
                // 惰性清理已过期的槽位
                *slot = None;
                None
            }
            None => None,
        }
    }

    pub fn get_calls(&self) -> u32 {
        self.inner.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_nx_calls(&self) -> u32 {
        self.inner.set_nx_calls.load(Ordering::SeqCst)
    }

    pub fn cad_calls(&self) -> u32 {
        self.inner.cad_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> u32 {
        self.inner.close_calls.load(Ordering::SeqCst)
    }
}

/// 构造一个模拟的节点不可达错误
pub fn unreachable_error() -> RedlockError {
    RedlockError::Redis(redis::RedisError::from((
        redis::ErrorKind::Io,
        "模拟节点不可达",
    )))
}

#[async_trait]
impl NodeClient for MockNode {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        self.inner.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.value())
    }

    async fn set_nx_px(&self, _key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.inner.set_nx_calls.fetch_add(1, Ordering::SeqCst);

        let delay_ms = self.inner.set_nx_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
        }

        if self.inner.fail_set_nx.load(Ordering::SeqCst) {
            return Err(unreachable_error());
        }
        if self.inner.reject_set_nx.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if self.value().is_some() {
            return Ok(false);
        }

        *self.inner.slot.lock() = Some(Slot {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        });
        Ok(true)
    }

    async fn compare_and_delete(&self, _key: &str, expected: &str) -> Result<bool> {
        self.inner.cad_calls.fetch_add(1, Ordering::SeqCst);

        if self.inner.fail_cad.load(Ordering::SeqCst) {
            return Err(unreachable_error());
        }

        let mut slot = self.inner.slot.lock();
        match slot.as_ref() {
            Some(s) if s.expires_at > Instant::now() && s.value == expected => {
                *slot = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn close(&self) {
        self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ==================== 测试辅助 ====================

/// 固定值 token 生成器，用于确定性断言
pub struct FixedTokenSource {
    token: String,
}

impl FixedTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenSource for FixedTokenSource {
    fn generate(&self) -> String {
        self.token.clone()
    }
}

/// 生成 n 个身份互不相同的 Mock 节点
pub fn mock_pool(n: usize) -> Vec<MockNode> {
    (0..n).map(|i| MockNode::new(format!("node-{}", i))).collect()
}

/// 测试用锁配置：重试 3 次、退避 100 毫秒、租约 30 秒
pub fn test_config() -> RedlockConfig {
    RedlockConfig::new("test_resource").with_retry_count(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_mock_node_ttl_expiry() {
        let node = MockNode::new("node-0");
        assert!(
            node.set_nx_px("k", "v", Duration::from_millis(100))
                .await
                .unwrap()
        );
        assert_eq!(node.value().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(node.value(), None);

        // 过期后可以被重新占用
        assert!(
            node.set_nx_px("k", "w", Duration::from_millis(100))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_mock_node_compare_and_delete() {
        let node = MockNode::new("node-0");
        node.preset_value("holder-b", Duration::from_secs(30));

        // token 不匹配时不删除
        assert!(!node.compare_and_delete("k", "holder-a").await.unwrap());
        assert_eq!(node.value().as_deref(), Some("holder-b"));

        assert!(node.compare_and_delete("k", "holder-b").await.unwrap());
        assert_eq!(node.value(), None);
    }

    #[tokio::test]
    async fn test_mock_node_counters() {
        let node = MockNode::new("node-0");
        node.get("k").await.unwrap();
        node.set_nx_px("k", "v", Duration::from_secs(30))
            .await
            .unwrap();
        node.compare_and_delete("k", "v").await.unwrap();
        node.close().await;

        assert_eq!(node.get_calls(), 1);
        assert_eq!(node.set_nx_calls(), 1);
        assert_eq!(node.cad_calls(), 1);
        assert_eq!(node.close_calls(), 1);
    }
}
