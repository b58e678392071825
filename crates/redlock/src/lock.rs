//! 锁管理器
//!
//! RedLock 获取/释放的核心逻辑：
//!
//! - 可重入短路：所有节点的当前值都等于本实例 token 时，只增加重入深度，
//!   不做任何写操作，也不刷新租约。
//! - 获取循环：按池内顺序对每个节点执行 SET NX PX；任一节点失败立即中止
//!   本轮并对全部节点做一次"比较再删除"回滚，避免残留少数派阻塞真正的
//!   持有者；达到多数派且整轮耗时小于租约（时钟漂移护栏）才算成功。
//! - 释放：重入深度归零或强制释放时，对全部节点下发原子比较删除。
//!
//! 同一实例设计为单线程同步使用，深度字段不加锁；多线程共用需外部同步。
//! 节点连接在整个管理器生命周期内保持打开，仅 `shutdown()` 显式关闭，
//! 保证同一实例释放后还能再次加锁。

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RedlockConfig;
use crate::pool::NodePool;
use crate::token::{TokenSource, UuidTokenSource};

/// 单个管理器实例的锁状态
///
/// token 在构造时生成一次，终生不变；深度只由 lock()/unlock() 修改。
pub struct LockState {
    resource_key: String,
    token: String,
    lease: Duration,
    depth: u32,
}

impl LockState {
    fn new(resource_key: String, token: String, lease: Duration) -> Self {
        Self {
            resource_key,
            token,
            lease,
            depth: 0,
        }
    }
}

/// 多数派分布式锁管理器
pub struct RedLock {
    pool: NodePool,
    state: LockState,
    retry_count: u32,
    retry_delay: Duration,
}

impl RedLock {
    /// 使用默认 token 生成器构造
    pub fn new(pool: NodePool, config: RedlockConfig) -> Self {
        Self::with_token_source(pool, config, &UuidTokenSource)
    }

    /// 使用注入的 token 生成器构造（测试中注入固定值实现）
    pub fn with_token_source(
        pool: NodePool,
        config: RedlockConfig,
        token_source: &dyn TokenSource,
    ) -> Self {
        let token = token_source.generate();
        Self {
            state: LockState::new(config.resource_key, token, config.lease),
            pool,
            retry_count: config.retry_count,
            retry_delay: config.retry_delay,
        }
    }

    /// 获取锁
    ///
    /// 普通竞争不是错误：获取失败返回 false。节点 I/O 错误视为该轮获取
    /// 失败，同样计入重试次数。
    pub async fn lock(&mut self) -> bool {
        self.lock_until(None).await
    }

    /// 带截止时间的获取
    ///
    /// 超过 deadline 后不再发起新的尝试，提前退出重试循环；
    /// 退出前仍会对全部节点做一次清理。
    pub async fn lock_until(&mut self, deadline: Option<Instant>) -> bool {
        // 可重入短路：只读不写，不刷新租约
        if self.is_locked().await {
            self.state.depth += 1;
            debug!(
                resource = %self.state.resource_key,
                depth = self.state.depth,
                "重入加锁"
            );
            return true;
        }

        for attempt in 0..self.retry_count {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    debug!(
                        resource = %self.state.resource_key,
                        attempt,
                        "已到截止时间，停止尝试"
                    );
                    break;
                }
            }

            if self.try_acquire_once(attempt).await {
                self.state.depth += 1;
                info!(
                    resource = %self.state.resource_key,
                    attempt,
                    "获取锁成功"
                );
                return true;
            }

            tokio::time::sleep(self.retry_delay).await;
        }

        // 重试耗尽，兜底清理可能残留的键
        self.release_all().await;
        warn!(
            resource = %self.state.resource_key,
            retry_count = self.retry_count,
            "获取锁失败"
        );
        false
    }

    /// 单轮获取尝试
    ///
    /// 失败的轮次（竞争、I/O 错误或护栏拒绝）一律在返回前回滚本轮写入，
    /// 不给下一轮留下悬空的少数派。
    async fn try_acquire_once(&self, attempt: u32) -> bool {
        let started = Instant::now();
        let mut acquired = 0usize;
        let mut aborted = false;

        for node in self.pool.iter() {
            match node
                .set_nx_px(&self.state.resource_key, &self.state.token, self.state.lease)
                .await
            {
                Ok(true) => acquired += 1,
                Ok(false) => {
                    // 该节点已被其他 token 占用，本轮立即中止
                    debug!(
                        node = %node.identity(),
                        resource = %self.state.resource_key,
                        attempt,
                        "节点已被占用，中止本轮"
                    );
                    aborted = true;
                    break;
                }
                Err(err) => {
                    warn!(
                        node = %node.identity(),
                        resource = %self.state.resource_key,
                        attempt,
                        error = %err,
                        "节点写入出错，中止本轮"
                    );
                    aborted = true;
                    break;
                }
            }
        }

        let elapsed = started.elapsed();

        if !aborted && acquired >= self.pool.quorum() && elapsed < self.state.lease {
            return true;
        }

        if !aborted && acquired >= self.pool.quorum() {
            // 多数派已达成但整轮耗时吃掉了租约，剩余有效期不可信
            warn!(
                resource = %self.state.resource_key,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                lease_ms = self.state.lease.as_millis() as u64,
                "整轮耗时超过租约，放弃本轮多数派"
            );
        }

        self.release_all().await;
        false
    }

    /// 释放锁
    ///
    /// `force = false`：深度减一，归零时对全部节点下发比较删除，返回 true；
    /// 深度已为 0 时无事可做，返回 false。
    /// `force = true`：无视深度直接清零并删除，返回删除轮次的结果
    /// （所有节点均可达且脚本执行无传输错误）。
    pub async fn unlock(&mut self, force: bool) -> bool {
        if force {
            self.state.depth = 0;
            return self.release_all().await;
        }

        if self.state.depth > 0 {
            self.state.depth -= 1;
            if self.state.depth == 0 {
                self.release_all().await;
                info!(resource = %self.state.resource_key, "锁已完全释放");
            } else {
                debug!(
                    resource = %self.state.resource_key,
                    depth = self.state.depth,
                    "重入解锁"
                );
            }
            return true;
        }

        false
    }

    /// 当前重入深度
    pub fn held_depth(&self) -> u32 {
        self.state.depth
    }

    /// 多数派大小
    pub fn quorum(&self) -> usize {
        self.pool.quorum()
    }

    /// 被保护资源的 key
    pub fn resource_key(&self) -> &str {
        &self.state.resource_key
    }

    /// 构造期排除节点的失败记录
    pub fn connect_failures(&self) -> &[crate::pool::ConnectFailure] {
        self.pool.connect_failures()
    }

    /// 显式销毁：关闭所有节点连接
    ///
    /// 不隐式释放仍持有的锁——调用方应先 unlock；未释放的键靠租约过期兜底。
    pub async fn shutdown(self) {
        self.pool.close_all().await;
    }

    /// 重入判定：深度大于 0 且所有节点的当前值都等于本实例 token
    async fn is_locked(&self) -> bool {
        if self.state.depth == 0 {
            return false;
        }

        for node in self.pool.iter() {
            match node.get(&self.state.resource_key).await {
                Ok(Some(value)) if value == self.state.token => {}
                // 值缺失、不匹配或节点不可达都按未持有处理
                _ => return false,
            }
        }

        true
    }

    /// 对全部节点下发原子比较删除（尽力而为）
    ///
    /// 无论节点是否实际持有键都下发；单节点不可达只记日志不提前返回，
    /// 剩余节点仍要清理。
    async fn release_all(&self) -> bool {
        let mut all_reachable = true;

        for node in self.pool.iter() {
            if let Err(err) = node
                .compare_and_delete(&self.state.resource_key, &self.state.token)
                .await
            {
                warn!(
                    node = %node.identity(),
                    resource = %self.state.resource_key,
                    error = %err,
                    "释放锁时节点不可达"
                );
                all_reachable = false;
            }
        }

        all_reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::NodePool;
    use crate::test_utils::{mock_pool, test_config, FixedTokenSource, MockNode};
    use crate::node::NodeClient;

    fn manager(nodes: &[MockNode], config: RedlockConfig) -> RedLock {
        let clients: Vec<Box<dyn NodeClient>> =
            nodes.iter().map(|n| Box::new(n.clone()) as Box<dyn NodeClient>).collect();
        let pool = NodePool::from_clients(clients).unwrap();
        RedLock::with_token_source(pool, config, &FixedTokenSource::new("holder-a"))
    }

    #[tokio::test]
    async fn test_reentrant_lock_issues_no_extra_writes() {
        let nodes = mock_pool(3);
        let mut lock = manager(&nodes, test_config());

        assert!(lock.lock().await);
        let writes_after_first: Vec<u32> = nodes.iter().map(|n| n.set_nx_calls()).collect();

        assert!(lock.lock().await);
        assert_eq!(lock.held_depth(), 2);

        // 第二次 lock 走重入短路，只有读操作
        for (node, before) in nodes.iter().zip(writes_after_first) {
            assert_eq!(node.set_nx_calls(), before);
        }
    }

    #[tokio::test]
    async fn test_unlock_state_machine() {
        let nodes = mock_pool(3);
        let mut lock = manager(&nodes, test_config());

        assert!(lock.lock().await);
        assert!(lock.lock().await);
        assert_eq!(lock.held_depth(), 2);

        // Held(2) -> Held(1)：不触发删除
        assert!(lock.unlock(false).await);
        assert_eq!(lock.held_depth(), 1);
        for node in &nodes {
            assert!(node.value().is_some());
        }

        // Held(1) -> Unlocked：全节点删除
        assert!(lock.unlock(false).await);
        assert_eq!(lock.held_depth(), 0);
        for node in &nodes {
            assert!(node.value().is_none());
        }
    }

    #[tokio::test]
    async fn test_unlock_at_zero_depth_is_noop() {
        let nodes = mock_pool(3);
        let mut lock = manager(&nodes, test_config());

        assert!(!lock.unlock(false).await);
        for node in &nodes {
            assert_eq!(node.cad_calls(), 0);
            assert_eq!(node.set_nx_calls(), 0);
        }
    }

    #[tokio::test]
    async fn test_force_unlock_resets_depth() {
        let nodes = mock_pool(3);
        let mut lock = manager(&nodes, test_config());

        assert!(lock.lock().await);
        assert!(lock.lock().await);
        assert!(lock.lock().await);
        assert_eq!(lock.held_depth(), 3);

        assert!(lock.unlock(true).await);
        assert_eq!(lock.held_depth(), 0);
        for node in &nodes {
            assert!(node.value().is_none());
        }
    }

    #[tokio::test]
    async fn test_force_unlock_at_zero_depth_still_issues_delete() {
        // 既有行为：force 在深度 0 时仍然下发删除轮次
        let nodes = mock_pool(3);
        let mut lock = manager(&nodes, test_config());

        assert!(lock.unlock(true).await);
        for node in &nodes {
            assert_eq!(node.cad_calls(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_retry_loop_early() {
        let nodes = mock_pool(3);
        // 节点 1 始终拒绝写入，保证永远无法达到多数派
        nodes[1].reject_set_nx();
        let mut lock = manager(&nodes, test_config().with_retry_count(200));

        let deadline = Instant::now() + Duration::from_millis(350);
        assert!(!lock.lock_until(Some(deadline)).await);

        // 退避 100ms，350ms 内最多发起 4 轮，远少于 200 次重试
        assert!(nodes[0].set_nx_calls() <= 5);
        // 提前退出仍执行了兜底清理
        assert!(nodes[0].cad_calls() > 0);
    }
}
