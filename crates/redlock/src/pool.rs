//! 节点池
//!
//! 先校验再连接：节点去重、奇数个数检查都发生在任何网络操作之前。
//! 单个节点连接失败不会中止整体构造，只要存活节点数仍达到多数派即可；
//! 失败原因以结构化形式保留给调用方，而不是静默丢弃。

use std::collections::HashSet;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::error::{RedlockError, Result};
use crate::node::{NodeClient, RedisNode};

/// 单个节点的连接失败记录
#[derive(Debug, Clone)]
pub struct ConnectFailure {
    pub identity: String,
    pub reason: String,
}

/// 已连接节点的有序集合及其多数派大小
pub struct NodePool {
    nodes: Vec<Box<dyn NodeClient>>,
    quorum: usize,
    connect_failures: Vec<ConnectFailure>,
}

impl std::fmt::Debug for NodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePool")
            .field(
                "nodes",
                &self.nodes.iter().map(|n| n.identity()).collect::<Vec<_>>(),
            )
            .field("quorum", &self.quorum)
            .field("connect_failures", &self.connect_failures)
            .finish()
    }
}

impl NodePool {
    /// 依据描述符列表构造节点池
    ///
    /// 校验顺序：去重 -> 奇数检查 -> 逐个限时连接 -> 多数派检查。
    /// 连接失败的节点被排除并记入 `connect_failures`。
    pub async fn connect(configs: &[NodeConfig], connect_timeout: Duration) -> Result<Self> {
        Self::connect_with(configs, connect_timeout, |config| async move {
            let node = RedisNode::connect(&config).await?;
            Ok(Box::new(node) as Box<dyn NodeClient>)
        })
        .await
    }

    /// `connect` 的实现主体，连接动作通过闭包注入，便于单测故障路径
    async fn connect_with<F, Fut>(
        configs: &[NodeConfig],
        connect_timeout: Duration,
        connector: F,
    ) -> Result<Self>
    where
        F: Fn(NodeConfig) -> Fut,
        Fut: std::future::Future<Output = Result<Box<dyn NodeClient>>>,
    {
        let identities: Vec<String> = configs.iter().map(|c| c.identity()).collect();
        let quorum = Self::validate(&identities)?;

        let mut nodes: Vec<Box<dyn NodeClient>> = Vec::with_capacity(configs.len());
        let mut connect_failures = Vec::new();

        for config in configs {
            match tokio::time::timeout(connect_timeout, connector(config.clone())).await {
                Ok(Ok(node)) => nodes.push(node),
                Ok(Err(err)) => {
                    warn!(node = %config.identity(), error = %err, "节点连接失败，已排除");
                    connect_failures.push(ConnectFailure {
                        identity: config.identity(),
                        reason: err.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        node = %config.identity(),
                        timeout_ms = connect_timeout.as_millis() as u64,
                        "节点连接超时，已排除"
                    );
                    connect_failures.push(ConnectFailure {
                        identity: config.identity(),
                        reason: format!("连接超时 ({} ms)", connect_timeout.as_millis()),
                    });
                }
            }
        }

        if nodes.len() < quorum {
            return Err(RedlockError::QuorumUnavailable {
                connected: nodes.len(),
                quorum,
            });
        }

        info!(
            connected = nodes.len(),
            total = configs.len(),
            quorum,
            "节点池就绪"
        );

        Ok(Self {
            nodes,
            quorum,
            connect_failures,
        })
    }

    /// 使用预构建的节点实例构造节点池
    ///
    /// 校验规则与 `connect` 相同；实例视为已连接，不再做多数派裁剪。
    pub fn from_clients(clients: Vec<Box<dyn NodeClient>>) -> Result<Self> {
        let identities: Vec<String> = clients
            .iter()
            .map(|c| c.identity().to_string())
            .collect();
        let quorum = Self::validate(&identities)?;

        Ok(Self {
            nodes: clients,
            quorum,
            connect_failures: Vec::new(),
        })
    }

    /// 去重与奇数校验，返回多数派大小
    fn validate(identities: &[String]) -> Result<usize> {
        let mut seen = HashSet::new();
        for identity in identities {
            if !seen.insert(identity.as_str()) {
                return Err(RedlockError::DuplicateNode {
                    identity: identity.clone(),
                });
            }
        }

        let count = identities.len();
        if count % 2 != 1 {
            return Err(RedlockError::EvenNodeCount { count });
        }

        Ok(count / 2 + 1)
    }

    /// 多数派大小：floor(N/2) + 1
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// 当前存活节点数
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 构造期被排除节点的失败记录
    pub fn connect_failures(&self) -> &[ConnectFailure] {
        &self.connect_failures
    }

    /// 按池内顺序迭代节点
    pub fn iter(&self) -> impl Iterator<Item = &dyn NodeClient> {
        self.nodes.iter().map(|n| n.as_ref())
    }

    /// 显式关闭所有节点连接
    pub async fn close_all(&self) {
        futures::future::join_all(self.nodes.iter().map(|n| n.close())).await;
    }
}
