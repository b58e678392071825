//! 基于多数派（Quorum）的 Redis 分布式互斥锁
//!
//! 在 N 个相互独立的 Redis 实例之上实现 RedLock 模式：只要多数派
//! （`floor(N/2) + 1`）实例加锁成功且整轮耗时未吃掉租约，即认为全局持有锁。
//! 支持同一持有者的可重入加锁，释放时通过 Lua 脚本原子地
//! "比较 token 再删除"，避免误删其他持有者的锁。
//!
//! ## 基本用法
//!
//! ```rust,no_run
//! use redlock::{NodeConfig, NodePool, RedLock, RedlockConfig};
//!
//! # async fn demo() -> redlock::Result<()> {
//! let nodes = vec![
//!     NodeConfig::new("127.0.0.1", 6391),
//!     NodeConfig::new("127.0.0.1", 6392),
//!     NodeConfig::new("127.0.0.1", 6393),
//! ];
//!
//! let config = RedlockConfig::new("order:settle");
//! let pool = NodePool::connect(&nodes, config.connect_timeout).await?;
//! let mut lock = RedLock::new(pool, config);
//!
//! if lock.lock().await {
//!     // 临界区
//!     lock.unlock(false).await;
//! }
//! lock.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! 同一个 `RedLock` 实例设计为单线程同步使用；`lock()` / `unlock()` 会阻塞
//! 当前调用方直到网络往返和退避结束。多线程共用同一实例需要外部同步。

pub mod config;
pub mod error;
pub mod lock;
pub mod node;
pub mod pool;
pub mod test_utils;
pub mod token;

pub use config::{NodeConfig, RedlockConfig};
pub use error::{RedlockError, Result};
pub use lock::RedLock;
pub use node::NodeClient;
pub use pool::{ConnectFailure, NodePool};
pub use token::{TokenSource, UuidTokenSource};
