//! 持有者 token 生成
//!
//! token 在管理器构造时生成一次，之后不再更换——同一个实例的多次 lock()
//! 因此能被识别为同一个逻辑持有者（可重入）。生成器抽象为 trait，
//! 测试中可注入固定值实现确定性断言。

use rand::Rng;
use uuid::Uuid;

/// token 生成器
pub trait TokenSource: Send + Sync {
    /// 生成一个全局唯一的持有者 token
    fn generate(&self) -> String;
}

/// 默认实现：UUID v4 加 6 位随机数字后缀
///
/// UUID v4 本身已足够唯一，随机后缀沿用既有部署的 token 形状，
/// 便于在节点侧人工排查时一眼区分持有者。
#[derive(Debug, Default)]
pub struct UuidTokenSource;

impl TokenSource for UuidTokenSource {
    fn generate(&self) -> String {
        let suffix: u32 = rand::rng().random_range(100_000..=999_999);
        format!("{}.{}", Uuid::new_v4(), suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let source = UuidTokenSource;
        let a = source.generate();
        let b = source.generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_shape() {
        let token = UuidTokenSource.generate();
        let (uuid_part, suffix) = token.rsplit_once('.').expect("token 应包含后缀分隔符");
        assert!(Uuid::parse_str(uuid_part).is_ok());
        let suffix: u32 = suffix.parse().expect("后缀应为数字");
        assert!((100_000..=999_999).contains(&suffix));
    }
}
