//! 统一可观测性模块
//!
//! 提供 logging 与 metrics 的统一初始化。规则引擎只通过 `metrics` 门面记录指标，
//! 是否安装导出器由宿主程序决定。

pub mod metrics;
pub mod tracing;

pub use crate::config::ObservabilityConfig;

use ::tracing::info;
use anyhow::Result;

/// 可观测性资源守卫
pub struct ObservabilityGuard {
    _private: (),
}

impl ObservabilityGuard {
    /// 创建一个空的 Guard（用于测试或禁用可观测性时）
    pub fn empty() -> Self {
        Self { _private: () }
    }
}

impl Drop for ObservabilityGuard {
    fn drop(&mut self) {
        info!("Shutting down observability...");
    }
}

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（日志）
/// 2. 指标描述
///
/// # Example
///
/// ```ignore
/// use ruleflow_shared::config::AppConfig;
/// use ruleflow_shared::observability;
///
/// fn main() -> anyhow::Result<()> {
///     let config = AppConfig::load("ruleflow")?;
///     let _guard = observability::init(&config.observability)?;
///     Ok(())
/// }
/// ```
pub fn init(config: &ObservabilityConfig) -> Result<ObservabilityGuard> {
    tracing::init(config)?;
    metrics::describe_metrics();

    info!(
        log_level = %config.log_level,
        json_logs = config.json_logs,
        "Observability initialized"
    );

    Ok(ObservabilityGuard::empty())
}
