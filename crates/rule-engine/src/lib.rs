//! 声明式规则引擎
//!
//! 提供可复用的规则评估能力，支持：
//! - JSON 规则定义、校验和存储
//! - 按匹配类型（all / any / none）短路求值条件
//! - 按声明顺序执行动作，支持单次执行内的动作锁定
//! - 惰性加载、按依赖顺序物化的评估上下文
//! - 带依赖解析与命名空间映射的包注册表
//! - `{category.path}` 占位符解析

pub mod action;
pub mod comparator;
pub mod compiler;
pub mod condition;
pub mod context;
pub mod error;
pub mod executor;
pub mod models;
pub mod operators;
pub mod package;
pub mod placeholder;
pub mod store;

pub use action::{Action, ActionRegistry};
pub use comparator::Comparator;
pub use compiler::{CompiledRule, RuleCompiler};
pub use condition::{Condition, ConditionRegistry};
pub use context::{Context, ContextValue, PropertyAccess};
pub use error::{Result, RuleError};
pub use executor::RuleExecutor;
pub use models::{
    ActionSpec, ConditionSpec, ExecutionStats, Rule, RuleMetadata, RuleOutcome, RuleStatus,
    SkipReason,
};
pub use operators::{MatchType, Operator};
pub use package::{Package, PackageDescriptor, PackageRegistry};
pub use placeholder::{CategoryResolver, PlaceholderResolver};
pub use store::{RuleStore, RuleStoreStats};
