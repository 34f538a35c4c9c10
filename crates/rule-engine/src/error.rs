//! 规则引擎错误类型
//!
//! 引擎对外的 `execute` 不会返回这些错误：条件/动作/包加载失败都会被记录并降级为安全默认值，
//! 只有规则导入、存储更新等调用方错误才会以 `Result` 形式返回。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则解析失败: {0}")]
    ParseError(String),

    #[error("规则校验失败: {0}")]
    ValidationError(String),

    #[error("条件评估失败: {condition_type} - {message}")]
    ConditionFailed {
        condition_type: String,
        message: String,
    },

    #[error("动作执行失败: {action_type} - {message}")]
    ActionFailed {
        action_type: String,
        message: String,
    },

    #[error("包不存在: {0}")]
    PackageNotFound(String),

    #[error("包不可用: {0}")]
    PackageUnavailable(String),

    #[error("包存在循环依赖: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("无效的上下文路径: {0}")]
    InvalidPath(String),

    #[error("占位符解析失败: {token} - {message}")]
    PlaceholderFailed { token: String, message: String },

    #[error("规则未找到: {0}")]
    RuleNotFound(String),

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    /// 构造条件评估错误
    pub fn condition(condition_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConditionFailed {
            condition_type: condition_type.into(),
            message: message.into(),
        }
    }

    /// 构造动作执行错误
    pub fn action(action_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ActionFailed {
            action_type: action_type.into(),
            message: message.into(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseError(_) => "RULE_PARSE_FAILED",
            Self::ValidationError(_) => "RULE_VALIDATION_FAILED",
            Self::ConditionFailed { .. } => "CONDITION_FAILED",
            Self::ActionFailed { .. } => "ACTION_FAILED",
            Self::PackageNotFound(_) => "PACKAGE_NOT_FOUND",
            Self::PackageUnavailable(_) => "PACKAGE_UNAVAILABLE",
            Self::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            Self::InvalidPath(_) => "INVALID_PATH",
            Self::PlaceholderFailed { .. } => "PLACEHOLDER_FAILED",
            Self::RuleNotFound(_) => "RULE_NOT_FOUND",
            Self::JsonError(_) => "JSON_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
