//! 规则操作符定义

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 条件操作符
///
/// 操作符字符串大小写、首尾空白不敏感，解析失败的操作符在比较时恒为 false。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // 相等比较
    Eq,
    Neq,

    // 数值比较
    Gt,
    Gte,
    Lt,
    Lte,

    // 模式匹配
    Like,
    NotLike,
    Regexp,

    // 集合成员
    In,
    NotIn,

    // 存在性检查
    Exists,
    NotExists,

    // 布尔比较
    Is,
    IsNot,
}

impl Operator {
    /// 解析操作符字符串
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_uppercase();
        let op = match normalized.as_str() {
            "=" | "==" => Self::Eq,
            "!=" | "<>" => Self::Neq,
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            "LIKE" => Self::Like,
            "NOT LIKE" => Self::NotLike,
            "REGEXP" => Self::Regexp,
            "IN" => Self::In,
            "NOT IN" => Self::NotIn,
            "EXISTS" => Self::Exists,
            "NOT EXISTS" => Self::NotExists,
            "IS" => Self::Is,
            "IS NOT" => Self::IsNot,
            _ => return None,
        };
        Some(op)
    }

    /// 从条件配置中的 operator 字段解析
    ///
    /// 缺省或非字符串值按 `=` 处理；无法识别的字符串返回 None。
    pub fn from_spec(raw: Option<&Value>) -> Option<Self> {
        match raw {
            Some(Value::String(s)) => Self::parse(s),
            _ => Some(Self::Eq),
        }
    }

    /// 是否为否定型操作符（用于按名称的存在性检查）
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            Self::Neq | Self::NotLike | Self::NotIn | Self::NotExists | Self::IsNot
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::Regexp => "REGEXP",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Exists => "EXISTS",
            Self::NotExists => "NOT EXISTS",
            Self::Is => "IS",
            Self::IsNot => "IS NOT",
        };
        write!(f, "{}", s)
    }
}

/// 匹配类型：多个布尔结果的归约方式
///
/// 未识别的字符串按 `any` 处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MatchType {
    #[default]
    All,
    Any,
    None,
}

impl MatchType {
    /// 宽松解析
    pub fn parse_lossy(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "all" => Self::All,
            "none" => Self::None,
            _ => Self::Any,
        }
    }

    /// 归约布尔序列（短路求值）
    ///
    /// 空序列：all -> true，any -> false，none -> true。
    pub fn reduce<I>(&self, results: I) -> bool
    where
        I: IntoIterator<Item = bool>,
    {
        let mut results = results.into_iter();
        match self {
            Self::All => results.all(|r| r),
            Self::Any => results.any(|r| r),
            Self::None => !results.any(|r| r),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
            Self::None => "none",
        }
    }
}

impl From<String> for MatchType {
    fn from(value: String) -> Self {
        Self::parse_lossy(&value)
    }
}

impl From<MatchType> for String {
    fn from(value: MatchType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_is_case_and_whitespace_insensitive() {
        assert_eq!(Operator::parse("  not like "), Some(Operator::NotLike));
        assert_eq!(Operator::parse("In"), Some(Operator::In));
        assert_eq!(Operator::parse("<>"), Some(Operator::Neq));
        assert_eq!(Operator::parse("=="), Some(Operator::Eq));
        assert_eq!(Operator::parse("between"), None);
    }

    #[test]
    fn test_from_spec_defaults_to_eq() {
        assert_eq!(Operator::from_spec(None), Some(Operator::Eq));
        assert_eq!(Operator::from_spec(Some(&json!(42))), Some(Operator::Eq));
        assert_eq!(Operator::from_spec(Some(&json!("regexp"))), Some(Operator::Regexp));
        assert_eq!(Operator::from_spec(Some(&json!("~~"))), None);
    }

    #[test]
    fn test_match_type_reduce_empty() {
        assert!(MatchType::All.reduce(Vec::new()));
        assert!(!MatchType::Any.reduce(Vec::new()));
        assert!(MatchType::None.reduce(Vec::new()));
    }

    #[test]
    fn test_match_type_reduce() {
        assert!(!MatchType::All.reduce([true, false]));
        assert!(MatchType::Any.reduce([false, true]));
        assert!(!MatchType::None.reduce([false, true]));
        assert!(MatchType::None.reduce([false, false]));
    }

    #[test]
    fn test_match_type_lossy_deserialize() {
        let parsed: MatchType = serde_json::from_value(json!("NONE")).unwrap();
        assert_eq!(parsed, MatchType::None);

        let parsed: MatchType = serde_json::from_value(json!("whatever")).unwrap();
        assert_eq!(parsed, MatchType::Any);

        assert_eq!(serde_json::to_value(MatchType::All).unwrap(), json!("all"));
    }
}
