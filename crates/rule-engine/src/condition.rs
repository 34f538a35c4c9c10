//! 条件
//!
//! 条件从上下文中提取一个实际值，再交给 [`Comparator`] 按配置的操作符与期望值比较。
//! 条件实现按类型字符串注册到 [`ConditionRegistry`]，未注册的类型解析为恒假条件。

use crate::comparator::Comparator;
use crate::context::Context;
use crate::error::{Result, RuleError};
use crate::models::ConditionSpec;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// 条件实现
pub trait Condition: Send + Sync {
    /// 从上下文中提取待比较的实际值
    fn actual_value(&self, _spec: &ConditionSpec, _context: &Context) -> Result<Value> {
        Ok(Value::Null)
    }

    /// 条件是否成立
    fn matches(&self, spec: &ConditionSpec, context: &Context) -> Result<bool> {
        let actual = self.actual_value(spec, context)?;
        Ok(Comparator::compare_multi(
            &actual,
            spec.expected(),
            spec.parsed_operator(),
            spec.match_type,
        ))
    }
}

/// 闭包形式的条件
struct FnCondition<F>(F);

impl<F> Condition for FnCondition<F>
where
    F: Fn(&ConditionSpec, &Context) -> Result<bool> + Send + Sync,
{
    fn matches(&self, spec: &ConditionSpec, context: &Context) -> Result<bool> {
        (self.0)(spec, context)
    }
}

/// 未注册类型的兜底条件，恒为 false
pub struct NeverCondition;

impl Condition for NeverCondition {
    fn matches(&self, _spec: &ConditionSpec, _context: &Context) -> Result<bool> {
        Ok(false)
    }
}

/// 按上下文路径取值的条件，路径来自 `name` 或第一个参数
pub struct ContextCondition;

impl Condition for ContextCondition {
    fn actual_value(&self, spec: &ConditionSpec, context: &Context) -> Result<Value> {
        let path = spec
            .name
            .as_deref()
            .or_else(|| spec.args.first().and_then(Value::as_str))
            .ok_or_else(|| RuleError::condition(&spec.condition_type, "缺少上下文路径"))?;

        Ok(context.get_or(path, Value::Null))
    }
}

/// 请求方法条件（大小写不敏感）
pub struct RequestMethodCondition;

impl RequestMethodCondition {
    fn uppercase(value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(s.to_uppercase()),
            Value::Array(items) => Value::Array(items.iter().map(Self::uppercase).collect()),
            other => other.clone(),
        }
    }
}

impl Condition for RequestMethodCondition {
    fn actual_value(&self, _spec: &ConditionSpec, context: &Context) -> Result<Value> {
        Ok(Self::uppercase(&context.get_or("request.method", Value::Null)))
    }

    fn matches(&self, spec: &ConditionSpec, context: &Context) -> Result<bool> {
        let actual = self.actual_value(spec, context)?;
        Ok(Comparator::compare_multi(
            &actual,
            &Self::uppercase(spec.expected()),
            spec.parsed_operator(),
            spec.match_type,
        ))
    }
}

/// 按名称查找条目的条件（cookie / header / param）
///
/// 名称支持三种匹配方式：大小写不敏感的精确匹配、`*`/`?` 通配符、`/.../` 正则字面量。
/// 未配置 `value` 时只检查条目是否存在，否定型操作符（`NOT EXISTS`、`!=` 等）检查不存在。
pub struct NamedEntryCondition {
    source: String,
}

impl NamedEntryCondition {
    /// `source` 为条目所在的上下文路径，如 "request.cookies"
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// 条目名是否匹配配置的名称
    pub fn name_matches(key: &str, pattern: &str) -> bool {
        if pattern.len() > 1 && pattern.starts_with('/') && pattern[1..].contains('/') {
            return Comparator::regex_match(key, pattern);
        }
        if pattern.contains('*') || pattern.contains('?') {
            return Comparator::glob_match(key, pattern);
        }
        key.to_lowercase() == pattern.to_lowercase()
    }

    fn entry_name<'a>(&self, spec: &'a ConditionSpec) -> Result<&'a str> {
        spec.name
            .as_deref()
            .or_else(|| spec.args.first().and_then(Value::as_str))
            .ok_or_else(|| RuleError::condition(&spec.condition_type, "缺少条目名称"))
    }
}

impl Condition for NamedEntryCondition {
    fn matches(&self, spec: &ConditionSpec, context: &Context) -> Result<bool> {
        let name = self.entry_name(spec)?;
        let entries = match context.get_value(&self.source) {
            Some(Value::Object(map)) => map,
            _ => Default::default(),
        };

        let matched: Vec<&Value> = entries
            .iter()
            .filter(|(key, _)| Self::name_matches(key, name))
            .map(|(_, value)| value)
            .collect();

        let operator = spec.parsed_operator();
        match &spec.value {
            None => {
                let present = !matched.is_empty();
                let negative = operator.is_some_and(|op| op.is_negative());
                Ok(present != negative)
            }
            Some(expected) if matched.is_empty() => Ok(Comparator::compare_multi(
                &Value::Null,
                expected,
                operator,
                spec.match_type,
            )),
            Some(expected) => Ok(matched.into_iter().any(|actual| {
                Comparator::compare_multi(actual, expected, operator, spec.match_type)
            })),
        }
    }
}

/// 条件注册表
pub struct ConditionRegistry {
    conditions: DashMap<String, Arc<dyn Condition>>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self {
            conditions: DashMap::new(),
        }
    }

    /// 创建包含内置条件的注册表
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("context", ContextCondition);
        registry.register("request_method", RequestMethodCondition);
        registry.register("cookie", NamedEntryCondition::new("request.cookies"));
        registry.register("header", NamedEntryCondition::new("request.headers"));
        registry.register("param", NamedEntryCondition::new("request.params"));
        registry
    }

    /// 注册条件实现，同名类型会被覆盖
    pub fn register<C: Condition + 'static>(&self, condition_type: &str, condition: C) {
        self.conditions
            .insert(condition_type.to_string(), Arc::new(condition));
    }

    /// 以闭包注册条件
    pub fn register_fn<F>(&self, condition_type: &str, f: F)
    where
        F: Fn(&ConditionSpec, &Context) -> Result<bool> + Send + Sync + 'static,
    {
        self.register(condition_type, FnCondition(f));
    }

    /// 解析条件实现，未注册的类型返回恒假条件
    pub fn resolve(&self, condition_type: &str) -> Arc<dyn Condition> {
        match self.conditions.get(condition_type) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!(condition_type, "未注册的条件类型，按不匹配处理");
                Arc::new(NeverCondition)
            }
        }
    }

    pub fn contains(&self, condition_type: &str) -> bool {
        self.conditions.contains_key(condition_type)
    }

    /// 已注册的条件类型
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.conditions.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
