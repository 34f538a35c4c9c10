//! 占位符解析
//!
//! 替换字符串中的 `{category.path}` 占位符。为某个 category 注册了自定义解析器时优先使用，
//! 否则把整个占位符当作上下文路径查找。解析失败或结果不是标量的占位符保持原样。

use crate::comparator::Comparator;
use crate::context::Context;
use crate::error::Result;
use dashmap::DashMap;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}\s]+)\}").expect("占位符正则必须合法"));

pub const DEFAULT_DELIMITER: &str = ".";

/// 自定义分类解析器
pub trait CategoryResolver: Send + Sync {
    fn resolve(&self, context: &Context, path: &[&str]) -> Result<Value>;
}

impl<F> CategoryResolver for F
where
    F: Fn(&Context, &[&str]) -> Result<Value> + Send + Sync,
{
    fn resolve(&self, context: &Context, path: &[&str]) -> Result<Value> {
        self(context, path)
    }
}

/// 占位符解析器
pub struct PlaceholderResolver {
    delimiter: String,
    resolvers: DashMap<String, Arc<dyn CategoryResolver>>,
}

impl PlaceholderResolver {
    pub fn new() -> Self {
        Self::with_delimiter(DEFAULT_DELIMITER)
    }

    /// 指定分类与路径之间的分隔符，空字符串回退为默认分隔符
    pub fn with_delimiter(delimiter: &str) -> Self {
        let delimiter = if delimiter.is_empty() {
            DEFAULT_DELIMITER
        } else {
            delimiter
        };

        Self {
            delimiter: delimiter.to_string(),
            resolvers: DashMap::new(),
        }
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// 注册分类解析器，后注册的覆盖先注册的
    pub fn register<R: CategoryResolver + 'static>(&self, category: &str, resolver: R) {
        self.resolvers
            .insert(category.to_string(), Arc::new(resolver));
    }

    /// 解析模板中的所有占位符
    pub fn resolve(&self, template: &str, context: &Context) -> String {
        if !template.contains('{') {
            return template.to_string();
        }

        TOKEN_PATTERN
            .replace_all(template, |caps: &Captures| {
                self.resolve_token(&caps[1], context)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// 递归解析 JSON 值中的所有字符串
    pub fn resolve_value(&self, value: &Value, context: &Context) -> Value {
        match value {
            Value::String(s) => Value::String(self.resolve(s, context)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_value(item, context))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v, context)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve_token(&self, token: &str, context: &Context) -> Option<String> {
        let segments: Vec<&str> = token.split(self.delimiter.as_str()).collect();
        if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
            return None;
        }

        let category = segments[0];
        let resolver = self.resolvers.get(category).map(|r| r.value().clone());

        let value = match resolver {
            Some(resolver) => match resolver.resolve(context, &segments[1..]) {
                Ok(value) => value,
                Err(e) => {
                    debug!(token, error = %e, "占位符解析失败，保留原文");
                    return None;
                }
            },
            None => context.get_value(&segments.join("."))?,
        };

        Self::scalar_string(&value)
    }

    fn scalar_string(value: &Value) -> Option<String> {
        match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                Some(Comparator::stringify(value))
            }
            _ => None,
        }
    }
}

impl Default for PlaceholderResolver {
    fn default() -> Self {
        Self::new()
    }
}
