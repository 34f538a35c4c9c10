//! 动作
//!
//! 规则匹配后按声明顺序执行的副作用。动作实现按类型字符串注册到 [`ActionRegistry`]，
//! 未注册的类型由执行器静默跳过。

use crate::context::Context;
use crate::error::{Result, RuleError};
use crate::models::ActionSpec;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// 动作实现
#[cfg_attr(test, mockall::automock)]
pub trait Action: Send + Sync {
    fn execute(&self, spec: &ActionSpec, context: &Context) -> Result<()>;
}

/// 闭包形式的动作
struct FnAction<F>(F);

impl<F> Action for FnAction<F>
where
    F: Fn(&ActionSpec, &Context) -> Result<()> + Send + Sync,
{
    fn execute(&self, spec: &ActionSpec, context: &Context) -> Result<()> {
        (self.0)(spec, context)
    }
}

/// 设置缓存开关：`enabled`（默认 true）、可选 `lifetime`
pub struct SetCacheAction;

impl Action for SetCacheAction {
    fn execute(&self, spec: &ActionSpec, context: &Context) -> Result<()> {
        let enabled = match spec.get("enabled") {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(RuleError::action(
                    &spec.action_type,
                    format!("enabled 需要布尔值，实际为 {}", other),
                ));
            }
        };

        context.set("cache.enabled", enabled);
        if let Some(lifetime) = spec.get("lifetime") {
            context.set("cache.lifetime", lifetime.clone());
        }
        Ok(())
    }
}

/// 将 `value` 写入上下文路径 `path`
pub struct SetContextAction;

impl Action for SetContextAction {
    fn execute(&self, spec: &ActionSpec, context: &Context) -> Result<()> {
        let path = spec
            .get_str("path")
            .ok_or_else(|| RuleError::action(&spec.action_type, "缺少 path"))?;
        let value = spec.get("value").cloned().unwrap_or(Value::Null);

        context.try_set(path, value)
    }
}

/// 设置响应头 `response.headers.<name>`
pub struct SetHeaderAction;

impl Action for SetHeaderAction {
    fn execute(&self, spec: &ActionSpec, context: &Context) -> Result<()> {
        let name = spec
            .get_str("name")
            .filter(|n| !n.is_empty() && !n.contains('.'))
            .ok_or_else(|| RuleError::action(&spec.action_type, "缺少合法的 name"))?;
        let value = spec.get("value").cloned().unwrap_or(Value::Null);

        context.set(&format!("response.headers.{}", name), value);
        Ok(())
    }
}

/// 动作注册表
pub struct ActionRegistry {
    actions: DashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: DashMap::new(),
        }
    }

    /// 创建包含内置动作的注册表
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("set_cache", SetCacheAction);
        registry.register("set_context", SetContextAction);
        registry.register("set_header", SetHeaderAction);
        registry
    }

    /// 注册动作实现，同名类型会被覆盖
    pub fn register<A: Action + 'static>(&self, action_type: &str, action: A) {
        self.register_arc(action_type, Arc::new(action));
    }

    pub fn register_arc(&self, action_type: &str, action: Arc<dyn Action>) {
        self.actions.insert(action_type.to_string(), action);
    }

    /// 以闭包注册动作
    pub fn register_fn<F>(&self, action_type: &str, f: F)
    where
        F: Fn(&ActionSpec, &Context) -> Result<()> + Send + Sync + 'static,
    {
        self.register(action_type, FnAction(f));
    }

    /// 解析动作实现，未注册返回 None
    pub fn resolve(&self, action_type: &str) -> Option<Arc<dyn Action>> {
        self.actions.get(action_type).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.actions.contains_key(action_type)
    }

    /// 已注册的动作类型
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.actions.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_cache() {
        let ctx = Context::new();
        let action = SetCacheAction;

        action
            .execute(&ActionSpec::new("set_cache").with("enabled", false), &ctx)
            .unwrap();
        assert_eq!(ctx.get_value("cache.enabled"), Some(json!(false)));

        action
            .execute(&ActionSpec::new("set_cache").with("lifetime", 300), &ctx)
            .unwrap();
        assert_eq!(ctx.get_value("cache"), Some(json!({"enabled": true, "lifetime": 300})));
    }

    #[test]
    fn test_set_cache_rejects_non_boolean() {
        let ctx = Context::new();
        let result = SetCacheAction.execute(&ActionSpec::new("set_cache").with("enabled", "yes"), &ctx);
        assert!(result.is_err());
        assert!(!ctx.has("cache"));
    }

    #[test]
    fn test_set_context_and_header() {
        let ctx = Context::new();
        let registry = ActionRegistry::with_builtins();

        registry
            .resolve("set_context")
            .unwrap()
            .execute(
                &ActionSpec::new("set_context").with("path", "page.title").with("value", "Home"),
                &ctx,
            )
            .unwrap();
        registry
            .resolve("set_header")
            .unwrap()
            .execute(
                &ActionSpec::new("set_header").with("name", "X-Frame-Options").with("value", "DENY"),
                &ctx,
            )
            .unwrap();

        assert_eq!(ctx.get_value("page.title"), Some(json!("Home")));
        assert_eq!(
            ctx.get_value("response.headers.X-Frame-Options"),
            Some(json!("DENY"))
        );
    }

    #[test]
    fn test_missing_config_is_an_error() {
        let ctx = Context::new();
        assert!(SetContextAction.execute(&ActionSpec::new("set_context"), &ctx).is_err());
        assert!(matches!(
            SetContextAction.execute(&ActionSpec::new("set_context").with("path", "a."), &ctx),
            Err(RuleError::InvalidPath(_))
        ));
        assert!(SetHeaderAction
            .execute(&ActionSpec::new("set_header").with("name", "a.b"), &ctx)
            .is_err());
    }

    #[test]
    fn test_unknown_action_resolves_to_none() {
        let registry = ActionRegistry::with_builtins();
        assert!(registry.resolve("launch_rocket").is_none());
        assert_eq!(
            registry.types(),
            vec!["set_cache".to_string(), "set_context".to_string(), "set_header".to_string()]
        );
    }

    #[test]
    fn test_mock_action() {
        let mut mock = MockAction::new();
        mock.expect_execute().times(1).returning(|_, _| Ok(()));

        let registry = ActionRegistry::new();
        registry.register("mocked", mock);
        registry
            .resolve("mocked")
            .unwrap()
            .execute(&ActionSpec::new("mocked"), &Context::new())
            .unwrap();
    }
}
