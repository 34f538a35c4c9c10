//! 包注册表
//!
//! 包是一组领域相关的条件、动作、上下文数据与规则的集合，可以声明对其他包的依赖。
//! 注册表负责：
//!
//! - 按深度优先顺序解析依赖，检测循环依赖；加载以根包为单位全有或全无
//! - 维护命名空间到包名的最长前缀映射（带缓存）
//! - 合并已加载包提供的上下文数据
//!
//! 加载失败不会抛出，只会使该根包不出现在已加载集合中；需要失败原因时使用
//! [`PackageRegistry::resolve`]。

use crate::action::ActionRegistry;
use crate::condition::ConditionRegistry;
use crate::context::Context;
use crate::error::{Result, RuleError};
use crate::models::Rule;
use crate::store::RuleStore;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// 包
pub trait Package: Send + Sync {
    /// 包名（注册表内唯一）
    fn name(&self) -> &str;

    /// 包负责的命名空间前缀，如 "Http."
    fn namespaces(&self) -> &[String] {
        &[]
    }

    /// 依赖的包名
    fn required_packages(&self) -> &[String] {
        &[]
    }

    /// 当前环境下是否可用
    fn available(&self) -> bool {
        true
    }

    /// 合并到评估上下文根节点的静态数据
    fn context(&self) -> Map<String, Value> {
        Map::new()
    }

    /// 向本次评估的上下文注册惰性数据提供者
    fn register_providers(&self, _context: &Context) {}

    fn register_conditions(&self, _registry: &ConditionRegistry) {}

    fn register_actions(&self, _registry: &ActionRegistry) {}

    /// 包自带的规则
    fn rules(&self) -> Vec<Rule> {
        Vec::new()
    }
}

/// 纯数据描述的包
#[derive(Debug, Clone)]
pub struct PackageDescriptor {
    name: String,
    namespaces: Vec<String>,
    required_packages: Vec<String>,
    available: bool,
    context: Map<String, Value>,
    rules: Vec<Rule>,
}

impl PackageDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespaces: Vec::new(),
            required_packages: Vec::new(),
            available: true,
            context: Map::new(),
            rules: Vec::new(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.push(namespace.into());
        self
    }

    pub fn requires(mut self, package: impl Into<String>) -> Self {
        self.required_packages.push(package.into());
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn context_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }
}

impl Package for PackageDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    fn required_packages(&self) -> &[String] {
        &self.required_packages
    }

    fn available(&self) -> bool {
        self.available
    }

    fn context(&self) -> Map<String, Value> {
        self.context.clone()
    }

    fn rules(&self) -> Vec<Rule> {
        self.rules.clone()
    }
}

/// 包注册表
pub struct PackageRegistry {
    conditions: Arc<ConditionRegistry>,
    actions: Arc<ActionRegistry>,
    /// 按注册顺序保存
    packages: RwLock<Vec<Arc<dyn Package>>>,
    /// 按加载顺序保存
    loaded: RwLock<Vec<String>>,
    namespace_cache: DashMap<String, Option<String>>,
    rules: RuleStore,
    /// 串行化加载与清空，保证每个包只物化一次
    load_lock: Mutex<()>,
}

impl PackageRegistry {
    /// 使用内置条件与动作注册表创建
    pub fn new() -> Self {
        Self::with_registries(
            Arc::new(ConditionRegistry::with_builtins()),
            Arc::new(ActionRegistry::with_builtins()),
        )
    }

    /// 使用指定的条件与动作注册表创建，包加载时向其中注册实现
    pub fn with_registries(
        conditions: Arc<ConditionRegistry>,
        actions: Arc<ActionRegistry>,
    ) -> Self {
        Self {
            conditions,
            actions,
            packages: RwLock::new(Vec::new()),
            loaded: RwLock::new(Vec::new()),
            namespace_cache: DashMap::new(),
            rules: RuleStore::new(),
            load_lock: Mutex::new(()),
        }
    }

    pub fn conditions(&self) -> &Arc<ConditionRegistry> {
        &self.conditions
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    /// 注册包，同名包原地替换
    pub fn register<P: Package + 'static>(&self, package: P) {
        self.register_arc(Arc::new(package));
    }

    ///
    /// 替换一个已加载的包时，依赖关系可能已变化，因此会清空全部加载状态，需重新调用
    /// [`PackageRegistry::load`]。
    pub fn register_arc(&self, package: Arc<dyn Package>) {
        let name = package.name().to_string();
        let replaced = {
            let mut packages = self.packages.write();
            match packages.iter().position(|p| p.name() == name) {
                Some(index) => {
                    packages[index] = package;
                    true
                }
                None => {
                    packages.push(package);
                    false
                }
            }
        };
        self.namespace_cache.clear();

        if replaced && self.is_loaded(&name) {
            warn!(package = %name, "已加载的包被替换，清空加载状态");
            self.clear();
        }
        info!(package = %name, "包已注册");
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// 已注册的包名（注册顺序）
    pub fn names(&self) -> Vec<String> {
        self.packages
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// 将完全限定名映射到包名（最长前缀匹配，长度相同时先注册者优先）
    pub fn map_namespace(&self, qualified_name: &str) -> Option<String> {
        if let Some(cached) = self.namespace_cache.get(qualified_name) {
            return cached.value().clone();
        }

        let mut best: Option<(usize, String)> = None;
        for package in self.packages.read().iter() {
            for namespace in package.namespaces() {
                if !qualified_name.starts_with(namespace.as_str()) {
                    continue;
                }
                if best.as_ref().is_none_or(|(len, _)| namespace.len() > *len) {
                    best = Some((namespace.len(), package.name().to_string()));
                }
            }
        }

        let result = best.map(|(_, name)| name);
        self.namespace_cache
            .insert(qualified_name.to_string(), result.clone());
        result
    }

    /// 解析包及其依赖的加载顺序（依赖在前）
    pub fn resolve(&self, name: &str) -> Result<Vec<String>> {
        let mut stack = Vec::new();
        let mut order = Vec::new();
        self.visit(name, &mut stack, &mut order)?;
        Ok(order)
    }

    /// 加载包
    ///
    /// `names` 为 None 时加载所有可用的包。各根包独立解析，失败的根包及其依赖链不会被加载；
    /// 多个根包共享的依赖只加载一次。返回本次请求中加载成功的包（含依赖）。
    #[instrument(skip(self))]
    pub fn load(&self, names: Option<&[&str]>) -> Vec<String> {
        let roots: Vec<String> = match names {
            Some(names) => names.iter().map(|n| n.to_string()).collect(),
            None => self
                .packages
                .read()
                .iter()
                .filter(|p| p.available())
                .map(|p| p.name().to_string())
                .collect(),
        };

        let _guard = self.load_lock.lock();
        let mut result: Vec<String> = Vec::new();
        for root in &roots {
            let order = match self.resolve(root) {
                Ok(order) => order,
                Err(e) => {
                    warn!(package = %root, error = %e, "包加载失败");
                    continue;
                }
            };

            for name in order {
                self.materialize(&name);
                if !result.contains(&name) {
                    result.push(name);
                }
            }
        }

        info!(loaded = ?result, "包加载完成");
        result
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.read().iter().any(|n| n == name)
    }

    /// 已加载的包（加载顺序）
    pub fn loaded(&self) -> Vec<String> {
        self.loaded.read().clone()
    }

    /// 合并所有已加载包的上下文数据，后加载的包覆盖先加载的同名键
    pub fn build_context(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for package in self.loaded_packages() {
            merged.extend(package.context());
        }
        merged
    }

    /// 为一次评估准备上下文：合并包数据并注册各包的数据提供者
    pub fn prepare_context(&self, context: &Context) {
        context.merge(Value::Object(self.build_context()));
        for package in self.loaded_packages() {
            package.register_providers(context);
        }
    }

    /// 已加载包提供的规则（按执行顺序）
    pub fn rules(&self) -> Vec<Rule> {
        self.rules.sorted()
    }

    pub fn rule_store(&self) -> &RuleStore {
        &self.rules
    }

    /// 清空已加载状态与包规则，保留已注册的包
    pub fn clear(&self) {
        let _guard = self.load_lock.lock();
        self.loaded.write().clear();
        self.rules.clear();
        debug!("已清空包加载状态");
    }

    /// 移除全部包
    pub fn reset(&self) {
        self.clear();
        self.packages.write().clear();
        self.namespace_cache.clear();
        debug!("包注册表已重置");
    }

    fn find(&self, name: &str) -> Option<Arc<dyn Package>> {
        self.packages
            .read()
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    fn loaded_packages(&self) -> Vec<Arc<dyn Package>> {
        self.loaded()
            .iter()
            .filter_map(|name| self.find(name))
            .collect()
    }

    fn visit(&self, name: &str, stack: &mut Vec<String>, order: &mut Vec<String>) -> Result<()> {
        if order.iter().any(|n| n == name) {
            return Ok(());
        }

        if let Some(start) = stack.iter().position(|n| n == name) {
            let mut chain = stack[start..].to_vec();
            chain.push(name.to_string());
            return Err(RuleError::CircularDependency { chain });
        }

        let package = self
            .find(name)
            .ok_or_else(|| RuleError::PackageNotFound(name.to_string()))?;
        if !package.available() {
            return Err(RuleError::PackageUnavailable(name.to_string()));
        }

        stack.push(name.to_string());
        for dependency in package.required_packages() {
            self.visit(dependency, stack, order)?;
        }
        stack.pop();

        order.push(name.to_string());
        Ok(())
    }

    /// 调用方需持有 `load_lock`
    fn materialize(&self, name: &str) {
        if self.is_loaded(name) {
            return;
        }
        let Some(package) = self.find(name) else {
            return;
        };

        package.register_conditions(&self.conditions);
        package.register_actions(&self.actions);
        let rules = package.rules();
        if !rules.is_empty() {
            if let Err(e) = self.rules.load_batch(rules) {
                warn!(package = %name, error = %e, "包规则加载失败");
            }
        }

        self.loaded.write().push(name.to_string());
        debug!(package = %name, "包已加载");
    }
}

impl Default for PackageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
