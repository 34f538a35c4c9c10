//! 评估上下文
//!
//! 以点号路径读写的树形数据，支持三类节点：映射、序列（整数段作为下标）和对象
//! （先查公开字段，再回退到属性访问器）。除直接 `set` 的数据外，还可以注册惰性
//! 数据提供者：首次访问其键时按依赖顺序加载，且每个上下文实例内最多调用一次。

use crate::error::{Result as RuleResult, RuleError};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// 对象节点的字段访问能力
pub trait PropertyAccess: Send + Sync {
    /// 公开字段
    fn field(&self, name: &str) -> Option<ContextValue>;

    /// 属性访问器钩子，字段查找失败后调用
    fn property(&self, _name: &str) -> Option<ContextValue> {
        None
    }

    /// 对象的 JSON 快照，用于比较和导出
    fn snapshot(&self) -> Value {
        Value::Null
    }
}

/// 上下文节点
#[derive(Clone)]
pub enum ContextValue {
    /// 标量：null / bool / number / string
    Scalar(Value),
    List(Vec<ContextValue>),
    Map(BTreeMap<String, ContextValue>),
    Object(Arc<dyn PropertyAccess>),
}

impl ContextValue {
    pub fn empty_map() -> Self {
        Self::Map(BTreeMap::new())
    }

    pub fn object<T: PropertyAccess + 'static>(object: T) -> Self {
        Self::Object(Arc::new(object))
    }

    /// 转换为 JSON，对象节点使用其快照
    pub fn to_json(&self) -> Value {
        match self {
            Self::Scalar(v) => v.clone(),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::Object(obj) => obj.snapshot(),
        }
    }

    /// 映射节点的键；其他节点返回空
    pub fn keys(&self) -> Vec<String> {
        match self {
            Self::Map(map) => map.keys().cloned().collect(),
            Self::Scalar(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// 沿路径段向下查找
    fn lookup(&self, segments: &[&str]) -> Option<ContextValue> {
        let Some((head, rest)) = segments.split_first() else {
            return Some(self.clone());
        };

        match self {
            Self::Map(map) => map.get(*head)?.lookup(rest),
            Self::List(items) => {
                let index: usize = head.parse().ok()?;
                items.get(index)?.lookup(rest)
            }
            Self::Object(obj) => obj
                .field(head)
                .or_else(|| obj.property(head))?
                .lookup(rest),
            Self::Scalar(v @ (Value::Object(_) | Value::Array(_))) => {
                Self::from(v.clone()).lookup(segments)
            }
            Self::Scalar(_) => None,
        }
    }

    /// 沿路径写入，途经的非容器节点被替换为映射
    fn insert(&mut self, segments: &[&str], value: ContextValue) {
        let Some((head, rest)) = segments.split_first() else {
            *self = value;
            return;
        };

        if let Self::List(items) = self {
            match head.parse::<usize>() {
                Ok(index) if index < items.len() => {
                    items[index].insert(rest, value);
                    return;
                }
                Ok(index) if index == items.len() => {
                    let mut child = Self::empty_map();
                    child.insert(rest, value);
                    items.push(child);
                    return;
                }
                _ => {}
            }
        }

        if !matches!(self, Self::Map(_)) {
            *self = Self::empty_map();
        }
        if let Self::Map(map) = self {
            map.entry(head.to_string())
                .or_insert_with(Self::empty_map)
                .insert(rest, value);
        }
    }

    /// 深度合并：映射逐键合并，其他情况覆盖
    fn merge(&mut self, other: ContextValue) {
        match (&mut *self, other) {
            (Self::Map(target), Self::Map(source)) => {
                for (key, value) in source {
                    match target.get_mut(&key) {
                        Some(existing) => existing.merge(value),
                        None => {
                            target.insert(key, value);
                        }
                    }
                }
            }
            (slot, other) => *slot = other,
        }
    }
}

impl fmt::Debug for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => write!(f, "{}", v),
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Map(map) => f.debug_map().entries(map).finish(),
            Self::Object(obj) => write!(f, "Object({})", obj.snapshot()),
        }
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
            scalar => Self::Scalar(scalar),
        }
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Scalar(Value::Bool(value))
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Scalar(Value::from(value))
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::Scalar(Value::String(value.to_string()))
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::Scalar(Value::String(value))
    }
}

impl From<Arc<dyn PropertyAccess>> for ContextValue {
    fn from(value: Arc<dyn PropertyAccess>) -> Self {
        Self::Object(value)
    }
}

type Provider = Box<dyn FnOnce() -> ContextValue + Send>;

enum ProviderState {
    Pending(Provider),
    Loading,
    Loaded,
}

struct ProviderEntry {
    dependencies: Vec<String>,
    state: ProviderState,
}

/// 评估上下文
pub struct Context {
    data: RwLock<ContextValue>,
    providers: Mutex<HashMap<String, ProviderEntry>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(ContextValue::empty_map()),
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// 从 JSON 值创建，非对象值被忽略
    pub fn from_value(data: Value) -> Self {
        let context = Self::new();
        context.merge(data);
        context
    }

    /// 从 JSON 字符串创建
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let data: Value = serde_json::from_str(json)?;
        Ok(Self::from_value(data))
    }

    /// 写入路径（如 "cache.enabled"）
    pub fn set(&self, path: &str, value: impl Into<ContextValue>) {
        let segments: Vec<&str> = path.split('.').collect();
        self.data.write().insert(&segments, value.into());
    }

    /// 写入路径，路径为空或包含空段时返回错误
    pub fn try_set(&self, path: &str, value: impl Into<ContextValue>) -> RuleResult<()> {
        if path.split('.').any(|segment| segment.trim().is_empty()) {
            return Err(RuleError::InvalidPath(path.to_string()));
        }
        self.set(path, value);
        Ok(())
    }

    /// 读取路径，支持 "items.0.name" 形式的下标访问
    ///
    /// 顶层段对应未加载的数据提供者时，会先触发加载。
    pub fn get(&self, path: &str) -> Option<ContextValue> {
        let segments: Vec<&str> = path.split('.').collect();
        self.ensure_loaded(segments[0]);
        self.data.read().lookup(&segments)
    }

    /// 读取路径并转换为 JSON
    pub fn get_value(&self, path: &str) -> Option<Value> {
        self.get(path).map(|v| v.to_json())
    }

    /// 读取路径，缺失时返回默认值
    pub fn get_or(&self, path: &str, default: Value) -> Value {
        self.get_value(path).unwrap_or(default)
    }

    /// 路径是否存在（值为 null 也视为存在）
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// 在根节点深度合并一个映射
    pub fn merge(&self, value: impl Into<ContextValue>) {
        match value.into() {
            map @ ContextValue::Map(_) => self.data.write().merge(map),
            other => warn!(value = ?other, "忽略非映射的上下文合并"),
        }
    }

    /// 注册惰性数据提供者
    ///
    /// `provider` 返回的映射在加载时合并到根节点；`dependencies` 中的提供者会先被加载。
    /// 已加载的键不会被重新注册。
    pub fn register_provider<F, R>(&self, key: &str, dependencies: &[&str], provider: F)
    where
        F: FnOnce() -> R + Send + 'static,
        R: Into<ContextValue>,
    {
        let mut providers = self.providers.lock();
        if let Some(entry) = providers.get(key) {
            if !matches!(entry.state, ProviderState::Pending(_)) {
                debug!(key, "数据提供者已加载，忽略重复注册");
                return;
            }
        }

        providers.insert(
            key.to_string(),
            ProviderEntry {
                dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
                state: ProviderState::Pending(Box::new(move || provider().into())),
            },
        );
    }

    /// 加载数据提供者（先递归加载依赖）
    pub fn load(&self, key: &str) {
        let (provider, dependencies) = {
            let mut providers = self.providers.lock();
            let Some(entry) = providers.get_mut(key) else {
                return;
            };

            match std::mem::replace(&mut entry.state, ProviderState::Loading) {
                ProviderState::Pending(provider) => (provider, entry.dependencies.clone()),
                ProviderState::Loading => {
                    warn!(key, "数据提供者存在循环依赖，跳过");
                    return;
                }
                ProviderState::Loaded => {
                    entry.state = ProviderState::Loaded;
                    return;
                }
            }
        };

        for dependency in &dependencies {
            self.load(dependency);
        }

        debug!(key, "加载上下文数据提供者");
        self.merge(provider());

        if let Some(entry) = self.providers.lock().get_mut(key) {
            entry.state = ProviderState::Loaded;
        }
    }

    /// 是否注册了指定键的数据提供者
    pub fn has_provider(&self, key: &str) -> bool {
        self.providers.lock().contains_key(key)
    }

    /// 数据提供者是否已加载
    pub fn is_loaded(&self, key: &str) -> bool {
        self.providers
            .lock()
            .get(key)
            .is_some_and(|entry| matches!(entry.state, ProviderState::Loaded))
    }

    /// 当前已物化数据的 JSON 快照（不会触发加载）
    pub fn snapshot(&self) -> Value {
        self.data.read().to_json()
    }

    fn ensure_loaded(&self, key: &str) {
        let pending = self
            .providers
            .lock()
            .get(key)
            .is_some_and(|entry| matches!(entry.state, ProviderState::Pending(_)));

        if pending {
            self.load(key);
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers: Vec<String> = self.providers.lock().keys().cloned().collect();
        f.debug_struct("Context")
            .field("data", &*self.data.read())
            .field("providers", &providers)
            .finish()
    }
}
