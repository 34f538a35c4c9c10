//! 规则存储管理
//!
//! 使用 DashMap 提供线程安全的规则缓存，支持规则的加载、更新、删除和批量操作。
//! 同 ID 的规则原地替换，保留首次注册时的位置，[`RuleStore::sorted`] 按 `order`
//! 升序、注册位置次序返回规则。

use crate::compiler::{CompiledRule, RuleCompiler};
use crate::error::{Result, RuleError};
use crate::models::Rule;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, instrument, warn};

#[derive(Clone)]
struct StoredRule {
    sequence: u64,
    compiled: CompiledRule,
}

/// 规则存储
#[derive(Clone)]
pub struct RuleStore {
    /// 编译后的规则缓存
    rules: Arc<DashMap<String, StoredRule>>,
    /// 规则编译器
    compiler: Arc<parking_lot::Mutex<RuleCompiler>>,
    next_sequence: Arc<AtomicU64>,
}

impl RuleStore {
    /// 创建新的规则存储
    pub fn new() -> Self {
        Self {
            rules: Arc::new(DashMap::new()),
            compiler: Arc::new(parking_lot::Mutex::new(RuleCompiler::new())),
            next_sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 获取当前存储的规则数量
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 检查存储是否为空
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 加载规则（从 Rule 对象），同 ID 规则原地替换
    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub fn load(&self, rule: Rule) -> Result<()> {
        let compiled = {
            let mut compiler = self.compiler.lock();
            compiler.compile(rule)?
        };

        let rule_id = self.insert(compiled);
        info!("规则已加载: {}", rule_id);
        Ok(())
    }

    /// 加载规则（从 JSON 字符串）
    #[instrument(skip(self, json))]
    pub fn load_from_json(&self, json: &str) -> Result<String> {
        let compiled = {
            let mut compiler = self.compiler.lock();
            compiler.compile_from_json(json)?
        };

        let rule_id = self.insert(compiled);
        info!("规则已加载: {}", rule_id);
        Ok(rule_id)
    }

    /// 更新规则
    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    pub fn update(&self, rule: Rule) -> Result<()> {
        let rule_id = rule.id.clone();

        if !self.rules.contains_key(&rule_id) {
            warn!("更新不存在的规则: {}", rule_id);
            return Err(RuleError::RuleNotFound(rule_id));
        }

        self.load(rule)
    }

    /// 删除规则
    #[instrument(skip(self))]
    pub fn delete(&self, rule_id: &str) -> Result<()> {
        if self.rules.remove(rule_id).is_some() {
            info!("规则已删除: {}", rule_id);
            Ok(())
        } else {
            warn!("删除不存在的规则: {}", rule_id);
            Err(RuleError::RuleNotFound(rule_id.to_string()))
        }
    }

    /// 获取规则
    pub fn get(&self, rule_id: &str) -> Option<CompiledRule> {
        self.rules.get(rule_id).map(|r| r.compiled.clone())
    }

    /// 检查规则是否存在
    pub fn contains(&self, rule_id: &str) -> bool {
        self.rules.contains_key(rule_id)
    }

    /// 获取所有规则 ID（按执行顺序）
    pub fn list_ids(&self) -> Vec<String> {
        self.sorted().into_iter().map(|r| r.id).collect()
    }

    /// 获取所有编译后的规则（按注册位置）
    pub fn list_all(&self) -> Vec<CompiledRule> {
        let mut entries: Vec<StoredRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries.into_iter().map(|entry| entry.compiled).collect()
    }

    /// 按执行顺序返回规则：`order` 升序，相同时按注册位置
    pub fn sorted(&self) -> Vec<Rule> {
        let mut entries: Vec<(i64, u64, Rule)> = self
            .rules
            .iter()
            .map(|r| (r.compiled.rule.order, r.sequence, r.compiled.rule.clone()))
            .collect();
        entries.sort_by_key(|(order, sequence, _)| (*order, *sequence));
        entries.into_iter().map(|(_, _, rule)| rule).collect()
    }

    /// 批量加载规则
    #[instrument(skip(self, rules))]
    pub fn load_batch(&self, rules: Vec<Rule>) -> Result<Vec<String>> {
        let mut loaded_ids = Vec::with_capacity(rules.len());
        let mut errors = Vec::new();

        for rule in rules {
            let rule_id = rule.id.clone();
            match self.load(rule) {
                Ok(()) => loaded_ids.push(rule_id),
                Err(e) => errors.push((rule_id, e)),
            }
        }

        if !errors.is_empty() {
            warn!("批量加载部分失败: {:?}", errors);
        }

        info!("批量加载完成: {} 成功, {} 失败", loaded_ids.len(), errors.len());
        Ok(loaded_ids)
    }

    /// 清空所有规则
    #[instrument(skip(self))]
    pub fn clear(&self) {
        let count = self.rules.len();
        self.rules.clear();
        info!("已清空 {} 条规则", count);
    }

    /// 获取规则统计信息
    pub fn stats(&self) -> RuleStoreStats {
        let mut stats = RuleStoreStats::default();
        for entry in self.rules.iter() {
            let rule = &entry.compiled.rule;
            stats.rules_count += 1;
            if rule.enabled {
                stats.enabled_count += 1;
            }
            stats.total_conditions += rule.conditions.len();
            stats.total_actions += rule.actions.len();
        }

        if stats.rules_count > 0 {
            stats.avg_conditions_per_rule =
                stats.total_conditions as f64 / stats.rules_count as f64;
        }
        stats
    }

    fn insert(&self, compiled: CompiledRule) -> String {
        let rule_id = compiled.id().to_string();
        match self.rules.entry(rule_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                entry.get_mut().compiled = compiled;
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
                entry.insert(StoredRule { sequence, compiled });
            }
        }
        rule_id
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 规则存储统计信息
#[derive(Debug, Clone, Default)]
pub struct RuleStoreStats {
    /// 规则总数
    pub rules_count: usize,
    /// 启用的规则数
    pub enabled_count: usize,
    /// 所有规则的条件总数
    pub total_conditions: usize,
    /// 所有规则的动作总数
    pub total_actions: usize,
    /// 平均每条规则的条件数
    pub avg_conditions_per_rule: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionSpec, ConditionSpec};

    fn sample_rule(id: &str, order: i64) -> Rule {
        Rule::new(id)
            .order(order)
            .with_condition(ConditionSpec::new("request_method").value("POST"))
            .with_condition(ConditionSpec::new("cookie").name("session"))
            .with_action(ActionSpec::new("set_cache").with("enabled", false))
    }

    fn sample_rule_json(id: &str) -> String {
        format!(
            r#"
            {{
                "id": "{}",
                "order": 3,
                "conditions": [
                    {{"type": "header", "name": "X-Debug"}}
                ],
                "actions": [
                    {{"type": "set_header", "name": "X-Debug", "value": "on"}}
                ]
            }}
            "#,
            id
        )
    }

    #[test]
    fn test_load_rule() {
        let store = RuleStore::new();
        store.load(sample_rule("rule-001", 0)).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.contains("rule-001"));
    }

    #[test]
    fn test_load_from_json() {
        let store = RuleStore::new();
        let rule_id = store.load_from_json(&sample_rule_json("rule-001")).unwrap();

        assert_eq!(rule_id, "rule-001");
        assert_eq!(store.get("rule-001").unwrap().rule.order, 3);
    }

    #[test]
    fn test_load_invalid_json() {
        let store = RuleStore::new();
        assert!(store.load_from_json("{not json").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_get_nonexistent_rule() {
        let store = RuleStore::new();
        assert!(store.get("nonexistent").is_none());
    }

    #[test]
    fn test_update_rule() {
        let store = RuleStore::new();
        store.load(sample_rule("rule-001", 0)).unwrap();

        store.update(sample_rule("rule-001", 0).disabled()).unwrap();

        assert!(!store.get("rule-001").unwrap().rule.enabled);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_nonexistent_rule() {
        let store = RuleStore::new();
        let result = store.update(sample_rule("rule-001", 0));
        assert!(matches!(result, Err(RuleError::RuleNotFound(_))));
    }

    #[test]
    fn test_delete_rule() {
        let store = RuleStore::new();
        store.load(sample_rule("rule-001", 0)).unwrap();

        store.delete("rule-001").unwrap();

        assert!(!store.contains("rule-001"));
        assert!(store.delete("rule-001").is_err());
    }

    #[test]
    fn test_sorted_by_order_then_registration() {
        let store = RuleStore::new();
        store.load(sample_rule("late", 10)).unwrap();
        store.load(sample_rule("b", 0)).unwrap();
        store.load(sample_rule("a", 0)).unwrap();
        store.load(sample_rule("early", -5)).unwrap();

        assert_eq!(store.list_ids(), vec!["early", "b", "a", "late"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let store = RuleStore::new();
        store.load(sample_rule("first", 0)).unwrap();
        store.load(sample_rule("second", 0)).unwrap();

        store.load(sample_rule("first", 0).disabled()).unwrap();

        let sorted = store.sorted();
        assert_eq!(sorted[0].id, "first");
        assert!(!sorted[0].enabled);
        assert_eq!(sorted[1].id, "second");
    }

    #[test]
    fn test_load_batch_skips_invalid() {
        let store = RuleStore::new();
        let rules = vec![
            sample_rule("rule-001", 0),
            Rule::new(""),
            sample_rule("rule-003", 0),
        ];

        let loaded = store.load_batch(rules).unwrap();

        assert_eq!(loaded, vec!["rule-001", "rule-003"]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_clear() {
        let store = RuleStore::new();
        store.load(sample_rule("rule-001", 0)).unwrap();
        store.load(sample_rule("rule-002", 0)).unwrap();

        store.clear();

        assert!(store.is_empty());
    }

    #[test]
    fn test_stats() {
        let store = RuleStore::new();
        store.load(sample_rule("rule-001", 0)).unwrap();
        store.load(sample_rule("rule-002", 0).disabled()).unwrap();

        let stats = store.stats();

        assert_eq!(stats.rules_count, 2);
        assert_eq!(stats.enabled_count, 1);
        assert_eq!(stats.total_conditions, 4);
        assert_eq!(stats.total_actions, 2);
        assert_eq!(stats.avg_conditions_per_rule, 2.0);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let store = RuleStore::new();
        let store_clone = store.clone();

        let handle = thread::spawn(move || {
            for i in 0..100 {
                store_clone.load(sample_rule(&format!("rule-{}", i), 0)).unwrap();
            }
        });

        for i in 100..200 {
            store.load(sample_rule(&format!("rule-{}", i), 0)).unwrap();
        }

        handle.join().unwrap();

        assert_eq!(store.len(), 200);
        assert_eq!(store.sorted().len(), 200);
    }
}
