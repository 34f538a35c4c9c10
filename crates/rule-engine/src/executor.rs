//! 规则执行器
//!
//! 按输入顺序遍历规则：跳过禁用的规则和依赖未允许包的规则，按匹配类型短路求值条件，
//! 匹配后按声明顺序执行动作。`locked` 动作执行成功后，同类型动作在本次执行的剩余部分
//! 都会被跳过；锁只在单次 [`RuleExecutor::execute`] 调用内有效。
//!
//! 条件和动作的错误不会中断执行：条件错误按不匹配处理，动作错误记录日志后继续。

use crate::action::ActionRegistry;
use crate::condition::ConditionRegistry;
use crate::context::Context;
use crate::models::{ActionSpec, ConditionSpec, ExecutionStats, Rule, RuleOutcome, RuleStatus, SkipReason};
use crate::package::PackageRegistry;
use crate::placeholder::PlaceholderResolver;
use crate::store::RuleStore;
use ruleflow_shared::config::EngineConfig;
use ruleflow_shared::observability::metrics as engine_metrics;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// 规则执行器
pub struct RuleExecutor {
    conditions: Arc<ConditionRegistry>,
    actions: Arc<ActionRegistry>,
    packages: Option<Arc<PackageRegistry>>,
    placeholders: PlaceholderResolver,
    /// 未显式传入时使用的允许包列表
    allowed_packages: Option<Vec<String>>,
    /// 是否记录详细评估追踪
    trace_enabled: bool,
}

impl RuleExecutor {
    /// 使用内置条件与动作创建
    pub fn new() -> Self {
        Self::with_registries(
            Arc::new(ConditionRegistry::with_builtins()),
            Arc::new(ActionRegistry::with_builtins()),
        )
    }

    pub fn with_registries(
        conditions: Arc<ConditionRegistry>,
        actions: Arc<ActionRegistry>,
    ) -> Self {
        Self {
            conditions,
            actions,
            packages: None,
            placeholders: PlaceholderResolver::new(),
            allowed_packages: None,
            trace_enabled: false,
        }
    }

    /// 按配置创建
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut executor = Self::new();
        executor.trace_enabled = config.trace_enabled;
        executor.placeholders = PlaceholderResolver::with_delimiter(&config.placeholder_delimiter);
        executor.allowed_packages = config.allowed_packages.clone();
        executor
    }

    /// 启用评估追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    /// 关联包注册表，并改用其条件与动作注册表
    pub fn with_packages(mut self, packages: Arc<PackageRegistry>) -> Self {
        self.conditions = packages.conditions().clone();
        self.actions = packages.actions().clone();
        self.packages = Some(packages);
        self
    }

    pub fn with_placeholders(mut self, placeholders: PlaceholderResolver) -> Self {
        self.placeholders = placeholders;
        self
    }

    pub fn with_allowed_packages(mut self, packages: Vec<String>) -> Self {
        self.allowed_packages = Some(packages);
        self
    }

    pub fn conditions(&self) -> &Arc<ConditionRegistry> {
        &self.conditions
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    pub fn placeholders(&self) -> &PlaceholderResolver {
        &self.placeholders
    }

    /// 执行规则
    ///
    /// `allowed_packages` 为 None 时依次回退到执行器配置的列表、包注册表中已加载的包。
    /// 规则按传入顺序执行，执行器本身不排序。
    #[instrument(skip_all, fields(rules = rules.len()))]
    pub fn execute(
        &self,
        rules: &[Rule],
        context: &Context,
        allowed_packages: Option<&[String]>,
    ) -> ExecutionStats {
        let start = Instant::now();
        let allowed = self.allowed_set(allowed_packages);
        let mut locks: HashSet<String> = HashSet::new();
        let mut stats = ExecutionStats::default();

        for rule in rules {
            stats.rules_processed += 1;

            let status = match self.skip_reason(rule, &allowed) {
                Some(reason) => {
                    debug!(rule_id = %rule.id, reason = ?reason, "跳过规则");
                    stats.rules_skipped += 1;
                    engine_metrics::record_rule_evaluation("skipped");
                    self.trace(&mut stats, || format!("{}: 跳过 ({:?})", rule.id, reason));
                    stats.outcomes.push(RuleOutcome {
                        rule_id: rule.id.clone(),
                        status: RuleStatus::Skipped(reason),
                        actions_executed: 0,
                    });
                    continue;
                }
                None if self.evaluate_conditions(rule, context, &mut stats) => RuleStatus::Matched,
                None => RuleStatus::NotMatched,
            };

            let mut executed = 0;
            if status == RuleStatus::Matched {
                stats.rules_matched += 1;
                engine_metrics::record_rule_evaluation("matched");
                debug!(rule_id = %rule.id, "规则匹配");
                executed = self.execute_actions(rule, context, &mut locks, &mut stats);
                stats.actions_executed += executed;
            } else {
                engine_metrics::record_rule_evaluation("not_matched");
            }

            stats.outcomes.push(RuleOutcome {
                rule_id: rule.id.clone(),
                status,
                actions_executed: executed,
            });
        }

        let elapsed = start.elapsed();
        engine_metrics::record_pass_duration(elapsed.as_secs_f64());
        stats.evaluation_time_ms = elapsed.as_millis() as i64;
        stats.context = context.snapshot();

        debug!(
            processed = stats.rules_processed,
            matched = stats.rules_matched,
            skipped = stats.rules_skipped,
            actions = stats.actions_executed,
            "规则执行完成"
        );
        stats
    }

    /// 按 `order` 与注册位置执行存储中的规则
    pub fn execute_store(
        &self,
        store: &RuleStore,
        context: &Context,
        allowed_packages: Option<&[String]>,
    ) -> ExecutionStats {
        self.execute(&store.sorted(), context, allowed_packages)
    }

    fn allowed_set(&self, allowed_packages: Option<&[String]>) -> HashSet<String> {
        if let Some(allowed) = allowed_packages.or(self.allowed_packages.as_deref()) {
            return allowed.iter().cloned().collect();
        }

        match &self.packages {
            Some(packages) => packages.loaded().into_iter().collect(),
            None => HashSet::new(),
        }
    }

    fn skip_reason(&self, rule: &Rule, allowed: &HashSet<String>) -> Option<SkipReason> {
        if !rule.enabled {
            return Some(SkipReason::Disabled);
        }

        rule.metadata
            .required_packages
            .iter()
            .find(|package| !allowed.contains(*package))
            .map(|package| SkipReason::PackageUnavailable(package.clone()))
    }

    /// 按匹配类型归约条件（短路求值）
    fn evaluate_conditions(&self, rule: &Rule, context: &Context, stats: &mut ExecutionStats) -> bool {
        let results = rule
            .conditions
            .iter()
            .enumerate()
            .map(|(i, spec)| self.evaluate_condition(rule, i, spec, context, stats));

        let matched = rule.match_type.reduce(results);
        self.trace(stats, || {
            format!(
                "{}: {} 组 (共 {} 个条件) => {}",
                rule.id,
                rule.match_type,
                rule.conditions.len(),
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            )
        });
        matched
    }

    fn evaluate_condition(
        &self,
        rule: &Rule,
        index: usize,
        spec: &ConditionSpec,
        context: &Context,
        stats: &mut ExecutionStats,
    ) -> bool {
        let condition = self.conditions.resolve(&spec.condition_type);
        let matched = match condition.matches(spec, context) {
            Ok(matched) => matched,
            Err(e) => {
                warn!(
                    rule_id = %rule.id,
                    condition_type = %spec.condition_type,
                    error = %e,
                    "条件评估失败，按不匹配处理"
                );
                false
            }
        };

        self.trace(stats, || {
            format!(
                "{}.conditions[{}]: {} {} => {}",
                rule.id,
                index,
                spec.condition_type,
                spec.name.as_deref().unwrap_or(""),
                if matched { "MATCHED" } else { "NOT_MATCHED" }
            )
        });
        matched
    }

    /// 按声明顺序执行动作，返回成功执行的数量
    fn execute_actions(
        &self,
        rule: &Rule,
        context: &Context,
        locks: &mut HashSet<String>,
        stats: &mut ExecutionStats,
    ) -> usize {
        let mut executed = 0;

        for (i, spec) in rule.actions.iter().enumerate() {
            if locks.contains(&spec.action_type) {
                debug!(rule_id = %rule.id, action_type = %spec.action_type, "动作类型已锁定，跳过");
                engine_metrics::record_action_locked(&spec.action_type);
                self.trace(stats, || {
                    format!("{}.actions[{}]: {} 已锁定", rule.id, i, spec.action_type)
                });
                continue;
            }

            let Some(action) = self.actions.resolve(&spec.action_type) else {
                debug!(rule_id = %rule.id, action_type = %spec.action_type, "未注册的动作类型，跳过");
                continue;
            };

            let resolved = self.resolve_placeholders(spec, context);
            match action.execute(&resolved, context) {
                Ok(()) => {
                    executed += 1;
                    engine_metrics::record_action_executed(&spec.action_type);
                    if spec.locked {
                        locks.insert(spec.action_type.clone());
                    }
                    self.trace(stats, || {
                        format!("{}.actions[{}]: {} 已执行", rule.id, i, spec.action_type)
                    });
                }
                Err(e) => {
                    warn!(
                        rule_id = %rule.id,
                        action_type = %spec.action_type,
                        error = %e,
                        "动作执行失败"
                    );
                    engine_metrics::record_action_failure(&spec.action_type);
                    self.trace(stats, || {
                        format!("{}.actions[{}]: {} 失败: {}", rule.id, i, spec.action_type, e)
                    });
                }
            }
        }

        executed
    }

    fn resolve_placeholders(&self, spec: &ActionSpec, context: &Context) -> ActionSpec {
        let mut resolved = spec.clone();
        for value in resolved.config.values_mut() {
            *value = self.placeholders.resolve_value(value, context);
        }
        resolved
    }

    fn trace<F>(&self, stats: &mut ExecutionStats, message: F)
    where
        F: FnOnce() -> String,
    {
        if self.trace_enabled {
            stats.evaluation_trace.push(message());
        }
    }
}

impl Default for RuleExecutor {
    fn default() -> Self {
        Self::new()
    }
}
