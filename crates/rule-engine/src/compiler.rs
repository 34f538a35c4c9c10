//! 规则编译器
//!
//! 解析并校验规则定义，提取规则用到的条件/动作类型。未知操作符和非法正则不会阻止编译
//! （运行时它们只会让条件不成立），但会记录为警告。

use crate::comparator::Comparator;
use crate::error::{Result, RuleError};
use crate::models::{ActionSpec, ConditionSpec, Rule};
use crate::operators::Operator;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::warn;

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 原始规则
    pub rule: Rule,
    /// 规则中使用的条件类型
    pub condition_types: BTreeSet<String>,
    /// 规则中使用的动作类型
    pub action_types: BTreeSet<String>,
    /// 非致命问题
    pub warnings: Vec<String>,
    /// 编译版本号（用于缓存失效）
    pub compile_version: u64,
}

impl CompiledRule {
    /// 获取规则 ID
    pub fn id(&self) -> &str {
        &self.rule.id
    }
}

/// 规则编译器
pub struct RuleCompiler {
    compile_version: u64,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self { compile_version: 0 }
    }

    /// 从 JSON 字符串编译规则
    pub fn compile_from_json(&mut self, json: &str) -> Result<CompiledRule> {
        let rule: Rule = serde_json::from_str(json)?;
        self.compile(rule)
    }

    /// 从 JSON 数组编译多条规则，任一失败则整体失败
    pub fn compile_all_from_json(&mut self, json: &str) -> Result<Vec<CompiledRule>> {
        let rules: Vec<Rule> = serde_json::from_str(json)?;
        rules.into_iter().map(|rule| self.compile(rule)).collect()
    }

    /// 编译规则
    pub fn compile(&mut self, rule: Rule) -> Result<CompiledRule> {
        self.validate_rule(&rule)?;

        let mut warnings = Vec::new();
        for (i, cond) in rule.conditions.iter().enumerate() {
            self.inspect_condition(cond, &format!("conditions[{}]", i), &mut warnings);
        }
        for warning in &warnings {
            warn!(rule_id = %rule.id, "{}", warning);
        }

        let condition_types = rule
            .conditions
            .iter()
            .map(|c| c.condition_type.clone())
            .collect();
        let action_types = rule
            .actions
            .iter()
            .map(|a| a.action_type.clone())
            .collect();

        self.compile_version += 1;

        Ok(CompiledRule {
            rule,
            condition_types,
            action_types,
            warnings,
            compile_version: self.compile_version,
        })
    }

    /// 验证规则结构
    fn validate_rule(&self, rule: &Rule) -> Result<()> {
        if rule.id.trim().is_empty() {
            return Err(RuleError::ParseError("规则 ID 不能为空".to_string()));
        }

        for (i, cond) in rule.conditions.iter().enumerate() {
            self.validate_condition(cond, &format!("{}.conditions[{}]", rule.id, i))?;
        }

        for (i, action) in rule.actions.iter().enumerate() {
            self.validate_action(action, &format!("{}.actions[{}]", rule.id, i))?;
        }

        Ok(())
    }

    fn validate_condition(&self, cond: &ConditionSpec, path: &str) -> Result<()> {
        if cond.condition_type.trim().is_empty() {
            return Err(RuleError::ValidationError(format!(
                "条件 '{}' 的类型不能为空",
                path
            )));
        }
        Ok(())
    }

    fn validate_action(&self, action: &ActionSpec, path: &str) -> Result<()> {
        if action.action_type.trim().is_empty() {
            return Err(RuleError::ValidationError(format!(
                "动作 '{}' 的类型不能为空",
                path
            )));
        }
        Ok(())
    }

    /// 检查操作符与期望值的兼容性，只产生警告
    fn inspect_condition(&self, cond: &ConditionSpec, path: &str, warnings: &mut Vec<String>) {
        let Some(operator) = cond.parsed_operator() else {
            warnings.push(format!(
                "条件 '{}' 的操作符 {} 无法识别，将始终不匹配",
                path,
                cond.operator.as_ref().unwrap_or(&Value::Null)
            ));
            return;
        };

        if operator == Operator::Regexp {
            let patterns: Vec<&Value> = match cond.expected() {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for pattern in patterns {
                let valid = pattern
                    .as_str()
                    .is_some_and(|p| Comparator::is_valid_regex(p));
                if !valid {
                    warnings.push(format!("条件 '{}' 的正则表达式无效: {}", path, pattern));
                }
            }
        }
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rule_json() -> &'static str {
        r#"
        {
            "id": "rule-001",
            "match_type": "any",
            "conditions": [
                {"type": "request_method", "value": "POST"},
                {"type": "cookie", "name": "session"},
                {"type": "cookie", "name": "theme", "value": "dark"}
            ],
            "actions": [
                {"type": "set_cache", "enabled": false, "locked": true}
            ]
        }
        "#
    }

    #[test]
    fn test_compile_from_json() {
        let mut compiler = RuleCompiler::new();
        let compiled = compiler.compile_from_json(sample_rule_json()).unwrap();

        assert_eq!(compiled.id(), "rule-001");
        assert_eq!(compiled.condition_types.len(), 2);
        assert!(compiled.condition_types.contains("cookie"));
        assert!(compiled.action_types.contains("set_cache"));
        assert!(compiled.warnings.is_empty());
    }

    #[test]
    fn test_compile_version() {
        let mut compiler = RuleCompiler::new();

        let compiled1 = compiler.compile_from_json(sample_rule_json()).unwrap();
        let compiled2 = compiler.compile_from_json(sample_rule_json()).unwrap();

        assert_eq!(compiled1.compile_version, 1);
        assert_eq!(compiled2.compile_version, 2);
    }

    #[test]
    fn test_validate_empty_id() {
        let mut compiler = RuleCompiler::new();
        let result = compiler.compile_from_json(r#"{"id": " "}"#);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("规则 ID 不能为空"));
    }

    #[test]
    fn test_validate_empty_condition_type() {
        let mut compiler = RuleCompiler::new();
        let json = r#"{"id": "r1", "conditions": [{"type": ""}]}"#;

        let result = compiler.compile_from_json(json);
        assert!(matches!(result, Err(RuleError::ValidationError(_))));
    }

    #[test]
    fn test_validate_empty_action_type() {
        let mut compiler = RuleCompiler::new();
        let json = r#"{"id": "r1", "actions": [{"type": ""}]}"#;

        assert!(compiler.compile_from_json(json).is_err());
    }

    #[test]
    fn test_unknown_operator_is_a_warning() {
        let mut compiler = RuleCompiler::new();
        let json = r#"
        {
            "id": "r1",
            "conditions": [{"type": "context", "name": "a", "operator": "between", "value": 1}]
        }
        "#;

        let compiled = compiler.compile_from_json(json).unwrap();
        assert_eq!(compiled.warnings.len(), 1);
        assert!(compiled.warnings[0].contains("无法识别"));
    }

    #[test]
    fn test_invalid_regex_is_a_warning() {
        let mut compiler = RuleCompiler::new();
        let json = r#"
        {
            "id": "r1",
            "conditions": [
                {"type": "context", "name": "a", "operator": "REGEXP", "value": "/[invalid/"},
                {"type": "context", "name": "b", "operator": "REGEXP", "value": "/^ok$/i"}
            ]
        }
        "#;

        let compiled = compiler.compile_from_json(json).unwrap();
        assert_eq!(compiled.warnings.len(), 1);
        assert!(compiled.warnings[0].contains("正则表达式无效"));
    }

    #[test]
    fn test_compile_all_from_json() {
        let mut compiler = RuleCompiler::new();
        let compiled = compiler
            .compile_all_from_json(r#"[{"id": "a"}, {"id": "b", "order": 5}]"#)
            .unwrap();
        assert_eq!(compiled.len(), 2);
        assert_eq!(compiled[1].rule.order, 5);

        assert!(compiler.compile_all_from_json(r#"[{"id": "a"}, {"id": ""}]"#).is_err());
    }
}
