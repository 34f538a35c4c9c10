//! 规则引擎领域模型

use crate::operators::{MatchType, Operator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

fn default_enabled() -> bool {
    true
}

/// 规则定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub metadata: RuleMetadata,
}

impl Rule {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            match_type: MatchType::All,
            order: 0,
            conditions: Vec::new(),
            actions: Vec::new(),
            metadata: RuleMetadata::default(),
        }
    }

    /// 使用随机 ID 创建规则
    pub fn anonymous() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn match_type(mut self, match_type: MatchType) -> Self {
        self.match_type = match_type;
        self
    }

    pub fn order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_condition(mut self, condition: ConditionSpec) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    /// 声明规则依赖的包
    pub fn requires_package(mut self, package: impl Into<String>) -> Self {
        self.metadata.required_packages.insert(package.into());
        self
    }
}

/// 规则元数据
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleMetadata {
    #[serde(default)]
    pub required_packages: BTreeSet<String>,
}

/// 条件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionSpec {
    #[serde(rename = "type")]
    pub condition_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 缺省时，按名称的条件退化为存在性检查
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// 非字符串值按 `=` 处理
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
}

impl ConditionSpec {
    pub fn new(condition_type: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.into(),
            name: None,
            value: None,
            operator: None,
            match_type: None,
            args: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(Value::String(operator.into()));
        self
    }

    pub fn match_type(mut self, match_type: MatchType) -> Self {
        self.match_type = Some(match_type);
        self
    }

    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// 解析后的操作符，未知操作符为 None
    pub fn parsed_operator(&self) -> Option<Operator> {
        Operator::from_spec(self.operator.as_ref())
    }

    /// 期望值，缺省为 null
    pub fn expected(&self) -> &Value {
        self.value.as_ref().unwrap_or(&Value::Null)
    }
}

/// 动作配置
///
/// 除 `type` 与 `locked` 外的键都保留在 `config` 中。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub locked: bool,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl ActionSpec {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            locked: false,
            config: Map::new(),
        }
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }
}

/// 单条规则的评估状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum RuleStatus {
    Matched,
    NotMatched,
    Skipped(SkipReason),
}

/// 规则被跳过的原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    PackageUnavailable(String),
}

/// 单条规则的评估结果
#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub status: RuleStatus,
    pub actions_executed: usize,
}

/// 一次执行的统计结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionStats {
    /// 遍历的规则数（包括跳过的）
    pub rules_processed: usize,
    pub rules_skipped: usize,
    pub rules_matched: usize,
    pub actions_executed: usize,
    pub outcomes: Vec<RuleOutcome>,
    pub evaluation_trace: Vec<String>,
    pub evaluation_time_ms: i64,
    /// 执行结束时的上下文快照
    pub context: Value,
}

impl ExecutionStats {
    /// 查找指定规则的结果
    pub fn outcome(&self, rule_id: &str) -> Option<&RuleOutcome> {
        self.outcomes.iter().find(|o| o.rule_id == rule_id)
    }
}
