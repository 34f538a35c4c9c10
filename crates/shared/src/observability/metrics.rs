//! 规则引擎指标
//!
//! 基于 metrics crate 门面记录。未安装 recorder 时所有记录都是空操作。

pub const RULE_EVALUATIONS_TOTAL: &str = "rule_evaluations_total";
pub const RULE_MATCHES_TOTAL: &str = "rule_matches_total";
pub const RULE_ACTIONS_EXECUTED_TOTAL: &str = "rule_actions_executed_total";
pub const RULE_ACTIONS_LOCKED_TOTAL: &str = "rule_actions_locked_total";
pub const RULE_ACTION_FAILURES_TOTAL: &str = "rule_action_failures_total";
pub const RULE_EVALUATION_DURATION_SECONDS: &str = "rule_evaluation_duration_seconds";

/// 注册指标描述
pub fn describe_metrics() {
    metrics::describe_counter!(RULE_EVALUATIONS_TOTAL, "Total number of rule evaluations");
    metrics::describe_counter!(RULE_MATCHES_TOTAL, "Total number of matched rules");
    metrics::describe_counter!(
        RULE_ACTIONS_EXECUTED_TOTAL,
        "Total number of successfully executed rule actions"
    );
    metrics::describe_counter!(
        RULE_ACTIONS_LOCKED_TOTAL,
        "Total number of actions skipped because their type was locked"
    );
    metrics::describe_counter!(
        RULE_ACTION_FAILURES_TOTAL,
        "Total number of rule actions that returned an error"
    );
    metrics::describe_histogram!(
        RULE_EVALUATION_DURATION_SECONDS,
        "Duration of one rule execution pass in seconds"
    );
}

/// 记录规则评估，status 为 matched / not_matched / skipped
#[inline]
pub fn record_rule_evaluation(status: &'static str) {
    metrics::counter!(RULE_EVALUATIONS_TOTAL, "status" => status).increment(1);
    if status == "matched" {
        metrics::counter!(RULE_MATCHES_TOTAL).increment(1);
    }
}

/// 记录动作执行成功
#[inline]
pub fn record_action_executed(action_type: &str) {
    metrics::counter!(RULE_ACTIONS_EXECUTED_TOTAL, "action_type" => action_type.to_string())
        .increment(1);
}

/// 记录被锁定而跳过的动作
#[inline]
pub fn record_action_locked(action_type: &str) {
    metrics::counter!(RULE_ACTIONS_LOCKED_TOTAL, "action_type" => action_type.to_string())
        .increment(1);
}

/// 记录动作执行失败
#[inline]
pub fn record_action_failure(action_type: &str) {
    metrics::counter!(RULE_ACTION_FAILURES_TOTAL, "action_type" => action_type.to_string())
        .increment(1);
}

/// 记录一次执行的耗时
#[inline]
pub fn record_pass_duration(duration_secs: f64) {
    metrics::histogram!(RULE_EVALUATION_DURATION_SECONDS).record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        describe_metrics();
        record_rule_evaluation("matched");
        record_rule_evaluation("skipped");
        record_action_executed("set_cache");
        record_action_locked("set_cache");
        record_action_failure("set_header");
        record_pass_duration(0.001);
    }
}
