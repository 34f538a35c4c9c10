//! 比较器
//!
//! 实现各操作符的匹配语义与类型转换规则。所有比较都不会失败：
//! 类型不兼容、正则非法、未知操作符一律返回 false。

use crate::operators::{MatchType, Operator};
use dashmap::DashMap;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::sync::LazyLock;

/// 正则缓存容量，超出后整体清空
const REGEX_CACHE_CAPACITY: usize = 512;

/// 已编译正则缓存（编译失败的模式同样缓存为 None，避免重复编译）
static REGEX_CACHE: LazyLock<DashMap<String, Option<Regex>>> = LazyLock::new(DashMap::new);

/// 比较器
pub struct Comparator;

impl Comparator {
    /// 按操作符字符串比较
    ///
    /// 操作符大小写、首尾空白不敏感，未知操作符返回 false。
    pub fn compare(actual: &Value, expected: &Value, operator: &str) -> bool {
        match Operator::parse(operator) {
            Some(op) => Self::evaluate(actual, expected, op),
            None => false,
        }
    }

    /// 多值比较
    ///
    /// 当 `expected` 为数组且指定了 `match_type` 时，对每个元素单独比较后按匹配类型归约；
    /// 否则退化为一次普通比较（IN 等操作符自行处理数组）。
    pub fn compare_multi(
        actual: &Value,
        expected: &Value,
        operator: Option<Operator>,
        match_type: Option<MatchType>,
    ) -> bool {
        let Some(op) = operator else {
            return false;
        };

        match (expected, match_type) {
            (Value::Array(items), Some(match_type)) => {
                match_type.reduce(items.iter().map(|item| Self::evaluate(actual, item, op)))
            }
            _ => Self::evaluate(actual, expected, op),
        }
    }

    /// 按已解析的操作符比较
    pub fn evaluate(actual: &Value, expected: &Value, operator: Operator) -> bool {
        match operator {
            Operator::Eq => Self::loose_eq(actual, expected),
            Operator::Neq => !Self::loose_eq(actual, expected),
            Operator::Gt => Self::numeric(actual, expected, |a, b| a > b),
            Operator::Gte => Self::numeric(actual, expected, |a, b| a >= b),
            Operator::Lt => Self::numeric(actual, expected, |a, b| a < b),
            Operator::Lte => Self::numeric(actual, expected, |a, b| a <= b),
            Operator::Like => Self::like(actual, expected),
            Operator::NotLike => !Self::like(actual, expected),
            Operator::Regexp => Self::regexp(actual, expected),
            Operator::In => Self::in_list(actual, expected),
            Operator::NotIn => !Self::in_list(actual, expected),
            Operator::Exists => Self::exists(actual),
            Operator::NotExists => !Self::exists(actual),
            Operator::Is => Self::is_truthy(actual) == Self::is_truthy(expected),
            Operator::IsNot => Self::is_truthy(actual) != Self::is_truthy(expected),
        }
    }

    /// 字符串归一化后的相等比较
    pub fn loose_eq(actual: &Value, expected: &Value) -> bool {
        Self::stringify(actual) == Self::stringify(expected)
    }

    /// 值的字符串形式
    ///
    /// 布尔值转为 "1" / ""，null 转为 ""，整数值的浮点数不带小数部分，
    /// 数组和对象使用紧凑 JSON。
    pub fn stringify(value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::Bool(true) => "1".to_string(),
            Value::Bool(false) => String::new(),
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    n.to_string()
                } else {
                    let f = n.as_f64().unwrap_or_default();
                    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
                        format!("{}", f as i64)
                    } else {
                        format!("{}", f)
                    }
                }
            }
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// 尝试将值视为数字（数字或数字字符串）
    pub fn as_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => {
                let s = s.trim();
                let numeric_chars = s
                    .chars()
                    .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
                if s.is_empty() || !numeric_chars || !s.chars().any(|c| c.is_ascii_digit()) {
                    return None;
                }
                s.parse::<f64>().ok().filter(|f| f.is_finite())
            }
            _ => None,
        }
    }

    /// 存在性判断（EXISTS 语义）
    ///
    /// 空字符串、null、空数组、空对象和 false 视为不存在；0 与 "0" 视为存在。
    pub fn exists(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::String(s) => !s.is_empty(),
            Value::Array(arr) => !arr.is_empty(),
            Value::Object(obj) => !obj.is_empty(),
            Value::Number(_) => true,
        }
    }

    /// 布尔转换（IS 语义）
    ///
    /// 与 [`Comparator::exists`] 不同，0 与 "0" 在这里为假。
    pub fn is_truthy(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            Value::String(s) => !(s.is_empty() || s == "0"),
            Value::Array(arr) => !arr.is_empty(),
            Value::Object(obj) => !obj.is_empty(),
        }
    }

    /// 通配符匹配：`*` 匹配任意长度，`?` 匹配单个字符，大小写不敏感
    pub fn glob_match(subject: &str, pattern: &str) -> bool {
        let key = format!("glob:{}", pattern);
        cached_regex(key, || {
            let escaped = regex::escape(pattern)
                .replace(r"\*", ".*")
                .replace(r"\?", ".");
            RegexBuilder::new(&format!("^{}$", escaped))
                .case_insensitive(true)
                .dot_matches_new_line(true)
                .build()
                .ok()
        })
        .is_some_and(|re| re.is_match(subject))
    }

    /// 带分隔符的正则匹配，如 `/^abc$/i`；非法模式返回 false
    pub fn regex_match(subject: &str, literal: &str) -> bool {
        let key = format!("re:{}", literal);
        cached_regex(key, || compile_delimited(literal))
            .is_some_and(|re| re.is_match(subject))
    }

    /// 正则字面量能否编译
    pub fn is_valid_regex(literal: &str) -> bool {
        let key = format!("re:{}", literal);
        cached_regex(key, || compile_delimited(literal)).is_some()
    }

    fn numeric<F>(actual: &Value, expected: &Value, cmp: F) -> bool
    where
        F: Fn(f64, f64) -> bool,
    {
        match (Self::as_number(actual), Self::as_number(expected)) {
            (Some(a), Some(b)) => cmp(a, b),
            _ => false,
        }
    }

    fn like(actual: &Value, expected: &Value) -> bool {
        Self::glob_match(&Self::stringify(actual), &Self::stringify(expected))
    }

    fn regexp(actual: &Value, expected: &Value) -> bool {
        match expected {
            Value::String(literal) => Self::regex_match(&Self::stringify(actual), literal),
            _ => false,
        }
    }

    fn in_list(actual: &Value, expected: &Value) -> bool {
        match expected {
            Value::Array(items) => items.iter().any(|item| Self::loose_eq(actual, item)),
            scalar => Self::loose_eq(actual, scalar),
        }
    }
}

fn cached_regex<F>(key: String, build: F) -> Option<Regex>
where
    F: FnOnce() -> Option<Regex>,
{
    if let Some(entry) = REGEX_CACHE.get(&key) {
        return entry.value().clone();
    }

    let compiled = build();
    if REGEX_CACHE.len() >= REGEX_CACHE_CAPACITY {
        REGEX_CACHE.clear();
    }
    REGEX_CACHE.insert(key, compiled.clone());
    compiled
}

/// 解析 `<delim>pattern<delim>flags` 形式的正则字面量
fn compile_delimited(literal: &str) -> Option<Regex> {
    let literal = literal.trim_start();
    let open = literal.chars().next()?;
    if open.is_alphanumeric() || open.is_whitespace() || open == '\\' {
        return None;
    }

    let close = match open {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        '<' => '>',
        c => c,
    };

    let rest = &literal[open.len_utf8()..];
    let end = rest.rfind(close)?;
    let pattern = &rest[..end];
    let flags = rest[end + close.len_utf8()..].trim_end();

    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            'U' => {
                builder.swap_greed(true);
            }
            'u' | 'D' => {}
            _ => return None,
        }
    }

    builder.build().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equality_is_string_normalized() {
        assert!(Comparator::compare(&json!(10), &json!("10"), "="));
        assert!(Comparator::compare(&json!(true), &json!("1"), "=="));
        assert!(Comparator::compare(&json!(false), &json!(""), "="));
        assert!(Comparator::compare(&json!(null), &json!(""), "="));
        assert!(Comparator::compare(&json!(5.0), &json!("5"), "="));
        assert!(!Comparator::compare(&json!("1.0"), &json!("1"), "="));
        assert!(Comparator::compare(&json!("a"), &json!("b"), "<>"));
        assert!(!Comparator::compare(&json!("a"), &json!("a"), "!="));
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(Comparator::compare(&json!(10), &json!(5), ">"));
        assert!(Comparator::compare(&json!("10"), &json!(10), ">="));
        assert!(Comparator::compare(&json!(" 3 "), &json!("4.5"), "<"));
        assert!(Comparator::compare(&json!(4), &json!(4), "<="));
        assert!(!Comparator::compare(&json!(4), &json!(5), ">"));
    }

    #[test]
    fn test_non_numeric_ordering_is_false() {
        assert!(!Comparator::compare(&json!("abc"), &json!(5), ">"));
        assert!(!Comparator::compare(&json!("abc"), &json!(5), "<"));
        assert!(!Comparator::compare(&json!(true), &json!(0), ">"));
        assert!(!Comparator::compare(&json!("inf"), &json!(0), ">"));
        assert!(!Comparator::compare(&json!([1, 2]), &json!(0), ">="));
    }

    #[test]
    fn test_like() {
        assert!(Comparator::compare(&json!("test123"), &json!("test*"), "LIKE"));
        assert!(Comparator::compare(&json!("TEST123"), &json!("test*"), "like"));
        assert!(Comparator::compare(&json!("cat"), &json!("c?t"), "LIKE"));
        assert!(!Comparator::compare(&json!("coat"), &json!("c?t"), "LIKE"));
        assert!(Comparator::compare(&json!("a.b"), &json!("a.b"), "LIKE"));
        assert!(!Comparator::compare(&json!("axb"), &json!("a.b"), "LIKE"));
        assert!(Comparator::compare(&json!("hello"), &json!("*x*"), "NOT LIKE"));
    }

    #[test]
    fn test_regexp() {
        assert!(Comparator::compare(&json!("order-123"), &json!("/^order-\\d+$/"), "REGEXP"));
        assert!(Comparator::compare(&json!("ABC"), &json!("/abc/i"), "regexp"));
        assert!(Comparator::compare(&json!("a/b"), &json!("#a/b#"), "REGEXP"));
        assert!(!Comparator::compare(&json!("ABC"), &json!("/abc/"), "REGEXP"));
    }

    #[test]
    fn test_invalid_regexp_is_false() {
        assert!(!Comparator::compare(&json!("abc"), &json!("/[abc/"), "REGEXP"));
        assert!(!Comparator::compare(&json!("abc"), &json!("abc"), "REGEXP"));
        assert!(!Comparator::compare(&json!("abc"), &json!("/abc/q"), "REGEXP"));
        assert!(!Comparator::compare(&json!("abc"), &json!(42), "REGEXP"));
        assert!(!Comparator::compare(&json!("abc"), &json!(""), "REGEXP"));
    }

    #[test]
    fn test_in() {
        assert!(!Comparator::compare(&json!("grape"), &json!(["apple", "banana"]), "IN"));
        assert!(Comparator::compare(&json!("apple"), &json!(["apple", "banana"]), "IN"));
        assert!(Comparator::compare(&json!(2), &json!(["1", "2"]), "in"));
        assert!(Comparator::compare(&json!("solo"), &json!("solo"), "IN"));
        assert!(Comparator::compare(&json!("grape"), &json!(["apple"]), "NOT IN"));
    }

    #[test]
    fn test_exists_and_is_are_distinct() {
        assert!(Comparator::compare(&json!("0"), &json!(null), "EXISTS"));
        assert!(Comparator::compare(&json!(0), &json!(null), "EXISTS"));
        assert!(!Comparator::compare(&json!(""), &json!(null), "EXISTS"));
        assert!(!Comparator::compare(&json!(null), &json!(null), "EXISTS"));
        assert!(!Comparator::compare(&json!([]), &json!(null), "EXISTS"));
        assert!(!Comparator::compare(&json!(false), &json!(null), "EXISTS"));
        assert!(Comparator::compare(&json!(""), &json!(null), "NOT EXISTS"));

        assert!(Comparator::compare(&json!("0"), &json!(false), "IS"));
        assert!(Comparator::compare(&json!(0), &json!(false), "IS"));
        assert!(Comparator::compare(&json!("yes"), &json!(true), "IS"));
        assert!(Comparator::compare(&json!([]), &json!(true), "IS NOT"));
    }

    #[test]
    fn test_unknown_operator_is_false() {
        assert!(!Comparator::compare(&json!(1), &json!(1), "BETWEEN"));
        assert!(!Comparator::compare(&json!(1), &json!(1), ""));
    }

    #[test]
    fn test_never_panics_on_odd_inputs() {
        let values = [
            json!(null),
            json!(true),
            json!(-1.5),
            json!("x"),
            json!([1, {"a": 2}]),
            json!({"k": [null]}),
            json!("/(/"),
        ];
        let operators = [
            "=", "!=", ">", ">=", "<", "<=", "LIKE", "NOT LIKE", "REGEXP", "IN", "NOT IN",
            "EXISTS", "NOT EXISTS", "IS", "IS NOT", "??",
        ];
        for actual in &values {
            for expected in &values {
                for op in operators {
                    let _ = Comparator::compare(actual, expected, op);
                }
            }
        }
    }

    #[test]
    fn test_multi_value_comparison() {
        let expected = json!(["GET", "POST"]);
        assert!(Comparator::compare_multi(
            &json!("POST"),
            &expected,
            Some(Operator::Eq),
            Some(MatchType::Any)
        ));
        assert!(!Comparator::compare_multi(
            &json!("POST"),
            &expected,
            Some(Operator::Eq),
            Some(MatchType::All)
        ));
        assert!(Comparator::compare_multi(
            &json!("PUT"),
            &expected,
            Some(Operator::Eq),
            Some(MatchType::None)
        ));
        // 未指定匹配类型时整体比较
        assert!(!Comparator::compare_multi(&json!("POST"), &expected, Some(Operator::Eq), None));
        assert!(!Comparator::compare_multi(&json!("POST"), &expected, None, Some(MatchType::Any)));
    }

    #[test]
    fn test_stringify() {
        assert_eq!(Comparator::stringify(&json!(1.5)), "1.5");
        assert_eq!(Comparator::stringify(&json!(2.0)), "2");
        assert_eq!(Comparator::stringify(&json!(true)), "1");
        assert_eq!(Comparator::stringify(&json!([1, 2])), "[1,2]");
    }
}
