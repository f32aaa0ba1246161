//! Operator predicate registry for check/assert expressions.

use serde::{Deserialize, Serialize};

use crate::error::CompileError;

/// Comparison operator, one of the 14 recognized symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Comparator {
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
    Equals,
    NotEquals,
    /// Right contains left.
    IsAt,
    IsNotAt,
    /// Right is a pattern tested against left.
    Matches,
    NotMatches,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
}

impl Comparator {
    /// Look up a comparator by its operator symbol.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "<" => Some(Comparator::Less),
            ">" => Some(Comparator::Greater),
            "<=" => Some(Comparator::LessOrEqual),
            ">=" => Some(Comparator::GreaterOrEqual),
            "==" => Some(Comparator::Equals),
            "!=" => Some(Comparator::NotEquals),
            "=@" => Some(Comparator::IsAt),
            "!@" => Some(Comparator::IsNotAt),
            "=~" => Some(Comparator::Matches),
            "!~" => Some(Comparator::NotMatches),
            "=^" => Some(Comparator::StartsWith),
            "!^" => Some(Comparator::NotStartsWith),
            "=$" => Some(Comparator::EndsWith),
            "!$" => Some(Comparator::NotEndsWith),
            _ => None,
        }
    }

    /// The operator symbol as written in definitions.
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Less => "<",
            Comparator::Greater => ">",
            Comparator::LessOrEqual => "<=",
            Comparator::GreaterOrEqual => ">=",
            Comparator::Equals => "==",
            Comparator::NotEquals => "!=",
            Comparator::IsAt => "=@",
            Comparator::IsNotAt => "!@",
            Comparator::Matches => "=~",
            Comparator::NotMatches => "!~",
            Comparator::StartsWith => "=^",
            Comparator::NotStartsWith => "!^",
            Comparator::EndsWith => "=$",
            Comparator::NotEndsWith => "!$",
        }
    }

    /// The predicate name the symbol maps to.
    pub fn name(&self) -> &'static str {
        match self {
            Comparator::Less => "less",
            Comparator::Greater => "greater",
            Comparator::LessOrEqual => "lessOrEqual",
            Comparator::GreaterOrEqual => "greaterOrEqual",
            Comparator::Equals => "equals",
            Comparator::NotEquals => "notEquals",
            Comparator::IsAt => "isAt",
            Comparator::IsNotAt => "isNotAt",
            Comparator::Matches => "matches",
            Comparator::NotMatches => "notMatches",
            Comparator::StartsWith => "startsWith",
            Comparator::NotStartsWith => "notStartsWith",
            Comparator::EndsWith => "endsWith",
            Comparator::NotEndsWith => "notEndsWith",
        }
    }

    /// Evaluate the predicate against resolved operands.
    ///
    /// Ordering comparisons are numeric when both operands coerce to numbers
    /// and fall back to lexicographic text comparison otherwise. The pattern
    /// family treats an invalid pattern as a non-match.
    pub fn eval(&self, left: &serde_json::Value, right: &serde_json::Value) -> bool {
        match self {
            Comparator::Less => compare_ordered(left, right, |o| o.is_lt()),
            Comparator::Greater => compare_ordered(left, right, |o| o.is_gt()),
            Comparator::LessOrEqual => compare_ordered(left, right, |o| o.is_le()),
            Comparator::GreaterOrEqual => compare_ordered(left, right, |o| o.is_ge()),
            Comparator::Equals => loose_eq(left, right),
            Comparator::NotEquals => !loose_eq(left, right),
            Comparator::IsAt => contains(right, left),
            Comparator::IsNotAt => !contains(right, left),
            Comparator::Matches => pattern_match(left, right),
            Comparator::NotMatches => !pattern_match(left, right),
            Comparator::StartsWith => text_form(left).starts_with(&text_form(right)),
            Comparator::NotStartsWith => !text_form(left).starts_with(&text_form(right)),
            Comparator::EndsWith => text_form(left).ends_with(&text_form(right)),
            Comparator::NotEndsWith => !text_form(left).ends_with(&text_form(right)),
        }
    }
}

/// A check/assert expression compiled from `left op right` text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckExpr {
    pub left: String,
    pub op: Comparator,
    pub right: String,
}

/// Parse a check/assert expression.
///
/// The text must split into exactly 3 whitespace-separated tokens with a
/// recognized operator in the middle.
pub fn parse_check(expr: &str) -> Result<CheckExpr, CompileError> {
    let tokens: Vec<&str> = expr.split_whitespace().collect();
    if tokens.len() != 3 {
        return Err(CompileError::InvalidCheckFormat(expr.to_string()));
    }

    let op = Comparator::from_symbol(tokens[1])
        .ok_or_else(|| CompileError::UnknownOperator(tokens[1].to_string()))?;

    Ok(CheckExpr {
        left: tokens[0].to_string(),
        op,
        right: tokens[2].to_string(),
    })
}

/// Text form of a value: strings verbatim, other scalars via display,
/// composites via compact JSON.
pub fn text_form(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn compare_ordered<F>(left: &serde_json::Value, right: &serde_json::Value, accept: F) -> bool
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    if let (Some(l), Some(r)) = (as_f64(left), as_f64(right)) {
        return l.partial_cmp(&r).map(&accept).unwrap_or(false);
    }
    accept(text_form(left).cmp(&text_form(right)))
}

fn loose_eq(left: &serde_json::Value, right: &serde_json::Value) -> bool {
    if left == right {
        return true;
    }
    if let (Some(l), Some(r)) = (as_f64(left), as_f64(right)) {
        return l == r;
    }
    text_form(left) == text_form(right)
}

fn contains(haystack: &serde_json::Value, needle: &serde_json::Value) -> bool {
    match haystack {
        serde_json::Value::Array(items) => {
            items.iter().any(|item| loose_eq(item, needle))
        }
        _ => text_form(haystack).contains(&text_form(needle)),
    }
}

fn pattern_match(left: &serde_json::Value, pattern: &serde_json::Value) -> bool {
    let pattern = text_form(pattern);
    match regex::Regex::new(&pattern) {
        Ok(re) => re.is_match(&text_form(left)),
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "invalid match pattern");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_round_trip() {
        let symbols = [
            "<", ">", "<=", ">=", "==", "!=", "=@", "!@", "=~", "!~", "=^", "!^", "=$", "!$",
        ];
        for symbol in symbols {
            let op = Comparator::from_symbol(symbol).unwrap();
            assert_eq!(op.symbol(), symbol);
        }
    }

    #[test]
    fn test_predicate_names() {
        assert_eq!(Comparator::from_symbol("<=").unwrap().name(), "lessOrEqual");
        assert_eq!(Comparator::from_symbol("=@").unwrap().name(), "isAt");
        assert_eq!(Comparator::from_symbol("!$").unwrap().name(), "notEndsWith");
    }

    #[test]
    fn test_parse_check() {
        let check = parse_check("i:age >= 18").unwrap();
        assert_eq!(check.left, "i:age");
        assert_eq!(check.op, Comparator::GreaterOrEqual);
        assert_eq!(check.right, "18");
    }

    #[test]
    fn test_parse_check_wrong_token_count() {
        let err = parse_check("a ==").unwrap_err();
        assert!(matches!(err, CompileError::InvalidCheckFormat(text) if text == "a =="));

        let err = parse_check("a == b c").unwrap_err();
        assert!(matches!(err, CompileError::InvalidCheckFormat(_)));
    }

    #[test]
    fn test_parse_check_unknown_operator() {
        let err = parse_check("a =% b").unwrap_err();
        assert!(matches!(err, CompileError::UnknownOperator(op) if op == "=%"));
    }

    #[test]
    fn test_numeric_ordering() {
        let op = Comparator::Less;
        assert!(op.eval(&serde_json::json!(2), &serde_json::json!(10)));
        // Text that parses as a number compares numerically, not as "2" > "10".
        assert!(op.eval(&serde_json::json!("2"), &serde_json::json!("10")));
        assert!(!op.eval(&serde_json::json!(10), &serde_json::json!(2)));
    }

    #[test]
    fn test_loose_equality() {
        let op = Comparator::Equals;
        assert!(op.eval(&serde_json::json!(30), &serde_json::json!("30")));
        assert!(op.eval(&serde_json::json!("ok"), &serde_json::json!("ok")));
        assert!(!op.eval(&serde_json::json!("ok"), &serde_json::json!("nope")));
        assert!(Comparator::NotEquals.eval(&serde_json::json!(1), &serde_json::json!(2)));
    }

    #[test]
    fn test_contains_family() {
        assert!(Comparator::IsAt.eval(
            &serde_json::json!("world"),
            &serde_json::json!("hello world")
        ));
        assert!(Comparator::IsNotAt.eval(
            &serde_json::json!("mars"),
            &serde_json::json!("hello world")
        ));
        // Array on the right contains the left element.
        assert!(Comparator::IsAt.eval(&serde_json::json!(2), &serde_json::json!([1, 2, 3])));
    }

    #[test]
    fn test_pattern_family() {
        assert!(Comparator::Matches.eval(
            &serde_json::json!("user-42"),
            &serde_json::json!(r"user-\d+")
        ));
        assert!(Comparator::NotMatches.eval(
            &serde_json::json!("guest"),
            &serde_json::json!(r"user-\d+")
        ));
        // An invalid pattern is a non-match, never a failure.
        assert!(!Comparator::Matches.eval(&serde_json::json!("x"), &serde_json::json!("(")));
    }

    #[test]
    fn test_affix_family() {
        assert!(Comparator::StartsWith.eval(
            &serde_json::json!("application/json"),
            &serde_json::json!("application/")
        ));
        assert!(Comparator::EndsWith.eval(
            &serde_json::json!("report.csv"),
            &serde_json::json!(".csv")
        ));
        assert!(Comparator::NotStartsWith.eval(
            &serde_json::json!("text/html"),
            &serde_json::json!("application/")
        ));
        assert!(Comparator::NotEndsWith.eval(
            &serde_json::json!("report.csv"),
            &serde_json::json!(".json")
        ));
    }
}
