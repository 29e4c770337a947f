use crate::model::AttrValue;
use crate::protocol::schema::Constraint;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome of testing one value against one constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Evaluation {
    fn pass() -> Self {
        Self {
            passed: true,
            message: None,
        }
    }

    fn fail(message: String) -> Self {
        Self {
            passed: false,
            message: Some(message),
        }
    }

    fn check(passed: bool, message: impl FnOnce() -> String) -> Self {
        if passed {
            Self::pass()
        } else {
            Self::fail(message())
        }
    }
}

/// Evaluate a constraint against a resolved value.
///
/// Total over every input: a missing value, a value of the wrong type or a
/// malformed constraint yields a failed evaluation with a message.
pub fn evaluate(constraint: &Constraint, value: Option<&AttrValue>) -> Evaluation {
    match (constraint, value) {
        (Constraint::Malformed { operator, reason }, _) => {
            Evaluation::fail(format!("malformed constraint '{}': {}", operator, reason))
        }
        (Constraint::All(inner), _) => {
            let failures: Vec<String> = inner
                .iter()
                .map(|c| evaluate(c, value))
                .filter(|e| !e.passed)
                .filter_map(|e| e.message)
                .collect();
            if failures.is_empty() {
                Evaluation::pass()
            } else {
                Evaluation::fail(failures.join("; "))
            }
        }
        (_, None) => Evaluation::fail(format!("attribute is missing ({})", constraint)),
        (Constraint::Equals(expected), Some(value)) => {
            Evaluation::check(value.loosely_equals(expected), || {
                format!("'{}' is not equal to '{}'", value, expected)
            })
        }
        (Constraint::NotEquals(expected), Some(value)) => {
            Evaluation::check(!value.loosely_equals(expected), || {
                format!("'{}' must not equal '{}'", value, expected)
            })
        }
        (Constraint::Contains(needle), Some(value)) => {
            Evaluation::check(contains(value, needle, false), || {
                format!("'{}' does not contain '{}'", value, needle)
            })
        }
        (Constraint::ContainsI(needle), Some(value)) => {
            Evaluation::check(contains(value, needle, true), || {
                format!("'{}' does not contain '{}' (case-insensitive)", value, needle)
            })
        }
        (Constraint::DoesNotContain(needle), Some(value)) => {
            Evaluation::check(!contains(value, needle, false), || {
                format!("'{}' must not contain '{}'", value, needle)
            })
        }
        (Constraint::StartsWith(prefix), Some(value)) => {
            let text = value.as_text();
            Evaluation::check(any_text(prefix, |p| text.starts_with(p)), || {
                format!("'{}' does not start with '{}'", value, prefix)
            })
        }
        (Constraint::EndsWith(suffix), Some(value)) => {
            let text = value.as_text();
            Evaluation::check(any_text(suffix, |s| text.ends_with(s)), || {
                format!("'{}' does not end with '{}'", value, suffix)
            })
        }
        (Constraint::GreaterThan(bound), Some(value)) => numeric(value, |n| n > *bound, || {
            format!("'{}' is not greater than {}", value, bound)
        }),
        (Constraint::LessThan(bound), Some(value)) => numeric(value, |n| n < *bound, || {
            format!("'{}' is not less than {}", value, bound)
        }),
        (Constraint::Range { min, max }, Some(value)) => {
            numeric(value, |n| n >= *min && n <= *max, || {
                format!("'{}' is outside [{}, {}]", value, min, max)
            })
        }
    }
}

/// Apply a text predicate to an operand; a list operand passes when any
/// element does.
fn any_text(operand: &AttrValue, predicate: impl Fn(&str) -> bool) -> bool {
    match operand {
        AttrValue::List(items) => items.iter().any(|item| predicate(&item.as_text())),
        single => predicate(&single.as_text()),
    }
}

fn numeric(
    value: &AttrValue,
    predicate: impl FnOnce(Decimal) -> bool,
    message: impl FnOnce() -> String,
) -> Evaluation {
    match value.as_decimal() {
        Some(n) => Evaluation::check(predicate(n), message),
        None => Evaluation::fail(format!("'{}' is not numeric", value)),
    }
}

/// Substring match on text, membership on lists. A list needle matches when
/// any of its elements does.
fn contains(value: &AttrValue, needle: &AttrValue, ignore_case: bool) -> bool {
    if let AttrValue::List(needles) = needle {
        return needles.iter().any(|n| contains(value, n, ignore_case));
    }

    let fold = |s: String| if ignore_case { s.to_lowercase() } else { s };
    match value {
        AttrValue::List(items) => {
            let wanted = fold(needle.as_text());
            items.iter().any(|item| fold(item.as_text()) == wanted)
        }
        scalar => fold(scalar.as_text()).contains(&fold(needle.as_text())),
    }
}
