use crate::model::AttrValue;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A hanging protocol: protocol-level matching rules plus one or more stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Prevents user edits. Not consulted by matching.
    #[serde(default)]
    pub locked: bool,
    /// Minimum number of prior studies that must be loaded for this protocol
    /// to be considered at all.
    #[serde(default)]
    pub number_of_priors_referenced: usize,
    #[serde(default)]
    pub protocol_matching_rules: Vec<MatchingRule>,
    pub stages: Vec<Stage>,
}

impl Protocol {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn has_required_rules(&self) -> bool {
        self.protocol_matching_rules.iter().any(|r| r.required)
    }
}

/// One layout within a protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub viewport_structure: ViewportStructure,
    pub viewports: Vec<Viewport>,
    #[serde(default)]
    pub activation: StageActivation,
}

impl Stage {
    /// Identifier used for lookups: the explicit id, or the name.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ViewportStructure {
    Grid { rows: u32, columns: u32 },
}

impl ViewportStructure {
    pub fn slot_count(&self) -> usize {
        match self {
            ViewportStructure::Grid { rows, columns } => (*rows as usize) * (*columns as usize),
        }
    }
}

impl fmt::Display for ViewportStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewportStructure::Grid { rows, columns } => write!(f, "{}x{} grid", rows, columns),
        }
    }
}

/// How many filled viewports a stage needs to be offered by default
/// (`enabled`) or on request (`passive`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageActivation {
    #[serde(default = "default_enabled_min")]
    pub enabled_min_viewports_matched: usize,
    #[serde(default)]
    pub passive_min_viewports_matched: usize,
}

fn default_enabled_min() -> usize {
    1
}

impl Default for StageActivation {
    fn default() -> Self {
        Self {
            enabled_min_viewports_matched: default_enabled_min(),
            passive_min_viewports_matched: 0,
        }
    }
}

/// Rule sets used to find the data for one viewport slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    #[serde(default)]
    pub study_matching_rules: Vec<MatchingRule>,
    #[serde(default)]
    pub series_matching_rules: Vec<MatchingRule>,
    #[serde(default)]
    pub image_matching_rules: Vec<MatchingRule>,
    /// Shareable slot: may show a series already shown in another slot and
    /// does not claim the series it shows.
    #[serde(default)]
    pub allow_reuse: bool,
}

/// One weighted, optionally required constraint over a named attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub attribute: String,
    pub constraint: Constraint,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub weight: Decimal,
}

impl MatchingRule {
    pub fn new(attribute: &str, constraint: Constraint) -> Self {
        Self {
            id: None,
            attribute: attribute.to_string(),
            constraint,
            required: false,
            weight: Decimal::ZERO,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn weight(mut self, weight: Decimal) -> Self {
        self.weight = weight;
        self
    }
}

/// Operator and operand a rule tests an attribute value against.
///
/// Unknown operators and unusable operands are kept as `Malformed` so that
/// evaluation can report them as a failed rule instead of rejecting the
/// whole protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum Constraint {
    Equals(AttrValue),
    NotEquals(AttrValue),
    Contains(AttrValue),
    ContainsI(AttrValue),
    DoesNotContain(AttrValue),
    StartsWith(AttrValue),
    EndsWith(AttrValue),
    GreaterThan(Decimal),
    LessThan(Decimal),
    Range { min: Decimal, max: Decimal },
    All(Vec<Constraint>),
    Malformed { operator: String, reason: String },
}

impl Constraint {
    pub fn operator(&self) -> &str {
        match self {
            Constraint::Equals(_) => "equals",
            Constraint::NotEquals(_) => "notEquals",
            Constraint::Contains(_) => "contains",
            Constraint::ContainsI(_) => "containsI",
            Constraint::DoesNotContain(_) => "doesNotContain",
            Constraint::StartsWith(_) => "startsWith",
            Constraint::EndsWith(_) => "endsWith",
            Constraint::GreaterThan(_) => "greaterThan",
            Constraint::LessThan(_) => "lessThan",
            Constraint::Range { .. } => "range",
            Constraint::All(_) => "all",
            Constraint::Malformed { operator, .. } => operator,
        }
    }

    fn from_entry(operator: &str, raw: &Value) -> Constraint {
        let malformed = |reason: &str| Constraint::Malformed {
            operator: operator.to_string(),
            reason: reason.to_string(),
        };

        if operator == "range" {
            return match range_bounds(raw) {
                Some((min, max)) => Constraint::Range { min, max },
                None => malformed("range needs numeric 'min' and 'max'"),
            };
        }

        let operand = match raw {
            Value::Object(map) if map.contains_key("value") => &map["value"],
            other => other,
        };
        let Some(value) = serde_json::from_value::<AttrValue>(operand.clone()).ok() else {
            return malformed("missing or unsupported operand");
        };

        match operator {
            "equals" => Constraint::Equals(value),
            "notEquals" => Constraint::NotEquals(value),
            "contains" => Constraint::Contains(value),
            "containsI" => Constraint::ContainsI(value),
            "doesNotContain" => Constraint::DoesNotContain(value),
            "startsWith" => Constraint::StartsWith(value),
            "endsWith" => Constraint::EndsWith(value),
            "greaterThan" | "lessThan" => match value.as_decimal() {
                Some(n) if operator == "greaterThan" => Constraint::GreaterThan(n),
                Some(n) => Constraint::LessThan(n),
                None => malformed("operand is not numeric"),
            },
            _ => malformed("unknown operator"),
        }
    }

    fn entries(&self, map: &mut Map<String, Value>) {
        let wrap = |v: Value| {
            let mut inner = Map::new();
            inner.insert("value".to_string(), v);
            Value::Object(inner)
        };
        let attr = |v: &AttrValue| serde_json::to_value(v).unwrap_or(Value::Null);

        let (key, value) = match self {
            Constraint::Equals(v)
            | Constraint::NotEquals(v)
            | Constraint::Contains(v)
            | Constraint::ContainsI(v)
            | Constraint::DoesNotContain(v)
            | Constraint::StartsWith(v)
            | Constraint::EndsWith(v) => (self.operator(), wrap(attr(v))),
            Constraint::GreaterThan(n) | Constraint::LessThan(n) => {
                (self.operator(), wrap(decimal_json(*n)))
            }
            Constraint::Range { min, max } => {
                let mut bounds = Map::new();
                bounds.insert("min".to_string(), decimal_json(*min));
                bounds.insert("max".to_string(), decimal_json(*max));
                ("range", Value::Object(bounds))
            }
            Constraint::All(inner) => {
                for c in inner {
                    c.entries(map);
                }
                return;
            }
            Constraint::Malformed { operator, .. } => (operator.as_str(), Value::Null),
        };
        map.insert(key.to_string(), value);
    }
}

fn range_bounds(raw: &Value) -> Option<(Decimal, Decimal)> {
    let number = |v: &Value| {
        serde_json::from_value::<AttrValue>(v.clone())
            .ok()
            .and_then(|a| a.as_decimal())
    };
    match raw {
        Value::Object(map) if map.contains_key("min") && map.contains_key("max") => {
            Some((number(&map["min"])?, number(&map["max"])?))
        }
        Value::Object(map) => range_bounds(map.get("value")?),
        Value::Array(items) if items.len() == 2 => Some((number(&items[0])?, number(&items[1])?)),
        _ => None,
    }
}

fn decimal_json(n: Decimal) -> Value {
    n.normalize()
        .to_string()
        .parse::<serde_json::Number>()
        .map(Value::Number)
        .unwrap_or_else(|_| Value::String(n.to_string()))
}

impl From<Value> for Constraint {
    fn from(value: Value) -> Self {
        let Value::Object(map) = value else {
            return Constraint::Malformed {
                operator: "constraint".to_string(),
                reason: "constraint must be an object".to_string(),
            };
        };

        let mut parsed: Vec<Constraint> = map
            .iter()
            .map(|(operator, raw)| Constraint::from_entry(operator, raw))
            .collect();

        match parsed.len() {
            0 => Constraint::Malformed {
                operator: "constraint".to_string(),
                reason: "constraint has no operator".to_string(),
            },
            1 => parsed.remove(0),
            _ => Constraint::All(parsed),
        }
    }
}

impl From<Constraint> for Value {
    fn from(constraint: Constraint) -> Self {
        let mut map = Map::new();
        constraint.entries(&mut map);
        Value::Object(map)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Equals(v)
            | Constraint::NotEquals(v)
            | Constraint::Contains(v)
            | Constraint::ContainsI(v)
            | Constraint::DoesNotContain(v)
            | Constraint::StartsWith(v)
            | Constraint::EndsWith(v) => write!(f, "{} \"{}\"", self.operator(), v),
            Constraint::GreaterThan(n) | Constraint::LessThan(n) => {
                write!(f, "{} {}", self.operator(), n)
            }
            Constraint::Range { min, max } => write!(f, "range [{}, {}]", min, max),
            Constraint::All(inner) => {
                let parts: Vec<String> = inner.iter().map(|c| c.to_string()).collect();
                write!(f, "{}", parts.join(" and "))
            }
            Constraint::Malformed { operator, reason } => {
                write!(f, "malformed '{}' ({})", operator, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn parse(json: &str) -> Constraint {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_wrapped_and_bare_operands() {
        assert_eq!(
            parse(r#"{ "contains": { "value": "CT" } }"#),
            Constraint::Contains("CT".into())
        );
        assert_eq!(parse(r#"{ "equals": 2 }"#), Constraint::Equals(AttrValue::Number(dec!(2))));
    }

    #[test]
    fn test_parse_range_forms() {
        let expected = Constraint::Range {
            min: dec!(1),
            max: dec!(5),
        };
        assert_eq!(parse(r#"{ "range": { "min": 1, "max": 5 } }"#), expected);
        assert_eq!(parse(r#"{ "range": { "value": [1, "5"] } }"#), expected);
    }

    #[test]
    fn test_unknown_operator_is_kept_as_malformed() {
        match parse(r#"{ "looksLike": { "value": "CT" } }"#) {
            Constraint::Malformed { operator, reason } => {
                assert_eq!(operator, "looksLike");
                assert_eq!(reason, "unknown operator");
            }
            other => panic!("expected malformed, got {other:?}"),
        }
        assert!(matches!(
            parse(r#"{ "greaterThan": { "value": "thick" } }"#),
            Constraint::Malformed { .. }
        ));
        assert!(matches!(parse(r#""CT""#), Constraint::Malformed { .. }));
    }

    #[test]
    fn test_multiple_operators_become_all() {
        match parse(r#"{ "greaterThan": 1, "lessThan": 10 }"#) {
            Constraint::All(inner) => assert_eq!(inner.len(), 2),
            other => panic!("expected all, got {other:?}"),
        }
    }

    #[test]
    fn test_serialize_uses_value_wrapper() {
        let json = serde_json::to_value(Constraint::StartsWith("AX".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "startsWith": { "value": "AX" } }));
        let json = serde_json::to_value(parse(r#"{ "endsWith": ["PRE", "POST"] }"#)).unwrap();
        assert_eq!(json, serde_json::json!({ "endsWith": { "value": ["PRE", "POST"] } }));
        let json = serde_json::to_value(Constraint::GreaterThan(dec!(2.5))).unwrap();
        assert_eq!(json, serde_json::json!({ "greaterThan": { "value": 2.5 } }));
    }

    #[test]
    fn test_rule_defaults() {
        let rule: MatchingRule = serde_json::from_str(
            r#"{ "attribute": "Modality", "constraint": { "equals": { "value": "CT" } } }"#,
        )
        .unwrap();
        assert!(!rule.required);
        assert_eq!(rule.weight, Decimal::ZERO);
    }
}
