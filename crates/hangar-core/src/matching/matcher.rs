use crate::matching::attribute::{resolve, CustomAttributeRegistry};
use crate::matching::constraint::evaluate;
use crate::matching::outcome::{MatchDetails, MatchResult, RuleOutcome};
use crate::model::MetadataAccessor;
use crate::protocol::schema::MatchingRule;
use rust_decimal::Decimal;

/// Match one metadata object against a rule list.
///
/// Rules are evaluated in declaration order. Each passed rule adds its weight;
/// any failed required rule zeroes the whole score. An empty rule list is a
/// valid match with score zero.
pub fn match_rules(
    instance: &dyn MetadataAccessor,
    rules: &[MatchingRule],
    registry: &CustomAttributeRegistry,
) -> MatchResult {
    let mut score = Decimal::ZERO;
    let mut required_failed = false;
    let mut details = MatchDetails::default();

    for rule in rules {
        let value = resolve(instance, &rule.attribute, registry);
        let evaluation = evaluate(&rule.constraint, value.as_ref());

        let outcome = RuleOutcome {
            rule_id: rule.id.clone(),
            attribute: rule.attribute.clone(),
            constraint: rule.constraint.to_string(),
            required: rule.required,
            weight: rule.weight,
            value,
            message: evaluation.message,
        };

        if evaluation.passed {
            score += rule.weight;
            details.passed.push(outcome);
        } else {
            if rule.required {
                required_failed = true;
            }
            details.failed.push(outcome);
        }
    }

    if required_failed {
        score = Decimal::ZERO;
    }

    MatchResult {
        score,
        details,
        required_failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StudyMetadata;
    use crate::protocol::schema::Constraint;
    use rust_decimal_macros::dec;

    fn study() -> StudyMetadata {
        StudyMetadata::new("1")
            .with_tag("StudyDescription", "CT CHEST")
            .with_tag("timepointType", "followup")
    }

    fn rule(attribute: &str, constraint: Constraint, weight: Decimal) -> MatchingRule {
        MatchingRule::new(attribute, constraint).weight(weight)
    }

    #[test]
    fn test_empty_rules_score_zero() {
        let result = match_rules(&study(), &[], &CustomAttributeRegistry::new());
        assert_eq!(result.score, Decimal::ZERO);
        assert!(!result.required_failed);
        assert!(result.details.passed.is_empty() && result.details.failed.is_empty());
    }

    #[test]
    fn test_weights_of_passed_rules_add_up() {
        let rules = vec![
            rule("StudyDescription", Constraint::Contains("CT".into()), dec!(2)),
            rule("StudyDescription", Constraint::Contains("CHEST".into()), dec!(3.5)),
            rule("StudyDescription", Constraint::Contains("HEAD".into()), dec!(10)),
        ];
        let result = match_rules(&study(), &rules, &CustomAttributeRegistry::new());
        assert_eq!(result.score, dec!(5.5));
        assert_eq!(result.details.passed.len(), 2);
        assert_eq!(result.details.failed.len(), 1);
        assert!(result.details.failed[0].message.is_some());
    }

    #[test]
    fn test_required_failure_zeroes_score() {
        let rules = vec![
            rule("StudyDescription", Constraint::Contains("CT".into()), dec!(7)),
            rule("timepointType", Constraint::Equals("baseline".into()), dec!(0)).required(),
        ];
        let result = match_rules(&study(), &rules, &CustomAttributeRegistry::new());
        assert!(result.required_failed);
        assert_eq!(result.score, Decimal::ZERO);
        assert_eq!(result.details.passed.len(), 1);
    }

    #[test]
    fn test_optional_failure_keeps_score() {
        let rules = vec![
            rule("StudyDescription", Constraint::Contains("CT".into()), dec!(4)),
            rule("BodyPartExamined", Constraint::Equals("CHEST".into()), dec!(1)),
        ];
        let result = match_rules(&study(), &rules, &CustomAttributeRegistry::new());
        assert!(!result.required_failed);
        assert_eq!(result.score, dec!(4));
        assert_eq!(result.details.failed[0].value, None);
    }

    #[test]
    fn test_outcomes_keep_declaration_order() {
        let rules = vec![
            rule("StudyDescription", Constraint::Contains("CT".into()), dec!(1)).required(),
            rule("timepointType", Constraint::StartsWith("follow".into()), dec!(1)),
        ];
        let result = match_rules(&study(), &rules, &CustomAttributeRegistry::new());
        let attributes: Vec<&str> = result
            .details
            .passed
            .iter()
            .map(|o| o.attribute.as_str())
            .collect();
        assert_eq!(attributes, vec!["StudyDescription", "timepointType"]);
    }
}
