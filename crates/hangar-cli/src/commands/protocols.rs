use hangar_core::error::HangarError;
use hangar_core::protocol::schema::{Constraint, MatchingRule, Protocol, Viewport};
use hangar_core::protocol::{load_protocol, rules_with_context};
use std::path::Path;

use super::load_library;
use crate::config::AppConfig;

pub fn list(config: &AppConfig) -> Result<(), HangarError> {
    let library = load_library(config, &[], &[])?;

    println!("Available protocols (registration order):\n");
    for protocol in &library {
        let default_marker = if protocol.id == config.protocols.default_id {
            " [default]"
        } else {
            ""
        };
        println!(
            "  {:<16} {} ({} stage{}){}",
            protocol.id,
            protocol.display_name(),
            protocol.stages.len(),
            if protocol.stages.len() == 1 { "" } else { "s" },
            default_marker
        );
        if let Some(ref desc) = protocol.description {
            println!("                   {}", desc);
        }
        println!();
    }
    Ok(())
}

pub fn explain(config: &AppConfig, id: &str) -> Result<(), HangarError> {
    let library = load_library(config, &[], &[])?;
    let protocol = library
        .iter()
        .find(|p| p.id == id)
        .ok_or_else(|| HangarError::UnknownProtocol { id: id.to_string() })?;

    println!("{} ({})\n", protocol.display_name(), protocol.id);
    if let Some(ref desc) = protocol.description {
        println!("{}\n", desc);
    }

    if protocol.protocol_matching_rules.is_empty() {
        println!("Matches any study (score 0).\n");
    } else {
        println!("Scored against the active study:\n");
        for rule in &protocol.protocol_matching_rules {
            println!("  - {}", describe_rule(rule));
        }
        println!();
    }

    if protocol.number_of_priors_referenced > 0 {
        println!(
            "Only considered when at least {} prior stud{} loaded.\n",
            protocol.number_of_priors_referenced,
            if protocol.number_of_priors_referenced == 1 {
                "y is"
            } else {
                "ies are"
            }
        );
    }

    println!("Stages:\n");
    for (index, stage) in protocol.stages.iter().enumerate() {
        println!(
            "  {}. {} ({}; enabled at {} filled, passive at {})",
            index + 1,
            stage.name,
            stage.viewport_structure,
            stage.activation.enabled_min_viewports_matched,
            stage.activation.passive_min_viewports_matched
        );
        for (slot, viewport) in stage.viewports.iter().enumerate() {
            let shared = if viewport.allow_reuse { " (shared)" } else { "" };
            println!("     [{}]{}", slot, shared);
            print_viewport_rules(viewport);
        }
        println!();
    }

    Ok(())
}

fn print_viewport_rules(viewport: &Viewport) {
    let levels = [
        ("study", &viewport.study_matching_rules),
        ("series", &viewport.series_matching_rules),
        ("image", &viewport.image_matching_rules),
    ];
    let mut any = false;
    for (level, rules) in levels {
        for rule in rules {
            println!("         {:<6} {}", level, describe_rule(rule));
            any = true;
        }
    }
    if !any {
        println!("         any series");
    }
}

fn describe_rule(rule: &MatchingRule) -> String {
    let required = if rule.required { ", required" } else { "" };
    format!(
        "{} {} (weight {}{})",
        rule.attribute, rule.constraint, rule.weight, required
    )
}

pub fn schema() -> Result<(), HangarError> {
    print!(
        r#"JSON Protocol Schema
====================

A protocol describes which studies it suits and how to lay out their
series. When you run `hangar match`, every protocol is scored against the
active study; the best one is applied and its first stage is filled.

Top-level fields:
  id            (string, required)  Unique protocol id
  name          (string, optional)  Human-readable name
  description   (string, optional)  What this protocol is for
  locked        (bool, optional)    Prevents edits in a viewer. Default: false
  numberOfPriorsReferenced
                (number, optional)  Prior studies that must be loaded for the
                                    protocol to be considered. Default: 0
  protocolMatchingRules
                (array, optional)   Rules scored against the active study
  stages        (array, required)   One or more layouts (see below)

Each stage:
  id            (string, optional)  Stage id (defaults to the name)
  name          (string, required)  Stage name, used by `--stage NAME`
  viewportStructure
                (object, required)  {{ "type": "grid", "rows": R, "columns": C }}
  viewports     (array, required)   Exactly rows * columns viewports
  activation    (object, optional)  {{ "enabledMinViewportsMatched": 1,
                                       "passiveMinViewportsMatched": 0 }}

Each viewport:
  studyMatchingRules   (array, optional)  Filter and score the owning study
  seriesMatchingRules  (array, optional)  Score candidate series
  imageMatchingRules   (array, optional)  Pick the initial image
  allowReuse           (bool, optional)   May show a series already shown in
                                          another viewport. Default: false

Each rule:
  id            (string, optional)  Rule id, shown in match details
  attribute     (string, required)  DICOM keyword (e.g. "SeriesDescription")
                                    or custom attribute ("modalitiesInStudy",
                                    "numberOfInstances")
                                    In study rules, "abstractPriorValue" is the
                                    study's position: 0 active, 1 first prior,
                                    -1 last prior
  constraint    (object, required)  {{ "<operator>": {{ "value": X }} }} or
                                    {{ "<operator>": X }}
  required      (bool, optional)    A failing required rule zeroes the score
                                    and disqualifies the candidate
  weight        (number, optional)  Added to the score when the rule passes.
                                    Default: 0

Operators:
  equals, notEquals              text or number (2, "2" and "2.0" are equal)
  contains, containsI            substring, or membership for lists; a list
  doesNotContain                 operand matches if any element matches
  startsWith, endsWith           text prefix / suffix (any element of a list)
  greaterThan, lessThan          numeric
  range                          {{ "min": a, "max": b }} or {{ "value": [a, b] }}

Example:
{{
  "id": "ct-chest",
  "name": "CT Chest",
  "protocolMatchingRules": [
    {{ "attribute": "modalitiesInStudy", "required": true, "weight": 1,
      "constraint": {{ "contains": "CT" }} }}
  ],
  "stages": [
    {{
      "name": "lungAndMediastinum",
      "viewportStructure": {{ "type": "grid", "rows": 1, "columns": 2 }},
      "viewports": [
        {{ "seriesMatchingRules": [
          {{ "attribute": "SeriesDescription", "weight": 5,
            "constraint": {{ "containsI": "lung" }} }} ] }},
        {{ "seriesMatchingRules": [
          {{ "attribute": "SeriesDescription", "weight": 5,
            "constraint": {{ "containsI": ["mediastinum", "soft"] }} }} ] }}
      ]
    }}
  ]
}}

Unknown operators do not reject the file: the rule simply never passes.
Run `hangar protocols validate <FILE>` to list them.
"#
    );
    Ok(())
}

pub fn validate(file: &Path) -> Result<(), HangarError> {
    let protocol = load_protocol(file)?;

    println!("Protocol '{}' is valid.", protocol.id);
    println!("  Name: {}", protocol.display_name());
    println!("  Stages: {}", protocol.stages.len());
    println!("  Rules: {}", rules_with_context(&protocol).len());

    let warnings = lint(&protocol);
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for w in &warnings {
            println!("  - {}", w);
        }
    }

    Ok(())
}

/// Problems that do not make a protocol invalid but probably are mistakes.
fn lint(protocol: &Protocol) -> Vec<String> {
    let mut warnings = Vec::new();

    for (context, rule) in rules_with_context(protocol) {
        for (operator, reason) in malformed(&rule.constraint) {
            warnings.push(format!(
                "{}: rule on '{}' has malformed constraint '{}' ({}); it will always fail",
                context, rule.attribute, operator, reason
            ));
        }
        if !rule.required && rule.weight.is_zero() {
            warnings.push(format!(
                "{}: optional rule on '{}' has weight 0 and never affects the score",
                context, rule.attribute
            ));
        }
    }

    for stage in &protocol.stages {
        let slots = stage.viewport_structure.slot_count();
        let activation = &stage.activation;
        if activation.enabled_min_viewports_matched > slots {
            warnings.push(format!(
                "stage '{}' needs {} filled viewports to be enabled but has only {}",
                stage.name, activation.enabled_min_viewports_matched, slots
            ));
        }
        if activation.passive_min_viewports_matched > activation.enabled_min_viewports_matched {
            warnings.push(format!(
                "stage '{}' has a passive threshold above its enabled threshold",
                stage.name
            ));
        }
    }

    warnings
}

fn malformed(constraint: &Constraint) -> Vec<(&str, &str)> {
    match constraint {
        Constraint::Malformed { operator, reason } => vec![(operator.as_str(), reason.as_str())],
        Constraint::All(inner) => inner.iter().flat_map(malformed).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_core::protocol::builtin::load_all_presets;
    use hangar_core::protocol::parse_protocol_str;

    #[test]
    fn test_presets_lint_clean() {
        for protocol in load_all_presets().unwrap() {
            assert!(lint(&protocol).is_empty(), "{}: {:?}", protocol.id, lint(&protocol));
        }
    }

    #[test]
    fn test_lint_reports_problems() {
        let protocol = parse_protocol_str(
            r#"{
                "id": "sloppy",
                "protocolMatchingRules": [
                    { "attribute": "Modality", "constraint": { "looksLike": "CT" }, "weight": 1 },
                    { "attribute": "StudyDescription", "constraint": { "contains": "CT" } }
                ],
                "stages": [{
                    "name": "one",
                    "viewportStructure": { "type": "grid", "rows": 1, "columns": 1 },
                    "viewports": [{}],
                    "activation": { "enabledMinViewportsMatched": 2, "passiveMinViewportsMatched": 3 }
                }]
            }"#,
        )
        .unwrap();

        let warnings = lint(&protocol);
        assert_eq!(warnings.len(), 4, "{warnings:?}");
        assert!(warnings[0].contains("looksLike"));
        assert!(warnings[1].contains("weight 0"));
        assert!(warnings[2].contains("needs 2"));
        assert!(warnings[3].contains("passive threshold"));
    }
}
