pub mod builtin;
pub mod schema;
pub mod store;

use crate::error::HangarError;
use schema::{MatchingRule, Protocol};
use std::path::Path;

pub use store::ProtocolStore;

/// Load a protocol from a JSON file.
pub fn load_protocol(path: &Path) -> Result<Protocol, HangarError> {
    let content = std::fs::read_to_string(path).map_err(|e| HangarError::ProtocolLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_protocol(&content, path)
}

/// Parse a protocol from a JSON string.
pub fn parse_protocol(json: &str, source: &Path) -> Result<Protocol, HangarError> {
    let protocol: Protocol = serde_json::from_str(json).map_err(|e| HangarError::ProtocolLoad {
        path: source.to_path_buf(),
        reason: e.to_string(),
    })?;
    validate_protocol(&protocol)?;
    Ok(protocol)
}

/// Parse a protocol from a JSON string (no file path context).
pub fn parse_protocol_str(json: &str) -> Result<Protocol, HangarError> {
    let protocol: Protocol = serde_json::from_str(json).map_err(HangarError::Json)?;
    validate_protocol(&protocol)?;
    Ok(protocol)
}

/// Load every `*.json` protocol in a directory, in file-name order.
pub fn load_protocol_dir(dir: &Path) -> Result<Vec<Protocol>, HangarError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    paths.iter().map(|p| load_protocol(p)).collect()
}

/// Validate that a protocol is structurally well-formed.
///
/// Malformed constraints are not rejected here; they fail as individual rules
/// during matching.
pub fn validate_protocol(protocol: &Protocol) -> Result<(), HangarError> {
    if protocol.id.trim().is_empty() {
        return Err(HangarError::ProtocolInvalid(
            "protocol id must not be empty".into(),
        ));
    }

    if protocol.stages.is_empty() {
        return Err(HangarError::ProtocolInvalid(format!(
            "protocol '{}' has no stages",
            protocol.id
        )));
    }

    for (idx, stage) in protocol.stages.iter().enumerate() {
        let slots = stage.viewport_structure.slot_count();
        if slots == 0 {
            return Err(HangarError::ProtocolInvalid(format!(
                "protocol '{}' stage {} ('{}') has an empty {}",
                protocol.id, idx, stage.name, stage.viewport_structure
            )));
        }

        if stage.viewports.len() != slots {
            return Err(HangarError::ProtocolInvalid(format!(
                "protocol '{}' stage {} ('{}') declares {} viewports for a {} ({} slots)",
                protocol.id,
                idx,
                stage.name,
                stage.viewports.len(),
                stage.viewport_structure,
                slots
            )));
        }
    }

    for (context, rule) in rules_with_context(protocol) {
        if rule.attribute.trim().is_empty() {
            return Err(HangarError::ProtocolInvalid(format!(
                "protocol '{}': {} has a rule with an empty attribute",
                protocol.id, context
            )));
        }
    }

    Ok(())
}

/// Every rule in a protocol, labelled with where it is declared.
pub fn rules_with_context(protocol: &Protocol) -> Vec<(String, &MatchingRule)> {
    let mut rules: Vec<(String, &MatchingRule)> = protocol
        .protocol_matching_rules
        .iter()
        .map(|r| ("protocol rules".to_string(), r))
        .collect();

    for (s, stage) in protocol.stages.iter().enumerate() {
        for (v, viewport) in stage.viewports.iter().enumerate() {
            let levels = [
                ("study", &viewport.study_matching_rules),
                ("series", &viewport.series_matching_rules),
                ("image", &viewport.image_matching_rules),
            ];
            for (level, level_rules) in levels {
                for rule in level_rules {
                    rules.push((format!("stage {s} viewport {v} {level} rules"), rule));
                }
            }
        }
    }

    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r#"{
        "id": "ct-two-up",
        "protocolMatchingRules": [
            { "attribute": "ModalitiesInStudy", "weight": 2,
              "constraint": { "contains": { "value": "CT" } } }
        ],
        "stages": [
            {
                "name": "oneByTwo",
                "viewportStructure": { "type": "grid", "rows": 1, "columns": 2 },
                "viewports": [
                    { "seriesMatchingRules": [ { "attribute": "SeriesNumber", "constraint": { "equals": 1 } } ] },
                    { "seriesMatchingRules": [ { "attribute": "SeriesNumber", "constraint": { "equals": 2 } } ] }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_valid_protocol() {
        let p = parse_protocol_str(VALID).unwrap();
        assert_eq!(p.id, "ct-two-up");
        assert!(!p.locked);
        assert_eq!(p.stages[0].viewports.len(), 2);
        assert_eq!(rules_with_context(&p).len(), 3);
    }

    #[test]
    fn test_grid_mismatch_rejected() {
        let json = VALID.replace("\"columns\": 2", "\"columns\": 3");
        assert!(matches!(
            parse_protocol_str(&json),
            Err(HangarError::ProtocolInvalid(_))
        ));
    }

    #[test]
    fn test_no_stages_rejected() {
        let json = r#"{ "id": "empty", "stages": [] }"#;
        assert!(parse_protocol_str(json).is_err());
    }

    #[test]
    fn test_empty_attribute_rejected() {
        let json = VALID.replace("\"SeriesNumber\", \"constraint\": { \"equals\": 2 }", "\"\", \"constraint\": { \"equals\": 2 }");
        assert!(parse_protocol_str(&json).is_err());
    }

    #[test]
    fn test_malformed_constraint_is_not_a_load_error() {
        let json = VALID.replace("\"contains\"", "\"resembles\"");
        assert!(parse_protocol_str(&json).is_ok());
    }

    #[test]
    fn test_load_protocol_dir_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for (file, id) in [("b.json", "second"), ("a.json", "first")] {
            let mut f = std::fs::File::create(dir.path().join(file)).unwrap();
            f.write_all(VALID.replace("ct-two-up", id).as_bytes()).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let protocols = load_protocol_dir(dir.path()).unwrap();
        let ids: Vec<&str> = protocols.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn test_load_protocol_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        match load_protocol(&path) {
            Err(HangarError::ProtocolLoad { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected load error, got {other:?}"),
        }
    }
}
