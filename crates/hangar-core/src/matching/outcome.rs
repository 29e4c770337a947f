use crate::model::AttrValue;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Record of one rule evaluated against one metadata object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub attribute: String,
    /// Human-readable form of the constraint (e.g. `contains "CT"`).
    pub constraint: String,
    pub required: bool,
    pub weight: Decimal,
    /// The resolved value the constraint was tested against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<AttrValue>,
    /// Why the rule failed (absent for passed rules).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchDetails {
    pub passed: Vec<RuleOutcome>,
    pub failed: Vec<RuleOutcome>,
}

impl MatchDetails {
    pub fn extend(&mut self, other: &MatchDetails) {
        self.passed.extend(other.passed.iter().cloned());
        self.failed.extend(other.failed.iter().cloned());
    }
}

/// Result of matching one metadata object against a rule list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Sum of passed rule weights, or zero when a required rule failed.
    pub score: Decimal,
    pub details: MatchDetails,
    pub required_failed: bool,
}

/// A protocol that qualified during selection, with its protocol-level score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolMatch {
    pub protocol_id: String,
    pub score: Decimal,
    pub result: MatchResult,
    /// True when no protocol qualified and the default was used.
    pub fallback: bool,
}

/// The series chosen for one viewport slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedSeries {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    /// Initial image within the series, chosen by the image rules.
    pub image_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sop_instance_uid: Option<String>,
    pub series_score: Decimal,
    pub study_score: Decimal,
    pub image_score: Decimal,
    /// Study, series and image rule outcomes combined.
    pub details: MatchDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub viewport_index: usize,
    /// `None` when no candidate satisfied the slot's required rules.
    pub series: Option<AssignedSeries>,
    pub allow_reuse: bool,
}

/// Slot-by-slot assignment for one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageAssignment {
    pub stage_name: String,
    pub slots: Vec<SlotAssignment>,
}

impl StageAssignment {
    /// Filled slots keyed by viewport index.
    pub fn to_map(&self) -> BTreeMap<usize, AssignedSeries> {
        self.slots
            .iter()
            .filter_map(|slot| slot.series.clone().map(|s| (slot.viewport_index, s)))
            .collect()
    }

    pub fn filled_count(&self) -> usize {
        self.slots.iter().filter(|s| s.series.is_some()).count()
    }

    /// Series UIDs shown in slots that claim their series (non-shareable).
    pub fn claimed_series(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|slot| !slot.allow_reuse)
            .filter_map(|slot| slot.series.as_ref())
            .map(|s| s.series_instance_uid.as_str())
            .collect()
    }
}

/// Whether a stage has enough filled viewports to be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Enough viewports filled to show this stage by default.
    Enabled,
    /// Can be selected manually but is not preferred.
    Passive,
    /// Too few viewports would be filled.
    Disabled,
}
