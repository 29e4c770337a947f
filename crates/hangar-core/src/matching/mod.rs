pub mod assignment;
pub mod attribute;
pub mod constraint;
pub mod matcher;
pub mod outcome;
pub mod selector;

pub use assignment::{assign, stage_status};
pub use attribute::{builtin_registry, resolve, CustomAttributeRegistry};
pub use constraint::{evaluate, Evaluation};
pub use matcher::match_rules;
pub use outcome::{
    AssignedSeries, MatchDetails, MatchResult, ProtocolMatch, RuleOutcome, SlotAssignment,
    StageAssignment, StageStatus,
};
pub use selector::{rank_protocols, select_protocol};
