use crate::matching::attribute::{CustomAttributeRegistry, ABSTRACT_PRIOR_VALUE};
use crate::matching::matcher::match_rules;
use crate::matching::outcome::{
    AssignedSeries, MatchDetails, MatchResult, SlotAssignment, StageAssignment, StageStatus,
};
use crate::model::{AttrValue, CandidatePool, MetadataAccessor, SeriesMetadata};
use crate::protocol::schema::{Constraint, MatchingRule, Stage, Viewport};
use std::borrow::Cow;
use std::collections::HashSet;
use tracing::{debug, trace};

/// (study index, series index) within the pool.
type SeriesKey = (usize, usize);

struct Candidate {
    key: SeriesKey,
    study_result: MatchResult,
    series_result: MatchResult,
    image: ImageMatch,
}

struct ImageMatch {
    index: usize,
    sop_instance_uid: Option<String>,
    result: MatchResult,
}

/// Assign series from the pool to the stage's viewport slots.
///
/// Slots are filled greedily in declaration order. For each slot the best
/// unclaimed series wins: highest series score, then highest study score,
/// then pool order. The winner is claimed unless the slot allows reuse. A
/// slot with no eligible series stays empty. Claims are local to this call.
///
/// Each study's `abstractPriorValue` is set to its pool position first, so
/// study rules can target the active study (0) or a prior (`n`, `-1` last).
pub fn assign(
    stage: &Stage,
    pool: &CandidatePool,
    registry: &CustomAttributeRegistry,
) -> StageAssignment {
    mark_prior_positions(pool);
    let mut claimed: HashSet<SeriesKey> = HashSet::new();
    let mut slots = Vec::with_capacity(stage.viewports.len());

    for (viewport_index, viewport) in stage.viewports.iter().enumerate() {
        let best = best_candidate(viewport, pool, registry, &claimed);

        let series = best.map(|candidate| {
            if !viewport.allow_reuse {
                claimed.insert(candidate.key);
            }
            into_assigned(candidate, pool)
        });

        match &series {
            Some(s) => debug!(
                stage = %stage.name,
                viewport_index,
                series = %s.series_instance_uid,
                score = %s.series_score,
                "viewport assigned"
            ),
            None => debug!(stage = %stage.name, viewport_index, "viewport left empty"),
        }

        slots.push(SlotAssignment {
            viewport_index,
            series,
            allow_reuse: viewport.allow_reuse,
        });
    }

    StageAssignment {
        stage_name: stage.name.clone(),
        slots,
    }
}

/// Activation status of a stage for the given pool.
pub fn stage_status(
    stage: &Stage,
    pool: &CandidatePool,
    registry: &CustomAttributeRegistry,
) -> StageStatus {
    let filled = assign(stage, pool, registry).filled_count();

    let activation = &stage.activation;
    if filled < activation.passive_min_viewports_matched {
        StageStatus::Disabled
    } else if filled < activation.enabled_min_viewports_matched {
        StageStatus::Passive
    } else {
        StageStatus::Enabled
    }
}

fn best_candidate(
    viewport: &Viewport,
    pool: &CandidatePool,
    registry: &CustomAttributeRegistry,
    claimed: &HashSet<SeriesKey>,
) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    let study_rules = with_last_prior(&viewport.study_matching_rules, pool.available_priors());

    for (study_idx, study) in pool.studies.iter().enumerate() {
        let study_result = match_rules(study, &study_rules, registry);
        if study_result.required_failed {
            trace!(study = %study.study_instance_uid, "study fails required rule");
            continue;
        }

        for (series_idx, series) in study.series.iter().enumerate() {
            let key = (study_idx, series_idx);
            if !viewport.allow_reuse && claimed.contains(&key) {
                continue;
            }

            let series_result = match_rules(series, &viewport.series_matching_rules, registry);
            if series_result.required_failed {
                trace!(series = %series.series_instance_uid, "series fails required rule");
                continue;
            }

            let Some(image) = best_image(series, &viewport.image_matching_rules, registry) else {
                trace!(series = %series.series_instance_uid, "no image passes required rules");
                continue;
            };

            // Strictly better only, so the first candidate in pool order keeps a tie.
            let better = match &best {
                None => true,
                Some(current) => {
                    (series_result.score, study_result.score)
                        > (current.series_result.score, current.study_result.score)
                }
            };
            if better {
                best = Some(Candidate {
                    key,
                    study_result: study_result.clone(),
                    series_result,
                    image,
                });
            }
        }
    }

    best
}

/// Record each study's position in the pool as its `abstractPriorValue`.
fn mark_prior_positions(pool: &CandidatePool) {
    for (position, study) in pool.studies.iter().enumerate() {
        study.set_custom_attribute(ABSTRACT_PRIOR_VALUE, Some(AttrValue::from(position as i64)));
    }
}

/// Rewrite `abstractPriorValue` operands of `-1` to the index of the last
/// prior. With no priors loaded the rule keeps `-1` and matches nothing.
fn with_last_prior(rules: &[MatchingRule], priors: usize) -> Cow<'_, [MatchingRule]> {
    let last_prior = AttrValue::from(-1);
    let targets_last = |rule: &MatchingRule| {
        rule.attribute == ABSTRACT_PRIOR_VALUE
            && match &rule.constraint {
                Constraint::Equals(v) | Constraint::NotEquals(v) => v.loosely_equals(&last_prior),
                _ => false,
            }
    };
    if priors == 0 || !rules.iter().any(targets_last) {
        return Cow::Borrowed(rules);
    }

    let position = AttrValue::from(priors as i64);
    Cow::Owned(
        rules
            .iter()
            .map(|rule| {
                if !targets_last(rule) {
                    return rule.clone();
                }
                let constraint = match rule.constraint {
                    Constraint::NotEquals(_) => Constraint::NotEquals(position.clone()),
                    _ => Constraint::Equals(position.clone()),
                };
                MatchingRule {
                    constraint,
                    ..rule.clone()
                }
            })
            .collect(),
    )
}

/// Pick the initial image of a series: the best-scoring instance that passes
/// the required image rules, first on ties.
fn best_image(
    series: &SeriesMetadata,
    rules: &[MatchingRule],
    registry: &CustomAttributeRegistry,
) -> Option<ImageMatch> {
    if series.instances.is_empty() {
        if rules.iter().any(|r| r.required) {
            return None;
        }
        return Some(ImageMatch {
            index: 0,
            sop_instance_uid: None,
            result: MatchResult::default(),
        });
    }

    let mut best: Option<ImageMatch> = None;
    for (index, instance) in series.instances.iter().enumerate() {
        let result = match_rules(instance, rules, registry);
        if result.required_failed {
            continue;
        }
        if best.as_ref().map_or(true, |b| result.score > b.result.score) {
            best = Some(ImageMatch {
                index,
                sop_instance_uid: Some(instance.sop_instance_uid.clone()),
                result,
            });
        }
    }
    best
}

fn into_assigned(candidate: Candidate, pool: &CandidatePool) -> AssignedSeries {
    let (study_idx, series_idx) = candidate.key;
    let study = &pool.studies[study_idx];
    let series = &study.series[series_idx];

    let mut details = MatchDetails::default();
    details.extend(&candidate.study_result.details);
    details.extend(&candidate.series_result.details);
    details.extend(&candidate.image.result.details);

    AssignedSeries {
        study_instance_uid: study.study_instance_uid.clone(),
        series_instance_uid: series.series_instance_uid.clone(),
        image_index: candidate.image.index,
        sop_instance_uid: candidate.image.sop_instance_uid,
        series_score: candidate.series_result.score,
        study_score: candidate.study_result.score,
        image_score: candidate.image.result.score,
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceMetadata, StudyMetadata};
    use crate::protocol::schema::{Constraint, StageActivation, ViewportStructure};
    use rust_decimal_macros::dec;

    fn stage(viewports: Vec<Viewport>, columns: u32) -> Stage {
        Stage {
            id: None,
            name: "test".into(),
            viewport_structure: ViewportStructure::Grid { rows: 1, columns },
            viewports,
            activation: StageActivation::default(),
        }
    }

    fn series(uid: &str, description: &str) -> SeriesMetadata {
        SeriesMetadata::new(uid).with_tag("SeriesDescription", description)
    }

    fn by_description(needle: &str) -> Viewport {
        Viewport {
            series_matching_rules: vec![MatchingRule::new(
                "SeriesDescription",
                Constraint::Contains(needle.into()),
            )
            .weight(dec!(5))],
            ..Viewport::default()
        }
    }

    #[test]
    fn test_best_series_per_slot() {
        let pool = CandidatePool::new(vec![StudyMetadata::new("1")
            .with_series(series("1.1", "Chest"))
            .with_series(series("1.2", "Body CT"))]);
        let assignment = assign(&stage(vec![by_description("Body")], 1), &pool, &Default::default());
        let assigned = assignment.slots[0].series.as_ref().unwrap();
        assert_eq!(assigned.series_instance_uid, "1.2");
        assert_eq!(assigned.series_score, dec!(5));
    }

    #[test]
    fn test_claimed_series_not_reused() {
        let pool = CandidatePool::new(vec![StudyMetadata::new("1")
            .with_series(series("1.1", "Body CT"))
            .with_series(series("1.2", "Body CT thin"))]);
        let assignment = assign(
            &stage(vec![by_description("Body"), by_description("Body")], 2),
            &pool,
            &Default::default(),
        );
        assert_eq!(assignment.slots[0].series.as_ref().unwrap().series_instance_uid, "1.1");
        assert_eq!(assignment.slots[1].series.as_ref().unwrap().series_instance_uid, "1.2");
    }

    #[test]
    fn test_reuse_slot_may_repeat_series() {
        let pool = CandidatePool::new(vec![
            StudyMetadata::new("1").with_series(series("1.1", "Body CT"))
        ]);
        let mut shared = by_description("Body");
        shared.allow_reuse = true;
        let assignment = assign(
            &stage(vec![by_description("Body"), shared], 2),
            &pool,
            &Default::default(),
        );
        assert_eq!(assignment.slots[0].series.as_ref().unwrap().series_instance_uid, "1.1");
        assert_eq!(assignment.slots[1].series.as_ref().unwrap().series_instance_uid, "1.1");
    }

    #[test]
    fn test_shared_slot_before_normal_slot_does_not_claim() {
        let pool = CandidatePool::new(vec![
            StudyMetadata::new("1").with_series(series("1.1", "Body CT"))
        ]);
        let mut shared = by_description("Body");
        shared.allow_reuse = true;
        let assignment = assign(
            &stage(vec![shared, by_description("Body")], 2),
            &pool,
            &Default::default(),
        );
        assert_eq!(assignment.slots[0].series.as_ref().unwrap().series_instance_uid, "1.1");
        assert_eq!(assignment.slots[1].series.as_ref().unwrap().series_instance_uid, "1.1");

        let claimed = assignment.claimed_series();
        let distinct: HashSet<&str> = claimed.iter().copied().collect();
        assert_eq!(claimed, vec!["1.1"]);
        assert_eq!(distinct.len(), claimed.len());
    }

    fn at_prior(position: i64) -> Viewport {
        Viewport {
            study_matching_rules: vec![MatchingRule::new(
                ABSTRACT_PRIOR_VALUE,
                Constraint::Equals(position.into()),
            )
            .required()],
            ..by_description("Body")
        }
    }

    #[test]
    fn test_study_rules_target_current_and_priors() {
        let pool = CandidatePool::new(vec![
            StudyMetadata::new("current").with_series(series("c.1", "Body CT")),
            StudyMetadata::new("prior-1").with_series(series("p1.1", "Body CT")),
            StudyMetadata::new("prior-2").with_series(series("p2.1", "Body CT")),
        ]);
        let comparison = stage(vec![at_prior(0), at_prior(1), at_prior(-1)], 3);
        let assignment = assign(&comparison, &pool, &Default::default());

        let studies: Vec<&str> = assignment
            .slots
            .iter()
            .map(|slot| slot.series.as_ref().unwrap().study_instance_uid.as_str())
            .collect();
        assert_eq!(studies, vec!["current", "prior-1", "prior-2"]);
    }

    #[test]
    fn test_last_prior_without_priors_stays_empty() {
        let pool = CandidatePool::new(vec![
            StudyMetadata::new("current").with_series(series("c.1", "Body CT"))
        ]);
        let assignment = assign(
            &stage(vec![at_prior(0), at_prior(-1)], 2),
            &pool,
            &Default::default(),
        );
        assert!(assignment.slots[0].series.is_some());
        assert!(assignment.slots[1].series.is_none());
    }

    #[test]
    fn test_required_failure_leaves_slot_empty() {
        let pool = CandidatePool::new(vec![
            StudyMetadata::new("1").with_series(series("1.1", "Chest"))
        ]);
        let viewport = Viewport {
            series_matching_rules: vec![MatchingRule::new(
                "SeriesDescription",
                Constraint::Contains("Body".into()),
            )
            .required()],
            ..Viewport::default()
        };
        let assignment = assign(
            &stage(vec![viewport, Viewport::default()], 2),
            &pool,
            &Default::default(),
        );
        assert!(assignment.slots[0].series.is_none());
        // The unconstrained slot still gets the series.
        assert_eq!(assignment.slots[1].series.as_ref().unwrap().series_instance_uid, "1.1");
    }

    #[test]
    fn test_study_rules_filter_and_break_ties() {
        let pool = CandidatePool::new(vec![
            StudyMetadata::new("current")
                .with_tag("StudyDate", "20240101")
                .with_series(series("c.1", "Body CT")),
            StudyMetadata::new("prior")
                .with_tag("StudyDate", "20230101")
                .with_series(series("p.1", "Body CT")),
        ]);

        let mut prior_slot = by_description("Body");
        prior_slot.study_matching_rules =
            vec![MatchingRule::new("StudyDate", Constraint::StartsWith("2023".into())).required()];
        let assignment = assign(&stage(vec![prior_slot], 1), &pool, &Default::default());
        assert_eq!(assignment.slots[0].series.as_ref().unwrap().study_instance_uid, "prior");

        let mut preferring_prior = by_description("Body");
        preferring_prior.study_matching_rules =
            vec![MatchingRule::new("StudyDate", Constraint::StartsWith("2023".into())).weight(dec!(1))];
        let assignment = assign(&stage(vec![preferring_prior], 1), &pool, &Default::default());
        let assigned = assignment.slots[0].series.as_ref().unwrap();
        assert_eq!(assigned.series_instance_uid, "p.1");
        assert_eq!(assigned.study_score, dec!(1));
    }

    #[test]
    fn test_image_rules_pick_initial_image() {
        let pool = CandidatePool::new(vec![StudyMetadata::new("1").with_series(
            series("1.1", "AX T1")
                .with_instance(InstanceMetadata::new("i1").with_tag("InstanceNumber", 1))
                .with_instance(InstanceMetadata::new("i2").with_tag("InstanceNumber", 2))
                .with_instance(InstanceMetadata::new("i3").with_tag("InstanceNumber", 3)),
        )]);
        let viewport = Viewport {
            image_matching_rules: vec![MatchingRule::new(
                "InstanceNumber",
                Constraint::Equals(3.into()),
            )
            .weight(dec!(1))],
            ..Viewport::default()
        };
        let assignment = assign(&stage(vec![viewport], 1), &pool, &Default::default());
        let assigned = assignment.slots[0].series.as_ref().unwrap();
        assert_eq!(assigned.image_index, 2);
        assert_eq!(assigned.sop_instance_uid.as_deref(), Some("i3"));
    }

    #[test]
    fn test_stage_status_thresholds() {
        let pool = CandidatePool::new(vec![
            StudyMetadata::new("1").with_series(series("1.1", "Body CT"))
        ]);
        let mut two_up = stage(vec![by_description("Body"), by_description("Lung")], 2);
        two_up.activation = StageActivation {
            enabled_min_viewports_matched: 2,
            passive_min_viewports_matched: 1,
        };
        let registry = Default::default();
        assert_eq!(stage_status(&two_up, &pool, &registry), StageStatus::Passive);

        two_up.activation.passive_min_viewports_matched = 2;
        assert_eq!(stage_status(&two_up, &pool, &registry), StageStatus::Disabled);

        let empty = CandidatePool::default();
        let single = stage(vec![Viewport::default()], 1);
        assert_eq!(stage_status(&single, &empty, &registry), StageStatus::Passive);
    }
}
