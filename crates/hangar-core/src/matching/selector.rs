use crate::matching::attribute::CustomAttributeRegistry;
use crate::matching::matcher::match_rules;
use crate::matching::outcome::{MatchResult, ProtocolMatch};
use crate::model::MetadataAccessor;
use crate::protocol::ProtocolStore;
use rust_decimal::Decimal;
use tracing::{debug, trace};

/// All qualifying protocols, best first.
///
/// A protocol qualifies when enough priors are loaded for it and none of its
/// required protocol rules fail. Equal scores keep registration order.
pub fn rank_protocols(
    store: &ProtocolStore,
    representative: Option<&dyn MetadataAccessor>,
    available_priors: usize,
    registry: &CustomAttributeRegistry,
) -> Vec<ProtocolMatch> {
    let Some(representative) = representative else {
        return Vec::new();
    };

    let mut ranked = Vec::new();
    for protocol in store.protocols() {
        if protocol.number_of_priors_referenced > available_priors {
            trace!(
                id = %protocol.id,
                needed = protocol.number_of_priors_referenced,
                available = available_priors,
                "protocol skipped: not enough priors"
            );
            continue;
        }

        let result = match_rules(representative, &protocol.protocol_matching_rules, registry);
        if result.required_failed {
            trace!(id = %protocol.id, "protocol skipped: required rule failed");
            continue;
        }

        trace!(id = %protocol.id, score = %result.score, "protocol qualifies");
        ranked.push(ProtocolMatch {
            protocol_id: protocol.id.clone(),
            score: result.score,
            result,
            fallback: false,
        });
    }

    // sort_by is stable, so ties stay in registration order.
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked
}

/// Pick the best protocol for the representative study.
///
/// Never comes back empty-handed: when nothing qualifies (or there is no
/// study at all) the store's default protocol is returned with
/// `fallback = true`.
pub fn select_protocol(
    store: &ProtocolStore,
    representative: Option<&dyn MetadataAccessor>,
    available_priors: usize,
    registry: &CustomAttributeRegistry,
) -> ProtocolMatch {
    let best = rank_protocols(store, representative, available_priors, registry)
        .into_iter()
        .next();

    match best {
        Some(best) => {
            debug!(id = %best.protocol_id, score = %best.score, "protocol selected");
            best
        }
        None => {
            let default = store.default_protocol();
            debug!(id = %default.id, "no protocol qualified, using default");
            ProtocolMatch {
                protocol_id: default.id.clone(),
                score: Decimal::ZERO,
                result: MatchResult::default(),
                fallback: true,
            }
        }
    }
}
