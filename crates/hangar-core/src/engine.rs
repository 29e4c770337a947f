use crate::error::HangarError;
use crate::matching::assignment::{assign, stage_status};
use crate::matching::attribute::CustomAttributeRegistry;
use crate::matching::outcome::{AssignedSeries, ProtocolMatch, StageAssignment, StageStatus};
use crate::matching::selector::{rank_protocols, select_protocol};
use crate::model::{CandidatePool, MetadataAccessor};
use crate::protocol::schema::{Protocol, Stage};
use crate::protocol::ProtocolStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace, warn};

pub type ListenerId = u64;

type Listener = Box<dyn FnMut(&EngineEvent) + Send>;

/// Notifications sent to subscribed listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EngineEvent {
    ProtocolChanged {
        protocol_id: String,
    },
    StageChanged {
        stage_index: usize,
    },
    /// Sent after every reassignment, including one that leaves the mapping
    /// unchanged.
    AssignmentUpdated {
        protocol_id: String,
        stage_index: usize,
        assignment: StageAssignment,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    NoProtocol,
    ProtocolSelected {
        protocol_id: String,
        stage_index: usize,
    },
}

/// Snapshot of the current hanging: the protocol in effect, the competing
/// candidates, and the slot assignment of the current stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HangingReport {
    pub protocol_id: String,
    pub protocol_name: String,
    /// Automatic selection outcome. `None` when the protocol was set manually.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<ProtocolMatch>,
    pub candidates: Vec<ProtocolMatch>,
    pub stage_index: usize,
    pub stage_count: usize,
    pub stage_statuses: Vec<StageStatus>,
    pub assignment: StageAssignment,
}

/// Hanging protocol engine.
///
/// Owns the protocol store, the custom attribute registry and the current
/// candidate pool. Every data change is a full recomputation: protocol
/// selection, then assignment of the current stage.
pub struct Engine {
    store: ProtocolStore,
    registry: CustomAttributeRegistry,
    pool: CandidatePool,
    state: EngineState,
    selection: Option<ProtocolMatch>,
    assignment: Option<StageAssignment>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener_id: ListenerId,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(store: ProtocolStore, registry: CustomAttributeRegistry) -> Self {
        Self {
            store,
            registry,
            pool: CandidatePool::default(),
            state: EngineState::NoProtocol,
            selection: None,
            assignment: None,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    pub fn store(&self) -> &ProtocolStore {
        &self.store
    }

    pub fn registry(&self) -> &CustomAttributeRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &CandidatePool {
        &self.pool
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Replace the candidate pool and recompute everything.
    ///
    /// A different protocol resets the stage to 0; the same protocol keeps
    /// its current stage. The current stage is always reassigned.
    pub fn on_data_changed(&mut self, pool: CandidatePool) -> ProtocolMatch {
        self.pool = pool;
        debug!(
            studies = self.pool.studies.len(),
            series = self.pool.series_count(),
            "data changed"
        );

        let selection = select_protocol(
            &self.store,
            self.representative(),
            self.pool.available_priors(),
            &self.registry,
        );
        if selection.fallback {
            warn!(id = %selection.protocol_id, "no protocol matched, using default");
        }

        let protocol_id = selection.protocol_id.clone();
        let stage_index = if self.current_protocol_id() == Some(protocol_id.as_str()) {
            self.current_stage_index().unwrap_or(0)
        } else {
            0
        };
        self.selection = Some(selection.clone());
        self.transition(protocol_id, stage_index);
        selection
    }

    /// Apply a protocol by id, bypassing scoring. Starts at stage 0.
    pub fn set_protocol(&mut self, id: &str) -> Result<(), HangarError> {
        if self.store.get(id).is_none() {
            warn!(id, "set_protocol: unknown protocol id");
            return Err(HangarError::UnknownProtocol { id: id.to_string() });
        }
        self.selection = None;
        self.transition(id.to_string(), 0);
        Ok(())
    }

    pub fn next_stage(&mut self) -> bool {
        match self.current_stage_index() {
            Some(index) => self.go_to_stage(index + 1),
            None => false,
        }
    }

    pub fn previous_stage(&mut self) -> bool {
        match self.current_stage_index() {
            Some(index) if index > 0 => self.go_to_stage(index - 1),
            _ => false,
        }
    }

    /// Jump to a stage by index. Out-of-range indexes clamp to the last stage.
    pub fn jump_to_stage(&mut self, index: usize) -> bool {
        self.go_to_stage(index)
    }

    /// Jump to the stage whose id or name is `name`.
    pub fn jump_to_stage_named(&mut self, name: &str) -> bool {
        let index = self
            .current_protocol()
            .and_then(|p| p.stages.iter().position(|s| s.key() == name || s.name == name));
        match index {
            Some(index) => self.go_to_stage(index),
            None => {
                warn!(stage = name, "no such stage in current protocol");
                false
            }
        }
    }

    pub fn current_protocol(&self) -> Option<&Protocol> {
        self.current_protocol_id().and_then(|id| self.store.get(id))
    }

    pub fn current_stage_index(&self) -> Option<usize> {
        match &self.state {
            EngineState::ProtocolSelected { stage_index, .. } => Some(*stage_index),
            EngineState::NoProtocol => None,
        }
    }

    pub fn current_stage(&self) -> Option<&Stage> {
        let index = self.current_stage_index()?;
        self.current_protocol()?.stages.get(index)
    }

    /// Filled slots of the current stage keyed by viewport index.
    pub fn current_assignment(&self) -> BTreeMap<usize, AssignedSeries> {
        self.assignment
            .as_ref()
            .map(StageAssignment::to_map)
            .unwrap_or_default()
    }

    /// Full slot-by-slot assignment of the current stage, empty slots included.
    pub fn stage_assignment(&self) -> Option<&StageAssignment> {
        self.assignment.as_ref()
    }

    /// Activation status of every stage of the current protocol.
    pub fn stage_statuses(&self) -> Vec<StageStatus> {
        self.current_protocol()
            .map(|protocol| {
                protocol
                    .stages
                    .iter()
                    .map(|stage| stage_status(stage, &self.pool, &self.registry))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn report(&self) -> Option<HangingReport> {
        let protocol = self.current_protocol()?;
        let stage_index = self.current_stage_index()?;
        let assignment = self.assignment.clone()?;

        Some(HangingReport {
            protocol_id: protocol.id.clone(),
            protocol_name: protocol.display_name().to_string(),
            selection: self.selection.clone(),
            candidates: rank_protocols(
                &self.store,
                self.representative(),
                self.pool.available_priors(),
                &self.registry,
            ),
            stage_index,
            stage_count: protocol.stages.len(),
            stage_statuses: self.stage_statuses(),
            assignment,
        })
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&EngineEvent) + Send + 'static,
    {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// Drop every listener. Call on teardown.
    pub fn release_listeners(&mut self) {
        debug!(count = self.listeners.len(), "releasing listeners");
        self.listeners.clear();
    }

    fn representative(&self) -> Option<&dyn MetadataAccessor> {
        self.pool
            .active_study()
            .map(|study| study as &dyn MetadataAccessor)
    }

    fn current_protocol_id(&self) -> Option<&str> {
        match &self.state {
            EngineState::ProtocolSelected { protocol_id, .. } => Some(protocol_id),
            EngineState::NoProtocol => None,
        }
    }

    /// Move to `(protocol_id, stage_index)`, notify, and reassign.
    fn transition(&mut self, protocol_id: String, stage_index: usize) {
        let protocol_changed = self.current_protocol_id() != Some(protocol_id.as_str());
        let stage_changed = self.current_stage_index() != Some(stage_index);

        self.state = EngineState::ProtocolSelected {
            protocol_id: protocol_id.clone(),
            stage_index,
        };

        if protocol_changed {
            debug!(id = %protocol_id, "protocol changed");
            self.emit(EngineEvent::ProtocolChanged { protocol_id });
        }
        if stage_changed {
            self.emit(EngineEvent::StageChanged { stage_index });
        }
        self.reassign();
    }

    fn go_to_stage(&mut self, index: usize) -> bool {
        let (current, stage_count) = match (self.current_stage_index(), self.current_protocol()) {
            (Some(current), Some(protocol)) => (current, protocol.stages.len()),
            _ => return false,
        };

        let target = index.min(stage_count.saturating_sub(1));
        if target == current {
            return false;
        }

        if let EngineState::ProtocolSelected { stage_index, .. } = &mut self.state {
            *stage_index = target;
        }
        debug!(from = current, to = target, "stage changed");
        self.emit(EngineEvent::StageChanged {
            stage_index: target,
        });
        self.reassign();
        true
    }

    fn reassign(&mut self) {
        let assignment = self
            .current_stage()
            .map(|stage| assign(stage, &self.pool, &self.registry));
        self.assignment = assignment.clone();

        let (Some(assignment), EngineState::ProtocolSelected { protocol_id, stage_index }) =
            (assignment, &self.state)
        else {
            return;
        };
        let event = EngineEvent::AssignmentUpdated {
            protocol_id: protocol_id.clone(),
            stage_index: *stage_index,
            assignment,
        };
        self.emit(event);
    }

    fn emit(&mut self, event: EngineEvent) {
        trace!(listeners = self.listeners.len(), ?event, "emitting event");
        for (_, listener) in self.listeners.iter_mut() {
            listener(&event);
        }
    }
}
