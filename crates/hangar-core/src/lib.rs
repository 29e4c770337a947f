pub mod engine;
pub mod error;
pub mod matching;
pub mod model;
pub mod protocol;

pub use engine::{Engine, EngineEvent, EngineState, HangingReport, ListenerId};

use error::HangarError;
use matching::builtin_registry;
use model::CandidatePool;
use protocol::schema::Protocol;
use protocol::ProtocolStore;

/// Main API entry point: pick the best protocol for a candidate pool and
/// assign its first stage.
///
/// Registers `protocols` in the given order with `default_id` as the fallback
/// and resolves custom attributes through the built-in registry. Use
/// [`Engine`] directly to keep state across data changes or to navigate
/// stages.
pub fn hang(
    pool: CandidatePool,
    protocols: Vec<Protocol>,
    default_id: &str,
) -> Result<HangingReport, HangarError> {
    let store = ProtocolStore::new(protocols, default_id)?;
    let mut engine = Engine::new(store, builtin_registry());
    engine.on_data_changed(pool);

    engine
        .report()
        .ok_or_else(|| HangarError::StoreInvalid("no protocol was selected".into()))
}
