use hangar_core::error::HangarError;
use hangar_core::matching::builtin_registry;
use hangar_core::model::load_pool;
use hangar_core::protocol::ProtocolStore;
use hangar_core::Engine;
use std::path::PathBuf;
use tracing::info;

use super::load_library;
use crate::config::AppConfig;
use crate::output;

pub struct MatchArgs {
    pub pool_file: PathBuf,
    pub rule_files: Vec<PathBuf>,
    pub presets: Vec<String>,
    pub protocol: Option<String>,
    pub stage: Option<String>,
    pub output_format: String,
    pub verbose: bool,
}

pub fn run(config: &AppConfig, args: MatchArgs) -> Result<(), HangarError> {
    let library = load_library(config, &args.presets, &args.rule_files)?;
    let store = ProtocolStore::new(library, &config.protocols.default_id)?;
    let pool = load_pool(&args.pool_file)?;
    info!(
        file = %args.pool_file.display(),
        studies = pool.studies.len(),
        series = pool.series_count(),
        "candidate pool loaded"
    );

    let mut engine = Engine::new(store, builtin_registry());
    engine.on_data_changed(pool);

    if let Some(id) = &args.protocol {
        engine.set_protocol(id)?;
    }

    if let Some(stage) = &args.stage {
        match stage.parse::<usize>() {
            Ok(index) => {
                engine.jump_to_stage(index);
            }
            Err(_) => {
                let known = engine
                    .current_protocol()
                    .is_some_and(|p| p.stages.iter().any(|s| s.key() == stage || &s.name == stage));
                if !known {
                    return Err(HangarError::ProtocolInvalid(format!(
                        "protocol '{}' has no stage named '{}'",
                        engine.current_protocol().map_or("-", |p| p.id.as_str()),
                        stage
                    )));
                }
                engine.jump_to_stage_named(stage);
            }
        }
    }

    let report = engine
        .report()
        .ok_or_else(|| HangarError::StoreInvalid("no protocol was selected".into()))?;

    match args.output_format.as_str() {
        "json" => output::json::print(&report)?,
        _ => output::table::print(&report, args.verbose),
    }

    Ok(())
}
