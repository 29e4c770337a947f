pub mod matching;
pub mod protocols;

use crate::config::AppConfig;
use hangar_core::error::HangarError;
use hangar_core::protocol::builtin::{self, DEFAULT_PROTOCOL_ID};
use hangar_core::protocol::schema::Protocol;
use std::path::PathBuf;
use tracing::debug;

/// Assemble the protocol library in registration order: presets, then
/// `HANGAR_PROTOCOL_DIR`, then explicit files. A later protocol with an
/// id already seen replaces the earlier one in place.
///
/// With no presets and no files, every preset is loaded. The built-in
/// default is appended when it is the configured fallback and nothing else
/// provided it.
pub fn load_library(
    config: &AppConfig,
    presets: &[String],
    rule_files: &[PathBuf],
) -> Result<Vec<Protocol>, HangarError> {
    let effective_presets: Vec<String> = if presets.is_empty() && rule_files.is_empty() {
        builtin::PRESETS.iter().map(|s| s.to_string()).collect()
    } else {
        presets.to_vec()
    };

    let mut library: Vec<Protocol> = Vec::new();
    for name in &effective_presets {
        push_or_replace(&mut library, builtin::load_preset(name)?);
    }

    if let Some(dir) = &config.protocols.dir {
        let from_dir = hangar_core::protocol::load_protocol_dir(dir)?;
        debug!(dir = %dir.display(), count = from_dir.len(), "loaded protocol directory");
        for protocol in from_dir {
            push_or_replace(&mut library, protocol);
        }
    }

    for path in rule_files {
        push_or_replace(&mut library, hangar_core::protocol::load_protocol(path)?);
    }

    let default_id = &config.protocols.default_id;
    if default_id == DEFAULT_PROTOCOL_ID && !library.iter().any(|p| &p.id == default_id) {
        library.push(builtin::load_preset(DEFAULT_PROTOCOL_ID)?);
    }

    Ok(library)
}

fn push_or_replace(library: &mut Vec<Protocol>, protocol: Protocol) {
    match library.iter().position(|p| p.id == protocol.id) {
        Some(idx) => {
            debug!(id = %protocol.id, "protocol overrides earlier definition");
            library[idx] = protocol;
        }
        None => library.push(protocol),
    }
}
