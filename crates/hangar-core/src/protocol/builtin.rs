use crate::error::HangarError;
use crate::protocol::parse_protocol_str;
use crate::protocol::schema::Protocol;

const DEFAULT_JSON: &str = include_str!("../../../../protocols/default.json");
const CT_BODY_JSON: &str = include_str!("../../../../protocols/ct-body.json");
const MR_TWO_BY_TWO_JSON: &str = include_str!("../../../../protocols/mr-two-by-two.json");

/// Id of the built-in protocol that matches any data.
pub const DEFAULT_PROTOCOL_ID: &str = "default";

/// Available predefined protocols, in registration order.
pub const PRESETS: &[&str] = &["default", "ct-body", "mr-two-by-two"];

/// Load a predefined protocol by name.
pub fn load_preset(name: &str) -> Result<Protocol, HangarError> {
    let json = match name {
        "default" => DEFAULT_JSON,
        "ct-body" => CT_BODY_JSON,
        "mr-two-by-two" => MR_TWO_BY_TWO_JSON,
        _ => {
            return Err(HangarError::UnknownPreset {
                name: name.to_string(),
                available: PRESETS.join(", "),
            })
        }
    };
    parse_protocol_str(json)
}

/// Load every predefined protocol, in registration order.
pub fn load_all_presets() -> Result<Vec<Protocol>, HangarError> {
    PRESETS.iter().map(|name| load_preset(name)).collect()
}
