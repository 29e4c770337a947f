use super::schema::Protocol;
use super::validate_protocol;
use crate::error::HangarError;
use tracing::debug;

/// Registered protocols in registration order, plus the designated default.
///
/// The store always holds a default protocol without required rules, so
/// selection can always fall back to it.
#[derive(Debug, Clone)]
pub struct ProtocolStore {
    protocols: Vec<Protocol>,
    default_index: usize,
}

impl ProtocolStore {
    pub fn new(protocols: Vec<Protocol>, default_id: &str) -> Result<Self, HangarError> {
        for (i, protocol) in protocols.iter().enumerate() {
            validate_protocol(protocol)?;
            if protocols[..i].iter().any(|p| p.id == protocol.id) {
                return Err(HangarError::StoreInvalid(format!(
                    "protocol id '{}' is registered twice",
                    protocol.id
                )));
            }
        }

        let default_index = protocols
            .iter()
            .position(|p| p.id == default_id)
            .ok_or_else(|| {
                HangarError::StoreInvalid(format!(
                    "default protocol '{}' is not registered",
                    default_id
                ))
            })?;
        check_default(&protocols[default_index])?;

        debug!(
            count = protocols.len(),
            default = default_id,
            "protocol store initialized"
        );

        Ok(Self {
            protocols,
            default_index,
        })
    }

    /// Register a protocol. Re-registering an id replaces the earlier
    /// definition and keeps its registration position.
    pub fn add_protocol(&mut self, protocol: Protocol) -> Result<(), HangarError> {
        validate_protocol(&protocol)?;
        match self.protocols.iter().position(|p| p.id == protocol.id) {
            Some(idx) => {
                if idx == self.default_index {
                    check_default(&protocol)?;
                }
                debug!(id = %protocol.id, "protocol replaced");
                self.protocols[idx] = protocol;
            }
            None => {
                debug!(id = %protocol.id, "protocol registered");
                self.protocols.push(protocol);
            }
        }
        Ok(())
    }

    pub fn remove_protocol(&mut self, id: &str) -> Result<Protocol, HangarError> {
        let idx = self
            .protocols
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| HangarError::UnknownProtocol { id: id.to_string() })?;

        if idx == self.default_index {
            return Err(HangarError::StoreInvalid(format!(
                "the default protocol '{}' cannot be removed",
                id
            )));
        }
        if idx < self.default_index {
            self.default_index -= 1;
        }
        Ok(self.protocols.remove(idx))
    }

    pub fn get(&self, id: &str) -> Option<&Protocol> {
        self.protocols.iter().find(|p| p.id == id)
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    pub fn default_protocol(&self) -> &Protocol {
        &self.protocols[self.default_index]
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}

fn check_default(protocol: &Protocol) -> Result<(), HangarError> {
    if protocol.has_required_rules() || protocol.number_of_priors_referenced > 0 {
        return Err(HangarError::StoreInvalid(format!(
            "default protocol '{}' must match any data (no required rules, no priors)",
            protocol.id
        )));
    }
    Ok(())
}
