use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HangarError {
    #[error("failed to load protocol from {path}: {reason}")]
    ProtocolLoad { path: PathBuf, reason: String },

    #[error("invalid protocol: {0}")]
    ProtocolInvalid(String),

    #[error("invalid protocol store: {0}")]
    StoreInvalid(String),

    #[error("protocol '{id}' is not registered")]
    UnknownProtocol { id: String },

    #[error("unknown preset '{name}'. Available: {available}")]
    UnknownPreset { name: String, available: String },

    #[error("failed to load candidate pool: {0}")]
    PoolLoad(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
