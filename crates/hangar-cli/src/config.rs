use std::env;
use std::path::PathBuf;

/// Settings read from the environment (and a `.env` file, if present).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub protocols: ProtocolConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let log_level = lookup("HANGAR_LOG_LEVEL").unwrap_or_else(|| "warn".to_string());

        let protocol_dir = match lookup("HANGAR_PROTOCOL_DIR") {
            Some(dir) if !dir.trim().is_empty() => {
                let path = PathBuf::from(dir);
                if !path.is_dir() {
                    return Err(ConfigError::ProtocolDirMissing { path });
                }
                Some(path)
            }
            _ => None,
        };

        let default_protocol =
            lookup("HANGAR_DEFAULT_PROTOCOL").unwrap_or_else(|| "default".to_string());
        if default_protocol.trim().is_empty() {
            return Err(ConfigError::EmptyDefaultProtocol);
        }

        Ok(Self {
            protocols: ProtocolConfig {
                dir: protocol_dir,
                default_id: default_protocol,
            },
            telemetry: TelemetryConfig { log_level },
        })
    }
}

/// Where extra protocols come from and which one is the fallback.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub dir: Option<PathBuf>,
    pub default_id: String,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("HANGAR_PROTOCOL_DIR '{}' is not a directory", path.display())]
    ProtocolDirMissing { path: PathBuf },

    #[error("HANGAR_DEFAULT_PROTOCOL must not be empty")]
    EmptyDefaultProtocol,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.telemetry.log_level, "warn");
        assert_eq!(config.protocols.default_id, "default");
        assert!(config.protocols.dir.is_none());
    }

    #[test]
    fn test_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&[
            ("HANGAR_LOG_LEVEL", "hangar_core=debug"),
            ("HANGAR_PROTOCOL_DIR", dir.path().to_str().unwrap()),
            ("HANGAR_DEFAULT_PROTOCOL", "site-default"),
        ])
        .unwrap();
        assert_eq!(config.telemetry.log_level, "hangar_core=debug");
        assert_eq!(config.protocols.dir.as_deref(), Some(dir.path()));
        assert_eq!(config.protocols.default_id, "site-default");
    }

    #[test]
    fn test_missing_protocol_dir() {
        let err = config(&[("HANGAR_PROTOCOL_DIR", "/nonexistent/hangar/protocols")]).unwrap_err();
        assert!(matches!(err, ConfigError::ProtocolDirMissing { .. }));
    }

    #[test]
    fn test_blank_values() {
        assert!(config(&[("HANGAR_PROTOCOL_DIR", "  ")]).unwrap().protocols.dir.is_none());
        assert!(matches!(
            config(&[("HANGAR_DEFAULT_PROTOCOL", "")]),
            Err(ConfigError::EmptyDefaultProtocol)
        ));
    }
}
