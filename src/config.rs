//! Environment-driven configuration for the CLI entry point.
//!
//! Shape follows a typical replication checker's `ReplicationConfig::from_env`:
//! required fields fail fast with a named `Configuration` error, optional
//! fields fall back to sensible defaults.

use std::env;

use crate::errors::{ReplicationError, ReplicationResult};
use crate::tuple::TransferCapabilities;

#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// libpq connection string for the upstream.
    pub connection_string: String,
    pub publication_name: String,
    pub slot_name: String,
    pub feedback_interval_secs: u64,
    pub allow_internal_basetypes: bool,
    pub allow_binary_basetypes: bool,
    /// Database encoding the decoder validates an incoming STARTUP's
    /// `client_encoding` against (§6).
    pub database_encoding: String,
}

impl ReplicationConfig {
    pub fn from_env() -> ReplicationResult<Self> {
        let connection_string = env::var("DATABASE_URL").map_err(|_| {
            ReplicationError::config("missing required DATABASE_URL environment variable")
        })?;

        let slot_name = env::var("SLOT_NAME").unwrap_or_else(|_| "sub".to_string());
        let publication_name = env::var("PUB_NAME").unwrap_or_else(|_| "pub".to_string());

        let feedback_interval_secs = env::var("FEEDBACK_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let allow_internal_basetypes = env_flag("ALLOW_INTERNAL_BASETYPES", false)?;
        let allow_binary_basetypes = env_flag("ALLOW_BINARY_BASETYPES", true)?;
        let database_encoding =
            env::var("DATABASE_ENCODING").unwrap_or_else(|_| "UTF8".to_string());

        let config = Self {
            connection_string,
            publication_name,
            slot_name,
            feedback_interval_secs,
            allow_internal_basetypes,
            allow_binary_basetypes,
            database_encoding,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ReplicationResult<()> {
        if self.slot_name.is_empty() || self.slot_name.len() > 63 {
            return Err(ReplicationError::config(
                "SLOT_NAME must be between 1 and 63 characters",
            ));
        }
        if !self
            .slot_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(ReplicationError::config(
                "SLOT_NAME may only contain lowercase letters, digits, and underscores",
            ));
        }
        if self.publication_name.is_empty() {
            return Err(ReplicationError::config("PUB_NAME must not be empty"));
        }
        Ok(())
    }

    pub fn transfer_capabilities(&self) -> TransferCapabilities {
        TransferCapabilities {
            allow_internal: self.allow_internal_basetypes,
            allow_binary: self.allow_binary_basetypes,
        }
    }
}

fn env_flag(name: &str, default: bool) -> ReplicationResult<bool> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ReplicationError::config(format!(
                "{name} must be a boolean (true/false), got {raw:?}"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_slot_name() {
        let config = ReplicationConfig {
            connection_string: "postgres://".into(),
            publication_name: "pub".into(),
            slot_name: "".into(),
            feedback_interval_secs: 10,
            allow_internal_basetypes: false,
            allow_binary_basetypes: true,
            database_encoding: "UTF8".into(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_uppercase_slot_name() {
        let config = ReplicationConfig {
            connection_string: "postgres://".into(),
            publication_name: "pub".into(),
            slot_name: "BadSlot".into(),
            feedback_interval_secs: 10,
            allow_internal_basetypes: false,
            allow_binary_basetypes: true,
            database_encoding: "UTF8".into(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn accepts_valid_config() {
        let config = ReplicationConfig {
            connection_string: "postgres://".into(),
            publication_name: "pub".into(),
            slot_name: "sub_1".into(),
            feedback_interval_secs: 10,
            allow_internal_basetypes: false,
            allow_binary_basetypes: true,
            database_encoding: "UTF8".into(),
        };
        assert!(config.validate().is_ok());
    }
}
