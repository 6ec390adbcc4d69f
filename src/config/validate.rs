// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{RelayError, Result};
use crate::resolver::Abi;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::RelayError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_binary(&raw)?;
        validate_capacities(&raw)?;
        let abis = parse_abis(&raw)?;
        Ok(ConfigFile::new_unchecked(raw, abis))
    }
}

fn validate_binary(cfg: &RawConfigFile) -> Result<()> {
    let name = cfg.binary.name.trim();
    if name.is_empty() {
        return Err(RelayError::ConfigError(
            "[binary].name must not be empty".to_string(),
        ));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(RelayError::ConfigError(format!(
            "[binary].name must be a file name, not a path (got '{}')",
            cfg.binary.name
        )));
    }
    Ok(())
}

fn validate_capacities(cfg: &RawConfigFile) -> Result<()> {
    if cfg.supervisor.replay == 0 {
        return Err(RelayError::ConfigError(
            "[supervisor].replay must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.client.log_capacity == 0 {
        return Err(RelayError::ConfigError(
            "[client].log_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn parse_abis(cfg: &RawConfigFile) -> Result<Vec<Abi>> {
    let Some(tags) = &cfg.binary.abis else {
        return Ok(Abi::supported());
    };

    let mut abis = Vec::with_capacity(tags.len());
    for tag in tags {
        let abi: Abi = tag
            .parse()
            .map_err(|e: String| RelayError::ConfigError(format!("[binary].abis: {e}")))?;
        if abis.contains(&abi) {
            return Err(RelayError::ConfigError(format!(
                "[binary].abis lists '{abi}' more than once"
            )));
        }
        abis.push(abi);
    }
    Ok(abis)
}
