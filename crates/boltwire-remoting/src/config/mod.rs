//! Remoting config loader (strict parsing).

pub mod schema;

use std::fs;

use boltwire_core::error::{RemotingError, Result};

pub use schema::{
    ClientSection, ExecutorSection, FramingVersion, HeartbeatSection, ProtocolSection, RemotingConfig,
    ServerSection,
};

pub fn load_from_file(path: &str) -> Result<RemotingConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| RemotingError::Config(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<RemotingConfig> {
    let cfg: RemotingConfig =
        serde_yaml::from_str(s).map_err(|e| RemotingError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
