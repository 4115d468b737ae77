//! Which RPC protocol each binder device speaks.
//!
//! ```toml
//! [protocol]
//! "/dev/binder" = "aidl3"
//! "/dev/hwbinder" = "hidl"
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use serde::Deserialize;
use tracing::warn;

use crate::{
    error::{Error, Result},
    protocol::{self, RpcProtocol},
};

#[derive(Debug, Clone, Default)]
pub struct Config {
    protocols: HashMap<String, &'static dyn RpcProtocol>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    protocol: BTreeMap<String, String>,
}

impl Config {
    pub fn from_toml_str(data: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(data)?;
        let mut config = Config::default();
        for (dev, name) in raw.protocol {
            let Some(protocol) = protocol::by_name(name.trim()) else {
                warn!("unknown protocol {name:?} for {dev}");
                return Err(Error::UnknownProtocol(name));
            };
            config.protocols.insert(dev, protocol);
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&data)
    }

    pub fn set_protocol(&mut self, dev: impl Into<String>, protocol: &'static dyn RpcProtocol) {
        self.protocols.insert(dev.into(), protocol);
    }

    /// Configured protocol for `dev`, falling back to the built-in choice.
    pub fn protocol_for_device(&self, dev: &str) -> &'static dyn RpcProtocol {
        self.protocols
            .get(dev)
            .copied()
            .unwrap_or_else(|| protocol::for_device(dev))
    }
}
