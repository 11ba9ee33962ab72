//! Configuration of multiplexers and pools, and the CLI arguments of the loopback
//! demo.
//!
//! Multiplexers and pools are described declaratively, typically as JSON:
//!
//! ```json
//! {
//!     "name": "mux.acquirer-a",
//!     "out": "acquirer-a.send",
//!     "in": "acquirer-a.receive",
//!     "unhandled": "acquirer-a.unhandled",
//!     "key": ["41", "11"],
//!     "mti_key": [{"prefix": "08", "fields": ["70", "11"]}],
//!     "ignore_rc": ["96"],
//!     "ready": ["acquirer-a.ready"]
//! }
//! ```
use clap::Parser;
use fxhash::FxHashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{
    key::{KeyBuilder, KeyOverride, MtiMapping, DEFAULT_KEY_FIELDS, DEFAULT_MTI_MAPPING},
    pool::Strategy,
    MuxError,
};

/// Default number of pool members in the loopback demo.
pub const DEFAULT_MEMBERS: usize = 3;

/// Default request timeout of the loopback demo, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

#[derive(Parser, Debug, Clone)]
pub struct CliArgs {
    /// Number of multiplexers in the pool.
    #[clap(short, long, default_value_t = DEFAULT_MEMBERS)]
    pub members: usize,
    /// Routing strategy of the pool.
    #[clap(short, long, default_value = "round-robin")]
    pub strategy: Strategy,
    /// Number of requests to send.
    #[clap(short, long, default_value_t = 10)]
    pub requests: usize,
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,
    /// Member indices whose endpoint never answers.
    #[clap(long, value_delimiter = ',')]
    pub silent: Vec<usize>,
    /// Read the pool configuration from a JSON file instead.
    #[clap(long)]
    pub pool_config: Option<PathBuf>,
}

impl CliArgs {
    /// Return the request timeout as a [`tokio::time::Duration`].
    pub fn timeout(&self) -> tokio::time::Duration {
        tokio::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Read any configuration from a JSON string.
fn from_json_str<T: DeserializeOwned>(json: &str) -> Result<T, MuxError> {
    serde_json::from_str(json).map_err(MuxError::from)
}

/// Read any configuration from a JSON file.
fn from_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, MuxError> {
    let contents = std::fs::read_to_string(path)?;
    from_json_str(&contents)
}

fn default_key_fields() -> Vec<String> {
    DEFAULT_KEY_FIELDS.iter().map(|f| f.to_string()).collect()
}

fn default_mti_mapping() -> Vec<String> {
    DEFAULT_MTI_MAPPING.iter().map(|t| t.to_string()).collect()
}

/// The configuration of a single [`crate::Multiplexer`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MuxConfig {
    /// The name of the multiplexer, used for registration and liveness gating.
    pub name: String,
    /// Where outgoing messages are put for the transport to pick up.
    #[serde(default)]
    pub out: String,
    /// Where the transport puts incoming messages.
    #[serde(default, rename = "in")]
    pub inbound: String,
    /// Where unmatched messages are parked when no request listener takes them.
    #[serde(default)]
    pub unhandled: Option<String>,
    #[serde(default = "default_key_fields")]
    pub key: Vec<String>,
    #[serde(default)]
    pub mti_key: Vec<KeyOverride>,
    #[serde(default)]
    pub header_is_key: bool,
    #[serde(default = "default_mti_mapping")]
    pub mti_mapping: Vec<String>,
    /// Response codes that a waiting request skips over.
    #[serde(default)]
    pub ignore_rc: Vec<String>,
    /// Correlate incoming messages even if they are not responses.
    #[serde(default)]
    pub return_rejects: bool,
    /// Readiness indicators; the multiplexer is connected while any is present.
    #[serde(default)]
    pub ready: Vec<String>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            name: "mux".to_owned(),
            out: String::new(),
            inbound: String::new(),
            unhandled: None,
            key: default_key_fields(),
            mti_key: Vec::new(),
            header_is_key: false,
            mti_mapping: default_mti_mapping(),
            ignore_rc: Vec::new(),
            return_rejects: false,
            ready: Vec::new(),
        }
    }
}

impl MuxConfig {
    /// Create a configuration with the given names and defaults for everything else.
    pub fn new(name: impl Into<String>, out: impl Into<String>, inbound: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            out: out.into(),
            inbound: inbound.into(),
            ..Default::default()
        }
    }

    /// Read the configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, MuxError> {
        from_json_str(json)
    }

    /// Read the configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MuxError> {
        from_json_file(path)
    }

    /// Check that the required names are present.
    pub fn validate(&self) -> Result<(), MuxError> {
        if self.out.trim().is_empty() {
            return Err(MuxError::Misconfigured(format!(
                "{} has no outbound name.",
                self.name
            )));
        }
        if self.inbound.trim().is_empty() {
            return Err(MuxError::Misconfigured(format!(
                "{} has no inbound name.",
                self.name
            )));
        }
        Ok(())
    }

    /// Build the [`KeyBuilder`] described by this configuration.
    pub fn key_builder(&self) -> Result<KeyBuilder, MuxError> {
        let builder = KeyBuilder::new(self.out.clone())
            .with_fields(self.key.iter().cloned())
            .with_header_is_key(self.header_is_key)
            .with_mapping(MtiMapping::from_strs(&self.mti_mapping)?);

        Ok(self
            .mti_key
            .iter()
            .cloned()
            .fold(builder, KeyBuilder::with_override))
    }
}

/// The configuration of a [`crate::MultiplexerPool`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    /// Names of the member multiplexers, in priority order.
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub strategy: Strategy,
    /// The field naming the endpoint a previous message of the sequence used.
    #[serde(default)]
    pub original_channel_field: Option<String>,
    /// Type codes that are pinned to their original endpoint. Both these and the
    /// type codes of messages are compared through the `mti_mapping` tables.
    #[serde(default)]
    pub override_mtis: Vec<String>,
    #[serde(default = "default_mti_mapping")]
    pub mti_mapping: Vec<String>,
    /// Inbound names of endpoints, by endpoint name. Endpoints not listed here are
    /// assumed to be named after their inbound name.
    #[serde(default)]
    pub override_endpoints: FxHashMap<String, String>,
    /// The numeric field to split traffic by.
    #[serde(default)]
    pub split_field: Option<String>,
    /// Only use members whose enabled indicator matches their readiness indicator.
    #[serde(default)]
    pub check_enabled: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            members: Vec::new(),
            strategy: Strategy::default(),
            original_channel_field: None,
            override_mtis: Vec::new(),
            mti_mapping: default_mti_mapping(),
            override_endpoints: FxHashMap::default(),
            split_field: None,
            check_enabled: false,
        }
    }
}

impl PoolConfig {
    /// Build the mapping the override type codes are compared through.
    pub fn mapping(&self) -> Result<MtiMapping, MuxError> {
        MtiMapping::from_strs(&self.mti_mapping)
    }

    /// Create a configuration with the given members and defaults for everything else.
    pub fn new<S: Into<String>>(name: impl Into<String>, members: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            members: members.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Chain method to set the strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Read the configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, MuxError> {
        from_json_str(json)
    }

    /// Read the configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MuxError> {
        from_json_file(path)
    }
}
