use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::LoomError;

pub const DEFAULT_PORT: u16 = 9010;

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Where to find the coordinator and how to talk to it.
///
/// ```rust
/// use loom_client::ClientConfig;
///
/// let config: ClientConfig = serde_json::from_str(r#"{ "address": "node1" }"#)?;
/// assert_eq!(config.port, 9010);
/// assert_eq!(config, ClientConfig::new("node1"));
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Coordinator-side trace directory, enabled right after connecting.
    #[serde(default)]
    pub trace: Option<Utf8PathBuf>,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_PORT,
            trace: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn trace(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.trace = Some(path.into());
        self
    }

    pub fn from_json_file(path: impl AsRef<Utf8Path>) -> Result<Self, LoomError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("localhost")
    }
}
