//! Daemon configuration.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use blobpack_store::StoreConfig;

/// Configuration for `blobpackd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Address the sync API binds to.
    pub bind_addr: SocketAddr,
    /// The namespace this daemon serves.
    pub namespace: String,
    /// Basic-auth password required on every route, when set.
    pub api_key: Option<String>,
    /// Blob store options.
    pub store: StoreConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8050)),
            namespace: "default".to_string(),
            api_key: None,
            store: StoreConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from a TOML or JSON file, by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => anyhow::bail!("unsupported config file extension: {ext}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_values() {
        let config = DaemonConfig::default();
        assert_eq!(config.bind_addr, SocketAddr::from(([127, 0, 0, 1], 8050)));
        assert_eq!(config.namespace, "default");
        assert!(config.api_key.is_none());
    }

    #[test]
    fn loads_toml() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        write!(
            file,
            r#"
bind_addr = "0.0.0.0:9000"
namespace = "photos"
api_key = "k"

[store]
dir = "/var/lib/blobpack"
max_container_size = 1048576
compression = true
chunker_polynomial = 17000052690310901
"#
        )
        .unwrap();

        let config = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.namespace, "photos");
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert!(config.store.compression);
        assert_eq!(config.store.max_container_size, 1 << 20);
    }

    #[test]
    fn loads_json_round_trip() {
        let config = DaemonConfig::default();
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .unwrap();
        write!(file, "{}", serde_json::to_string(&config).unwrap()).unwrap();

        let loaded = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.namespace, config.namespace);
        assert_eq!(loaded.bind_addr, config.bind_addr);
    }

    #[test]
    fn rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(DaemonConfig::from_file(file.path()).is_err());
    }
}
