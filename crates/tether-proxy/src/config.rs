//! Configuration consumed by the core. Only the `[proxy]` table is read.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProxyConfig {
    /// Authenticate external players against the session service. The
    /// backend server always runs in offline mode behind the proxy.
    pub online_mode: bool,
    /// Port the local game server is bound to.
    pub server_port: u16,
    /// host:port the external listener binds.
    pub bind: String,
    /// Smallest payload that gets zlib-compressed; −1 disables the
    /// compressed envelope entirely.
    pub compression_threshold: i32,
    pub max_players: u32,
    /// RSA key size used for the login exchange.
    pub encryption_key_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            online_mode: true,
            server_port: 25565,
            bind: "0.0.0.0:25566".to_owned(),
            compression_threshold: 256,
            max_players: 20,
            encryption_key_size: 1024,
        }
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    proxy: ProxyConfig,
}

impl ProxyConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file: ConfigFile = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(file.proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_proxy_table() {
        let raw = r#"
            [proxy]
            online-mode = false
            server-port = 25570
            bind = "127.0.0.1:7777"
            compression-threshold = -1
            max-players = 100
            encryption-key-size = 2048
        "#;
        let file: ConfigFile = toml::from_str(raw).unwrap();
        let config = file.proxy;
        assert!(!config.online_mode);
        assert_eq!(config.server_port, 25570);
        assert_eq!(config.bind, "127.0.0.1:7777");
        assert_eq!(config.compression_threshold, -1);
        assert_eq!(config.max_players, 100);
        assert_eq!(config.encryption_key_size, 2048);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let file: ConfigFile = toml::from_str("[proxy]\nmax-players = 3\n").unwrap();
        assert_eq!(file.proxy.max_players, 3);
        assert!(file.proxy.online_mode);
        assert_eq!(file.proxy.compression_threshold, 256);
    }
}
