use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MachinaError, MachinaResult};

/// Top-level SDK configuration (loaded from machina.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachinaConfig {
    pub log: LogConfig,
    pub keyservice: KeyServiceConfig,
    pub filecipher: FileCipherConfig,
}

impl MachinaConfig {
    /// Load configuration from a TOML file, falling back to defaults when absent.
    pub fn load(path: &Path) -> MachinaResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MachinaError::Config(format!("parsing {}: {e}", path.display())))?;
        config.filecipher.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// EnvFilter directive (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyServiceConfig {
    /// Key service base URL, recorded in protected file headers
    pub server: String,
    /// Lifetime of cached keys in seconds (default: 300)
    pub cache_ttl_secs: u64,
}

impl Default for KeyServiceConfig {
    fn default() -> Self {
        Self {
            server: "https://api.machina.local".into(),
            cache_ttl_secs: 300,
        }
    }
}

/// Streaming file-cipher parameters.
///
/// Versions 1.1 and 1.2 do not record their frame size, so writer and reader
/// must agree on `max_cipher_block_size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileCipherConfig {
    /// Generic format version used for encryption: "1.1", "1.2" or "1.3"
    pub version: String,
    /// Full frame size for 1.1/1.2 and the frame cap for 1.3 (default: 1 MiB)
    pub max_cipher_block_size: usize,
    /// Header bytes scanned before giving up with NoHeaderFound (default: 10 KiB)
    pub max_header_size: usize,
    /// Frames encrypted under one key before rotating (1.3 only, default: 256)
    pub meta_size: u32,
    /// Raw ciphertext bytes carried by each CSV text line (default: 48)
    pub csv_width_raw: usize,
    /// Bytes scanned for the CSV banner, cover page included (default: 64 KiB)
    pub csv_max_cover_size: usize,
}

/// IV plus GCM tag plus one byte of plaintext
const MIN_CIPHER_BLOCK_SIZE: usize = 16 + 16 + 1;

impl Default for FileCipherConfig {
    fn default() -> Self {
        Self {
            version: "1.2".into(),
            max_cipher_block_size: 1024 * 1024,
            max_header_size: 10 * 1024,
            meta_size: 256,
            csv_width_raw: 48,
            csv_max_cover_size: 64 * 1024,
        }
    }
}

impl FileCipherConfig {
    pub fn validate(&self) -> MachinaResult<()> {
        if self.max_cipher_block_size < MIN_CIPHER_BLOCK_SIZE {
            return Err(MachinaError::Config(format!(
                "max_cipher_block_size {} is below the minimum of {MIN_CIPHER_BLOCK_SIZE}",
                self.max_cipher_block_size
            )));
        }
        if i32::try_from(self.max_cipher_block_size).is_err() {
            return Err(MachinaError::Config(format!(
                "max_cipher_block_size {} does not fit a 32-bit frame length",
                self.max_cipher_block_size
            )));
        }
        if self.max_header_size == 0 {
            return Err(MachinaError::Config("max_header_size must be non-zero".into()));
        }
        if self.meta_size == 0 {
            return Err(MachinaError::Config("meta_size must be non-zero".into()));
        }
        if self.csv_width_raw == 0 {
            return Err(MachinaError::Config("csv_width_raw must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[log]
level = "debug"
format = "json"

[keyservice]
server = "https://keys.example.com"
cache_ttl_secs = 60

[filecipher]
version = "1.3"
max_cipher_block_size = 4096
max_header_size = 2048
meta_size = 8
csv_width_raw = 57
csv_max_cover_size = 1024
"#;
        let config: MachinaConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
        assert_eq!(config.keyservice.server, "https://keys.example.com");
        assert_eq!(config.keyservice.cache_ttl_secs, 60);
        assert_eq!(config.filecipher.version, "1.3");
        assert_eq!(config.filecipher.max_cipher_block_size, 4096);
        assert_eq!(config.filecipher.meta_size, 8);
        assert_eq!(config.filecipher.csv_width_raw, 57);
        config.filecipher.validate().unwrap();
    }

    #[test]
    fn test_parse_defaults() {
        let config: MachinaConfig = toml::from_str("").unwrap();

        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "text");
        assert_eq!(config.filecipher.version, "1.2");
        assert_eq!(config.filecipher.max_cipher_block_size, 1024 * 1024);
        assert_eq!(config.filecipher.csv_width_raw, 48);
        config.filecipher.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[filecipher]
meta_size = 3
"#;
        let config: MachinaConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert_eq!(config.filecipher.meta_size, 3);
        // Defaults
        assert_eq!(config.filecipher.version, "1.2");
        assert_eq!(config.keyservice.cache_ttl_secs, 300);
    }

    #[test]
    fn test_validate_rejects_tiny_blocks() {
        let config = FileCipherConfig {
            max_cipher_block_size: 32,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = FileCipherConfig {
            meta_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MachinaConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.filecipher, FileCipherConfig::default());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machina.toml");
        std::fs::write(&path, "[filecipher]\ncsv_width_raw = 0\n").unwrap();
        assert!(matches!(
            MachinaConfig::load(&path),
            Err(MachinaError::Config(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = MachinaConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: MachinaConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.filecipher, parsed.filecipher);
        assert_eq!(config.keyservice.server, parsed.keyservice.server);
    }
}
