// Configuration schema for the AH transform engine.

use std::{
    env, fs,
    io::{self, Read},
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::Deserialize;
use thiserror::Error;

/// Error returned while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when reading a configuration file from disk.
    #[error("failed to read config '{path}': {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Source IO error.
        #[source]
        source: io::Error,
    },
    /// Error when parsing the configuration contents.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration did not pass validation checks.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Engine configuration loaded at startup.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TTL written into tunnel-mode outer headers after digesting.
    pub tunnel_ttl: u8,
    /// Reject inbound AH headers whose reserved field is nonzero.
    /// RFC 2402 says ignore on receive, so this defaults off.
    pub strict_reserved: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tunnel_ttl: 64,
            strict_reserved: false,
        }
    }
}

impl Config {
    /// Loads configuration from `AHGATE_CONFIG` if set, otherwise returns
    /// defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match env::var("AHGATE_CONFIG") {
            Ok(path) => Self::from_path(path),
            Err(_missing) => {
                let cfg = Self::default();
                cfg.validate()?;
                Ok(cfg)
            }
        }
    }

    /// Loads a configuration file from the provided path.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads configuration from any reader implementing [`Read`].
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, ConfigError> {
        let mut buf = String::new();
        reader
            .read_to_string(&mut buf)
            .map_err(|source| ConfigError::Io {
                path: PathBuf::from("<reader>"),
                source,
            })?;
        Self::from_toml_str(&buf)
    }

    /// Loads configuration from a TOML string slice.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        <Self as FromStr>::from_str(input)
    }

    /// Validates the configuration, returning an error when constraints
    /// are violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tunnel_ttl == 0 {
            return Err(ConfigError::Validation(
                "tunnel_ttl must be non-zero; a zero-TTL tunnel packet is undeliverable".into(),
            ));
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.tunnel_ttl, 64);
        assert!(!cfg.strict_reserved);
    }

    #[test]
    fn parses_overrides() {
        let cfg = Config::from_toml_str("tunnel_ttl = 32\nstrict_reserved = true\n").unwrap();
        assert_eq!(cfg.tunnel_ttl, 32);
        assert!(cfg.strict_reserved);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = Config::from_toml_str("strict_reserved = true\n").unwrap();
        assert_eq!(cfg.tunnel_ttl, 64);
        assert!(cfg.strict_reserved);
    }

    #[test]
    fn rejects_zero_ttl() {
        let err = Config::from_toml_str("tunnel_ttl = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn reader_round_trip() {
        let cfg = Config::from_reader("tunnel_ttl = 10".as_bytes()).unwrap();
        assert_eq!(cfg.tunnel_ttl, 10);
    }
}
