use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use library::ScanSettings;
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 2;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: u32,
    pub index_path: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_addr: Option<String>,
    pub scan_on_start: bool,
    pub scan: ScanSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            index_path: "library.redb".to_string(),
            port: 3000,
            bind_addr: None,
            scan_on_start: false,
            scan: ScanSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Scan settings with relative roots resolved against the config file.
    pub fn resolved_scan(&self, config_path: &Path) -> ScanSettings {
        let mut scan = self.scan.clone();
        for entry in &mut scan.paths {
            entry.path = resolve_path(config_path, entry.path.trim())
                .to_string_lossy()
                .to_string();
        }
        scan
    }

    pub fn index_path(&self, config_path: &Path) -> PathBuf {
        let value = self.index_path.trim();
        let value = if value.is_empty() {
            "library.redb"
        } else {
            value
        };
        resolve_path(config_path, value)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("KARAOKE_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ServerConfig = serde_yaml::from_str(&contents)?;
        let upgraded = config.version < CONFIG_VERSION;
        if upgraded {
            config.version = CONFIG_VERSION;
        }
        if config.port == 0 {
            if let Some(bind_addr) = config.bind_addr.as_deref() {
                if let Some(port) = parse_port(bind_addr) {
                    config.port = port;
                }
            }
            if config.port == 0 {
                config.port = 3000;
            }
        }
        if config.scan.status_interval_ms == 0 {
            config.scan.status_interval_ms = ScanSettings::default().status_interval_ms;
        }
        if config.scan.chunk_size == 0 {
            config.scan.chunk_size = ScanSettings::default().chunk_size;
        }
        if config.scan.unattributed_artist.trim().is_empty() {
            config.scan.unattributed_artist = ScanSettings::default().unattributed_artist;
        }
        config.bind_addr = None;
        if upgraded {
            save_config(path, &config)?;
        }
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

fn parse_port(value: &str) -> Option<u16> {
    let port = value.rsplit(':').next()?.trim();
    port.parse::<u16>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProviderType;

    #[test]
    fn missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.yaml");

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.exists());
        assert_eq!(config.port, 3000);
        assert_eq!(config.scan.status_interval_ms, 250);

        let (again, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(again.index_path, "library.redb");
    }

    #[test]
    fn partial_yaml_takes_defaults_and_upgrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            r#"
version: 1
bind_addr: "0.0.0.0:8080"
port: 0
scan:
  paths:
    - path_id: 1
      path: karaoke
      priority: 2
  parsers:
    providers:
      cdg-pair:
        delimiter: " by "
        artistFirst: false
"#,
        )
        .unwrap();

        let (config, _) = load_or_create_config(&path).unwrap();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.port, 8080);
        assert_eq!(config.scan.unattributed_artist, "Unknown Artist");
        let cdg = config.scan.parsers.for_provider(ProviderType::CdgPair);
        assert_eq!(cdg.delimiter, " by ");
        assert!(!cdg.artist_first);
        assert_eq!(config.scan.parsers.for_provider(ProviderType::LocalFile).delimiter, "-");

        let scan = config.resolved_scan(&path);
        assert_eq!(PathBuf::from(&scan.paths[0].path), dir.path().join("karaoke"));
        assert_eq!(config.index_path(&path), dir.path().join("library.redb"));

        let saved = fs::read_to_string(&path).unwrap();
        assert!(saved.contains(&format!("version: {}", CONFIG_VERSION)));
    }
}
