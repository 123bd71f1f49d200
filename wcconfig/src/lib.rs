//! # Wallcast Configuration Module
//!
//! Configuration management for Wallcast:
//! - Loading configuration from YAML files
//! - Merging with the embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use wcconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let interval = config.get_discovery_interval_secs();
//! ```

use anyhow::{Result, anyhow};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::info;

mod net;
pub use net::guess_local_ip;

// Embedded default configuration.
const DEFAULT_CONFIG: &str = include_str!("wallcast.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load Wallcast configuration"));
}

const ENV_CONFIG_DIR: &str = "WALLCAST_CONFIG";
const ENV_PREFIX: &str = "WALLCAST_CONFIG__";

const DEFAULT_HTTP_PORT: u16 = 8090;
const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 30;
const DEFAULT_DISCOVERY_WINDOW_SECS: u64 = 5;
const DEFAULT_CONTROL_TIMEOUT_SECS: u64 = 3;
const DEFAULT_CONTROL_RETRIES: u32 = 2;
const DEFAULT_RECONCILE_SECS: u64 = 5;
const DEFAULT_OVERRIDE_SECS: u64 = 300;
const DEFAULT_POLL_FAILURE_THRESHOLD: u32 = 3;
const DEFAULT_RETENTION_SECS: u64 = 300;

/// Returns the global configuration singleton.
pub fn get_config() -> Arc<Config> {
    Arc::clone(&CONFIG)
}

/// A device declared in configuration rather than discovered over SSDP.
///
/// Transcreen units are not SSDP-discoverable and must be seeded this way;
/// fixed-address DLNA installations may also be listed to survive flaky
/// multicast environments.
#[derive(Debug, Clone, Deserialize)]
pub struct SeededDevice {
    /// Stable identifier; defaults to the hostname when omitted.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    /// `host:port` of the device control endpoint.
    pub host: String,
    /// "dlna" or "transcreen".
    pub protocol: String,
    #[serde(default)]
    pub group: Option<String>,
    /// Content the supervisor keeps this device synced to, relative to the
    /// media root unless absolute.
    #[serde(default)]
    pub content: Option<String>,
}

/// Configuration manager for Wallcast.
///
/// Loads the embedded default YAML, merges an external `config.yaml` from
/// the config directory on top, then applies `WALLCAST_CONFIG__` environment
/// overrides. Typed getters fall back to compiled-in defaults when a key is
/// missing or has the wrong shape.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order.
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(".wallcast").exists() {
            return ".wallcast".to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".wallcast");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        ".wallcast".to_string()
    }

    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("Config path is not a directory"));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        Ok(())
    }

    /// Determines and validates the configuration directory.
    ///
    /// Search order: the `directory` argument, `$WALLCAST_CONFIG`,
    /// `.wallcast` in the current directory, then `~/.wallcast`. The
    /// directory is created if it does not exist.
    pub fn config_dir(directory: &str) -> String {
        let dir_path = Self::find_config_dir(directory);
        let path = Path::new(&dir_path);

        Self::validate_config_dir(path).expect("Cannot validate the configuration directory");

        dir_path
    }

    /// Loads the configuration from the specified directory, merging the
    /// embedded defaults, the external file, and environment overrides.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory);
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using embedded defaults");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        Ok(Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        })
    }

    /// Persists the current configuration to the config.yaml file.
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().unwrap();
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        Self::set_value_internal(&mut data, path, value)?;
        drop(data);
        self.save()?;
        Ok(())
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key = path[0].to_lowercase();
            let key_value = Value::String(key);
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();
                if let Some(next) = map.get(Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("Path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("Path {} is not a map", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if key.starts_with(ENV_PREFIX) {
                let key_path = key
                    .trim_start_matches(ENV_PREFIX)
                    .split("__")
                    .collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    fn get_u64(&self, path: &[&str], default: u64) -> u64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n.as_u64().unwrap_or(default),
            _ => default,
        }
    }

    fn get_string(&self, path: &[&str]) -> Option<String> {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    // ---- Typed getters ---------------------------------------------------

    pub fn get_http_port(&self) -> u16 {
        self.get_u64(&["host", "http_port"], DEFAULT_HTTP_PORT as u64) as u16
    }

    /// Address advertised in served stream URLs. Auto-detected unless
    /// `host.address` is set.
    pub fn get_host_address(&self) -> String {
        self.get_string(&["host", "address"])
            .unwrap_or_else(guess_local_ip)
    }

    /// Base URL devices fetch content from, e.g. `http://192.168.1.10:8090`.
    pub fn get_base_url(&self) -> String {
        format!("http://{}:{}", self.get_host_address(), self.get_http_port())
    }

    pub fn get_discovery_interval_secs(&self) -> u64 {
        self.get_u64(
            &["discovery", "interval_secs"],
            DEFAULT_DISCOVERY_INTERVAL_SECS,
        )
    }

    pub fn get_discovery_window_secs(&self) -> u64 {
        self.get_u64(&["discovery", "window_secs"], DEFAULT_DISCOVERY_WINDOW_SECS)
    }

    pub fn get_control_timeout_secs(&self) -> u64 {
        self.get_u64(&["control", "timeout_secs"], DEFAULT_CONTROL_TIMEOUT_SECS)
    }

    pub fn get_control_retries(&self) -> u32 {
        self.get_u64(&["control", "retries"], DEFAULT_CONTROL_RETRIES as u64) as u32
    }

    pub fn get_reconcile_secs(&self) -> u64 {
        self.get_u64(&["supervisor", "reconcile_secs"], DEFAULT_RECONCILE_SECS)
    }

    pub fn get_override_secs(&self) -> u64 {
        self.get_u64(&["supervisor", "override_secs"], DEFAULT_OVERRIDE_SECS)
    }

    pub fn get_poll_failure_threshold(&self) -> u32 {
        self.get_u64(
            &["supervisor", "poll_failure_threshold"],
            DEFAULT_POLL_FAILURE_THRESHOLD as u64,
        ) as u32
    }

    pub fn get_session_retention_secs(&self) -> u64 {
        self.get_u64(&["streaming", "retention_secs"], DEFAULT_RETENTION_SECS)
    }

    /// Path of the black clip played during a blackout. Relative paths are
    /// resolved against the config directory.
    pub fn get_blackout_clip(&self) -> Result<PathBuf> {
        let raw = self
            .get_string(&["blackout", "clip"])
            .ok_or_else(|| anyhow!("blackout.clip is not configured"))?;
        let path = Path::new(&raw);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(Path::new(&self.config_dir).join(path))
        }
    }

    /// Root directory of the media library. Relative paths are resolved
    /// against the config directory.
    pub fn get_media_root(&self) -> PathBuf {
        let raw = self
            .get_string(&["streaming", "media_root"])
            .unwrap_or_else(|| "media".to_string());
        let path = Path::new(&raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        }
    }

    /// Devices declared in configuration (see [`SeededDevice`]).
    pub fn seeded_devices(&self) -> Vec<SeededDevice> {
        match self.get_value(&["devices"]) {
            Ok(value @ Value::Sequence(_)) => {
                serde_yaml::from_value(value).unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }
}

/// Recursively merges `overlay` into `base`; overlay scalars and sequences
/// replace, mappings merge key by key.
fn merge_yaml(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(k) {
                    Some(base_entry) => merge_yaml(base_entry, v),
                    None => {
                        base_map.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> Config {
        Config::load_config(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn defaults_apply_without_external_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);

        assert_eq!(config.get_http_port(), 8090);
        assert_eq!(config.get_discovery_window_secs(), 5);
        assert_eq!(config.get_override_secs(), 300);
        assert!(config.seeded_devices().is_empty());
    }

    #[test]
    fn external_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "host:\n  http_port: 9999\ndevices:\n  - name: Lobby\n    host: 10.0.0.4:8060\n    protocol: transcreen\n",
        )
        .unwrap();

        let config = config_in(&dir);
        assert_eq!(config.get_http_port(), 9999);

        let devices = config.seeded_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Lobby");
        assert_eq!(devices[0].protocol, "transcreen");
        // Unset sections keep their defaults.
        assert_eq!(config.get_reconcile_secs(), 5);
    }

    #[test]
    fn blackout_clip_resolves_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);

        let clip = config.get_blackout_clip().unwrap();
        assert!(clip.starts_with(dir.path()));
        assert!(clip.ends_with("black.mp4"));
    }

    #[test]
    fn merge_yaml_merges_nested_mappings() {
        let mut base: Value = serde_yaml::from_str("a:\n  x: 1\n  y: 2\nb: 3\n").unwrap();
        let overlay: Value = serde_yaml::from_str("a:\n  y: 20\nc: 4\n").unwrap();
        merge_yaml(&mut base, &overlay);

        let map = base.as_mapping().unwrap();
        let a = map.get(Value::String("a".into())).unwrap().as_mapping().unwrap();
        assert_eq!(a.get(Value::String("x".into())).unwrap().as_u64(), Some(1));
        assert_eq!(a.get(Value::String("y".into())).unwrap().as_u64(), Some(20));
        assert_eq!(map.get(Value::String("c".into())).unwrap().as_u64(), Some(4));
    }
}
