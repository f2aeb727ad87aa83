use anyhow::{anyhow, Result};
use log::{debug, info};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 6;

/// Environment variable pointing at an alternative config file
pub const CONFIG_ENV_VAR: &str = "MSGAPP_CONFIG";

/// Client-side settings. Everything has a default, so a partial file is fine.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub messages_collection: String,
    pub users_collection: String,
    pub phone_numbers_collection: String,
    pub min_password_length: usize,
    /// Capacity of the update channels handed to subscribers
    pub update_buffer: usize,
    /// Level for this crate's own log records, as accepted by `log::LevelFilter`
    pub log_level: String,
    /// Append log lines here instead of stderr
    pub log_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            messages_collection: "messages".to_string(),
            users_collection: "users".to_string(),
            phone_numbers_collection: "phone_numbers".to_string(),
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            update_buffer: 100,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

pub fn set_config_path_override(path: PathBuf) {
    let _ = CONFIG_PATH_OVERRIDE.set(path);
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("msgapp");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }
    Ok(get_config_dir()?.join("config.json"))
}

/// Load the config from its default location, falling back to defaults
pub fn load_config() -> Result<ClientConfig> {
    load_config_from(get_config_path()?)
}

pub fn load_config_from(config_path: PathBuf) -> Result<ClientConfig> {
    if !config_path.exists() {
        debug!("No config at {}, using defaults", config_path.display());
        return Ok(ClientConfig::default());
    }

    let config_path_str = config_path.display().to_string();

    let mut file = File::open(config_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let config: ClientConfig = serde_json::from_str(&contents)?;
    if config.update_buffer == 0 {
        return Err(anyhow!("update_buffer in {} must be greater than zero", config_path_str));
    }
    info!("Loaded client config from {}", config_path_str);

    Ok(config)
}

pub fn save_config(config: &ClientConfig) -> Result<()> {
    save_config_to(config, get_config_path()?)
}

pub fn save_config_to(config: &ClientConfig, config_path: PathBuf) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(&config_path)?;
    serde_json::to_writer_pretty(file, config)?;

    info!("Client config saved to {}", config_path.display());
    Ok(())
}
