use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Panel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelConfig {
    pub polling: PollingConfig,
    pub helper: HelperConfig,
    pub logging: LoggingConfig,
}

/// Status polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
    /// How many polls an optimistic starting/stopping state may outlive
    /// the observed OS state before being reconciled.
    pub grace_polls: u32,
}

/// Privileged helper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Override for the helper binary location. When unset the helper is
    /// looked up next to the panel executable.
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            polling: PollingConfig {
                interval_ms: 1500,
                grace_polls: 3,
            },
            helper: HelperConfig { path: None },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: None,
            },
        }
    }
}

/// Cross-platform configuration paths
pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "svcpanel", "svcpanel")
        .ok_or_else(|| anyhow::anyhow!("Failed to get project directories"))?;

    let config_dir = dirs.config_dir();
    std::fs::create_dir_all(config_dir)?;
    Ok(config_dir.to_path_buf())
}

/// Load configuration from file with fallback to default
pub fn load_config<T>(file_name: &str) -> anyhow::Result<T>
where
    T: Default + for<'de> Deserialize<'de>,
{
    let config_dir = get_config_dir()?;
    let config_path = config_dir.join(file_name);

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        Ok(toml::from_str(&content)?)
    } else {
        Ok(T::default())
    }
}

/// Save configuration to file
pub fn save_config<T>(config: &T, file_name: &str) -> anyhow::Result<()>
where
    T: Serialize,
{
    let config_dir = get_config_dir()?;
    let config_path = config_dir.join(file_name);

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&config_path, content)?;
    Ok(())
}
