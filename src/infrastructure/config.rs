use crate::domain::{config::BridgeConfig, error::{BridgeError, BridgeResult}};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_DIR: &str = "tempbridge";
const PROJECT_DIR: &str = ".tempbridge";
const CONFIG_FILE: &str = "config.toml";

/// Configuration manager
///
/// Reads the global file and the nearest project file. Keys set in the
/// project file override the global ones; anything unset falls back to the
/// built-in defaults.
pub struct ConfigManager {
    global_config_path: PathBuf,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> BridgeResult<Self> {
        let global_config_path = Self::get_global_config_path()?;
        let project_config_path = Self::find_project_config_path();

        Ok(Self {
            global_config_path,
            project_config_path,
        })
    }

    /// Manager over explicit files, for tests and `--config`
    pub fn with_paths(global_config_path: PathBuf, project_config_path: Option<PathBuf>) -> Self {
        Self {
            global_config_path,
            project_config_path,
        }
    }

    /// Load configuration from files
    pub fn load_config(&self) -> BridgeResult<BridgeConfig> {
        let mut merged = toml::Table::new();

        if self.global_config_path.exists() {
            debug!("Loading global config {}", self.global_config_path.display());
            merge_tables(&mut merged, read_table(&self.global_config_path)?);
        }

        if let Some(project_path) = &self.project_config_path {
            if project_path.exists() {
                debug!("Loading project config {}", project_path.display());
                merge_tables(&mut merged, read_table(project_path)?);
            }
        }

        toml::Value::Table(merged)
            .try_into()
            .map_err(|e| BridgeError::Config {
                message: format!("Invalid configuration: {}", e),
            })
    }

    /// Save to the project file if one was found, otherwise the global file
    pub fn save_config(&self, config: &BridgeConfig) -> BridgeResult<PathBuf> {
        let target = self
            .project_config_path
            .clone()
            .unwrap_or_else(|| self.global_config_path.clone());

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BridgeError::Config {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        self.save_config_to_path(&target, config)?;
        Ok(target)
    }

    /// Get global configuration path
    fn get_global_config_path() -> BridgeResult<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| BridgeError::Config {
            message: "Could not determine home directory".to_string(),
        })?;

        Ok(home.join(".config").join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    fn find_project_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        find_project_config_from(&current_dir)
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> BridgeResult<BridgeConfig> {
        let content = fs::read_to_string(path).map_err(|e| BridgeError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| BridgeError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &BridgeConfig) -> BridgeResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| BridgeError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| BridgeError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Create default project configuration under `path`, returning the file written
    pub fn init_project_config(&self, path: &Path) -> BridgeResult<PathBuf> {
        let config_dir = path.join(PROJECT_DIR);
        let config_file = config_dir.join(CONFIG_FILE);

        if config_file.exists() {
            return Err(BridgeError::Config {
                message: format!(
                    "Project configuration already exists at {}",
                    config_file.display()
                ),
            });
        }

        fs::create_dir_all(&config_dir).map_err(|e| BridgeError::Config {
            message: format!("Failed to create {} directory: {}", PROJECT_DIR, e),
        })?;

        let mut default_config = BridgeConfig::default();
        default_config.messaging.username = "sensor".to_string();

        self.save_config_to_path(&config_file, &default_config)?;
        Ok(config_file)
    }

    /// Get the current project config path (if any)
    pub fn get_project_config_path(&self) -> Option<&PathBuf> {
        self.project_config_path.as_ref()
    }

    /// Get the global config path
    pub fn get_global_config_path_ref(&self) -> &PathBuf {
        &self.global_config_path
    }
}

/// Nearest `.tempbridge/config.toml` at or above `start`
pub fn find_project_config_from(start: &Path) -> Option<PathBuf> {
    let mut path = start;
    loop {
        let config_path = path.join(PROJECT_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }
        path = path.parent()?;
    }
}

fn read_table(path: &Path) -> BridgeResult<toml::Table> {
    let content = fs::read_to_string(path).map_err(|e| BridgeError::Config {
        message: format!("Failed to read config file {}: {}", path.display(), e),
    })?;

    content.parse::<toml::Table>().map_err(|e| BridgeError::Config {
        message: format!("Failed to parse config file {}: {}", path.display(), e),
    })
}

// Nested tables merge key by key; any other value in `overlay` replaces the base.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
