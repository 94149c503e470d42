use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ContextError, Result};

/// Name of the configuration file stored inside the `.ghidra-context` directory.
pub const CONFIG_FILENAME: &str = "config.json";

/// Name of the hidden directory holding configuration and the exported document.
pub const CONTEXT_DIR: &str = ".ghidra-context";

/// Environment variable naming the context document path for `extract`.
pub const CONTEXT_PATH_ENV: &str = "GHIDRA_CONTEXT_JSON";

/// Environment variable through which the post-script learns where to write
/// the program snapshot.
pub const SNAPSHOT_PATH_ENV: &str = "GHIDRA_CONTEXT_SNAPSHOT";

/// Environment variable carrying the per-function decompile budget, in
/// seconds, to the post-script.
pub const DECOMPILE_TIMEOUT_ENV: &str = "GHIDRA_CONTEXT_DECOMPILE_TIMEOUT";

/// Document file name used when nothing else is configured.
pub const DEFAULT_CONTEXT_FILENAME: &str = "ghidra_context.json";

/// Snapshot file name used when nothing else is configured.
pub const DEFAULT_SNAPSHOT_FILENAME: &str = "ghidra_snapshot.json";

/// Default per-function decompile budget, in seconds.
pub const DEFAULT_DECOMPILE_TIMEOUT_SECS: u64 = 30;

/// Configuration for the context service and the headless extraction run.
///
/// Relative paths are resolved against the base directory the configuration
/// was loaded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Schema version of the configuration.
    pub version: u32,
    /// Where the context document is written and loaded from.
    pub context_path: PathBuf,
    /// Where the post-script writes the program snapshot.
    pub snapshot_path: PathBuf,
    /// Ghidra project directory used for the temporary import.
    pub project_dir: PathBuf,
    /// Ghidra project name used for the temporary import.
    pub project_name: String,
    /// Directory holding the post-script. The bundled script is installed
    /// there when missing.
    pub script_dir: PathBuf,
    /// File name of the extraction post-script.
    pub script_name: String,
    /// Whether to pass `-deleteProject` so nothing is left behind.
    pub delete_project: bool,
    /// Per-function decompile budget, in seconds.
    pub decompile_timeout_secs: u64,
    /// Ghidra installation used when `setup_context` omits `engine_path`.
    pub default_engine_path: Option<PathBuf>,
    /// Binary used when `setup_context` omits `binary_path`.
    pub default_binary_path: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            version: 1,
            context_path: PathBuf::from(CONTEXT_DIR).join(DEFAULT_CONTEXT_FILENAME),
            snapshot_path: PathBuf::from(CONTEXT_DIR).join(DEFAULT_SNAPSHOT_FILENAME),
            project_dir: PathBuf::from(CONTEXT_DIR),
            project_name: "ghidra_ctx".to_string(),
            script_dir: PathBuf::from("scripts"),
            script_name: "export_context.py".to_string(),
            delete_project: true,
            decompile_timeout_secs: DEFAULT_DECOMPILE_TIMEOUT_SECS,
            default_engine_path: None,
            default_binary_path: None,
        }
    }
}

impl ServiceConfig {
    /// Returns a copy with every relative path joined onto `base`.
    pub fn resolved(&self, base: &Path) -> Self {
        let join = |p: &Path| -> PathBuf {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        Self {
            context_path: join(&self.context_path),
            snapshot_path: join(&self.snapshot_path),
            project_dir: join(&self.project_dir),
            script_dir: join(&self.script_dir),
            default_engine_path: self.default_engine_path.as_deref().map(join),
            default_binary_path: self.default_binary_path.as_deref().map(join),
            ..self.clone()
        }
    }

    /// Returns the per-function decompile budget.
    pub fn decompile_timeout(&self) -> Duration {
        Duration::from_secs(self.decompile_timeout_secs)
    }
}

/// Returns the path to the `.ghidra-context` directory within the given base directory.
pub fn get_context_dir(base_dir: &Path) -> PathBuf {
    base_dir.join(CONTEXT_DIR)
}

/// Returns the path to the configuration file within the `.ghidra-context` directory.
pub fn get_config_path(base_dir: &Path) -> PathBuf {
    get_context_dir(base_dir).join(CONFIG_FILENAME)
}

/// Loads the configuration from disk and resolves its paths against `base_dir`.
///
/// If the configuration file does not exist, returns the default
/// configuration.
pub fn load_config(base_dir: &Path) -> Result<ServiceConfig> {
    let config_path = get_config_path(base_dir);

    if !config_path.exists() {
        return Ok(ServiceConfig::default().resolved(base_dir));
    }

    let contents = fs::read_to_string(&config_path).map_err(|e| ContextError::Config {
        message: format!(
            "failed to read config file '{}': {}",
            config_path.display(),
            e
        ),
    })?;

    let config: ServiceConfig =
        serde_json::from_str(&contents).map_err(|e| ContextError::Config {
            message: format!(
                "failed to parse config file '{}': {}",
                config_path.display(),
                e
            ),
        })?;

    Ok(config.resolved(base_dir))
}

/// Saves the configuration to disk using an atomic write.
pub fn save_config(base_dir: &Path, config: &ServiceConfig) -> Result<()> {
    let context_dir = get_context_dir(base_dir);
    fs::create_dir_all(&context_dir).map_err(|e| ContextError::Config {
        message: format!(
            "failed to create context directory '{}': {}",
            context_dir.display(),
            e
        ),
    })?;

    let config_path = get_config_path(base_dir);
    let tmp_path = config_path.with_extension("tmp");

    let json = serde_json::to_string_pretty(config).map_err(|e| ContextError::Config {
        message: format!("failed to serialize config: {}", e),
    })?;

    fs::write(&tmp_path, &json).map_err(|e| ContextError::Config {
        message: format!(
            "failed to write temporary config file '{}': {}",
            tmp_path.display(),
            e
        ),
    })?;

    fs::rename(&tmp_path, &config_path).map_err(|e| ContextError::Config {
        message: format!(
            "failed to rename temporary config file '{}' to '{}': {}",
            tmp_path.display(),
            config_path.display(),
            e
        ),
    })?;

    Ok(())
}
