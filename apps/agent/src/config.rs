//! Agent configuration management.
//!
//! Configuration is stored as TOML at the path given as the first command
//! line argument, or at `~/.config/parcel/agent.toml`.

use std::path::{Path, PathBuf};

use parcel_pipeline::PipelineConfig;
use parcel_storage::HttpStorageConfig;
use serde::{Deserialize, Serialize};

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// JSON file holding registered accounts.
    #[serde(default = "default_accounts_path")]
    pub accounts_path: PathBuf,

    /// Directory that receives manifest files of completed requests.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Identities whose fetches bypass the size cap.
    #[serde(default)]
    pub admins: Vec<String>,

    #[serde(default)]
    pub storage: HttpStorageConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_accounts_path() -> PathBuf {
    base_dir().join("accounts.json")
}

fn default_output_dir() -> PathBuf {
    base_dir().join("manifests")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accounts_path: default_accounts_path(),
            output_dir: default_output_dir(),
            admins: Vec::new(),
            storage: HttpStorageConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path` (or the default location), creating
    /// a default file if none exists.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(|| base_dir().join("agent.toml"));
        Self::load_from(&path)
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Holds storage endpoints; keep it private on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn is_admin(&self, identity: &str) -> bool {
        self.admins.iter().any(|admin| admin == identity)
    }
}

fn base_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".config").join("parcel")
}
