use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use time::Duration;

pub mod themes;

pub use themes::ThemeName;

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "SpailaPad";
const APP_NAME: &str = "spaila";

pub const DEFAULT_CACHE_VERSION: &str = "spailacpad-v1";
pub const DEFAULT_ICON: &str = "images/icons/icon-192x192.png";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub export_dir: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("SPAILA_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("SPAILA_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let database_path = data_root.join("spaila.db");
        let export_dir = data_root.join("exports");

        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));
        let log_dir = state_dir.join("logs");

        Ok(Self {
            config_dir,
            config_file,
            data_dir: data_root,
            database_path,
            export_dir,
            log_dir,
            state_dir,
        })
    }

    /// Lays every path out under a single root. Used by tests and by
    /// `--data-dir` style portable installs.
    pub fn rooted_at(root: &Path) -> Self {
        let config_dir = root.join("config");
        let data_dir = root.join("data");
        let state_dir = root.join("state");
        Self {
            config_file: config_dir.join("config.toml"),
            config_dir,
            database_path: data_dir.join("spaila.db"),
            export_dir: data_dir.join("exports"),
            data_dir,
            log_dir: state_dir.join("logs"),
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.export_dir,
            &self.log_dir,
            &self.state_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Theme used when nothing has been saved yet.
    pub theme_fallback: ThemeName,
    pub editor: EditorOptions,
    pub notifications: NotificationOptions,
    pub offline: OfflineOptions,
    pub storage: StorageOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            theme_fallback: ThemeName::Light,
            editor: EditorOptions::default(),
            notifications: NotificationOptions::default(),
            offline: OfflineOptions::default(),
            storage: StorageOptions::default(),
        }
    }
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.storage
            .resolve(paths)
            .context("resolving storage paths")?;
        if self.editor.history_depth == 0 {
            tracing::warn!("editor.history_depth must be at least 1, using the default");
            self.editor.history_depth = EditorOptions::default().history_depth;
        }
        if self.offline.cache_version.trim().is_empty() {
            tracing::warn!("offline.cache_version is empty, using the default");
            self.offline.cache_version = DEFAULT_CACHE_VERSION.to_string();
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorOptions {
    /// Maximum number of snapshots kept on the undo stack.
    pub history_depth: usize,
    /// Save a non-empty draft when the editor session closes.
    pub autosave_on_close: bool,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self {
            history_depth: 50,
            autosave_on_close: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationOptions {
    pub toast_ms: u64,
    pub undo_toast_ms: u64,
    pub icon: String,
    /// Answer given when system notification permission is requested.
    pub allow_system: bool,
}

impl Default for NotificationOptions {
    fn default() -> Self {
        Self {
            toast_ms: 3000,
            undo_toast_ms: 5000,
            icon: DEFAULT_ICON.to_string(),
            allow_system: true,
        }
    }
}

impl NotificationOptions {
    pub fn toast_duration(&self) -> Duration {
        Duration::milliseconds(self.toast_ms as i64)
    }

    pub fn undo_window(&self) -> Duration {
        Duration::milliseconds(self.undo_toast_ms as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineOptions {
    pub cache_version: String,
    /// Origin that relative manifest entries resolve against.
    pub origin: String,
    pub manifest: Vec<String>,
}

impl Default for OfflineOptions {
    fn default() -> Self {
        Self {
            cache_version: DEFAULT_CACHE_VERSION.to_string(),
            origin: "http://localhost:8080".to_string(),
            manifest: crate::offline::default_manifest(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    /// Largest serialized value accepted by a single write.
    pub max_value_bytes: usize,
    pub wal_autocheckpoint: u32,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            max_value_bytes: 5 * 1024 * 1024,
            wal_autocheckpoint: 1000,
        }
    }
}

impl StorageOptions {
    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_round_trips_through_toml() -> anyhow::Result<()> {
        let cfg = AppConfig::default();
        let raw = toml::to_string_pretty(&cfg)?;
        let parsed: AppConfig = toml::from_str(&raw)?;
        assert_eq!(parsed.editor.history_depth, 50);
        assert_eq!(parsed.offline.cache_version, DEFAULT_CACHE_VERSION);
        assert_eq!(parsed.offline.manifest.len(), cfg.offline.manifest.len());
        Ok(())
    }

    #[test]
    fn post_load_repairs_invalid_values() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::rooted_at(temp.path());
        let mut cfg: AppConfig = toml::from_str(
            r#"
            [editor]
            history_depth = 0

            [offline]
            cache_version = "  "
            "#,
        )?;
        cfg.post_load(&paths)?;
        assert_eq!(cfg.editor.history_depth, 50);
        assert_eq!(cfg.offline.cache_version, DEFAULT_CACHE_VERSION);
        assert_eq!(cfg.storage.database_path, paths.database_path);
        Ok(())
    }
}
