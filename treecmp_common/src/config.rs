use crate::{AppConfig, CompareError};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "treecmp.toml";
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub exists: bool,
    pub portable: bool,
}

impl AppConfig {
    /// Age after which leftover staging entries are considered abandoned
    pub fn stale_after(&self) -> Duration {
        if self.stale_after_secs == 0 {
            DEFAULT_STALE_AFTER
        } else {
            Duration::from_secs(self.stale_after_secs)
        }
    }
}

pub fn load_config(prefer_portable: bool) -> Result<LoadedConfig, CompareError> {
    let (path, portable) = resolve_config_path(prefer_portable)?;
    load_config_from(path, portable)
}

/// Load configuration from an explicit file, falling back to defaults when it is absent
pub fn load_config_from(path: PathBuf, portable: bool) -> Result<LoadedConfig, CompareError> {
    let exists = path.exists();

    let mut config = if exists {
        let data = fs::read_to_string(&path).map_err(|e| CompareError::io_at(&path, e))?;
        toml::from_str(&data).map_err(|e| CompareError::Config(e.to_string()))?
    } else {
        AppConfig::default()
    };

    config.portable_mode = portable;

    Ok(LoadedConfig {
        config,
        path,
        exists,
        portable,
    })
}

/// Load the configuration, writing the defaults to disk on first use
pub fn ensure_config(prefer_portable: bool) -> Result<LoadedConfig, CompareError> {
    let (path, portable) = resolve_config_path(prefer_portable)?;
    ensure_config_from(path, portable)
}

pub fn ensure_config_from(path: PathBuf, portable: bool) -> Result<LoadedConfig, CompareError> {
    let loaded = load_config_from(path, portable)?;
    if !loaded.exists {
        save_config(&loaded.path, &loaded.config)?;
    }
    Ok(loaded)
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), CompareError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = toml::to_string_pretty(config)
        .map_err(|e| CompareError::Serialization(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

/// Staging root used when the configuration does not name one
pub fn default_staging_dir(portable: bool, config_path: &Path) -> Result<PathBuf, CompareError> {
    if portable {
        let base = config_path
            .parent()
            .map(|path| path.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        return Ok(base.join("treecmp_staging"));
    }

    let dirs = ProjectDirs::from("", "treecmp", "treecmp")
        .ok_or_else(|| CompareError::Config("Unable to determine cache directory".to_string()))?;
    Ok(dirs.cache_dir().join("staging"))
}

fn resolve_config_path(prefer_portable: bool) -> Result<(PathBuf, bool), CompareError> {
    if let Some(portable_path) = portable_config_path() {
        if prefer_portable || portable_path.exists() {
            return Ok((portable_path, true));
        }
    }

    let dirs = ProjectDirs::from("", "treecmp", "treecmp")
        .ok_or_else(|| CompareError::Config("Unable to determine config directory".to_string()))?;
    Ok((dirs.config_dir().join(CONFIG_FILE_NAME), false))
}

fn portable_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
}
