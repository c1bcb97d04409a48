//! Settings and data-dir resolution.
//!
//! Settings live as JSON under the platform config dir; a missing file is
//! seeded with defaults so users have something to edit.

use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use shared::settings::AppSettings;
use std::fs;
use std::path::PathBuf;

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "easel").ok_or_else(|| anyhow!("no home directory available"))
}

pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

fn settings_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("settings.json"))
}

pub fn load() -> Result<AppSettings> {
    let path = settings_path()?;
    if !path.exists() {
        let defaults = AppSettings::default();
        save(&defaults)?;
        return Ok(defaults);
    }
    let raw = fs::read_to_string(&path)?;
    match serde_json::from_str(&raw) {
        Ok(settings) => Ok(settings),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "settings unreadable, using defaults");
            Ok(AppSettings::default())
        }
    }
}

pub fn save(settings: &AppSettings) -> Result<()> {
    let path = settings_path()?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
