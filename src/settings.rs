//! Platform directories for persisted overrides and the local token cache.

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::config::AppConfig;
use crate::error::StoreError;

/// Override file name.
const OVERRIDES_FILE: &str = "overrides.json";
/// Local token cache file name.
const TOKEN_CACHE_FILE: &str = "token_cache.json";

fn project_dirs(app: &AppConfig) -> Result<ProjectDirs, StoreError> {
    ProjectDirs::from(&app.qualifier, &app.organization, &app.name)
        .ok_or(StoreError::NoAppDirectory)
}

/// Get the path to the persisted override file.
///
/// Returns `~/Library/Application Support/de.malvik.graphauth/overrides.json` on macOS.
pub fn overrides_path(app: &AppConfig) -> Result<PathBuf, StoreError> {
    Ok(project_dirs(app)?.config_dir().join(OVERRIDES_FILE))
}

/// Get the path to the local-scoped token cache.
pub fn token_cache_path(app: &AppConfig) -> Result<PathBuf, StoreError> {
    Ok(project_dirs(app)?.data_dir().join(TOKEN_CACHE_FILE))
}
