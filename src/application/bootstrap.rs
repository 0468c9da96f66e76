use crate::infrastructure::config::{ensure_default_settings, load_settings, Settings};
use crate::infrastructure::error::InfraError;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub settings: Settings,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, InfraError> {
    let config_dir = workspace_root.join("config");
    let logs_dir = workspace_root.join("logs");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_settings(&config_dir)?;
    let settings = load_settings(&config_dir)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        logs_dir,
        settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_layout_and_default_settings() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = bootstrap_workspace(dir.path()).expect("bootstrap succeeds");

        assert!(result.config_dir.join("settings.json").is_file());
        assert!(result.logs_dir.is_dir());
        assert_eq!(result.settings, Settings::default());

        let again = bootstrap_workspace(dir.path()).expect("bootstrap is idempotent");
        assert_eq!(again.settings, result.settings);
    }
}
