use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::PermissionConfig;

/// Where rules installed by "always allow" end up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AlwaysAllowPersistence {
    /// Only the live engine learns the rule; it is gone when the process exits.
    #[default]
    InMemory,
    /// The live engine learns the rule and the full rule set is written back here.
    File(PathBuf),
}

/// Load a permission config, keeping rule order exactly as written.
/// A missing file yields the default config.
pub fn load_permission_config(path: &Path) -> Result<PermissionConfig> {
    if !path.exists() {
        return Ok(PermissionConfig::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read permission config {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(PermissionConfig::default());
    }

    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse permission config {}", path.display()))
}

/// Write the config through a sibling temp file and rename it into place.
pub fn save_permission_config(path: &Path, config: &PermissionConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut serialized = serde_json::to_string_pretty(config)?;
    serialized.push('\n');

    let tmp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        file.write_all(serialized.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{PermissionAction, PermissionRule};
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_default_config() {
        let temp = TempDir::new().expect("temp dir");
        let config = load_permission_config(&temp.path().join("absent.json")).expect("load");
        assert_eq!(config, PermissionConfig::default());
    }

    #[test]
    fn test_save_then_load_keeps_order() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("nested/permissions.json");
        let config = PermissionConfig {
            rules: vec![
                PermissionRule::new("web_*", PermissionAction::Ask),
                PermissionRule::new("read_file", PermissionAction::Allow),
            ],
            default_action: PermissionAction::Deny,
        };

        save_permission_config(&path, &config).expect("save");
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(load_permission_config(&path).expect("load"), config);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("permissions.json");
        fs::write(&path, "{ not json").expect("seed file");
        let err = load_permission_config(&path).expect_err("malformed config");
        assert!(err.to_string().contains("failed to parse permission config"));
    }
}
