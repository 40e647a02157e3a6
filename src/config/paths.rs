//! Workspace and configuration paths

use std::path::PathBuf;

/// Default workspace root: `~/.openagents/workspace`, or `./workspace`
/// when no home directory is available.
pub fn default_workspace_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".openagents").join("workspace"))
        .unwrap_or_else(|| PathBuf::from("workspace"))
}

/// Default location of the network config file: `./network.yaml`.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("network.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_workspace_dir_is_not_empty() {
        assert!(!default_workspace_dir().as_os_str().is_empty());
    }
}
