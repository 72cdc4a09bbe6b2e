//! Registry path utilities - uses ~/.local/share/batchrisk/registry/ by default

use std::path::{Path, PathBuf};

pub(crate) const VERSIONS_DIR: &str = "versions";
pub(crate) const LATEST_FILE: &str = "LATEST";

/// Default registry root.
/// Uses the platform data directory (`~/.local/share` on Linux, `%APPDATA%` on Windows).
pub fn default_registry_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("batchrisk")
        .join("registry")
}

pub(crate) fn versions_dir(root: &Path) -> PathBuf {
    root.join(VERSIONS_DIR)
}

pub(crate) fn version_file(root: &Path, key: &str) -> PathBuf {
    versions_dir(root).join(format!("{key}.json"))
}

pub(crate) fn latest_file(root: &Path) -> PathBuf {
    root.join(LATEST_FILE)
}

/// Keys become file names, so only a conservative character set is accepted
pub(crate) fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dir_ends_with_registry() {
        let dir = default_registry_dir();
        assert!(dir.ends_with("batchrisk/registry"));
    }

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("20250101T000000000Z-1a2b3c4d"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("../LATEST"));
        assert!(!is_valid_key(".hidden"));
        assert!(!is_valid_key("a/b"));
    }
}
