//! Model registry
//!
//! Stores immutable [`ModelVersion`]s on disk and tracks which one is live.
//!
//! ```text
//! <root>/
//!   LATEST                       key of the active version
//!   versions/<key>.json          one envelope per version, never rewritten
//! ```
//!
//! Every file is written to a temp file in the target directory, synced, then
//! renamed into place, so a concurrent reader sees either the old or the new
//! content in full.

mod paths;

pub use paths::default_registry_dir;

use crate::error::{RiskError, RiskResult};
use crate::version::ModelVersion;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Bumped whenever the envelope layout changes
pub const FORMAT_VERSION: u32 = 1;

/// Storage key of a published version.
///
/// Keys start with the fit timestamp, so lexical order is chronological.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionKey(String);

impl VersionKey {
    fn generate(version: &ModelVersion) -> Self {
        let stamp = version.fit_timestamp.format("%Y%m%dT%H%M%S%3fZ");
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{stamp}-{}", &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for VersionKey {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if paths::is_valid_key(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(RiskError::VersionNotFound(s.to_string()))
        }
    }
}

/// Which version `load` should read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    Key(VersionKey),
}

impl std::str::FromStr for VersionSelector {
    type Err = RiskError;

    /// `"latest"` or a version key
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("latest") {
            Ok(Self::Latest)
        } else {
            s.parse().map(Self::Key)
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format_version: u32,
    key: &'a VersionKey,
    checksum: String,
    version: &'a ModelVersion,
}

#[derive(Deserialize)]
struct Envelope {
    format_version: u32,
    key: VersionKey,
    checksum: String,
    version: ModelVersion,
}

fn checksum(version: &ModelVersion) -> RiskResult<String> {
    let bytes = serde_json::to_vec(version)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// File-backed model registry
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    /// Open (and create if needed) a registry rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> RiskResult<Self> {
        let root = root.into();
        fs::create_dir_all(paths::versions_dir(&root))?;
        debug!("Opened model registry at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Publish a new version and make it the latest.
    ///
    /// The version file is fully in place before `LATEST` is repointed.
    pub fn save(&self, version: &ModelVersion) -> RiskResult<VersionKey> {
        version.check_consistency()?;

        let mut key = VersionKey::generate(version);
        while paths::version_file(&self.root, key.as_str()).exists() {
            key = VersionKey::generate(version);
        }

        let envelope = EnvelopeRef {
            format_version: FORMAT_VERSION,
            key: &key,
            checksum: checksum(version)?,
            version,
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        self.write_atomic(&paths::version_file(&self.root, key.as_str()), &bytes)?;
        self.write_atomic(&paths::latest_file(&self.root), key.as_str().as_bytes())?;

        info!(
            "Published model version {} ({} training rows)",
            key, version.training_row_count
        );
        Ok(key)
    }

    /// Read a stored version
    pub fn load(&self, selector: &VersionSelector) -> RiskResult<ModelVersion> {
        let key = match selector {
            VersionSelector::Latest => self
                .latest_key()?
                .ok_or_else(|| RiskError::VersionNotFound("latest".into()))?,
            VersionSelector::Key(key) => key.clone(),
        };
        self.load_key(&key)
    }

    fn load_key(&self, key: &VersionKey) -> RiskResult<ModelVersion> {
        let path = paths::version_file(&self.root, key.as_str());
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RiskError::VersionNotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let corrupt = |reason: String| RiskError::CorruptArtifact {
            key: key.to_string(),
            reason,
        };

        let envelope: Envelope =
            serde_json::from_slice(&raw).map_err(|e| corrupt(format!("unreadable envelope: {e}")))?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {} (expected {})",
                envelope.format_version, FORMAT_VERSION
            )));
        }
        if envelope.key != *key {
            return Err(corrupt(format!("envelope names key {}", envelope.key)));
        }
        if checksum(&envelope.version)? != envelope.checksum {
            return Err(corrupt("checksum mismatch".into()));
        }
        envelope
            .version
            .check_consistency()
            .map_err(|e| corrupt(e.to_string()))?;

        debug!("Loaded model version {}", key);
        Ok(envelope.version)
    }

    /// All stored keys, oldest first
    pub fn list(&self) -> RiskResult<Vec<VersionKey>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(paths::versions_dir(&self.root))? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if paths::is_valid_key(stem) {
                keys.push(VersionKey(stem.to_string()));
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Key the `LATEST` pointer refers to, if any version was published
    pub fn latest_key(&self) -> RiskResult<Option<VersionKey>> {
        let raw = match fs::read_to_string(paths::latest_file(&self.root)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let trimmed = raw.trim();
        if !paths::is_valid_key(trimmed) {
            return Err(RiskError::CorruptArtifact {
                key: paths::LATEST_FILE.to_string(),
                reason: format!("malformed pointer {trimmed:?}"),
            });
        }
        Ok(Some(VersionKey(trimmed.to_string())))
    }

    /// Repoint `LATEST` at an existing version (rollback)
    pub fn activate(&self, key: &VersionKey) -> RiskResult<()> {
        // Refuse to point at anything that would not load
        self.load_key(key)?;
        self.write_atomic(&paths::latest_file(&self.root), key.as_str().as_bytes())?;
        info!("Activated model version {}", key);
        Ok(())
    }

    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> RiskResult<()> {
        let dir = target.parent().unwrap_or(&self.root);
        let file_name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact");
        let tmp = dir.join(format!(
            ".{file_name}.{}.tmp",
            Uuid::new_v4().simple()
        ));

        let result = (|| -> RiskResult<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, target)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }
}
