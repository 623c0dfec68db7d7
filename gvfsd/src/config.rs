//! Resolves the on-disk layout of an enlistment (spec.md §6), the same
//! way `radicle`'s `Storage` resolves its object database root from a
//! profile path.

use std::path::{Path, PathBuf};

/// Filesystem paths derived from an enlistment root.
#[derive(Clone, Debug)]
pub struct Paths {
    /// Root of the working copy the daemon virtualizes.
    pub root: PathBuf,
    /// The bare or non-bare Git repository backing `root`.
    pub git_dir: PathBuf,
    /// Directory holding the durable background-operation queue.
    pub background_ops_dir: PathBuf,
}

impl Paths {
    pub fn resolve(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let dot_gvfs = root.join(".gvfs");
        Paths {
            git_dir: root.join(".git"),
            background_ops_dir: dot_gvfs.join("background-ops"),
            root,
        }
    }
}

/// The subset of daemon configuration that is not purely a CLI flag:
/// values that could plausibly come from an on-disk config file in a
/// fuller implementation. Kept `Serialize`/`Deserialize` so a future
/// `gvfsd.json` loader is a small addition, not a redesign.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_chunk_size() -> usize {
    64
}

fn default_worker_count() -> usize {
    8
}

impl RemoteConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_resolve_relative_to_root() {
        let paths = Paths::resolve("/srv/enlistment");
        assert_eq!(paths.git_dir, PathBuf::from("/srv/enlistment/.git"));
        assert_eq!(
            paths.background_ops_dir,
            PathBuf::from("/srv/enlistment/.gvfs/background-ops")
        );
    }

    #[test]
    fn remote_config_round_trips_through_json() {
        let json = r#"{"url": "https://example.invalid/repo"}"#;
        let config: RemoteConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.chunk_size, 64);
        assert_eq!(config.worker_count, 8);
    }
}
