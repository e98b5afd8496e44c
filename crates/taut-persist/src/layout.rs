use std::fs;
use std::path::{Path, PathBuf};

use taut_core::InfoHash;

use crate::error::PersistError;

const STATE_FILE: &str = "state.json";
const SESSION_PARAMS_FILE: &str = ".session_state";
const DOWNLOADS_DIR: &str = "downloads";
const RESUME_DIR: &str = "resume";
const METADATA_DIR: &str = "metadata";
const BLOCKLIST_FILE: &str = "blocklists/blocklist.txt";
const RESUME_SUFFIX: &str = ".resume";
const METADATA_SUFFIX: &str = ".torrent";

/// The stable on-disk layout under one data root.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    /// Describe (but do not create) the layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The data root itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/state.json`.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    /// `<root>/.session_state`.
    #[must_use]
    pub fn session_params_file(&self) -> PathBuf {
        self.root.join(SESSION_PARAMS_FILE)
    }

    /// Default download directory, `<root>/downloads`.
    #[must_use]
    pub fn default_download_dir(&self) -> PathBuf {
        self.root.join(DOWNLOADS_DIR)
    }

    /// `<root>/resume`.
    #[must_use]
    pub fn resume_dir(&self) -> PathBuf {
        self.root.join(RESUME_DIR)
    }

    /// `<root>/metadata`.
    #[must_use]
    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    /// `<root>/blocklists/blocklist.txt`.
    #[must_use]
    pub fn blocklist_file(&self) -> PathBuf {
        self.root.join(BLOCKLIST_FILE)
    }

    /// `<root>/resume/<hex>.resume`.
    #[must_use]
    pub fn resume_file(&self, hash: &InfoHash) -> PathBuf {
        self.resume_dir()
            .join(format!("{}{RESUME_SUFFIX}", hash.to_hex()))
    }

    /// `<root>/metadata/<hex>.torrent`.
    #[must_use]
    pub fn metadata_file(&self, hash: &InfoHash) -> PathBuf {
        self.metadata_dir()
            .join(format!("{}{METADATA_SUFFIX}", hash.to_hex()))
    }

    /// Create the root and its standing subdirectories.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Io`] naming the directory that could not be
    /// created; the caller treats this as fatal.
    pub fn ensure(&self) -> Result<(), PersistError> {
        for dir in [
            self.root.clone(),
            self.default_download_dir(),
            self.resume_dir(),
            self.metadata_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|err| PersistError::io(&dir, err))?;
        }
        Ok(())
    }

    /// Parse `<hex>.resume` back to an info-hash; `None` for foreign files.
    #[must_use]
    pub(crate) fn hash_from_resume_name(name: &str) -> Option<InfoHash> {
        name.strip_suffix(RESUME_SUFFIX)
            .and_then(|hex| InfoHash::from_hex(hex).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn paths_follow_the_stable_layout() {
        let layout = DataLayout::new("/var/lib/taut");
        let hash = InfoHash::from_hex(&"ab".repeat(20)).unwrap();
        assert_eq!(layout.state_file(), PathBuf::from("/var/lib/taut/state.json"));
        assert_eq!(
            layout.session_params_file(),
            PathBuf::from("/var/lib/taut/.session_state")
        );
        assert_eq!(
            layout.resume_file(&hash),
            PathBuf::from(format!("/var/lib/taut/resume/{}.resume", "ab".repeat(20)))
        );
        assert_eq!(
            layout.metadata_file(&hash),
            PathBuf::from(format!("/var/lib/taut/metadata/{}.torrent", "ab".repeat(20)))
        );
    }

    #[test]
    fn ensure_creates_standing_directories() {
        let dir = TempDir::new().unwrap();
        let layout = DataLayout::new(dir.path().join("data"));
        layout.ensure().unwrap();
        assert!(layout.default_download_dir().is_dir());
        assert!(layout.resume_dir().is_dir());
        assert!(layout.metadata_dir().is_dir());
    }

    #[test]
    fn resume_names_round_trip() {
        let hash = InfoHash::from_hex(&"0f".repeat(20)).unwrap();
        let name = format!("{}.resume", hash.to_hex());
        assert_eq!(DataLayout::hash_from_resume_name(&name), Some(hash));
        assert_eq!(DataLayout::hash_from_resume_name("junk.resume"), None);
        assert_eq!(DataLayout::hash_from_resume_name("README.md"), None);
    }
}
