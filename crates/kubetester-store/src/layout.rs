use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_FILE: &str = "state.json";

/// Directory layout for persisted environment state.
///
/// Each environment gets its own directory under the root holding the state
/// document and the lock file that serializes CLI processes driving it.
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default layout: `.kubetester/` next to the config file.
    pub fn beside_config(config_path: &Path) -> Self {
        let dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Self::new(dir.join(".kubetester"))
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn env_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    #[inline]
    pub fn state_file(&self, name: &str) -> PathBuf {
        self.env_dir(name).join(STATE_FILE)
    }

    #[inline]
    pub fn lock_file(&self, name: &str) -> PathBuf {
        self.env_dir(name).join(".lock")
    }

    pub fn initialize(&self, name: &str) -> Result<(), StoreError> {
        fs::create_dir_all(self.env_dir(name))?;
        Ok(())
    }
}
