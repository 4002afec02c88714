use std::path::{Path, PathBuf};

use super::repo::Repo;
use crate::error::BoxedError;

/// Checkpoint directory on the local machine.
pub struct LocalRepo {
    path: PathBuf,
}

impl LocalRepo {
    /// Create a new local repository.
    ///
    /// * `path` - The path to the checkpoint directory.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Repo for LocalRepo {
    fn file(&self, path: impl AsRef<Path>) -> Result<Option<PathBuf>, BoxedError> {
        let full_path = self.path.join(path);
        Ok(full_path.is_file().then_some(full_path))
    }

    fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.path.join(path).is_file()
    }
}
