//! Environment backups
//!
//! Deploy reads `{project}/{environment}/current.env` from the backup
//! directory and ships it to the host as the container's env file.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::errors::PlaneError;
use crate::filesys::dir::Dir;

#[async_trait]
pub trait EnvStore: Send + Sync {
    /// Current env snapshot, `None` if the pair has none
    async fn current(&self, project: &str, environment: &str)
        -> Result<Option<String>, PlaneError>;
}

pub struct FileEnvStore {
    dir: Dir,
}

impl FileEnvStore {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl EnvStore for FileEnvStore {
    async fn current(
        &self,
        project: &str,
        environment: &str,
    ) -> Result<Option<String>, PlaneError> {
        self.dir
            .subdir(project)
            .subdir(environment)
            .file("current.env")
            .read_string_opt()
            .await
    }
}

#[derive(Default)]
pub struct MemoryEnvStore {
    entries: RwLock<HashMap<(String, String), String>>,
}

impl MemoryEnvStore {
    pub fn set(&self, project: &str, environment: &str, contents: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            (project.to_string(), environment.to_string()),
            contents.to_string(),
        );
    }
}

#[async_trait]
impl EnvStore for MemoryEnvStore {
    async fn current(
        &self,
        project: &str,
        environment: &str,
    ) -> Result<Option<String>, PlaneError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get(&(project.to_string(), environment.to_string()))
            .cloned())
    }
}
