//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::PlaneError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the control plane
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Teams and credential hashes
    pub fn access_file(&self) -> File {
        File::new(self.base_dir.join("access.json"))
    }

    /// One JSON document per (project, environment)
    pub fn registry_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("registry"))
    }

    /// Get the deployment records directory
    pub fn deployments_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("deployments"))
    }

    pub fn audit_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("audit"))
    }

    pub fn audit_file(&self) -> File {
        self.audit_dir().file("audit.log")
    }

    /// Environment backups, `{project}/{environment}/current.env`
    pub fn env_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("env"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), PlaneError> {
        self.registry_dir().create().await?;
        self.deployments_dir().create().await?;
        self.audit_dir().create().await?;
        self.env_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}
