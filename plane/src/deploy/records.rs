//! Deployment history store

use std::sync::RwLock;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::PlaneError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::DeploymentRecord;

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert or replace a record by id
    async fn save(&self, record: &DeploymentRecord) -> Result<(), PlaneError>;

    async fn get(
        &self,
        project: &str,
        environment: &str,
        id: &str,
    ) -> Result<Option<DeploymentRecord>, PlaneError>;

    /// Records of a pair, newest first
    async fn list(
        &self,
        project: &str,
        environment: &str,
        limit: usize,
    ) -> Result<Vec<DeploymentRecord>, PlaneError>;
}

#[derive(Default)]
pub struct MemoryDeploymentStore {
    records: RwLock<Vec<DeploymentRecord>>,
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn save(&self, record: &DeploymentRecord) -> Result<(), PlaneError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn get(
        &self,
        project: &str,
        environment: &str,
        id: &str,
    ) -> Result<Option<DeploymentRecord>, PlaneError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .iter()
            .find(|r| r.id == id && r.project_name == project && r.environment == environment)
            .cloned())
    }

    async fn list(
        &self,
        project: &str,
        environment: &str,
        limit: usize,
    ) -> Result<Vec<DeploymentRecord>, PlaneError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<DeploymentRecord> = records
            .iter()
            .filter(|r| r.project_name == project && r.environment == environment)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }
}

/// One JSON file per record at `<dir>/<project>/<environment>/<id>.json`
pub struct FileDeploymentStore {
    dir: Dir,
}

impl FileDeploymentStore {
    pub fn new(dir: Dir) -> Self {
        Self { dir }
    }

    fn pair_dir(&self, project: &str, environment: &str) -> Dir {
        self.dir.subdir(project).subdir(environment)
    }
}

#[async_trait]
impl DeploymentStore for FileDeploymentStore {
    async fn save(&self, record: &DeploymentRecord) -> Result<(), PlaneError> {
        self.pair_dir(&record.project_name, &record.environment)
            .file(&format!("{}.json", record.id))
            .write_json_atomic(record)
            .await
    }

    async fn get(
        &self,
        project: &str,
        environment: &str,
        id: &str,
    ) -> Result<Option<DeploymentRecord>, PlaneError> {
        self.pair_dir(project, environment)
            .file(&format!("{}.json", id))
            .read_json_opt()
            .await
    }

    async fn list(
        &self,
        project: &str,
        environment: &str,
        limit: usize,
    ) -> Result<Vec<DeploymentRecord>, PlaneError> {
        let mut records = Vec::new();
        for path in self.pair_dir(project, environment).list_files().await? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match File::new(&path).read_json::<DeploymentRecord>().await {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable deployment record {:?}: {}", path, e),
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}
