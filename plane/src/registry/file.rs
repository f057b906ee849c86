//! File-backed slot registry
//!
//! One JSON document per pair at `<dir>/<project>/<environment>.json`,
//! replaced atomically on every write. Writes from this process are
//! serialized so the version check and the rename happen as one step.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::error;

use crate::clock::Clock;
use crate::errors::PlaneError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::slot::{HealthStatus, ProjectSlots, SlotName, SlotState};
use crate::registry::{
    apply_health_update, apply_state_update, apply_upsert, not_found, SlotRegistry,
};

pub struct FileSlotRegistry {
    dir: Dir,
    write_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl FileSlotRegistry {
    pub fn new(dir: Dir, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
            clock,
        }
    }

    fn doc(&self, project: &str, environment: &str) -> File {
        self.dir
            .subdir(project)
            .file(&format!("{}.json", environment))
    }

    async fn read(&self, file: &File) -> Result<Option<ProjectSlots>, PlaneError> {
        file.read_json_opt().await.map_err(unavailable)
    }

    async fn write(&self, slots: &ProjectSlots) -> Result<(), PlaneError> {
        self.doc(&slots.project_name, &slots.environment)
            .write_json_atomic(slots)
            .await
            .map_err(unavailable)
    }
}

fn unavailable(err: PlaneError) -> PlaneError {
    PlaneError::RegistryUnavailable(err.to_string())
}

#[async_trait]
impl SlotRegistry for FileSlotRegistry {
    async fn get(
        &self,
        project: &str,
        environment: &str,
    ) -> Result<Option<ProjectSlots>, PlaneError> {
        self.read(&self.doc(project, environment)).await
    }

    async fn upsert(&self, slots: ProjectSlots) -> Result<ProjectSlots, PlaneError> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .read(&self.doc(&slots.project_name, &slots.environment))
            .await?;
        let stored = apply_upsert(current.as_ref(), slots, self.clock.now())?;
        self.write(&stored).await?;
        Ok(stored)
    }

    async fn update_slot_state(
        &self,
        project: &str,
        environment: &str,
        slot: SlotName,
        state: SlotState,
    ) -> Result<ProjectSlots, PlaneError> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .read(&self.doc(project, environment))
            .await?
            .ok_or_else(|| not_found(project, environment))?;
        let stored = apply_state_update(current, slot, state, self.clock.now())?;
        self.write(&stored).await?;
        Ok(stored)
    }

    async fn update_slot_health(
        &self,
        project: &str,
        environment: &str,
        slot: SlotName,
        health: HealthStatus,
    ) -> Result<ProjectSlots, PlaneError> {
        let _guard = self.write_lock.lock().await;
        let current = self
            .read(&self.doc(project, environment))
            .await?
            .ok_or_else(|| not_found(project, environment))?;
        let stored = apply_health_update(current, slot, health, self.clock.now());
        self.write(&stored).await?;
        Ok(stored)
    }

    async fn list_all(&self) -> Result<Vec<ProjectSlots>, PlaneError> {
        let mut all = Vec::new();
        for project_dir in self.dir.list_dirs().await.map_err(unavailable)? {
            for path in Dir::new(project_dir).list_files().await.map_err(unavailable)? {
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                // A pair that cannot be read still holds its ports
                let slots = File::new(&path)
                    .read_json::<ProjectSlots>()
                    .await
                    .map_err(|e| {
                        error!("Unreadable registry document {:?}: {}", path, e);
                        unavailable(e)
                    })?;
                all.push(slots);
            }
        }
        all.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(all)
    }
}
