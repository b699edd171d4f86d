use crate::client::RemoteFile;
use crate::error::FetchError;
use crate::session::SessionManager;
use crate::storage::LocalStorage;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    /// Persistent download into the downloads directory.
    Download,
    /// Ephemeral fetch into the streaming directory for playback.
    Stream,
}

/// Task status. Transitions are monotonic: queued, in progress, then one of
/// the terminal states. No task regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct TransferTask {
    pub id: Uuid,
    pub file: RemoteFile,
    pub kind: TransferKind,
    pub status: TransferStatus,
    pub local_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl TransferTask {
    fn new(file: RemoteFile, kind: TransferKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            file,
            kind,
            status: TransferStatus::Queued,
            local_path: None,
            error: None,
        }
    }
}

/// Executes downloads and playback fetches against local storage and tracks
/// per-transfer status. Tasks are appended and retained until the consumer
/// clears them; transfers for different files may run concurrently.
pub struct TransferCoordinator {
    session: Arc<SessionManager>,
    storage: LocalStorage,
    tasks: watch::Sender<Vec<TransferTask>>,
}

impl TransferCoordinator {
    pub fn new(session: Arc<SessionManager>, storage: LocalStorage) -> Self {
        let (tasks, _) = watch::channel(Vec::new());
        Self {
            session,
            storage,
            tasks,
        }
    }

    pub fn storage(&self) -> &LocalStorage {
        &self.storage
    }

    pub fn tasks(&self) -> Vec<TransferTask> {
        self.tasks.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<TransferTask>> {
        self.tasks.subscribe()
    }

    /// Drop finished tasks; in-flight ones stay.
    pub fn clear_finished(&self) {
        self.tasks
            .send_modify(|tasks| tasks.retain(|t| !t.status.is_terminal()));
    }

    fn push_task(&self, task: TransferTask) {
        self.tasks.send_modify(|tasks| tasks.push(task));
    }

    /// Apply `update` to the task unless it already reached a terminal
    /// state, and return the updated task.
    fn update_task(
        &self,
        id: Uuid,
        update: impl FnOnce(&mut TransferTask),
    ) -> Option<TransferTask> {
        let mut updated = None;
        self.tasks.send_modify(|tasks| {
            if let Some(task) = tasks.iter_mut().find(|t| t.id == id) {
                if !task.status.is_terminal() {
                    update(task);
                }
                updated = Some(task.clone());
            }
        });
        updated
    }

    fn fail_task(&self, id: Uuid, err: &FetchError) {
        self.update_task(id, |task| {
            task.status = TransferStatus::Failed;
            task.error = Some(err.to_string());
        });
    }

    /// Download a remote file into persistent storage. A local file with
    /// the same name short-circuits to completed without touching the
    /// backend; callers relying on freshness must delete the local copy
    /// first.
    pub async fn download(&self, file: &RemoteFile) -> Result<TransferTask, FetchError> {
        let task = TransferTask::new(file.clone(), TransferKind::Download);
        let id = task.id;
        self.push_task(task);

        let dest = match self.storage.download_path(&file.name) {
            Ok(dest) => dest,
            Err(err) => {
                self.fail_task(id, &err);
                return Err(err);
            }
        };
        self.update_task(id, |task| task.status = TransferStatus::InProgress);

        if dest.exists() {
            debug!("{} already present, reusing local copy", file.name);
            return Ok(self.complete_task(id, dest));
        }

        self.fetch_into(id, file, dest).await
    }

    /// Fetch a remote file into ephemeral storage for playback and hand
    /// back the local locator. Always fetches; the download cache is never
    /// consulted.
    pub async fn stream_for_playback(&self, file: &RemoteFile) -> Result<PathBuf, FetchError> {
        let task = TransferTask::new(file.clone(), TransferKind::Stream);
        let id = task.id;
        self.push_task(task);

        let dest = match self.storage.stream_path(&file.name) {
            Ok(dest) => dest,
            Err(err) => {
                self.fail_task(id, &err);
                return Err(err);
            }
        };
        self.update_task(id, |task| task.status = TransferStatus::InProgress);

        self.fetch_into(id, file, dest.clone()).await?;
        Ok(dest)
    }

    async fn fetch_into(
        &self,
        id: Uuid,
        file: &RemoteFile,
        dest: PathBuf,
    ) -> Result<TransferTask, FetchError> {
        let Some(active) = self.session.active() else {
            let err = FetchError::NotConnected;
            self.fail_task(id, &err);
            return Err(err);
        };

        match active.backend.fetch(&active.profile, file, &dest).await {
            Ok(bytes) => {
                debug!("fetched {bytes} bytes of {} to {}", file.name, dest.display());
                Ok(self.complete_task(id, dest))
            }
            Err(err) => {
                warn!("fetch of {} failed: {err}", file.name);
                self.fail_task(id, &err);
                Err(err)
            }
        }
    }

    fn complete_task(&self, id: Uuid, dest: PathBuf) -> TransferTask {
        self.update_task(id, |task| {
            task.status = TransferStatus::Completed;
            task.local_path = Some(dest);
        })
        .unwrap_or_else(|| {
            // The task was just pushed by the same call chain.
            unreachable!("transfer task vanished")
        })
    }

    /// Completed downloads on disk; enumeration failures yield empty.
    pub fn list_local_files(&self) -> Vec<PathBuf> {
        self.storage.list_downloads()
    }

    /// Best-effort removal of a local file; failures are no-ops.
    pub fn delete_local_file(&self, path: &Path) {
        self.storage.delete(path);
    }
}
