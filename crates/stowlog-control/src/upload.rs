//! Upload tasks
//!
//! Each upload runs on the blocking pool under its own cancellation token,
//! registered by id so it can be cancelled from anywhere.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ControlError, ControlResult};

/// Identifier of a running upload
pub type UploadId = u64;

/// Caller-visible handle to an upload in progress
#[derive(Debug)]
pub struct UploadHandle {
    id: UploadId,
    token: CancellationToken,
    join: JoinHandle<ControlResult<String>>,
}

impl UploadHandle {
    pub(crate) fn new(
        id: UploadId,
        token: CancellationToken,
        join: JoinHandle<ControlResult<String>>,
    ) -> Self {
        Self { id, token, join }
    }

    pub fn id(&self) -> UploadId {
        self.id
    }

    /// Stop scanning further files and frames
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the rendered text
    pub async fn wait(self) -> ControlResult<String> {
        self.join
            .await
            .map_err(|e| ControlError::UploadTask(e.to_string()))?
    }
}

/// Tokens of the uploads still running
#[derive(Default)]
pub(crate) struct UploadRegistry {
    next_id: AtomicU64,
    running: DashMap<UploadId, CancellationToken>,
}

impl UploadRegistry {
    pub(crate) fn register(&self) -> (UploadId, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        self.running.insert(id, token.clone());
        (id, token)
    }

    pub(crate) fn finish(&self, id: UploadId) {
        self.running.remove(&id);
    }

    pub(crate) fn cancel(&self, id: UploadId) -> bool {
        match self.running.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.running.iter() {
            entry.value().cancel();
            cancelled += 1;
        }
        cancelled
    }

    pub(crate) fn len(&self) -> usize {
        self.running.len()
    }
}

/// Removes the registry entry when the upload task ends, however it ends
pub(crate) struct RegistryGuard {
    registry: Arc<UploadRegistry>,
    id: UploadId,
}

impl RegistryGuard {
    pub(crate) fn new(registry: Arc<UploadRegistry>, id: UploadId) -> Self {
        Self { registry, id }
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.finish(self.id);
    }
}
