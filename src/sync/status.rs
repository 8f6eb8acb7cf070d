//! `SyncStatusReporter`: composes the read-only status snapshot.

use std::sync::Arc;

use super::manager::SyncManager;
use super::types::SyncStatusSnapshot;

pub struct SyncStatusReporter {
    manager: Arc<SyncManager>,
}

impl SyncStatusReporter {
    pub fn new(manager: Arc<SyncManager>) -> Self {
        Self { manager }
    }

    /// Never mutates state. Read failures surface as `storage_warning`.
    pub fn snapshot(&self) -> SyncStatusSnapshot {
        let queue = self.manager.queue();
        let counts = queue
            .len()
            .and_then(|pending| Ok((pending, queue.dead_letter_count()?)));
        let (pending_count, dead_letter_count, storage_warning) = match counts {
            Ok((pending, dead)) => (pending, dead, None),
            Err(e) => {
                let warning = queue
                    .store()
                    .unavailable_reason()
                    .map(|r| format!("offline queuing disabled: {r}"))
                    .unwrap_or_else(|| e.to_string());
                (0, 0, Some(warning))
            }
        };

        SyncStatusSnapshot {
            is_online: self.manager.connectivity().is_online(),
            pending_count,
            dead_letter_count,
            last_sync_at: self.manager.last_sync_at().ok().flatten(),
            sync_in_progress: self.manager.is_sync_in_progress(),
            storage_warning,
        }
    }
}
