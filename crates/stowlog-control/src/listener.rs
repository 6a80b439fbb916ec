//! Status notification
//!
//! At most one listener is registered per control center. It hears every
//! init, open and flush status; a write status is delivered only the first
//! time that particular code is seen, so a failing disk does not flood the
//! host with one callback per record.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use stowlog_core::{ProtocolCommand, StatusCode, StatusEvent};
use tracing::trace;

/// Receiver of engine status changes
///
/// Called from the writer context; implementations should return quickly.
pub trait StatusListener: Send + Sync {
    fn on_status(&self, event: StatusEvent);
}

impl<F> StatusListener for F
where
    F: Fn(StatusEvent) + Send + Sync,
{
    fn on_status(&self, event: StatusEvent) {
        self(event)
    }
}

/// Listener registration shared by the facade and the writer context
#[derive(Default)]
pub(crate) struct ListenerSlot {
    listener: RwLock<Option<Arc<dyn StatusListener>>>,
    seen_writes: Mutex<HashSet<StatusCode>>,
}

impl ListenerSlot {
    pub(crate) fn set(&self, listener: Option<Arc<dyn StatusListener>>) {
        *self.listener.write() = listener;
    }

    pub(crate) fn is_set(&self) -> bool {
        self.listener.read().is_some()
    }

    pub(crate) fn notify(&self, code: StatusCode) {
        if code.command() == ProtocolCommand::Write && !self.seen_writes.lock().insert(code) {
            return;
        }
        // Clone out so the callback runs without the lock held
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            trace!(%code, "Notifying status listener");
            listener.on_status(StatusEvent::new(code));
        }
    }
}
