//! In-process [`SignalBus`] adapter.
//!
//! An [`InMemorySignalHub`] plays the role of one origin's shared storage;
//! every context attaches its own [`InMemorySignalBus`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::trace;

use crate::application::ports::SignalBus;
use crate::domain::signal::{BusNotification, SignalKey};

#[derive(Default)]
struct HubState {
    values: HashMap<String, String>,
    listeners: HashMap<u64, mpsc::UnboundedSender<BusNotification>>,
}

/// Latest value per key plus the set of attached contexts.
#[derive(Default)]
pub struct InMemorySignalHub {
    state: Mutex<HubState>,
    next_context: AtomicU64,
}

impl InMemorySignalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a new context. It only sees writes made from now on.
    pub fn attach(self: &Arc<Self>) -> Arc<InMemorySignalBus> {
        let context = self.next_context.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().listeners.insert(context, tx);
        Arc::new(InMemorySignalBus {
            hub: Arc::clone(self),
            context,
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Current value stored under `key`.
    pub fn value(&self, key: &str) -> Option<String> {
        self.lock().values.get(key).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite `key` and fan the change out to every other context.
    pub fn write(&self, writer: u64, key: &str, value: Option<String>) {
        let mut state = self.lock();
        let previous_value = match &value {
            Some(v) => state.values.insert(key.to_owned(), v.clone()),
            None => state.values.remove(key),
        };
        let notification = BusNotification {
            key: key.to_owned(),
            new_value: value,
            previous_value,
        };

        // Contexts whose receiver is gone have detached.
        state.listeners.retain(|context, tx| {
            *context == writer || tx.send(notification.clone()).is_ok()
        });
        trace!(key, writer, "Bus value written");
    }

    fn detach(&self, context: u64) {
        self.lock().listeners.remove(&context);
    }
}

/// One context's handle on the hub.
pub struct InMemorySignalBus {
    hub: Arc<InMemorySignalHub>,
    context: u64,
    rx: Mutex<Option<mpsc::UnboundedReceiver<BusNotification>>>,
}

impl Drop for InMemorySignalBus {
    fn drop(&mut self) {
        self.hub.detach(self.context);
    }
}

#[async_trait]
impl SignalBus for InMemorySignalBus {
    async fn write(&self, key: SignalKey, value: String) -> anyhow::Result<()> {
        self.hub.write(self.context, key.as_str(), Some(value));
        Ok(())
    }

    fn notifications(&self) -> anyhow::Result<mpsc::UnboundedReceiver<BusNotification>> {
        self.rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| anyhow::anyhow!("bus notifications already taken"))
    }
}
