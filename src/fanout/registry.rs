//! Set of connected listeners

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use super::sink::{ListenerId, Sink};

struct RegistryInner {
    sinks: Mutex<HashMap<ListenerId, Arc<Sink>>>,
    /// Listener count, published on every membership change
    count: watch::Sender<usize>,
}

/// Connected sinks, shared by the HTTP layer, the governor and producers.
///
/// One mutex guards the map and is never held across an await. The count
/// watch channel doubles as the "listener added" signal.
#[derive(Clone)]
pub struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            inner: Arc::new(RegistryInner {
                sinks: Mutex::new(HashMap::new()),
                count,
            }),
        }
    }

    pub fn add(&self, sink: Arc<Sink>) {
        let id = sink.id();
        let total = {
            let mut sinks = self.inner.sinks.lock();
            sinks.insert(id, sink);
            self.inner.count.send_replace(sinks.len());
            sinks.len()
        };
        tracing::info!(listener = %id, listeners = total, "Listener connected");
    }

    /// Remove a sink; removing twice is harmless
    pub fn remove(&self, id: ListenerId) -> Option<Arc<Sink>> {
        let (removed, total) = {
            let mut sinks = self.inner.sinks.lock();
            let removed = sinks.remove(&id);
            if removed.is_some() {
                self.inner.count.send_replace(sinks.len());
            }
            (removed, sinks.len())
        };
        if removed.is_some() {
            tracing::info!(listener = %id, listeners = total, "Listener removed");
        }
        removed
    }

    pub fn get(&self, id: ListenerId) -> Option<Arc<Sink>> {
        self.inner.sinks.lock().get(&id).cloned()
    }

    /// Stable copy of the current members, for iterating without the lock
    pub fn snapshot(&self) -> Vec<Arc<Sink>> {
        self.inner.sinks.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.sinks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves as soon as at least one listener is connected
    pub async fn wait_for_listener(&self) {
        let mut count = self.inner.count.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = count.wait_for(|n| *n > 0).await;
    }

    pub fn watch_count(&self) -> watch::Receiver<usize> {
        self.inner.count.subscribe()
    }

    /// Close and remove every sink; returns how many were removed
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Sink>> = {
            let mut sinks = self.inner.sinks.lock();
            let drained = sinks.drain().map(|(_, sink)| sink).collect();
            self.inner.count.send_replace(0);
            drained
        };
        for sink in &drained {
            sink.close();
        }
        drained.len()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
