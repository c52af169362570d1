//! Lifecycle notifications and fetch events.

use std::sync::Mutex;

use nimbus_net::Request;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::worker::{ServiceWorkerId, ServiceWorkerState};

/// Service worker events, as a page would observe them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A new worker started installing.
    UpdateFound { worker_id: ServiceWorkerId },
    /// State changed.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A page switched to a new controlling worker.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// Activation removed a bucket not on the allow-list.
    BucketDeleted { bucket: String },
    /// Eviction dropped the oldest entry of a bucket.
    Evicted { bucket: String, key: String },
}

/// An intercepted request.
///
/// Work registered with [`FetchEvent::wait_until`] may outlive the response
/// handed back to the page; [`FetchEvent::settled`] waits for it.
#[derive(Debug)]
pub struct FetchEvent {
    request: Request,
    extensions: Mutex<Vec<JoinHandle<()>>>,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            extensions: Mutex::new(Vec::new()),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Extend the event's lifetime until `task` finishes.
    pub fn wait_until(&self, task: JoinHandle<()>) {
        self.extensions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
    }

    /// Hand over the outstanding extensions.
    pub fn take_extensions(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.extensions.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Wait for every extension registered so far.
    pub async fn settled(&self) {
        for handle in self.take_extensions() {
            if let Err(e) = handle.await {
                warn!(url = %self.request.url, error = %e, "Fetch event extension failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_settled_waits_for_extensions() {
        let event = FetchEvent::new(Request::parse("http://localhost:3000/").unwrap());
        let done = Arc::new(AtomicUsize::new(0));

        for delay in [20, 5] {
            let done = Arc::clone(&done);
            event.wait_until(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        event.settled().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert!(event.take_extensions().is_empty());
    }

    #[tokio::test]
    async fn test_settled_survives_panicking_extension() {
        let event = FetchEvent::new(Request::parse("http://localhost:3000/").unwrap());
        event.wait_until(tokio::spawn(async { panic!("boom") }));
        event.settled().await;
    }
}
