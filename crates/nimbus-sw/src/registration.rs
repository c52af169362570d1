//! Registration slots and controlled clients.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::worker::{ServiceWorker, ServiceWorkerId, ServiceWorkerState};

// ==================== Registration ====================

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Start installing a new worker. A worker still installing is replaced
    /// and returned, marked redundant.
    pub fn update(&mut self, mut worker: ServiceWorker) -> Option<ServiceWorker> {
        worker.set_state(ServiceWorkerState::Installing);
        self.installing.replace(worker).map(redundant)
    }

    /// Transition installing to waiting. Returns the id of the now-waiting
    /// worker and any worker it displaced from the waiting slot.
    pub fn install_complete(&mut self) -> (Option<ServiceWorkerId>, Option<ServiceWorker>) {
        match self.installing.take() {
            Some(mut worker) => {
                worker.set_state(ServiceWorkerState::Installed);
                let id = worker.id;
                (Some(id), self.waiting.replace(worker).map(redundant))
            }
            None => (None, None),
        }
    }

    /// Installing worker failed; it becomes redundant and the active worker
    /// stays in control.
    pub fn install_failed(&mut self, error: impl Into<String>) -> Option<ServiceWorker> {
        self.installing.take().map(|mut worker| {
            worker.error = Some(error.into());
            redundant(worker)
        })
    }

    /// Mark the waiting worker as activating.
    pub fn start_activation(&mut self) -> Option<ServiceWorkerId> {
        self.waiting.as_mut().map(|worker| {
            worker.set_state(ServiceWorkerState::Activating);
            worker.id
        })
    }

    /// Promote the waiting worker. Returns the replaced active worker,
    /// marked redundant.
    pub fn activate(&mut self) -> Option<ServiceWorker> {
        let mut worker = self.waiting.take()?;
        worker.set_state(ServiceWorkerState::Activated);
        self.active.replace(worker).map(redundant)
    }

    /// Skip waiting (force activate) without waiting for old clients to go
    /// away.
    pub fn skip_waiting(&mut self) -> Option<ServiceWorker> {
        self.activate()
    }
}

fn redundant(mut worker: ServiceWorker) -> ServiceWorker {
    worker.set_state(ServiceWorkerState::Redundant);
    worker
}

// ==================== Clients ====================

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Worker currently controlling the page.
    pub controller: Option<ServiceWorkerId>,
}

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Open a page at `url`, controlled by `controller` from the start.
    pub fn open_window(&mut self, url: Url, controller: Option<ServiceWorkerId>) -> Client {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
        let client = Client {
            id: id.clone(),
            url,
            controller,
        };
        self.clients.insert(id, client.clone());
        client
    }

    /// Take control of every in-scope client not already controlled by
    /// `worker`. Returns the ids of clients whose controller changed.
    pub fn claim(&mut self, worker: &ServiceWorker) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| worker.controls(&c.url) && c.controller != Some(worker.id))
            .map(|c| {
                c.controller = Some(worker.id);
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
