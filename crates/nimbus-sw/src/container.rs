//! Service worker container: registration, activation and fetch dispatch.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nimbus_core::{BucketNames, NimbusConfig};
use nimbus_net::{Fetcher, NetError, Request, Response};
use nimbus_store::CacheStore;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::eviction::TrimOldest;
use crate::events::{FetchEvent, ServiceWorkerEvent};
use crate::lifecycle::BucketLifecycle;
use crate::registration::{Client, Clients, ServiceWorkerRegistration};
use crate::router::{RequestClass, Router};
use crate::strategy::Strategies;
use crate::worker::{ServiceWorker, ServiceWorkerId, ServiceWorkerState};
use crate::ServiceWorkerError;

/// What the active worker runs for each intercepted request.
struct Controller {
    worker_id: ServiceWorkerId,
    router: Router,
    strategies: Strategies,
}

impl Controller {
    async fn respond(&self, event: &FetchEvent) -> Result<Response, ServiceWorkerError> {
        match self.router.classify(event.request()) {
            RequestClass::Api => self.strategies.network_first(event).await,
            RequestClass::Static => self.strategies.cache_first(event).await,
        }
    }
}

/// Service worker container (`navigator.serviceWorker`).
pub struct ServiceWorkerContainer {
    store: Arc<dyn CacheStore>,

    /// Raw network, used for install and for pass-through.
    network: Arc<dyn Fetcher>,

    registration: RwLock<Option<ServiceWorkerRegistration>>,

    clients: RwLock<Clients>,

    controller: RwLock<Option<Arc<Controller>>>,

    /// Write-behind tasks of answered fetch events.
    pending: Mutex<Vec<JoinHandle<()>>>,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                store,
                network,
                registration: RwLock::new(None),
                clients: RwLock::new(Clients::new()),
                controller: RwLock::new(None),
                pending: Mutex::new(Vec::new()),
                event_tx,
            },
            event_rx,
        )
    }

    /// Install the version described by `config`, skip waiting, activate it
    /// and claim open clients.
    ///
    /// On install failure the new worker becomes redundant and whatever was
    /// active stays in control.
    pub async fn register(&self, config: &NimbusConfig) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let scope = config.origin_url().map_err(ServiceWorkerError::Config)?;
        let manifest = config.manifest_urls().map_err(ServiceWorkerError::Config)?;
        let names = BucketNames::from_config(&config.cache);

        let worker = ServiceWorker::new(scope.clone(), config.cache.version.trim());
        let worker_id = worker.id;
        info!(worker = %worker_id, version = %worker.version, "Registering service worker");

        let displaced = self
            .registration
            .write()
            .await
            .get_or_insert_with(|| ServiceWorkerRegistration::new(scope))
            .update(worker);
        if let Some(old) = displaced {
            self.emit_state(&old);
        }
        self.emit(ServiceWorkerEvent::UpdateFound { worker_id });
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state: ServiceWorkerState::Installing,
        });

        let lifecycle = BucketLifecycle::new(self.store.clone(), self.network.clone());
        if let Err(err) = lifecycle.install(&names.static_name, &manifest).await {
            warn!(worker = %worker_id, error = %err, "Install failed");
            let failed = self
                .registration
                .write()
                .await
                .as_mut()
                .and_then(|r| r.install_failed(err.to_string()));
            if let Some(failed) = failed {
                self.emit_state(&failed);
            }
            return Err(err);
        }

        let displaced = self
            .registration
            .write()
            .await
            .as_mut()
            .map(|r| r.install_complete().1);
        if let Some(Some(old)) = displaced {
            self.emit_state(&old);
        }
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state: ServiceWorkerState::Installed,
        });

        // Eager takeover.
        self.activate_waiting(config, &lifecycle).await?;
        Ok(worker_id)
    }

    /// Take up a version installed in an earlier session without
    /// reinstalling it. Falls back to [`register`](Self::register) when its
    /// static bucket is gone.
    pub async fn resume(&self, config: &NimbusConfig) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let names = BucketNames::from_config(&config.cache);
        if !self.store.has(&names.static_name).await? {
            debug!(bucket = %names.static_name, "No installed version found");
            return self.register(config).await;
        }

        let scope = config.origin_url().map_err(ServiceWorkerError::Config)?;
        let worker = ServiceWorker::new(scope.clone(), config.cache.version.trim());
        let worker_id = worker.id;

        let (active, replaced) = {
            let mut guard = self.registration.write().await;
            let registration = guard.get_or_insert_with(|| ServiceWorkerRegistration::new(scope));
            registration.update(worker);
            registration.install_complete();
            let replaced = registration.activate();
            (registration.get_active().cloned(), replaced)
        };

        if let Some(old) = replaced {
            self.emit_state(&old);
        }
        if let Some(active) = active {
            info!(worker = %worker_id, version = %active.version, "Resumed installed version");
            self.emit_state(&active);
            self.take_control(config, &active).await;
        }
        Ok(worker_id)
    }

    async fn activate_waiting(
        &self,
        config: &NimbusConfig,
        lifecycle: &BucketLifecycle,
    ) -> Result<(), ServiceWorkerError> {
        let names = BucketNames::from_config(&config.cache);

        let activating = self
            .registration
            .write()
            .await
            .as_mut()
            .and_then(ServiceWorkerRegistration::start_activation)
            .ok_or_else(|| ServiceWorkerError::State("no waiting worker".to_string()))?;
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id: activating,
            new_state: ServiceWorkerState::Activating,
        });

        for bucket in lifecycle.activate(&names.allow_list()).await? {
            self.emit(ServiceWorkerEvent::BucketDeleted { bucket });
        }

        let (active, replaced) = {
            let mut guard = self.registration.write().await;
            let registration = guard
                .as_mut()
                .ok_or_else(|| ServiceWorkerError::State("registration vanished".to_string()))?;
            let replaced = registration.skip_waiting();
            (registration.get_active().cloned(), replaced)
        };

        if let Some(old) = replaced {
            self.emit_state(&old);
        }
        let active =
            active.ok_or_else(|| ServiceWorkerError::State("activation lost worker".to_string()))?;
        info!(worker = %active.id, version = %active.version, "Service worker activated");
        self.emit_state(&active);

        self.take_control(config, &active).await;
        Ok(())
    }

    /// Install `worker` as the controller and claim clients.
    async fn take_control(&self, config: &NimbusConfig, worker: &ServiceWorker) {
        let strategies = Strategies::new(
            self.store.clone(),
            self.network.clone(),
            BucketNames::from_config(&config.cache),
            Arc::new(TrimOldest::new(config.cache.max_dynamic_entries)),
            self.event_tx.clone(),
        );
        *self.controller.write().await = Some(Arc::new(Controller {
            worker_id: worker.id,
            router: Router::for_api_host(&config.api.host, config.api.host_match),
            strategies,
        }));

        let changed = self.clients.write().await.claim(worker);
        for client_id in changed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id,
                worker_id: worker.id,
            });
        }
    }

    /// Intercept a request. `None` means no worker is in control and the
    /// request goes to the network untouched.
    pub async fn handle_fetch(
        &self,
        request: Request,
    ) -> Option<Result<Response, ServiceWorkerError>> {
        let controller = self.controller.read().await.clone()?;

        let event = FetchEvent::new(request);
        let result = controller.respond(&event).await;
        self.track(event.take_extensions());
        Some(result)
    }

    fn track(&self, handles: Vec<JoinHandle<()>>) {
        if handles.is_empty() {
            return;
        }
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.extend(handles);
    }

    /// Wait for every outstanding write-behind task.
    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Write-behind task failed");
                }
            }
        }
    }

    /// Open a page. It is controlled from the start when an active worker
    /// covers its URL.
    pub async fn open_client(&self, url: Url) -> Client {
        let controller = self
            .active_worker()
            .await
            .filter(|w| w.controls(&url))
            .map(|w| w.id);
        self.clients.write().await.open_window(url, controller)
    }

    /// Look up a page.
    pub async fn client(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }

    /// Active worker, if any.
    pub async fn active_worker(&self) -> Option<ServiceWorker> {
        self.registration
            .read()
            .await
            .as_ref()
            .and_then(|r| r.get_active().cloned())
    }

    /// Worker currently answering fetches.
    pub async fn controller(&self) -> Option<ServiceWorkerId> {
        self.controller.read().await.as_ref().map(|c| c.worker_id)
    }

    /// Bucket names of the controlling version.
    pub async fn buckets(&self) -> Option<BucketNames> {
        self.controller
            .read()
            .await
            .as_ref()
            .map(|c| c.strategies.buckets().clone())
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    fn emit_state(&self, worker: &ServiceWorker) {
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id: worker.id,
            new_state: worker.state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Pages fetch through the container: intercepted when a worker is in
/// control, straight to the network otherwise.
#[async_trait]
impl Fetcher for ServiceWorkerContainer {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        match self.handle_fetch(request.clone()).await {
            Some(result) => result.map_err(NetError::from),
            None => self.network.fetch(request).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_net::StubFetcher;
    use nimbus_store::MemoryCacheStore;

    fn config() -> NimbusConfig {
        let mut config = NimbusConfig::default();
        config.cache.manifest = vec!["/".to_string()];
        config
    }

    fn setup() -> (
        ServiceWorkerContainer,
        mpsc::UnboundedReceiver<ServiceWorkerEvent>,
        Arc<StubFetcher>,
    ) {
        let network = Arc::new(StubFetcher::new());
        network.route_ok(&Url::parse("http://localhost:3000/").unwrap(), "shell");
        let (container, rx) =
            ServiceWorkerContainer::new(Arc::new(MemoryCacheStore::new()), network.clone());
        (container, rx, network)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServiceWorkerEvent>) -> Vec<ServiceWorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_no_controller_passes_through() {
        let (container, _rx, network) = setup();
        let request = Request::parse("http://localhost:3000/").unwrap();
        assert!(container.handle_fetch(request.clone()).await.is_none());

        let response = container.fetch(&request).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(network.call_count(), 1);
    }

    #[tokio::test]
    async fn test_register_event_sequence() {
        let (container, mut rx, _network) = setup();
        let id = container.register(&config()).await.unwrap();

        let states: Vec<ServiceWorkerState> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ServiceWorkerEvent::StateChange { worker_id, new_state } if worker_id == id => {
                    Some(new_state)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ServiceWorkerState::Installing,
                ServiceWorkerState::Installed,
                ServiceWorkerState::Activating,
                ServiceWorkerState::Activated,
            ]
        );
        assert_eq!(container.controller().await, Some(id));
    }

    #[tokio::test]
    async fn test_claim_emits_controller_change() {
        let (container, mut rx, _network) = setup();
        let page = container
            .open_client(Url::parse("http://localhost:3000/").unwrap())
            .await;
        assert!(page.controller.is_none());

        let id = container.register(&config()).await.unwrap();
        assert!(drain(&mut rx).contains(&ServiceWorkerEvent::ControllerChange {
            client_id: page.id.clone(),
            worker_id: id,
        }));
        assert_eq!(container.client(&page.id).await.and_then(|c| c.controller), Some(id));

        // Pages opened later start controlled.
        let later = container
            .open_client(Url::parse("http://localhost:3000/settings").unwrap())
            .await;
        assert_eq!(later.controller, Some(id));
    }

    #[tokio::test]
    async fn test_resume_skips_install() {
        let (container, _rx, network) = setup();
        container.register(&config()).await.unwrap();
        let installs = network.call_count();

        let (restarted, _rx2) =
            ServiceWorkerContainer::new(container.store().clone(), network.clone());
        let id = restarted.resume(&config()).await.unwrap();

        assert_eq!(network.call_count(), installs);
        assert_eq!(restarted.controller().await, Some(id));
        assert!(restarted.active_worker().await.is_some_and(|w| w.is_active()));
    }

    #[tokio::test]
    async fn test_resume_without_install_registers() {
        let (container, _rx, network) = setup();
        let id = container.resume(&config()).await.unwrap();
        assert_eq!(container.controller().await, Some(id));
        assert_eq!(network.call_count(), 1);
    }
}
