//! Test doubles for the transport and orchestrator collaborators.
//!
//! Stateless seams use `mockall`; collaborators that tests need to drive or inspect
//! over time (connectivity callbacks, recorded registrations) are hand-written.

use crate::errors::{SessionError, SessionResult};
use crate::orchestrator::{
    ConnectivityListener, ConnectivityMonitor, ProtocolSessionClient, ProvisioningResult,
    ProvisioningService, RegistrationResult, SessionClientFactory, SessionConfig,
};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use async_trait::async_trait;
use mockall::mock;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

mock! {
    pub HttpTransport {}

    #[async_trait]
    impl HttpTransport for HttpTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
    }
}

mock! {
    pub ProvisioningService {}

    #[async_trait]
    impl ProvisioningService for ProvisioningService {
        async fn is_provisioned(&self) -> bool;
        async fn provision(&self) -> ProvisioningResult;
        async fn load_session_configuration(&self) -> Option<SessionConfig>;
    }
}

/// Connectivity monitor whose callbacks are fired by the test.
#[derive(Default)]
pub struct StubConnectivity {
    listener: Mutex<Option<Arc<dyn ConnectivityListener>>>,
    start_error: Mutex<Option<SessionError>>,
    starts: AtomicU32,
    stops: AtomicU32,
    reconnects: AtomicU32,
}

impl StubConnectivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start()` fail with `error`.
    pub fn fail_start_with(&self, error: SessionError) {
        *self.start_error.lock() = Some(error);
    }

    pub fn connect(&self) {
        if let Some(listener) = self.listener() {
            if listener.on_connecting() {
                listener.on_connected();
            }
        }
    }

    pub fn disconnect(&self) {
        if let Some(listener) = self.listener() {
            listener.on_disconnected();
        }
    }

    pub fn reconnect_failed(&self) {
        if let Some(listener) = self.listener() {
            listener.on_reconnect_failed();
        }
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn listener(&self) -> Option<Arc<dyn ConnectivityListener>> {
        self.listener.lock().clone()
    }
}

#[async_trait]
impl ConnectivityMonitor for StubConnectivity {
    async fn start(&self) -> SessionResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        match self.start_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn force_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn set_listener(&self, listener: Arc<dyn ConnectivityListener>) {
        *self.listener.lock() = Some(listener);
    }
}

/// Session client with scripted results that records every registration.
pub struct FakeSessionClient {
    connect_result: bool,
    results: Mutex<VecDeque<RegistrationResult>>,
    registrations: Mutex<Vec<(String, String)>>,
    connects: AtomicU32,
    disconnects: AtomicU32,
}

impl FakeSessionClient {
    /// Client that connects and registers successfully.
    pub fn new() -> Self {
        Self {
            connect_result: true,
            results: Mutex::new(VecDeque::new()),
            registrations: Mutex::new(Vec::new()),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
        }
    }

    pub fn with_connect_result(mut self, connected: bool) -> Self {
        self.connect_result = connected;
        self
    }

    /// Queue results for successive `register` calls; once drained, registration succeeds.
    pub fn with_results(self, results: impl IntoIterator<Item = RegistrationResult>) -> Self {
        self.results.lock().extend(results);
        self
    }

    /// `(identity, device_id)` of every `register` call.
    pub fn registrations(&self) -> Vec<(String, String)> {
        self.registrations.lock().clone()
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl Default for FakeSessionClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolSessionClient for FakeSessionClient {
    async fn connect(&self) -> bool {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connect_result
    }

    async fn register(&self, identity: &str, device_id: &str) -> RegistrationResult {
        self.registrations
            .lock()
            .push((identity.to_string(), device_id.to_string()));
        self.results
            .lock()
            .pop_front()
            .unwrap_or_else(RegistrationResult::success)
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory that always hands out the same client.
pub struct SharedClientFactory {
    client: Arc<FakeSessionClient>,
}

impl SharedClientFactory {
    pub fn new(client: Arc<FakeSessionClient>) -> Self {
        Self { client }
    }
}

impl SessionClientFactory for SharedClientFactory {
    fn create(&self, _config: &SessionConfig) -> Arc<dyn ProtocolSessionClient> {
        Arc::clone(&self.client) as Arc<dyn ProtocolSessionClient>
    }
}
