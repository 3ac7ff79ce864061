//! Lifecycle orchestration: connectivity in, registration workflow out.

use super::collaborators::{
    ConnectivityListener, ConnectivityMonitor, ProtocolSessionClient, ProvisioningService,
    SessionClientFactory, SessionRegistry,
};
use super::notifications::{NotificationSink, SessionNotification};
use crate::config::EngineConfig;
use crate::errors::SessionResult;
use crate::observability::{failure_reasons, metric_names, MetricsCollector};
use crate::resilience::{RateLimiter, REGISTER_ENDPOINT};
use crate::state::{
    SessionEvent, SessionState, StateChangeListener, StateMachine, TransitionResult,
};
use crate::transport::ResilientTransport;
use futures::FutureExt;
use parking_lot::RwLock;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// External services the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub connectivity: Arc<dyn ConnectivityMonitor>,
    pub provisioning: Arc<dyn ProvisioningService>,
    pub client_factory: Arc<dyn SessionClientFactory>,
    pub registry: Arc<dyn SessionRegistry>,
    pub notifications: Arc<dyn NotificationSink>,
    pub metrics: Arc<dyn MetricsCollector>,
}

/// Coordinates connectivity, provisioning and registration around one [`StateMachine`].
///
/// Reactions to state changes run as tokio tasks; the public operations are async and
/// complete their own steps before returning.
pub struct SessionOrchestrator {
    config: EngineConfig,
    machine: StateMachine,
    collaborators: Collaborators,
    rate_limiter: Arc<RateLimiter>,
    transport: Arc<ResilientTransport>,
    initialized: AtomicBool,
    /// Set by `shutdown()`; reactions still in flight stop at their next check
    shutting_down: AtomicBool,
    phone_number: RwLock<Option<String>>,
    /// Consecutive failed registrations since the last success or fresh connection
    registration_failures: AtomicU32,
}

impl SessionOrchestrator {
    /// Build an orchestrator and wire it to the state machine and connectivity monitor.
    pub fn new(
        config: EngineConfig,
        collaborators: Collaborators,
        rate_limiter: Arc<RateLimiter>,
        transport: Arc<ResilientTransport>,
    ) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            config,
            machine: StateMachine::new(),
            collaborators,
            rate_limiter,
            transport,
            initialized: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            phone_number: RwLock::new(None),
            registration_failures: AtomicU32::new(0),
        });

        let weak = Arc::downgrade(&orchestrator);
        orchestrator.machine.add_listener(Arc::new(LifecycleListener {
            orchestrator: weak.clone(),
        }));
        orchestrator
            .collaborators
            .connectivity
            .set_listener(Arc::new(ConnectivityBridge { orchestrator: weak }));

        orchestrator
    }

    /// Start connectivity monitoring and, with `auto_reconnect`, begin connecting.
    ///
    /// A second call while initialized is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns the connectivity monitor's error after moving the machine to `Error`.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> SessionResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already initialized");
            return Ok(());
        }

        info!("Initializing session orchestrator");
        self.machine.process_event(SessionEvent::Initialize);

        if let Err(e) = self.collaborators.connectivity.start().await {
            error!(error = %e, "Initialization failed");
            self.machine.process_event(SessionEvent::InitializationFailed);
            return Err(e);
        }

        self.machine.process_event(SessionEvent::InitializationComplete);
        if self.config.auto_reconnect {
            self.machine.process_event(SessionEvent::Connect);
        }
        Ok(())
    }

    /// Bring the machine to `Terminated` and release the connectivity monitor and the
    /// registered client.
    ///
    /// From states without a direct `Shutdown` rule the machine is first walked down to
    /// `Disconnected` through legal events. Registration work still in flight is dropped.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Shutting down session orchestrator");
        self.shutting_down.store(true, Ordering::SeqCst);

        self.wind_down();
        if let TransitionResult::InvalidTransition { current, .. } =
            self.machine.process_event(SessionEvent::Shutdown)
        {
            warn!(state = %current, "Shutdown not reachable from current state");
        }
        self.collaborators.connectivity.stop().await;

        if let Some(client) = self.collaborators.registry.clear() {
            client.disconnect().await;
        }

        self.machine.process_event(SessionEvent::ShutdownComplete);
        self.initialized.store(false, Ordering::SeqCst);
    }

    pub async fn force_reconnect(&self) {
        debug!("Force reconnecting");
        self.collaborators.connectivity.force_reconnect().await;
    }

    /// Tear down an active registration, wait `reregister_delay`, and register again.
    #[instrument(skip(self))]
    pub async fn force_reregister(&self) {
        self.registration_failures.store(0, Ordering::SeqCst);

        if self.machine.is_in_state(&[SessionState::Registered]) {
            if self.machine.process_event(SessionEvent::Deregister).is_success() {
                if let Some(client) = self.collaborators.registry.clear() {
                    client.disconnect().await;
                }
                self.machine.process_event(SessionEvent::DeregistrationComplete);
            }
            tokio::time::sleep(self.config.reregister_delay).await;
        }

        self.start_registration().await;
    }

    pub fn current_state(&self) -> SessionState {
        self.machine.current_state()
    }

    pub fn is_registered(&self) -> bool {
        self.machine.is_in_state(&[SessionState::Registered])
    }

    /// True while a signalling connection is up, registered or not.
    pub fn is_connected(&self) -> bool {
        self.machine.is_in_state(&[
            SessionState::Connected,
            SessionState::Registering,
            SessionState::Registered,
        ])
    }

    /// Phone number reported by the last successful provisioning.
    pub fn phone_number(&self) -> Option<String> {
        self.phone_number.read().clone()
    }

    /// The lifecycle machine, for inspection and extra listeners.
    pub fn state_machine(&self) -> &StateMachine {
        &self.machine
    }

    fn on_state_changed(self: Arc<Self>, to: SessionState, event: SessionEvent) {
        match to {
            SessionState::Disconnected => {
                self.publish(false, None);
                spawn_guarded("release-client", async move { self.release_client().await });
            }
            SessionState::Connected => {
                spawn_guarded("connected", async move { self.handle_connected(event).await });
            }
            SessionState::Registering
                if matches!(
                    event,
                    SessionEvent::ConnectionEstablished | SessionEvent::RegistrationExpired
                ) =>
            {
                // Entered without StartRegistration, so nobody else owns the workflow.
                if event == SessionEvent::ConnectionEstablished {
                    self.registration_failures.store(0, Ordering::SeqCst);
                }
                spawn_guarded("re-register", async move { self.perform_registration().await });
            }
            SessionState::Registered => {
                self.registration_failures.store(0, Ordering::SeqCst);
                let phone_number = self.phone_number();
                info!(phone_number = ?phone_number, "Session registered");
                self.publish(true, phone_number);
            }
            SessionState::Error => {
                error!("Session entered error state");
            }
            _ => {}
        }
    }

    async fn handle_connected(&self, event: SessionEvent) {
        if self.is_shutting_down() {
            return;
        }

        match event {
            SessionEvent::ConnectionEstablished => {
                self.registration_failures.store(0, Ordering::SeqCst);
            }
            SessionEvent::RegistrationFailed | SessionEvent::AuthenticationFailed => {
                let failures = self.registration_failures.fetch_add(1, Ordering::SeqCst) + 1;
                let retry = &self.config.transport.retry;
                if !retry.has_attempts_left(failures) {
                    warn!(
                        failures,
                        "Registration keeps failing, waiting for reconnect or re-registration"
                    );
                    return;
                }

                let delay = retry.backoff(failures);
                debug!(failures, delay_ms = delay.as_millis() as u64, "Retrying registration");
                tokio::time::sleep(delay).await;
                if self.is_shutting_down()
                    || !self.machine.is_in_state(&[SessionState::Connected])
                {
                    return;
                }
            }
            // The caller that deregistered decides when to register again.
            SessionEvent::DeregistrationComplete => return,
            _ => {}
        }

        if self.collaborators.provisioning.is_provisioned().await {
            self.start_registration().await;
            return;
        }

        debug!("Not provisioned, starting provisioning");
        let metrics = &self.collaborators.metrics;
        metrics.increment_counter(metric_names::PROVISIONING_ATTEMPTS, 1, &[]);
        let result = self.collaborators.provisioning.provision().await;
        if result.is_successful {
            metrics.increment_counter(metric_names::PROVISIONING_SUCCESS, 1, &[]);
            *self.phone_number.write() = result.phone_number;
            self.start_registration().await;
        } else {
            metrics.increment_counter(metric_names::PROVISIONING_FAILURES, 1, &[]);
            error!(error = ?result.error_message, "Provisioning failed");
            self.machine.process_event(SessionEvent::RegistrationFailed);
        }
    }

    /// Run the workflow only if this call moved the machine into `Registering`.
    async fn start_registration(&self) {
        if self.is_shutting_down() {
            debug!("Shutting down, registration not started");
            return;
        }
        match self.machine.process_event(SessionEvent::StartRegistration) {
            TransitionResult::Success { .. } => self.perform_registration().await,
            other => debug!(result = ?other, "Registration not started"),
        }
    }

    #[instrument(skip(self), fields(endpoint = REGISTER_ENDPOINT))]
    async fn perform_registration(&self) {
        if self.is_shutting_down() {
            return;
        }
        self.collaborators
            .metrics
            .increment_counter(metric_names::REGISTRATION_ATTEMPTS, 1, &[]);

        let Some(session_config) = self
            .collaborators
            .provisioning
            .load_session_configuration()
            .await
        else {
            error!("Failed to load session configuration");
            self.record_failure(failure_reasons::MISSING_CONFIG);
            self.machine.process_event(SessionEvent::RegistrationFailed);
            return;
        };

        let client = self.collaborators.client_factory.create(&session_config);
        debug!(
            host = %session_config.server_host,
            port = session_config.server_port,
            "Connecting session client"
        );
        if !client.connect().await {
            error!(host = %session_config.server_host, "Failed to connect session client");
            self.record_failure(failure_reasons::CONNECT_FAILED);
            self.machine.process_event(SessionEvent::RegistrationFailed);
            return;
        }

        let admission = self.rate_limiter.try_acquire_one(REGISTER_ENDPOINT);
        if !admission.is_allowed {
            warn!(
                reason = ?admission.reason,
                retry_after_ms = admission.retry_after_ms,
                "Registration rate limited"
            );
            client.disconnect().await;
            self.record_failure(failure_reasons::RATE_LIMITED);
            self.machine.process_event(SessionEvent::RegistrationFailed);
            return;
        }

        let identity = self
            .phone_number()
            .unwrap_or_else(|| session_config.user_phone_number.clone());
        let device_id = self.config.device_id.as_str();

        debug!(identity = %identity, "Sending registration");
        let started = Instant::now();
        let result = self
            .transport
            .execute_operation(REGISTER_ENDPOINT, || {
                let client = Arc::clone(&client);
                let identity = identity.clone();
                let device_id = device_id.to_string();
                async move {
                    client
                        .register(&identity, &device_id)
                        .await
                        .to_transport_outcome()
                }
            })
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.collaborators.metrics.record_histogram(
            metric_names::REGISTRATION_DURATION_MS,
            elapsed_ms as f64,
            &[],
        );
        if let Ok(status) = u16::try_from(result.status_code) {
            self.rate_limiter
                .record_server_response(REGISTER_ENDPOINT, status, elapsed_ms);
        }

        if !result.is_successful {
            error!(
                status = result.status_code,
                request_id = %result.request_id,
                error = ?result.error_message,
                "Registration failed"
            );
            client.disconnect().await;
            self.record_failure(failure_reasons::REJECTED);
            self.machine.process_event(SessionEvent::RegistrationFailed);
            return;
        }

        if self.is_shutting_down() {
            debug!("Shutting down, discarding session client");
            client.disconnect().await;
            return;
        }

        if self
            .machine
            .process_event(SessionEvent::RegistrationComplete)
            .is_success()
        {
            info!(request_id = %result.request_id, "Registration successful");
            self.collaborators
                .metrics
                .increment_counter(metric_names::REGISTRATION_SUCCESS, 1, &[]);
            if let Some(previous) = self.collaborators.registry.clear() {
                previous.disconnect().await;
            }
            self.collaborators.registry.register_session_client(client);
        } else {
            debug!("Lifecycle moved on during registration, discarding session client");
            client.disconnect().await;
        }
    }

    /// Feed the events that lead from the current state to one that accepts `Shutdown`.
    fn wind_down(&self) {
        for _ in 0..SessionState::ALL.len() {
            let event = match self.machine.current_state() {
                SessionState::Connecting => SessionEvent::ConnectionFailed,
                SessionState::Connected => SessionEvent::Disconnect,
                SessionState::Disconnecting => SessionEvent::DisconnectionComplete,
                SessionState::Registering => SessionEvent::RegistrationFailed,
                SessionState::Authenticating => SessionEvent::AuthenticationFailed,
                SessionState::Deregistering => SessionEvent::DeregistrationComplete,
                SessionState::Reconnecting => SessionEvent::ReconnectFailed,
                _ => return,
            };
            self.machine.process_event(event);
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn record_failure(&self, reason: &str) {
        self.collaborators.metrics.increment_counter(
            metric_names::REGISTRATION_FAILURES,
            1,
            &[("reason", reason)],
        );
    }

    /// Disconnect the registered client once the session has dropped.
    async fn release_client(&self) {
        if let Some(client) = self.collaborators.registry.clear() {
            debug!("Releasing session client of the lost session");
            client.disconnect().await;
        }
    }

    fn publish(&self, registered: bool, phone_number: Option<String>) {
        self.collaborators
            .notifications
            .publish(SessionNotification::RegistrationStateChanged {
                registered,
                phone_number,
            });
    }

    fn feed(&self, event: SessionEvent) {
        self.machine.process_event(event);
    }
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("state", &self.current_state())
            .field("initialized", &self.initialized.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

struct LifecycleListener {
    orchestrator: Weak<SessionOrchestrator>,
}

impl StateChangeListener for LifecycleListener {
    fn on_state_changed(&self, from: SessionState, to: SessionState, event: SessionEvent) {
        debug!(from = %from, to = %to, event = %event, "Lifecycle state changed");
        if let Some(orchestrator) = self.orchestrator.upgrade() {
            orchestrator.on_state_changed(to, event);
        }
    }
}

struct ConnectivityBridge {
    orchestrator: Weak<SessionOrchestrator>,
}

impl ConnectivityBridge {
    fn feed(&self, event: SessionEvent) {
        if let Some(orchestrator) = self.orchestrator.upgrade() {
            orchestrator.feed(event);
        }
    }
}

impl ConnectivityListener for ConnectivityBridge {
    fn on_connecting(&self) -> bool {
        debug!("Connection attempt starting");
        true
    }

    fn on_connected(&self) {
        info!("Network connected");
        self.feed(SessionEvent::ConnectionEstablished);
    }

    fn on_disconnected(&self) {
        warn!("Network disconnected");
        self.feed(SessionEvent::ConnectionLost);
    }

    fn on_reconnect_failed(&self) {
        error!("Reconnection failed");
        self.feed(SessionEvent::ReconnectFailed);
    }
}

/// Spawn `future` on the current runtime, logging instead of propagating a panic.
fn spawn_guarded<F>(task: &'static str, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!(task, "No tokio runtime available, skipping orchestrator task");
        return;
    };

    handle.spawn(async move {
        if AssertUnwindSafe(future).catch_unwind().await.is_err() {
            error!(task, "Orchestrator task panicked");
        }
    });
}
