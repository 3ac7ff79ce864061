//! Interfaces the orchestrator drives, plus the value types that cross them.

use crate::errors::SessionResult;
use crate::transport::{HttpResponse, TransportError};
use async_trait::async_trait;
use parking_lot::RwLock;
use secrecy::SecretString;
use std::fmt;
use std::sync::Arc;

/// Network connectivity source.
#[async_trait]
pub trait ConnectivityMonitor: Send + Sync {
    /// Begin monitoring. An error aborts initialization.
    async fn start(&self) -> SessionResult<()>;

    async fn stop(&self);

    /// Drop the current link and connect again.
    async fn force_reconnect(&self);

    /// Replace the callback target for connectivity changes.
    fn set_listener(&self, listener: Arc<dyn ConnectivityListener>);
}

/// Callbacks from a [`ConnectivityMonitor`].
pub trait ConnectivityListener: Send + Sync {
    /// Asked before a connection attempt; returning false vetoes it.
    fn on_connecting(&self) -> bool;
    fn on_connected(&self);
    fn on_disconnected(&self);
    fn on_reconnect_failed(&self);
}

/// Carrier provisioning.
#[async_trait]
pub trait ProvisioningService: Send + Sync {
    async fn is_provisioned(&self) -> bool;

    async fn provision(&self) -> ProvisioningResult;

    /// Session parameters from the stored provisioning document, if any.
    async fn load_session_configuration(&self) -> Option<SessionConfig>;
}

/// Signalling client for one registration.
#[async_trait]
pub trait ProtocolSessionClient: Send + Sync {
    /// Open the signalling connection. Returns false on failure.
    async fn connect(&self) -> bool;

    async fn register(&self, identity: &str, device_id: &str) -> RegistrationResult;

    async fn disconnect(&self);
}

/// Builds a [`ProtocolSessionClient`] for a session configuration.
pub trait SessionClientFactory: Send + Sync {
    fn create(&self, config: &SessionConfig) -> Arc<dyn ProtocolSessionClient>;
}

/// Holds the client of the active registration for other subsystems.
pub trait SessionRegistry: Send + Sync {
    fn register_session_client(&self, client: Arc<dyn ProtocolSessionClient>);

    fn current(&self) -> Option<Arc<dyn ProtocolSessionClient>>;

    /// Remove and return the held client.
    fn clear(&self) -> Option<Arc<dyn ProtocolSessionClient>>;
}

/// Registry backed by a single slot.
#[derive(Default)]
pub struct InMemorySessionRegistry {
    slot: RwLock<Option<Arc<dyn ProtocolSessionClient>>>,
}

impl InMemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionRegistry for InMemorySessionRegistry {
    fn register_session_client(&self, client: Arc<dyn ProtocolSessionClient>) {
        *self.slot.write() = Some(client);
    }

    fn current(&self) -> Option<Arc<dyn ProtocolSessionClient>> {
        self.slot.read().clone()
    }

    fn clear(&self) -> Option<Arc<dyn ProtocolSessionClient>> {
        self.slot.write().take()
    }
}

impl fmt::Debug for InMemorySessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySessionRegistry")
            .field("occupied", &self.slot.read().is_some())
            .finish()
    }
}

/// Outcome of a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProvisioningResult {
    pub is_successful: bool,
    /// MSISDN assigned by the carrier, when known
    pub phone_number: Option<String>,
    pub error_message: Option<String>,
}

impl ProvisioningResult {
    pub fn success(phone_number: Option<String>) -> Self {
        Self {
            is_successful: true,
            phone_number,
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_successful: false,
            phone_number: None,
            error_message: Some(message.into()),
        }
    }
}

/// Signalling parameters produced by provisioning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server_host: String,
    pub server_port: u16,
    pub domain: String,
    /// Identity used when provisioning did not report a phone number
    pub user_phone_number: String,
    pub password: SecretString,
    pub use_tls: bool,
}

impl SessionConfig {
    /// Config for `host` with the TLS signalling port and an empty password.
    pub fn new(
        server_host: impl Into<String>,
        domain: impl Into<String>,
        user_phone_number: impl Into<String>,
    ) -> Self {
        Self {
            server_host: server_host.into(),
            server_port: 5061,
            domain: domain.into(),
            user_phone_number: user_phone_number.into(),
            password: SecretString::new(String::new()),
            use_tls: true,
        }
    }
}

/// Why a registration attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationErrorCode {
    #[default]
    None,
    ConnectionError,
    Timeout,
    NotRegistered,
    AuthFailed,
    Forbidden,
    ServerError,
    Unknown,
}

impl RegistrationErrorCode {
    /// Matching SIP/HTTP status, for codes that have one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RegistrationErrorCode::None => Some(200),
            RegistrationErrorCode::Timeout => Some(408),
            RegistrationErrorCode::NotRegistered => Some(404),
            RegistrationErrorCode::AuthFailed => Some(401),
            RegistrationErrorCode::Forbidden => Some(403),
            RegistrationErrorCode::ServerError => Some(500),
            RegistrationErrorCode::ConnectionError | RegistrationErrorCode::Unknown => None,
        }
    }
}

/// Outcome of a REGISTER exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrationResult {
    pub is_successful: bool,
    pub error_code: RegistrationErrorCode,
    pub error_message: Option<String>,
}

impl RegistrationResult {
    pub fn success() -> Self {
        Self {
            is_successful: true,
            ..Default::default()
        }
    }

    pub fn failure(error_code: RegistrationErrorCode, message: impl Into<String>) -> Self {
        Self {
            is_successful: false,
            error_code,
            error_message: Some(message.into()),
        }
    }

    /// Express the result in transport terms so the retry and breaker policy can judge it.
    ///
    /// A failure reported with `RegistrationErrorCode::None` is treated as unknown.
    pub fn to_transport_outcome(&self) -> Result<HttpResponse, TransportError> {
        let message = || {
            self.error_message
                .clone()
                .unwrap_or_else(|| format!("{:?}", self.error_code))
        };

        if self.is_successful {
            return Ok(HttpResponse::with_status(200));
        }
        match self.error_code {
            RegistrationErrorCode::ConnectionError => Err(TransportError::Connection(message())),
            RegistrationErrorCode::None | RegistrationErrorCode::Unknown => {
                Err(TransportError::Request(message()))
            }
            code => Ok(HttpResponse::with_status(code.status_code().unwrap_or(500))),
        }
    }
}
