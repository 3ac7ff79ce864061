//! Session orchestration and the collaborator interfaces it depends on.

mod collaborators;
mod notifications;
#[allow(clippy::module_inception)]
mod orchestrator;

pub use collaborators::{
    ConnectivityListener, ConnectivityMonitor, InMemorySessionRegistry, ProtocolSessionClient,
    ProvisioningResult, ProvisioningService, RegistrationErrorCode, RegistrationResult,
    SessionClientFactory, SessionConfig, SessionRegistry,
};
pub use notifications::{BroadcastNotifier, NotificationSink, SessionNotification};
pub use orchestrator::{Collaborators, SessionOrchestrator};
