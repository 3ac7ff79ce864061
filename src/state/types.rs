//! Lifecycle states, events and transition results.

use std::fmt;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Disconnected,
    Connecting,
    Connected,
    Registering,
    Authenticating,
    Registered,
    Deregistering,
    Reconnecting,
    Disconnecting,
    ShuttingDown,
    Terminated,
    Error,
}

impl SessionState {
    /// Every state, in declaration order.
    pub const ALL: [SessionState; 14] = [
        SessionState::Uninitialized,
        SessionState::Initializing,
        SessionState::Disconnected,
        SessionState::Connecting,
        SessionState::Connected,
        SessionState::Registering,
        SessionState::Authenticating,
        SessionState::Registered,
        SessionState::Deregistering,
        SessionState::Reconnecting,
        SessionState::Disconnecting,
        SessionState::ShuttingDown,
        SessionState::Terminated,
        SessionState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "Uninitialized",
            SessionState::Initializing => "Initializing",
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Registering => "Registering",
            SessionState::Authenticating => "Authenticating",
            SessionState::Registered => "Registered",
            SessionState::Deregistering => "Deregistering",
            SessionState::Reconnecting => "Reconnecting",
            SessionState::Disconnecting => "Disconnecting",
            SessionState::ShuttingDown => "ShuttingDown",
            SessionState::Terminated => "Terminated",
            SessionState::Error => "Error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input that may move the session to another state. Events carry no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    Initialize,
    InitializationComplete,
    InitializationFailed,
    Connect,
    ConnectionEstablished,
    ConnectionFailed,
    ConnectionLost,
    Disconnect,
    DisconnectionComplete,
    StartRegistration,
    RegistrationComplete,
    RegistrationFailed,
    RegistrationExpired,
    AuthenticationRequired,
    AuthenticationSuccess,
    AuthenticationFailed,
    Deregister,
    DeregistrationComplete,
    ReconnectFailed,
    Timeout,
    Shutdown,
    ShutdownComplete,
    Reset,
    Retry,
}

impl SessionEvent {
    /// Every event, in declaration order.
    pub const ALL: [SessionEvent; 24] = [
        SessionEvent::Initialize,
        SessionEvent::InitializationComplete,
        SessionEvent::InitializationFailed,
        SessionEvent::Connect,
        SessionEvent::ConnectionEstablished,
        SessionEvent::ConnectionFailed,
        SessionEvent::ConnectionLost,
        SessionEvent::Disconnect,
        SessionEvent::DisconnectionComplete,
        SessionEvent::StartRegistration,
        SessionEvent::RegistrationComplete,
        SessionEvent::RegistrationFailed,
        SessionEvent::RegistrationExpired,
        SessionEvent::AuthenticationRequired,
        SessionEvent::AuthenticationSuccess,
        SessionEvent::AuthenticationFailed,
        SessionEvent::Deregister,
        SessionEvent::DeregistrationComplete,
        SessionEvent::ReconnectFailed,
        SessionEvent::Timeout,
        SessionEvent::Shutdown,
        SessionEvent::ShutdownComplete,
        SessionEvent::Reset,
        SessionEvent::Retry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEvent::Initialize => "Initialize",
            SessionEvent::InitializationComplete => "InitializationComplete",
            SessionEvent::InitializationFailed => "InitializationFailed",
            SessionEvent::Connect => "Connect",
            SessionEvent::ConnectionEstablished => "ConnectionEstablished",
            SessionEvent::ConnectionFailed => "ConnectionFailed",
            SessionEvent::ConnectionLost => "ConnectionLost",
            SessionEvent::Disconnect => "Disconnect",
            SessionEvent::DisconnectionComplete => "DisconnectionComplete",
            SessionEvent::StartRegistration => "StartRegistration",
            SessionEvent::RegistrationComplete => "RegistrationComplete",
            SessionEvent::RegistrationFailed => "RegistrationFailed",
            SessionEvent::RegistrationExpired => "RegistrationExpired",
            SessionEvent::AuthenticationRequired => "AuthenticationRequired",
            SessionEvent::AuthenticationSuccess => "AuthenticationSuccess",
            SessionEvent::AuthenticationFailed => "AuthenticationFailed",
            SessionEvent::Deregister => "Deregister",
            SessionEvent::DeregistrationComplete => "DeregistrationComplete",
            SessionEvent::ReconnectFailed => "ReconnectFailed",
            SessionEvent::Timeout => "Timeout",
            SessionEvent::Shutdown => "Shutdown",
            SessionEvent::ShutdownComplete => "ShutdownComplete",
            SessionEvent::Reset => "Reset",
            SessionEvent::Retry => "Retry",
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`StateMachine::process_event`](super::StateMachine::process_event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// The transition was applied.
    Success {
        from: SessionState,
        to: SessionState,
        event: SessionEvent,
    },
    /// No rule exists for this event in the current state.
    InvalidTransition {
        current: SessionState,
        event: SessionEvent,
    },
    /// A rule exists but its guard refused.
    GuardFailed {
        current: SessionState,
        event: SessionEvent,
    },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success { .. })
    }
}

/// One applied transition, kept in the machine's bounded history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransitionRecord {
    pub from: SessionState,
    pub to: SessionState,
    pub event: SessionEvent,
    /// Wall-clock time of the transition, milliseconds since the Unix epoch
    pub timestamp_millis: u64,
}
