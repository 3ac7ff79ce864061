//! Static transition table.

use super::types::{SessionEvent, SessionState};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Level};

/// Predicate consulted before a transition is applied.
pub type Guard = Arc<dyn Fn() -> bool + Send + Sync>;

/// Action run after the state has been committed, with `(from, to)`.
pub type SideEffect = Arc<dyn Fn(SessionState, SessionState) + Send + Sync>;

/// Target state plus guard and side effect for one `(state, event)` pair.
#[derive(Clone)]
pub struct TransitionRule {
    pub target: SessionState,
    pub guard: Guard,
    pub side_effect: SideEffect,
}

impl TransitionRule {
    /// Unconditional rule with no side effect.
    pub fn new(target: SessionState) -> Self {
        Self {
            target,
            guard: Arc::new(|| true),
            side_effect: Arc::new(|_, _| {}),
        }
    }

    pub fn with_guard(mut self, guard: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.guard = Arc::new(guard);
        self
    }

    pub fn with_side_effect(
        mut self,
        side_effect: impl Fn(SessionState, SessionState) + Send + Sync + 'static,
    ) -> Self {
        self.side_effect = Arc::new(side_effect);
        self
    }
}

impl std::fmt::Debug for TransitionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionRule")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Rules keyed by `(from, event)`. A missing key means the transition is illegal.
#[derive(Clone, Debug, Default)]
pub struct TransitionTable {
    rules: HashMap<(SessionState, SessionEvent), TransitionRule>,
}

static STANDARD: Lazy<Arc<TransitionTable>> = Lazy::new(|| Arc::new(build_standard()));

impl TransitionTable {
    /// Table with no rules.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The shared session lifecycle table.
    pub fn standard() -> Arc<TransitionTable> {
        Arc::clone(&STANDARD)
    }

    /// Insert or replace a rule.
    pub fn with_rule(
        mut self,
        from: SessionState,
        event: SessionEvent,
        rule: TransitionRule,
    ) -> Self {
        self.rules.insert((from, event), rule);
        self
    }

    pub fn get(&self, from: SessionState, event: SessionEvent) -> Option<&TransitionRule> {
        self.rules.get(&(from, event))
    }

    pub fn contains(&self, from: SessionState, event: SessionEvent) -> bool {
        self.rules.contains_key(&(from, event))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn logged(target: SessionState, level: Level, message: &'static str) -> TransitionRule {
    TransitionRule::new(target).with_side_effect(move |from, to| {
        if level == Level::ERROR {
            error!(from = %from, to = %to, "{}", message);
        } else if level == Level::WARN {
            warn!(from = %from, to = %to, "{}", message);
        } else if level == Level::INFO {
            info!(from = %from, to = %to, "{}", message);
        } else {
            debug!(from = %from, to = %to, "{}", message);
        }
    })
}

fn build_standard() -> TransitionTable {
    use SessionEvent as E;
    use SessionState as S;

    let rules = [
        (
            S::Uninitialized,
            E::Initialize,
            S::Initializing,
            Level::DEBUG,
            "Starting initialization",
        ),
        (
            S::Initializing,
            E::InitializationComplete,
            S::Disconnected,
            Level::DEBUG,
            "Initialization complete",
        ),
        (
            S::Initializing,
            E::InitializationFailed,
            S::Error,
            Level::ERROR,
            "Initialization failed",
        ),
        (
            S::Disconnected,
            E::Connect,
            S::Connecting,
            Level::DEBUG,
            "Starting connection",
        ),
        (
            S::Disconnected,
            E::Shutdown,
            S::ShuttingDown,
            Level::DEBUG,
            "Shutting down while disconnected",
        ),
        (
            S::Connecting,
            E::ConnectionEstablished,
            S::Connected,
            Level::DEBUG,
            "Connection established",
        ),
        (
            S::Connecting,
            E::ConnectionFailed,
            S::Disconnected,
            Level::WARN,
            "Connection failed",
        ),
        (
            S::Connecting,
            E::Timeout,
            S::Disconnected,
            Level::WARN,
            "Connection attempt timed out",
        ),
        (
            S::Connected,
            E::StartRegistration,
            S::Registering,
            Level::DEBUG,
            "Starting registration",
        ),
        (
            S::Connected,
            E::Disconnect,
            S::Disconnecting,
            Level::DEBUG,
            "Disconnecting",
        ),
        (
            S::Connected,
            E::ConnectionLost,
            S::Reconnecting,
            Level::WARN,
            "Connection lost, reconnecting",
        ),
        (
            S::Registering,
            E::RegistrationComplete,
            S::Registered,
            Level::INFO,
            "Registration successful",
        ),
        (
            S::Registering,
            E::RegistrationFailed,
            S::Connected,
            Level::WARN,
            "Registration failed",
        ),
        (
            S::Registering,
            E::AuthenticationRequired,
            S::Authenticating,
            Level::DEBUG,
            "Authentication required",
        ),
        (
            S::Authenticating,
            E::AuthenticationSuccess,
            S::Registering,
            Level::DEBUG,
            "Authenticated, resuming registration",
        ),
        (
            S::Authenticating,
            E::AuthenticationFailed,
            S::Connected,
            Level::ERROR,
            "Authentication failed",
        ),
        (
            S::Registered,
            E::Deregister,
            S::Deregistering,
            Level::DEBUG,
            "Starting deregistration",
        ),
        (
            S::Registered,
            E::ConnectionLost,
            S::Reconnecting,
            Level::WARN,
            "Connection lost while registered",
        ),
        (
            S::Registered,
            E::RegistrationExpired,
            S::Registering,
            Level::DEBUG,
            "Registration expired, re-registering",
        ),
        (
            S::Registered,
            E::Shutdown,
            S::ShuttingDown,
            Level::DEBUG,
            "Shutting down while registered",
        ),
        (
            S::Deregistering,
            E::DeregistrationComplete,
            S::Connected,
            Level::DEBUG,
            "Deregistration complete",
        ),
        (
            S::Reconnecting,
            E::ConnectionEstablished,
            S::Registering,
            Level::DEBUG,
            "Reconnected, re-registering",
        ),
        (
            S::Reconnecting,
            E::ReconnectFailed,
            S::Disconnected,
            Level::ERROR,
            "Reconnection failed",
        ),
        (
            S::Disconnecting,
            E::DisconnectionComplete,
            S::Disconnected,
            Level::DEBUG,
            "Disconnection complete",
        ),
        (
            S::Error,
            E::Reset,
            S::Uninitialized,
            Level::DEBUG,
            "Resetting from error state",
        ),
        (
            S::Error,
            E::Retry,
            S::Initializing,
            Level::DEBUG,
            "Retrying initialization",
        ),
        (
            S::ShuttingDown,
            E::ShutdownComplete,
            S::Terminated,
            Level::INFO,
            "Shutdown complete",
        ),
    ];

    rules
        .into_iter()
        .fold(TransitionTable::empty(), |table, (from, event, to, level, message)| {
            table.with_rule(from, event, logged(to, level, message))
        })
}
