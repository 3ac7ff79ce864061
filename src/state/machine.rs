//! Session lifecycle state machine.

use super::table::TransitionTable;
use super::types::{SessionEvent, SessionState, StateTransitionRecord, TransitionResult};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Number of transitions retained in the history ring.
pub const HISTORY_CAPACITY: usize = 100;

/// Receives committed transitions.
///
/// Called from the notification task, never while the machine's lock is held, so an
/// implementation may call back into [`StateMachine::process_event`].
pub trait StateChangeListener: Send + Sync {
    fn on_state_changed(&self, from: SessionState, to: SessionState, event: SessionEvent);
}

impl<F> StateChangeListener for F
where
    F: Fn(SessionState, SessionState, SessionEvent) + Send + Sync,
{
    fn on_state_changed(&self, from: SessionState, to: SessionState, event: SessionEvent) {
        self(from, to, event)
    }
}

/// Handle returned by [`StateMachine::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy)]
struct StateChange {
    from: SessionState,
    to: SessionState,
    event: SessionEvent,
}

type ListenerList = Arc<RwLock<Vec<(ListenerId, Arc<dyn StateChangeListener>)>>>;

struct MachineState {
    current: SessionState,
    history: VecDeque<StateTransitionRecord>,
}

/// Table-driven lifecycle state machine.
///
/// Lookup, guard, commit, history append and side effect all happen under one lock, so
/// concurrent callers are strictly ordered. Listeners are notified afterwards through a
/// queue drained by a separate tokio task, in commit order.
pub struct StateMachine {
    table: Arc<TransitionTable>,
    state: Mutex<MachineState>,
    listeners: ListenerList,
    next_listener_id: AtomicU64,
    notifier: Mutex<Option<mpsc::UnboundedSender<StateChange>>>,
}

impl StateMachine {
    /// Machine in `Uninitialized` using the standard lifecycle table.
    pub fn new() -> Self {
        Self::with_table(TransitionTable::standard())
    }

    /// Machine in `Uninitialized` using a custom table.
    pub fn with_table(table: Arc<TransitionTable>) -> Self {
        Self {
            table,
            state: Mutex::new(MachineState {
                current: SessionState::Uninitialized,
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
            }),
            listeners: Arc::new(RwLock::new(Vec::new())),
            next_listener_id: AtomicU64::new(1),
            notifier: Mutex::new(None),
        }
    }

    /// Apply `event` to the current state.
    ///
    /// Illegal or guarded-off transitions are reported, never raised. A panicking side
    /// effect is logged; the new state stays committed.
    pub fn process_event(&self, event: SessionEvent) -> TransitionResult {
        let (result, undelivered) = {
            let mut state = self.state.lock();
            let current = state.current;

            let Some(rule) = self.table.get(current, event) else {
                warn!(state = %current, event = %event, "No transition defined");
                return TransitionResult::InvalidTransition { current, event };
            };

            if !(rule.guard)() {
                warn!(
                    state = %current,
                    target = %rule.target,
                    event = %event,
                    "Transition guard failed"
                );
                return TransitionResult::GuardFailed { current, event };
            }

            let to = rule.target;
            state.current = to;
            if state.history.len() == HISTORY_CAPACITY {
                state.history.pop_front();
            }
            state.history.push_back(StateTransitionRecord {
                from: current,
                to,
                event,
                timestamp_millis: now_millis(),
            });

            let side_effect = Arc::clone(&rule.side_effect);
            if catch_unwind(AssertUnwindSafe(|| side_effect(current, to))).is_err() {
                error!(
                    from = %current,
                    to = %to,
                    event = %event,
                    "Transition side effect panicked"
                );
            }

            debug!(from = %current, to = %to, event = %event, "State transition");

            // Enqueued under the lock so listeners observe commit order.
            let change = StateChange { from: current, to, event };
            (
                TransitionResult::Success { from: current, to, event },
                self.enqueue(change).err(),
            )
        };

        if let Some(change) = undelivered {
            notify_all(&self.listeners, change);
        }
        result
    }

    pub fn current_state(&self) -> SessionState {
        self.state.lock().current
    }

    /// True if the current state is any of `states`.
    pub fn is_in_state(&self, states: &[SessionState]) -> bool {
        states.contains(&self.current_state())
    }

    /// True if the table has a rule for `event` in the current state. Guards are not run.
    pub fn can_process_event(&self, event: SessionEvent) -> bool {
        self.table.contains(self.current_state(), event)
    }

    /// Copy of the retained transition history, oldest first.
    pub fn state_history(&self) -> Vec<StateTransitionRecord> {
        self.state.lock().history.iter().copied().collect()
    }

    pub fn add_listener(&self, listener: Arc<dyn StateChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns false if no listener had this id.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Hands the change to the notification task, starting one if needed. Without a
    /// tokio runtime the change is returned for inline delivery.
    fn enqueue(&self, change: StateChange) -> Result<(), StateChange> {
        let mut notifier = self.notifier.lock();

        let change = match notifier.as_ref() {
            Some(sender) => match sender.send(change) {
                Ok(()) => return Ok(()),
                // The task's runtime is gone; start over on the current one.
                Err(mpsc::error::SendError(change)) => change,
            },
            None => change,
        };
        *notifier = None;

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return Err(change);
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        handle.spawn(dispatch(Arc::clone(&self.listeners), receiver));
        let queued = sender.send(change).map_err(|mpsc::error::SendError(c)| c);
        *notifier = Some(sender);
        queued
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("current", &self.current_state())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

async fn dispatch(listeners: ListenerList, mut receiver: mpsc::UnboundedReceiver<StateChange>) {
    while let Some(change) = receiver.recv().await {
        notify_all(&listeners, change);
    }
}

fn notify_all(listeners: &ListenerList, change: StateChange) {
    let snapshot: Vec<_> = listeners
        .read()
        .iter()
        .map(|(_, listener)| Arc::clone(listener))
        .collect();

    for listener in snapshot {
        let delivered = catch_unwind(AssertUnwindSafe(|| {
            listener.on_state_changed(change.from, change.to, change.event)
        }));
        if delivered.is_err() {
            error!(
                from = %change.from,
                to = %change.to,
                event = %change.event,
                "State change listener panicked"
            );
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::table::TransitionRule;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicBool;
    use test_case::test_case;
    use tokio::sync::mpsc::unbounded_channel;

    fn drive(machine: &StateMachine, events: &[SessionEvent]) {
        for event in events {
            assert!(machine.process_event(*event).is_success(), "{event} rejected");
        }
    }

    fn registering() -> StateMachine {
        let machine = StateMachine::new();
        drive(
            &machine,
            &[
                SessionEvent::Initialize,
                SessionEvent::InitializationComplete,
                SessionEvent::Connect,
                SessionEvent::ConnectionEstablished,
                SessionEvent::StartRegistration,
            ],
        );
        machine
    }

    #[test]
    fn test_initial_state() {
        let machine = StateMachine::new();
        assert_eq!(machine.current_state(), SessionState::Uninitialized);
        assert!(machine.state_history().is_empty());
        assert!(machine.can_process_event(SessionEvent::Initialize));
        assert!(!machine.can_process_event(SessionEvent::Connect));
    }

    #[test]
    fn test_registration_complete_twice() {
        let machine = registering();

        assert_eq!(
            machine.process_event(SessionEvent::RegistrationComplete),
            TransitionResult::Success {
                from: SessionState::Registering,
                to: SessionState::Registered,
                event: SessionEvent::RegistrationComplete,
            }
        );
        assert_eq!(
            machine.process_event(SessionEvent::RegistrationComplete),
            TransitionResult::InvalidTransition {
                current: SessionState::Registered,
                event: SessionEvent::RegistrationComplete,
            }
        );
        assert_eq!(machine.current_state(), SessionState::Registered);
    }

    #[test_case(SessionEvent::RegistrationFailed, SessionState::Connected)]
    #[test_case(SessionEvent::AuthenticationRequired, SessionState::Authenticating)]
    #[test_case(SessionEvent::RegistrationComplete, SessionState::Registered)]
    fn test_registering_exits(event: SessionEvent, expected: SessionState) {
        let machine = registering();
        assert!(machine.process_event(event).is_success());
        assert_eq!(machine.current_state(), expected);
    }

    /// Standard table plus a `Reset` rule out of `Uninitialized` that jumps to `state`.
    fn machine_at(state: SessionState) -> (StateMachine, Arc<TransitionTable>) {
        let table = Arc::new((*TransitionTable::standard()).clone().with_rule(
            SessionState::Uninitialized,
            SessionEvent::Reset,
            TransitionRule::new(state),
        ));
        let machine = StateMachine::with_table(Arc::clone(&table));
        machine.process_event(SessionEvent::Reset);
        assert_eq!(machine.current_state(), state);
        (machine, table)
    }

    #[test]
    fn test_every_pair_matches_table() {
        for state in SessionState::ALL {
            for event in SessionEvent::ALL {
                let (machine, table) = machine_at(state);
                let result = machine.process_event(event);

                match table.get(state, event) {
                    Some(rule) => {
                        assert_eq!(
                            result,
                            TransitionResult::Success { from: state, to: rule.target, event }
                        );
                        assert_eq!(machine.current_state(), rule.target);
                    }
                    None => {
                        assert_eq!(
                            result,
                            TransitionResult::InvalidTransition { current: state, event }
                        );
                        assert_eq!(machine.current_state(), state);
                    }
                }
            }
        }
    }

    #[test]
    fn test_guard_failure_leaves_state() {
        let table = TransitionTable::empty().with_rule(
            SessionState::Uninitialized,
            SessionEvent::Initialize,
            TransitionRule::new(SessionState::Initializing).with_guard(|| false),
        );
        let machine = StateMachine::with_table(Arc::new(table));

        assert_eq!(
            machine.process_event(SessionEvent::Initialize),
            TransitionResult::GuardFailed {
                current: SessionState::Uninitialized,
                event: SessionEvent::Initialize,
            }
        );
        assert_eq!(machine.current_state(), SessionState::Uninitialized);
        assert!(machine.state_history().is_empty());
    }

    #[test]
    fn test_panicking_side_effect_keeps_commit() {
        let table = TransitionTable::empty().with_rule(
            SessionState::Uninitialized,
            SessionEvent::Initialize,
            TransitionRule::new(SessionState::Initializing)
                .with_side_effect(|_, _| panic!("side effect failure")),
        );
        let machine = StateMachine::with_table(Arc::new(table));

        assert!(machine.process_event(SessionEvent::Initialize).is_success());
        assert_eq!(machine.current_state(), SessionState::Initializing);
        assert_eq!(machine.state_history().len(), 1);
    }

    #[test]
    fn test_history_is_capped() {
        let machine = StateMachine::new();
        drive(
            &machine,
            &[SessionEvent::Initialize, SessionEvent::InitializationComplete],
        );
        for _ in 0..60 {
            drive(&machine, &[SessionEvent::Connect, SessionEvent::ConnectionFailed]);
        }

        let history = machine.state_history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].event, SessionEvent::Connect);
        assert_eq!(history.last().unwrap().event, SessionEvent::ConnectionFailed);
    }

    #[test]
    fn test_is_in_state() {
        let machine = registering();
        assert!(machine.is_in_state(&[SessionState::Registered, SessionState::Registering]));
        assert!(!machine.is_in_state(&[SessionState::Connected]));
        assert!(!machine.is_in_state(&[]));
    }

    #[test]
    fn test_listeners_notified_inline_without_runtime() {
        let machine = StateMachine::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        machine.add_listener(Arc::new(move |from, to, event| {
            sink.lock().push((from, to, event));
        }));

        machine.process_event(SessionEvent::Initialize);
        machine.process_event(SessionEvent::Connect);

        assert_eq!(
            *seen.lock(),
            vec![(
                SessionState::Uninitialized,
                SessionState::Initializing,
                SessionEvent::Initialize
            )]
        );
    }

    #[tokio::test]
    async fn test_listeners_observe_commit_order() {
        let machine = StateMachine::new();
        let (tx, mut rx) = unbounded_channel();
        machine.add_listener(Arc::new(move |_, to, _| {
            let _ = tx.send(to);
        }));

        drive(
            &machine,
            &[
                SessionEvent::Initialize,
                SessionEvent::InitializationComplete,
                SessionEvent::Connect,
            ],
        );

        assert_eq!(rx.recv().await, Some(SessionState::Initializing));
        assert_eq!(rx.recv().await, Some(SessionState::Disconnected));
        assert_eq!(rx.recv().await, Some(SessionState::Connecting));
    }

    #[tokio::test]
    async fn test_listener_can_reenter() {
        let machine = Arc::new(StateMachine::new());
        let (tx, mut rx) = unbounded_channel();

        let weak = Arc::downgrade(&machine);
        machine.add_listener(Arc::new(move |_, to, _| {
            if to == SessionState::Disconnected {
                if let Some(machine) = weak.upgrade() {
                    machine.process_event(SessionEvent::Connect);
                }
            }
            let _ = tx.send(to);
        }));

        drive(
            &machine,
            &[SessionEvent::Initialize, SessionEvent::InitializationComplete],
        );

        assert_eq!(rx.recv().await, Some(SessionState::Initializing));
        assert_eq!(rx.recv().await, Some(SessionState::Disconnected));
        assert_eq!(rx.recv().await, Some(SessionState::Connecting));
        assert_eq!(machine.current_state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_block_others() {
        let machine = StateMachine::new();
        let (tx, mut rx) = unbounded_channel();
        machine.add_listener(Arc::new(|_, _, _| panic!("listener failure")));
        machine.add_listener(Arc::new(move |_, to, _| {
            let _ = tx.send(to);
        }));

        machine.process_event(SessionEvent::Initialize);
        assert_eq!(rx.recv().await, Some(SessionState::Initializing));
    }

    #[test]
    fn test_remove_listener() {
        let machine = StateMachine::new();
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let id = machine.add_listener(Arc::new(move |_, _, _| {
            flag.store(true, Ordering::SeqCst);
        }));

        assert!(machine.remove_listener(id));
        assert!(!machine.remove_listener(id));

        machine.process_event(SessionEvent::Initialize);
        assert!(!called.load(Ordering::SeqCst));
    }
}
