//! Session lifecycle states, events and the table-driven machine that moves between them.

mod machine;
mod table;
mod types;

pub use machine::{ListenerId, StateChangeListener, StateMachine, HISTORY_CAPACITY};
pub use table::{Guard, SideEffect, TransitionRule, TransitionTable};
pub use types::{SessionEvent, SessionState, StateTransitionRecord, TransitionResult};
