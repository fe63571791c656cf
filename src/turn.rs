//! Turn orchestration
//!
//! A pure transition function decides what a turn does next; the
//! orchestrator executes the resulting effects against the model, the
//! capabilities, the history store and the response channel.

mod effect;
mod event;
mod orchestrator;
mod state;
mod transition;

#[cfg(test)]
mod proptests;
#[cfg(test)]
mod testing;

pub use effect::Effect;
pub use event::TurnEvent;
pub use orchestrator::{TurnError, TurnHandle, TurnOrchestrator, TurnReport};
pub use state::{CommitReason, TurnState};
pub use transition::{transition, TransitionError, TransitionResult, MODEL_FAILURE_APOLOGY};
