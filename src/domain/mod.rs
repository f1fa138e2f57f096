mod command;
mod record;
mod state;

pub use command::{CommandEvent, CommandSource, ControlCommand};
pub use record::{ControlRecord, DEFAULT_RECORD_KEY};
pub use state::{AgentState, AgentStats, StateTransition, TransitionRequest};
