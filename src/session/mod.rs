//! Session tracking: linear multi-turn flows keyed by user.
//!
//! One `SessionTracker` is built per flow definition. The bot runs two of
//! them side by side: the scripted "talk" questionnaire and the staged
//! intake that ends in an analysis.

pub mod flow;
pub mod state;
pub mod tracker;

pub use flow::{Finish, FlowKind, LinearFlow, Stage};
pub use state::SessionEntry;
pub use tracker::{SessionTracker, StepReply};
