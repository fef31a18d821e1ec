//! Persistence layer: the durable completion log and user profiles.

pub mod file_log;
pub mod json_file;
pub mod memory;
pub mod profiles;
pub mod traits;

pub use file_log::JsonFileLog;
pub use json_file::JsonFile;
pub use memory::InMemoryLog;
pub use profiles::{NameOutcome, ProfileStore, UserProfile};
pub use traits::{CompletionRecord, DurableLog};
