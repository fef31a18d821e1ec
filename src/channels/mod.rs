//! Channel abstraction for message I/O.

pub mod channel;
pub mod cli;
pub mod manager;
pub mod telegram;
pub mod webhook;

pub use channel::*;
pub use cli::CliChannel;
pub use manager::ChannelManager;
pub use telegram::{TelegramApi, TelegramChannel};
pub use webhook::{WebhookChannel, WebhookSettings};
