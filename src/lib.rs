//! Vova: a Telegram companion bot that talks things through.

pub mod bot;
pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod session;
pub mod store;
