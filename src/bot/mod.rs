//! The bot itself: parsing, dispatch, commands, and Vova's texts.

pub mod bot_loop;
pub mod commands;
pub mod keyboard;
pub mod persona;
pub mod submission;

pub use bot_loop::{Bot, BotDeps};
pub use keyboard::main_keyboard;
pub use submission::{Button, Command, Submission, SubmissionParser};
