//! Canned replies used when the completion provider fails.
//!
//! Selection is a pure function of the error kind, so the same failure always
//! yields the same line.

use crate::error::LlmError;

/// Lines the bot falls back to. Index 0 is the generic one.
pub const FALLBACK_LINES: &[&str] = &[
    "Что-то я завис. Давай попробуем ещё раз чуть позже — я никуда не денусь.",
    "Я задумался дольше, чем следовало. Напиши мне ещё раз через минутку.",
    "Меня сейчас слишком много кто дёргает. Дай мне немного времени и повтори.",
    "У меня сломалась связь с головой. Уже чиню — попробуй позже.",
];

/// Pick the fallback line for a provider failure.
pub fn fallback_reply(error: &LlmError) -> &'static str {
    let index = match error {
        LlmError::Timeout { .. } => 1,
        LlmError::RateLimited { .. } => 2,
        LlmError::AuthFailed { .. } | LlmError::ModelNotAvailable { .. } => 3,
        LlmError::RequestFailed { .. } | LlmError::InvalidResponse { .. } => 0,
    };
    FALLBACK_LINES[index]
}

/// Whether `text` is one of the fallback lines.
pub fn is_fallback(text: &str) -> bool {
    FALLBACK_LINES.contains(&text)
}
