//! Chat platform abstractions (Telegram forum groups today).

pub mod port;
pub mod throttled;
pub mod types;
