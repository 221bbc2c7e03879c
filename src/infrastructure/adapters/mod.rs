//! Chat platform adapters - sessions that carry replies out and feed messages in

pub mod console;
pub mod telegram;

pub use console::ConsoleAdapter;
pub use telegram::TelegramAdapter;
