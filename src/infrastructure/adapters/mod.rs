//! Platform adapters

pub mod console;
pub mod memory;
pub mod telegram;

pub use console::ConsoleAdapter;
pub use memory::{MemoryPlatform, RecordingResponder};
pub use telegram::TelegramAdapter;
