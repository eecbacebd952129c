//! Message handling for text-based platforms

pub mod parser;

pub use parser::{MessageParser, ParsedCommand};
