//! Domain entities - Core business objects shared by the host and its plugins

pub mod command;
pub mod event;
pub mod invocation;
pub mod user;

pub use command::{Command, CommandDescriptor, CommandHandler, CommandOption, OptionKind};
pub use event::{event_handler, Event, EventHandler, EventKind, Subscription};
pub use invocation::{Arguments, Invocation, ResponseState};
pub use user::User;
