pub mod cli;
pub mod command;
pub mod protocol;
pub mod transport;

pub use cli::{PromptError, prompt};
pub use command::{ClientCommand, CommandError};
pub use transport::{Connection, Message, ProtocolRegistry, Role, TypedMessage};
