//! Interactive client commands.
//!
//! This module defines the [`ClientCommand`] enum, which encapsulates what a
//! user can ask a facility server from the interactive prompt. Lines starting
//! with `.` are commands; anything else is sent to the server as text.
//!
//! # Overview
//!
//! - `.ping`: Check the server is reachable.
//! - `.status`: Ask the server for its service status.
//! - `.exit`: Close the session.
//! - any other line: Send as a text request and print the echo.
//!
//! # Example
//! ```rust
//! use sdms::ClientCommand;
//!
//! let cmd: ClientCommand = ".ping".try_into().unwrap();
//! assert_eq!(cmd, ClientCommand::Ping);
//! ```
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("no command provided")]
    Empty,
}

/// User supplied request for a facility server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Ping,
    Status,
    /// Free text to echo through the server.
    Text(String),
    /// Ends the session without contacting the server.
    Exit,
}

impl TryFrom<&str> for ClientCommand {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim() {
            "" => Err(CommandError::Empty),
            ".ping" => Ok(ClientCommand::Ping),
            ".status" => Ok(ClientCommand::Status),
            ".exit" | ".quit" => Ok(ClientCommand::Exit),
            s if s.starts_with('.') => Err(CommandError::UnrecognizedCommand(s.to_string())),
            s => Ok(ClientCommand::Text(s.to_string())),
        }
    }
}
