//! CLI utilities for the SDMS client.
//!
//! The utilities present in this module can be used to build an interactive
//! client for a facility server.
use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::command::{ClientCommand, CommandError};

#[derive(Debug, Error)]
pub enum PromptError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("end of input")]
    Closed,
}

/// Prompt user for a client command.
///
/// Reaching the end of `reader` yields [`PromptError::Closed`].
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<ClientCommand, PromptError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Err(PromptError::Closed);
    }

    Ok(ClientCommand::try_from(s.as_str())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_handles_text() {
        let input = b"hello\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert_eq!(ClientCommand::Text("hello".to_string()), res);
    }

    #[test]
    fn prompt_reports_end_of_input() {
        let mut output = Vec::new();

        assert!(matches!(
            prompt(&b""[..], &mut output),
            Err(PromptError::Closed)
        ));
    }

    #[test]
    #[should_panic(expected = "UnrecognizedCommand(\".something_wrong\")")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();
    }
}
