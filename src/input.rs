//! Line input source.
//!
//! The core asks for one completed, trimmed line at a time and performs no
//! raw keystroke handling. End of input is an error on purpose: when a
//! piped command script runs out, the read opcode must surface a failure
//! instead of spinning on empty lines forever.

use std::collections::VecDeque;
use std::io::{self, BufRead};

use log::debug;

use crate::error::{Error, Result};

pub trait LineInput {
    /// One completed line with the terminator removed.
    fn read_line(&mut self) -> Result<String>;

    /// Single character for read_char; the default implementation takes
    /// the first character of a line, with bare Enter as newline.
    fn read_char(&mut self) -> Result<char> {
        let line = self.read_line()?;
        Ok(line.chars().next().unwrap_or('\n'))
    }
}

/// Blocking stdin reader.
pub struct StdinInput;

impl LineInput for StdinInput {
    fn read_line(&mut self) -> Result<String> {
        let mut buffer = String::new();
        let bytes = io::stdin()
            .lock()
            .read_line(&mut buffer)
            .map_err(Error::from)?;
        if bytes == 0 {
            debug!("stdin closed, no more input");
            return Err(Error::Io("end of input".into()));
        }
        while buffer.ends_with('\n') || buffer.ends_with('\r') {
            buffer.pop();
        }
        Ok(buffer)
    }
}

/// Canned input for tests and scripted playthroughs.
#[derive(Default)]
pub struct ScriptedInput {
    lines: VecDeque<String>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> ScriptedInput
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedInput {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl LineInput for ScriptedInput {
    fn read_line(&mut self) -> Result<String> {
        self.lines
            .pop_front()
            .ok_or_else(|| Error::Io("end of input".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_input_in_order() {
        let mut input = ScriptedInput::new(["look", "take lamp"]);
        assert_eq!(input.read_line().unwrap(), "look");
        assert_eq!(input.read_line().unwrap(), "take lamp");
        assert!(matches!(input.read_line(), Err(Error::Io(_))));
    }

    #[test]
    fn test_read_char_takes_first_character() {
        let mut input = ScriptedInput::new(["yes", ""]);
        assert_eq!(input.read_char().unwrap(), 'y');
        assert_eq!(input.read_char().unwrap(), '\n');
    }
}
