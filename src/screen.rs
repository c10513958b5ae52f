//! Text output sink.
//!
//! The core produces a plain character stream plus a few control signals
//! (new line, status-line refresh, clear). Anything fancier — windows,
//! colors, fonts — belongs to the display collaborator and is deliberately
//! absent from this trait.

use std::io::{self, Write};

use crossterm::{cursor, style, terminal, QueueableCommand};
use log::debug;

use crate::error::{Error, Result};

pub trait Screen {
    fn print(&mut self, text: &str) -> Result<()>;

    fn print_char(&mut self, ch: char) -> Result<()> {
        let mut buf = [0u8; 4];
        self.print(ch.encode_utf8(&mut buf))
    }

    fn new_line(&mut self) -> Result<()> {
        self.print("\n")
    }

    /// Status-line refresh: current location on the left, score/turns or
    /// time on the right. v3 games only.
    fn status_line(&mut self, location: &str, right: &str) -> Result<()>;

    /// Clear everything (erase_window -1 and friends reduce to this).
    fn clear(&mut self) -> Result<()>;
}

/// Plain stream writer for piped or scripted play: text goes to stdout
/// untouched, status-line updates are logged only.
pub struct PlainScreen;

impl Screen for PlainScreen {
    fn print(&mut self, text: &str) -> Result<()> {
        print!("{text}");
        io::stdout().flush().map_err(Error::from)
    }

    fn status_line(&mut self, location: &str, right: &str) -> Result<()> {
        debug!("status: {location} | {right}");
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Interactive terminal writer: scrolling text with a reverse-video status
/// line pinned to the top row.
pub struct TerminalScreen {
    width: u16,
}

impl TerminalScreen {
    pub fn new() -> Result<TerminalScreen> {
        let (width, _) = terminal::size().unwrap_or((80, 24));
        let mut stdout = io::stdout();
        stdout.queue(terminal::Clear(terminal::ClearType::All))?;
        stdout.queue(cursor::MoveTo(0, 1))?;
        stdout.flush()?;
        Ok(TerminalScreen { width })
    }

    pub fn width(&self) -> u16 {
        self.width
    }
}

impl Screen for TerminalScreen {
    fn print(&mut self, text: &str) -> Result<()> {
        print!("{text}");
        io::stdout().flush().map_err(Error::from)
    }

    fn status_line(&mut self, location: &str, right: &str) -> Result<()> {
        let width = self.width as usize;
        let pad = width
            .saturating_sub(location.len() + right.len() + 3)
            .max(1);
        let line = format!(" {location}{}{right} ", " ".repeat(pad));
        let mut stdout = io::stdout();
        stdout.queue(cursor::SavePosition)?;
        stdout.queue(cursor::MoveTo(0, 0))?;
        stdout.queue(style::SetAttribute(style::Attribute::Reverse))?;
        stdout.queue(style::Print(&line[..line.len().min(width)]))?;
        stdout.queue(style::SetAttribute(style::Attribute::Reset))?;
        stdout.queue(cursor::RestorePosition)?;
        stdout.flush().map_err(Error::from)
    }

    fn clear(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        stdout.queue(terminal::Clear(terminal::ClearType::All))?;
        stdout.queue(cursor::MoveTo(0, 1))?;
        stdout.flush().map_err(Error::from)
    }
}

/// Collects output for tests and headless runs. Clones share one buffer,
/// so a test can keep a handle while the interpreter owns the boxed clone.
#[derive(Clone, Default)]
pub struct BufferScreen {
    inner: std::rc::Rc<std::cell::RefCell<BufferInner>>,
}

#[derive(Default)]
struct BufferInner {
    output: String,
    statuses: Vec<String>,
    clears: u32,
}

impl BufferScreen {
    pub fn new() -> BufferScreen {
        BufferScreen::default()
    }

    pub fn output(&self) -> String {
        self.inner.borrow().output.clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.inner.borrow().statuses.clone()
    }

    pub fn clears(&self) -> u32 {
        self.inner.borrow().clears
    }
}

impl Screen for BufferScreen {
    fn print(&mut self, text: &str) -> Result<()> {
        self.inner.borrow_mut().output.push_str(text);
        Ok(())
    }

    fn status_line(&mut self, location: &str, right: &str) -> Result<()> {
        self.inner
            .borrow_mut()
            .statuses
            .push(format!("{location} | {right}"));
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.clears += 1;
        inner.output.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_screen_collects_output() {
        let mut screen = BufferScreen::new();
        screen.print("West of House").unwrap();
        screen.new_line().unwrap();
        screen.print_char('>').unwrap();
        assert_eq!(screen.output(), "West of House\n>");
    }

    #[test]
    fn test_buffer_screen_records_status() {
        let mut screen = BufferScreen::new();
        screen.status_line("Kitchen", "Score: 10  Moves: 3").unwrap();
        assert_eq!(screen.statuses(), ["Kitchen | Score: 10  Moves: 3"]);
    }
}
