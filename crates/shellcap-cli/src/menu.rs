// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Post-recording prompt
//!
//! Keystrokes reach the prompt through the recorder's dialog pipe, so the
//! menu never reads stdin directly.

use shellcap_recorder::DialogReader;
use std::io::{self, BufRead, BufReader, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    RecordAgain,
    Quit,
}

impl MenuChoice {
    /// Interpret one line of input
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "r" | "record" => Some(MenuChoice::RecordAgain),
            "q" | "quit" | "exit" => Some(MenuChoice::Quit),
            _ => None,
        }
    }
}

pub struct Menu<R, W> {
    input: BufReader<R>,
    out: W,
}

impl<R: Read, W: Write> Menu<R, W> {
    pub fn new(input: R, out: W) -> Self {
        Self {
            input: BufReader::new(input),
            out,
        }
    }

    /// Ask until a valid choice is entered. End of input means quit.
    pub fn prompt(&mut self) -> io::Result<MenuChoice> {
        loop {
            write!(self.out, "[r] record again  [q] quit > ")?;
            self.out.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                writeln!(self.out)?;
                return Ok(MenuChoice::Quit);
            }
            match MenuChoice::parse(&line) {
                Some(choice) => return Ok(choice),
                None => writeln!(self.out, "Unrecognized choice: {:?}", line.trim())?,
            }
        }
    }

    /// Show a message above the next prompt
    pub fn notify(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "{message}")?;
        self.out.flush()
    }
}

impl<W: Write> Menu<DialogReader, W> {
    /// Drop keystrokes that arrived after the shell exited
    pub fn discard_typeahead(&mut self) -> usize {
        let buffered = self.input.buffer().len();
        self.input.consume(buffered);
        buffered + self.input.get_mut().discard_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_choices() {
        assert_eq!(MenuChoice::parse("r\n"), Some(MenuChoice::RecordAgain));
        assert_eq!(MenuChoice::parse("  Q "), Some(MenuChoice::Quit));
        assert_eq!(MenuChoice::parse("exit"), Some(MenuChoice::Quit));
        assert_eq!(MenuChoice::parse(""), None);
        assert_eq!(MenuChoice::parse("x"), None);
    }

    #[test]
    fn test_reprompts_until_valid() -> io::Result<()> {
        let mut out = Vec::new();
        let mut menu = Menu::new(Cursor::new("maybe\n\nR\n"), &mut out);
        assert_eq!(menu.prompt()?, MenuChoice::RecordAgain);

        let text = String::from_utf8_lossy(&out);
        assert_eq!(text.matches("[q] quit > ").count(), 3);
        assert!(text.contains("Unrecognized choice: \"maybe\""));
        Ok(())
    }

    #[test]
    fn test_end_of_input_quits() -> io::Result<()> {
        let mut menu = Menu::new(Cursor::new(""), Vec::new());
        assert_eq!(menu.prompt()?, MenuChoice::Quit);
        Ok(())
    }

    #[test]
    fn test_reads_through_dialog_pipe() -> io::Result<()> {
        let (mut tx, rx) = shellcap_recorder::dialog_pipe();
        tx.write_all(b"q\n")?;
        drop(tx);

        let mut menu = Menu::new(rx, Vec::new());
        assert_eq!(menu.prompt()?, MenuChoice::Quit);
        Ok(())
    }

    #[test]
    fn test_typeahead_is_discarded() -> io::Result<()> {
        let (mut tx, rx) = shellcap_recorder::dialog_pipe();
        tx.write_all(b"exit\n")?;

        let mut menu = Menu::new(rx, Vec::new());
        assert_eq!(menu.discard_typeahead(), 5);
        tx.write_all(b"r\n")?;
        assert_eq!(menu.prompt()?, MenuChoice::RecordAgain);
        Ok(())
    }
}
