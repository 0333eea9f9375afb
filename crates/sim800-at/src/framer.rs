//! Byte-level response framer.
//!
//! The modem answers with CRLF-terminated lines, except for the data-input
//! prompt `>` which arrives bare. [`Framer`] is a pure state machine that
//! consumes one byte at a time and reports when a unit is complete, so it
//! behaves identically whether the transport delivers a whole reply in one
//! read or a single byte per read.

use sim800_core::error::{Error, Result};

/// Capacity of the scratch buffer that assembles one line.
pub const SCRATCH_CAPACITY: usize = 256;

/// A discrete response unit recognized by the framer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// A complete line; its content is available from [`Framer::line`].
    Line,
    /// The bare data-input prompt `>`.
    Prompt,
    /// A line with nothing but whitespace in it.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ScanningStart,
    SawCr,
}

/// Incremental line framer with a fixed scratch buffer.
///
/// After [`feed`](Self::feed) returns [`Frame::Line`], the line stays in the
/// scratch buffer until the next byte is fed.
#[derive(Debug)]
pub struct Framer {
    scratch: [u8; SCRATCH_CAPACITY],
    len: usize,
    state: State,
    completed: bool,
}

impl Framer {
    pub fn new() -> Self {
        Framer {
            scratch: [0u8; SCRATCH_CAPACITY],
            len: 0,
            state: State::ScanningStart,
            completed: false,
        }
    }

    /// Consume one byte.
    ///
    /// Returns `Ok(Some(frame))` when the byte completes a unit and
    /// `Ok(None)` when more input is needed. Exceeding the scratch capacity
    /// fails with [`Error::BufferOverflow`]; the partial line is discarded so
    /// the next byte starts clean.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Frame>> {
        if self.completed {
            self.len = 0;
            self.completed = false;
        }

        match self.state {
            State::SawCr => {
                self.state = State::ScanningStart;
                if byte == b'\n' {
                    self.completed = true;
                    if self.line().iter().all(u8::is_ascii_whitespace) {
                        return Ok(Some(Frame::Empty));
                    }
                    return Ok(Some(Frame::Line));
                }
                // A lone CR: drop the partial line and rescan this byte.
                self.len = 0;
                self.scan(byte)
            }
            State::ScanningStart => self.scan(byte),
        }
    }

    fn scan(&mut self, byte: u8) -> Result<Option<Frame>> {
        match byte {
            b'\r' => {
                self.state = State::SawCr;
                Ok(None)
            }
            b'>' if self.len == 0 => Ok(Some(Frame::Prompt)),
            _ => {
                if self.len >= SCRATCH_CAPACITY {
                    self.len = 0;
                    return Err(Error::BufferOverflow {
                        capacity: SCRATCH_CAPACITY,
                    });
                }
                self.scratch[self.len] = byte;
                self.len += 1;
                Ok(None)
            }
        }
    }

    /// The content of the line being assembled, or of the line just
    /// completed.
    pub fn line(&self) -> &[u8] {
        &self.scratch[..self.len]
    }

    /// Whether a partial line is waiting for more bytes.
    pub fn is_idle(&self) -> bool {
        self.completed || (self.len == 0 && self.state == State::ScanningStart)
    }

    /// Discard any partial line and return to the initial state.
    pub fn reset(&mut self) {
        self.len = 0;
        self.state = State::ScanningStart;
        self.completed = false;
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `input` and collect every non-empty unit as text.
    fn frames(framer: &mut Framer, input: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        for &b in input {
            match framer.feed(b).unwrap() {
                Some(Frame::Line) => out.push(String::from_utf8_lossy(framer.line()).into_owned()),
                Some(Frame::Prompt) => out.push(">".into()),
                Some(Frame::Empty) | None => {}
            }
        }
        out
    }

    #[test]
    fn frames_crlf_lines() {
        let mut f = Framer::new();
        assert_eq!(
            frames(&mut f, b"\r\n+CGATT: 1\r\n\r\nOK\r\n"),
            vec!["+CGATT: 1", "OK"]
        );
    }

    #[test]
    fn line_stays_until_next_byte() {
        let mut f = Framer::new();
        for &b in b"OK\r" {
            assert_eq!(f.feed(b).unwrap(), None);
        }
        assert_eq!(f.feed(b'\n').unwrap(), Some(Frame::Line));
        assert_eq!(f.line(), b"OK");
        assert!(f.is_idle());

        f.feed(b'X').unwrap();
        assert_eq!(f.line(), b"X");
    }

    #[test]
    fn empty_lines_are_reported_as_empty() {
        let mut f = Framer::new();
        assert_eq!(f.feed(b'\r').unwrap(), None);
        assert_eq!(f.feed(b'\n').unwrap(), Some(Frame::Empty));
        for &b in b"  \r" {
            f.feed(b).unwrap();
        }
        assert_eq!(f.feed(b'\n').unwrap(), Some(Frame::Empty));
    }

    #[test]
    fn prompt_at_line_start() {
        let mut f = Framer::new();
        assert_eq!(frames(&mut f, b"\r\n> "), vec![">"]);
        // The trailing space is buffered as the start of a (blank) line.
        assert!(!f.is_idle());
    }

    #[test]
    fn prompt_inside_line_is_text() {
        let mut f = Framer::new();
        assert_eq!(frames(&mut f, b"a>b\r\n"), vec!["a>b"]);
    }

    #[test]
    fn lone_cr_discards_partial_line() {
        let mut f = Framer::new();
        assert_eq!(frames(&mut f, b"garbage\rOK\r\n"), vec!["OK"]);
    }

    #[test]
    fn lone_cr_then_prompt() {
        let mut f = Framer::new();
        assert_eq!(frames(&mut f, b"junk\r>"), vec![">"]);
    }

    #[test]
    fn cr_cr_lf_yields_empty_line() {
        let mut f = Framer::new();
        assert_eq!(frames(&mut f, b"OK\r\r\n"), Vec::<String>::new());
        assert_eq!(frames(&mut f, b"OK\r\n"), vec!["OK"]);
    }

    #[test]
    fn overflow_is_reported_and_recovers() {
        let mut f = Framer::new();
        for _ in 0..SCRATCH_CAPACITY {
            assert_eq!(f.feed(b'A').unwrap(), None);
        }
        let err = f.feed(b'A').unwrap_err();
        assert!(matches!(
            err,
            Error::BufferOverflow {
                capacity: SCRATCH_CAPACITY
            }
        ));
        assert_eq!(frames(&mut f, b"\r\nOK\r\n"), vec!["OK"]);
    }

    #[test]
    fn reset_clears_partial_state() {
        let mut f = Framer::new();
        frames(&mut f, b"+CGA");
        f.reset();
        assert!(f.is_idle());
        assert_eq!(frames(&mut f, b"TT: 1\r\n"), vec!["TT: 1"]);
    }

    #[test]
    fn receive_preamble_then_binary_payload_boundary() {
        // The framer stops at the preamble; payload bytes are read raw by
        // the caller, so the framer must be idle right after the line.
        let mut f = Framer::new();
        assert_eq!(frames(&mut f, b"+RECEIVE,0,5:\r\n"), vec!["+RECEIVE,0,5:"]);
        assert!(f.is_idle());
    }
}
