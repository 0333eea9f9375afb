//! AT command engine for the SIM800.
//!
//! This crate turns the modem's raw byte stream into command outcomes:
//!
//! - [`framer`] splits bytes into lines, the bare `>` prompt, and empty lines
//! - [`lexer`] classifies lines into typed tokens, with a streaming mode that
//!   tolerates arbitrarily split input
//! - [`dispatch`] runs one command/response exchange at a time over a
//!   [`Transport`](sim800_core::Transport), judged by a per-command
//!   [`AcceptRule`]

pub mod dispatch;
pub mod framer;
pub mod lexer;

pub use dispatch::{AcceptRule, Dispatcher, Unit, Verdict};
pub use framer::{Frame, Framer};
pub use lexer::{Lexer, Token, TokenKind};
