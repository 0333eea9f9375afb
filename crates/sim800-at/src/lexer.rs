//! Response lexer: classifies modem output into typed tokens.
//!
//! [`classify`] turns one assembled line into a [`Token`]. [`Lexer`] wraps it
//! for streaming use: feed it chunks of any size and it emits a token for
//! every line completed so far, keeping the incomplete tail for the next
//! call. Splitting the input at arbitrary byte boundaries never changes the
//! resulting token sequence.

use tracing::warn;

/// Capacity of the lexer's streaming buffer.
pub const LEXER_CAPACITY: usize = 512;

/// Maximum number of tokens produced by one call.
pub const MAX_TOKENS: usize = 16;

/// Maximum number of comma-separated sub-values kept per token.
pub const MAX_VALUES: usize = 8;

/// Line names the modem emits without being asked.
///
/// Matched against the key of a `name: value` line (up to the first comma)
/// or against a whole line with no colon.
const NOTIFICATIONS: &[&str] = &[
    "+CREG",
    "+CGREG",
    "+CEREG",
    "+CMTI",
    "+CMT",
    "+CUSD",
    "+CLIP",
    "+CIEV",
    "RING",
    "+DTMF",
    "BUSY",
    "NO ANSWER",
    "NO CARRIER",
    "+CPAS",
    "+IPD",
    "+RECEIVE",
];

/// What a token represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `OK`
    Ok,
    /// `ERROR`
    Error,
    /// `+CME ERROR: <code>` or `+CMS ERROR: <code>`.
    KeyedError,
    /// `name: value[,value...]` answering a command.
    Response,
    /// An unsolicited line from the notification roster.
    Notification,
    /// The command line echoed back (`AT...`).
    Echo,
    /// Anything else.
    Data,
    /// The data-input prompt `>`.
    Prompt,
    /// An empty line.
    Empty,
}

/// One classified unit of modem output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Name before the colon (`"+CGATT"`), or the error family for keyed
    /// errors (`"+CME ERROR"`).
    pub key: Option<String>,
    /// Trimmed text after the colon.
    pub value: Option<String>,
    /// `value` split on commas outside double quotes, at most
    /// [`MAX_VALUES`] entries. Quotes are kept.
    pub values: Vec<String>,
    /// The line as received, without its terminator.
    pub raw: String,
}

impl Token {
    fn bare(kind: TokenKind, raw: &str) -> Self {
        Token {
            kind,
            key: None,
            value: None,
            values: Vec::new(),
            raw: raw.to_string(),
        }
    }

    /// Whether this token ends a command exchange (`OK`, `ERROR`, keyed
    /// error).
    pub fn is_final(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Ok | TokenKind::Error | TokenKind::KeyedError
        )
    }
}

/// Classify one line (without its CRLF terminator).
pub fn classify(line: &str) -> Token {
    let line = line.trim_end_matches(['\r', '\n']);
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return Token::bare(TokenKind::Empty, line);
    }
    if trimmed == "OK" {
        return Token::bare(TokenKind::Ok, line);
    }
    if trimmed == "ERROR" {
        return Token::bare(TokenKind::Error, line);
    }
    for family in ["+CME ERROR", "+CMS ERROR"] {
        if let Some(rest) = trimmed.strip_prefix(family).and_then(|r| r.strip_prefix(':')) {
            return Token {
                kind: TokenKind::KeyedError,
                key: Some(family.to_string()),
                value: Some(rest.trim().to_string()),
                values: Vec::new(),
                raw: line.to_string(),
            };
        }
    }
    if trimmed == ">" {
        return Token::bare(TokenKind::Prompt, line);
    }

    if let Some((key, value)) = trimmed.split_once(':') {
        let key = key.trim();
        let value = value.trim();
        let kind = if is_notification(key) {
            TokenKind::Notification
        } else {
            TokenKind::Response
        };
        return Token {
            kind,
            key: Some(key.to_string()),
            value: Some(value.to_string()),
            values: split_values(value),
            raw: line.to_string(),
        };
    }

    if NOTIFICATIONS.contains(&trimmed) {
        return Token {
            key: Some(trimmed.to_string()),
            ..Token::bare(TokenKind::Notification, line)
        };
    }

    if trimmed.len() >= 2 && trimmed.as_bytes()[..2].eq_ignore_ascii_case(b"AT") {
        return Token {
            key: Some(trimmed.to_string()),
            ..Token::bare(TokenKind::Echo, line)
        };
    }

    Token::bare(TokenKind::Data, line)
}

fn is_notification(key: &str) -> bool {
    let name = key.split(',').next().unwrap_or(key).trim();
    NOTIFICATIONS.contains(&name)
}

/// Split a parameter list on commas, treating quoted sections as opaque.
///
/// Entries past [`MAX_VALUES`] are ignored.
pub fn split_values(s: &str) -> Vec<String> {
    let mut values = Vec::new();
    if s.is_empty() {
        return values;
    }

    let mut in_quote = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quote = !in_quote,
            ',' if !in_quote => {
                if values.len() < MAX_VALUES {
                    values.push(s[start..i].to_string());
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if values.len() < MAX_VALUES {
        values.push(s[start..].to_string());
    }
    values
}

// ---------------------------------------------------------------------------
// Streaming lexer
// ---------------------------------------------------------------------------

/// Streaming tokenizer over a fixed buffer.
///
/// Each call returns at most [`MAX_TOKENS`] tokens; further complete lines
/// stay buffered and come out of the next [`process`](Self::process) or
/// [`tokenize`](Self::tokenize) call.
#[derive(Debug)]
pub struct Lexer {
    buf: [u8; LEXER_CAPACITY],
    len: usize,
}

impl Lexer {
    pub fn new() -> Self {
        Lexer {
            buf: [0u8; LEXER_CAPACITY],
            len: 0,
        }
    }

    /// Append `data` and return the tokens completed so far.
    ///
    /// Bytes that do not fit in the buffer are dropped with a warning.
    pub fn tokenize(&mut self, data: &[u8]) -> Vec<Token> {
        let accepted = self.append(data);
        if accepted < data.len() {
            warn!(
                dropped = data.len() - accepted,
                capacity = LEXER_CAPACITY,
                "lexer buffer full, dropping input"
            );
        }
        self.process()
    }

    /// Append `data` without tokenizing. Returns how many bytes fit.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.available());
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
        n
    }

    /// Tokenize the complete lines currently buffered.
    pub fn process(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut consumed = 0;

        while tokens.len() < MAX_TOKENS && consumed < self.len {
            let pending = &self.buf[consumed..self.len];

            if pending[0] == b'>' {
                tokens.push(Token::bare(TokenKind::Prompt, ">"));
                consumed += 1;
                continue;
            }

            let Some(eol) = pending.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line = String::from_utf8_lossy(&pending[..eol]);
            tokens.push(classify(&line));
            consumed += eol + 1;
        }

        self.buf.copy_within(consumed..self.len, 0);
        self.len -= consumed;

        if self.len == LEXER_CAPACITY && !self.buf.contains(&b'\n') {
            warn!(
                capacity = LEXER_CAPACITY,
                "unterminated line fills lexer buffer, discarding"
            );
            self.len = 0;
        }

        tokens
    }

    /// Free space in the streaming buffer, in bytes.
    pub fn available(&self) -> usize {
        LEXER_CAPACITY - self.len
    }

    /// Whether the buffer holds a final result code.
    pub fn has_complete_response(&self) -> bool {
        let buf = &self.buf[..self.len];
        [&b"OK\r\n"[..], b"ERROR\r\n", b"+CME ERROR", b"+CMS ERROR"]
            .iter()
            .any(|pattern| buf.windows(pattern.len()).any(|w| w == *pattern))
    }

    /// Drop all buffered input.
    pub fn reset(&mut self) {
        self.len = 0;
    }
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    // -----------------------------------------------------------------------
    // classify
    // -----------------------------------------------------------------------

    #[test]
    fn classify_final_codes() {
        assert_eq!(classify("OK").kind, TokenKind::Ok);
        assert_eq!(classify("ERROR").kind, TokenKind::Error);
        assert!(classify("OK").is_final());
        assert!(!classify("+CGATT: 1").is_final());
    }

    #[test]
    fn classify_keyed_errors() {
        let t = classify("+CME ERROR: 10");
        assert_eq!(t.kind, TokenKind::KeyedError);
        assert_eq!(t.key.as_deref(), Some("+CME ERROR"));
        assert_eq!(t.value.as_deref(), Some("10"));
        assert!(t.is_final());

        let t = classify("+CMS ERROR: 500");
        assert_eq!(t.kind, TokenKind::KeyedError);
        assert_eq!(t.value.as_deref(), Some("500"));
    }

    #[test]
    fn classify_keyed_response() {
        let t = classify("+CGATT: 1");
        assert_eq!(t.kind, TokenKind::Response);
        assert_eq!(t.key.as_deref(), Some("+CGATT"));
        assert_eq!(t.value.as_deref(), Some("1"));
        assert_eq!(t.values, vec!["1"]);
        assert_eq!(t.raw, "+CGATT: 1");
    }

    #[test]
    fn classify_quoted_comma_does_not_split() {
        let t = classify("+COPS: 0,0,\"28,403\"");
        assert_eq!(t.kind, TokenKind::Response);
        assert_eq!(t.values, vec!["0", "0", "\"28,403\""]);
    }

    #[test]
    fn classify_caps_sub_values() {
        let t = classify("+X: 1,2,3,4,5,6,7,8,9,10");
        assert_eq!(t.values.len(), MAX_VALUES);
        assert_eq!(t.values[7], "8");
    }

    #[test]
    fn classify_notifications() {
        let t = classify("+CREG: 1");
        assert_eq!(t.kind, TokenKind::Notification);
        assert_eq!(t.key.as_deref(), Some("+CREG"));

        let t = classify("+RECEIVE,2,4:");
        assert_eq!(t.kind, TokenKind::Notification);
        assert_eq!(t.key.as_deref(), Some("+RECEIVE,2,4"));
        assert_eq!(t.value.as_deref(), Some(""));
        assert!(t.values.is_empty());

        assert_eq!(classify("RING").kind, TokenKind::Notification);
        assert_eq!(classify("NO CARRIER").kind, TokenKind::Notification);
    }

    #[test]
    fn classify_echo_prompt_data_empty() {
        let t = classify("AT+CGATT?");
        assert_eq!(t.kind, TokenKind::Echo);
        assert_eq!(t.key.as_deref(), Some("AT+CGATT?"));
        assert_eq!(classify(">").kind, TokenKind::Prompt);
        assert_eq!(classify("10.1.2.3").kind, TokenKind::Data);
        assert_eq!(classify("0, CONNECT OK").kind, TokenKind::Data);
        assert_eq!(classify("").kind, TokenKind::Empty);
        assert_eq!(classify("   ").kind, TokenKind::Empty);
    }

    #[test]
    fn split_values_edge_cases() {
        assert!(split_values("").is_empty());
        assert_eq!(split_values("a,,b"), vec!["a", "", "b"]);
        assert_eq!(split_values("\"x,y\",z"), vec!["\"x,y\"", "z"]);
        assert_eq!(split_values("1,"), vec!["1", ""]);
    }

    // -----------------------------------------------------------------------
    // Lexer streaming
    // -----------------------------------------------------------------------

    #[test]
    fn tokenize_whole_response() {
        let mut lexer = Lexer::new();
        let tokens = lexer.tokenize(b"\r\n+COPS: 0,0,\"28403\"\r\n\r\nOK\r\n");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Empty,
                TokenKind::Response,
                TokenKind::Empty,
                TokenKind::Ok
            ]
        );
        assert_eq!(tokens[1].value.as_deref(), Some("0,0,\"28403\""));
        assert_eq!(lexer.available(), LEXER_CAPACITY);
    }

    #[test]
    fn streaming_equivalence_byte_by_byte() {
        let input = b"+CGATT: 1\r\nOK\r\n";

        let whole = Lexer::new().tokenize(input);

        let mut lexer = Lexer::new();
        let mut streamed = Vec::new();
        for b in input {
            streamed.extend(lexer.tokenize(std::slice::from_ref(b)));
        }

        assert_eq!(whole, streamed);
        assert_eq!(kinds(&whole), vec![TokenKind::Response, TokenKind::Ok]);
    }

    #[test]
    fn streaming_equivalence_split_inside_quotes() {
        let input = b"+COPS: 0,0,\"28,403\"\r\nOK\r\n";
        let whole = Lexer::new().tokenize(input);

        for split in 1..input.len() {
            let mut lexer = Lexer::new();
            let mut streamed = lexer.tokenize(&input[..split]);
            streamed.extend(lexer.tokenize(&input[split..]));
            assert_eq!(whole, streamed, "split at {split}");
        }
    }

    #[test]
    fn partial_line_is_retained() {
        let mut lexer = Lexer::new();
        assert!(lexer.tokenize(b"+CGATT").is_empty());
        assert_eq!(lexer.available(), LEXER_CAPACITY - 6);
        let tokens = lexer.tokenize(b": 1\r\n");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].raw, "+CGATT: 1");
    }

    #[test]
    fn prompt_is_emitted_without_terminator() {
        let mut lexer = Lexer::new();
        let tokens = lexer.tokenize(b">");
        assert_eq!(kinds(&tokens), vec![TokenKind::Prompt]);
    }

    #[test]
    fn token_cap_defers_remaining_lines() {
        let mut lexer = Lexer::new();
        let input = "OK\r\n".repeat(MAX_TOKENS + 2);
        let first = lexer.tokenize(input.as_bytes());
        assert_eq!(first.len(), MAX_TOKENS);
        let rest = lexer.process();
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn append_then_process() {
        let mut lexer = Lexer::new();
        assert_eq!(lexer.append(b"+CGATT: 1\r\nOK\r\n"), 15);
        assert!(lexer.has_complete_response());
        let tokens = lexer.process();
        assert_eq!(kinds(&tokens), vec![TokenKind::Response, TokenKind::Ok]);
        assert!(!lexer.has_complete_response());
    }

    #[test]
    fn has_complete_response_variants() {
        let mut lexer = Lexer::new();
        lexer.append(b"+CGATT");
        assert!(!lexer.has_complete_response());
        lexer.reset();
        lexer.append(b"ERROR\r\n");
        assert!(lexer.has_complete_response());
        lexer.reset();
        lexer.append(b"+CME ERROR: 3");
        assert!(lexer.has_complete_response());
    }

    #[test]
    fn overfull_input_is_truncated() {
        let mut lexer = Lexer::new();
        let big = vec![b'A'; LEXER_CAPACITY + 10];
        let tokens = lexer.tokenize(&big);
        assert!(tokens.is_empty());
        // An unterminated line filling the buffer is discarded to resync.
        assert_eq!(lexer.available(), LEXER_CAPACITY);
        let tokens = lexer.tokenize(b"OK\r\n");
        assert_eq!(kinds(&tokens), vec![TokenKind::Ok]);
    }

    #[test]
    fn reset_clears_buffer() {
        let mut lexer = Lexer::new();
        lexer.tokenize(b"+CG");
        lexer.reset();
        assert_eq!(lexer.available(), LEXER_CAPACITY);
        let tokens = lexer.tokenize(b"OK\r\n");
        assert_eq!(kinds(&tokens), vec![TokenKind::Ok]);
    }
}
