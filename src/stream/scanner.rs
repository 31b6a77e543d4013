//! Incremental JSON scanner for query responses.
//!
//! The scanner tokenizes a response body as it arrives, checks that the
//! bytes form well-structured JSON, and cuts out the elements of the
//! top-level `rows` array. Each element is handed back as soon as its
//! closing token has been read, so memory use is bounded by the largest
//! row rather than the whole response.

use crate::errors::{CouchError, Result};

const ROWS_FIELD: &[u8] = b"rows";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// What the innermost container accepts next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    KeyOrEnd,
    Key,
    Colon,
    Value,
    ValueOrEnd,
    CommaOrEnd,
}

#[derive(Debug)]
struct Frame {
    container: Container,
    expect: Expect,
    is_rows: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lex {
    Between,
    InString { escape: bool, is_key: bool },
    InLiteral,
}

/// Splits a streamed JSON object into the raw elements of its `rows` array.
#[derive(Debug)]
pub struct RowScanner {
    stack: Vec<Frame>,
    lex: Lex,
    root_started: bool,
    root_done: bool,
    key: Vec<u8>,
    last_key: Vec<u8>,
    literal: Vec<u8>,
    capture: Option<Vec<u8>>,
    offset: usize,
}

impl Default for RowScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl RowScanner {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            lex: Lex::Between,
            root_started: false,
            root_done: false,
            key: Vec::new(),
            last_key: Vec::new(),
            literal: Vec::new(),
            capture: None,
            offset: 0,
        }
    }

    /// Consumes `chunk`, appending every completed row to `rows`.
    ///
    /// Rows completed before a syntax error are still appended, so the
    /// caller can deliver them before reporting the error.
    pub fn feed(&mut self, chunk: &[u8], rows: &mut Vec<Vec<u8>>) -> Result<()> {
        for &b in chunk {
            self.step(b, rows)?;
            self.offset += 1;
        }
        Ok(())
    }

    /// Signals the end of input.
    ///
    /// # Errors
    ///
    /// Returns [`CouchError::Parse`] if the body was empty or truncated.
    pub fn finish(&mut self, rows: &mut Vec<Vec<u8>>) -> Result<()> {
        if self.lex == Lex::InLiteral {
            self.end_literal(rows)?;
        }
        if !self.root_started {
            return Err(CouchError::Parse("empty response body".to_string()));
        }
        if !self.root_done || matches!(self.lex, Lex::InString { .. }) {
            return Err(CouchError::Parse(format!(
                "unexpected end of JSON input at offset {}",
                self.offset
            )));
        }
        Ok(())
    }

    fn step(&mut self, b: u8, rows: &mut Vec<Vec<u8>>) -> Result<()> {
        match self.lex {
            Lex::InString { escape, is_key } => {
                self.push(b);
                if escape {
                    self.lex = Lex::InString { escape: false, is_key };
                } else if b == b'\\' {
                    self.lex = Lex::InString { escape: true, is_key };
                } else if b == b'"' {
                    self.lex = Lex::Between;
                    if is_key {
                        self.end_key();
                    } else {
                        self.end_value(rows);
                    }
                    return Ok(());
                }
                if is_key && self.stack.len() == 1 {
                    self.key.push(b);
                }
                return Ok(());
            }
            Lex::InLiteral => {
                if is_literal_byte(b) {
                    self.push(b);
                    self.literal.push(b);
                    return Ok(());
                }
                self.end_literal(rows)?;
            }
            Lex::Between => {}
        }

        if b.is_ascii_whitespace() {
            return Ok(());
        }
        if self.root_done {
            return Err(self.unexpected(b, "data after the end of the JSON document"));
        }

        match b {
            b'{' | b'[' => {
                self.begin_value(b)?;
                self.push(b);
                let container = if b == b'{' {
                    Container::Object
                } else {
                    Container::Array
                };
                let is_rows = container == Container::Array
                    && self.stack.len() == 1
                    && self.stack[0].container == Container::Object
                    && self.last_key == ROWS_FIELD;
                let expect = match container {
                    Container::Object => Expect::KeyOrEnd,
                    Container::Array => Expect::ValueOrEnd,
                };
                self.stack.push(Frame {
                    container,
                    expect,
                    is_rows,
                });
            }
            b'}' | b']' => {
                let wanted = if b == b'}' {
                    Container::Object
                } else {
                    Container::Array
                };
                let closes = match self.stack.last() {
                    Some(frame) => {
                        frame.container == wanted
                            && matches!(
                                frame.expect,
                                Expect::KeyOrEnd | Expect::ValueOrEnd | Expect::CommaOrEnd
                            )
                    }
                    None => false,
                };
                if !closes {
                    return Err(self.unexpected(b, "closing bracket"));
                }
                self.push(b);
                self.stack.pop();
                if self.stack.is_empty() {
                    self.root_done = true;
                } else {
                    self.end_value(rows);
                }
            }
            b':' => {
                match self.stack.last_mut() {
                    Some(frame) if frame.expect == Expect::Colon => frame.expect = Expect::Value,
                    _ => return Err(self.unexpected(b, "colon")),
                }
                self.push(b);
            }
            b',' => {
                match self.stack.last_mut() {
                    Some(frame) if frame.expect == Expect::CommaOrEnd => {
                        frame.expect = match frame.container {
                            Container::Object => Expect::Key,
                            Container::Array => Expect::Value,
                        };
                    }
                    _ => return Err(self.unexpected(b, "comma")),
                }
                self.push(b);
            }
            b'"' => {
                let is_key = matches!(
                    self.stack.last(),
                    Some(frame) if matches!(frame.expect, Expect::KeyOrEnd | Expect::Key)
                );
                if is_key {
                    if let Some(frame) = self.stack.last_mut() {
                        frame.expect = Expect::Colon;
                    }
                    self.key.clear();
                } else {
                    self.begin_value(b)?;
                }
                self.push(b);
                self.lex = Lex::InString {
                    escape: false,
                    is_key,
                };
            }
            b'-' | b'0'..=b'9' | b't' | b'f' | b'n' => {
                self.begin_value(b)?;
                self.push(b);
                self.literal.clear();
                self.literal.push(b);
                self.lex = Lex::InLiteral;
            }
            _ => return Err(self.unexpected(b, "token")),
        }
        Ok(())
    }

    /// Accepts the start of a value in the current position.
    fn begin_value(&mut self, b: u8) -> Result<()> {
        match self.stack.last_mut() {
            None => {
                if b != b'{' && b != b'[' {
                    return Err(self.unexpected(b, "top-level value, expected an object"));
                }
                self.root_started = true;
            }
            Some(frame) => {
                if !matches!(frame.expect, Expect::Value | Expect::ValueOrEnd) {
                    return Err(self.unexpected(b, "value"));
                }
                frame.expect = Expect::CommaOrEnd;
                if frame.is_rows && self.stack.len() == 2 {
                    self.capture = Some(Vec::new());
                }
            }
        }
        Ok(())
    }

    /// Called whenever a value nested in a container has been fully read.
    fn end_value(&mut self, rows: &mut Vec<Vec<u8>>) {
        let in_rows = self.stack.len() == 2 && self.stack[1].is_rows;
        if in_rows {
            if let Some(row) = self.capture.take() {
                rows.push(row);
            }
        }
    }

    fn end_key(&mut self) {
        if self.stack.len() == 1 {
            self.last_key = std::mem::take(&mut self.key);
        }
    }

    fn end_literal(&mut self, rows: &mut Vec<Vec<u8>>) -> Result<()> {
        self.lex = Lex::Between;
        let valid = match self.literal.as_slice() {
            b"true" | b"false" | b"null" => true,
            number => serde_json::from_slice::<serde_json::Number>(number).is_ok(),
        };
        if !valid {
            return Err(CouchError::Parse(format!(
                "invalid literal `{}` before offset {}",
                String::from_utf8_lossy(&self.literal),
                self.offset
            )));
        }
        self.end_value(rows);
        Ok(())
    }

    fn push(&mut self, b: u8) {
        if let Some(capture) = self.capture.as_mut() {
            capture.push(b);
        }
    }

    fn unexpected(&self, b: u8, what: &str) -> CouchError {
        CouchError::Parse(format!(
            "unexpected {} `{}` at offset {}",
            what,
            b.escape_ascii(),
            self.offset
        ))
    }
}

fn is_literal_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'+' | b'.')
}
