//! Push parser for JSON that arrives in arbitrary chunks.
//!
//! Every completed node is handed to a sink together with its path, children
//! before their parents. The input may hold several whitespace-separated
//! top-level values, which is how Docker frames its progress streams. Each
//! top-level value is dropped once it has been reported.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamParseError {
    #[error("unexpected {found} at byte {offset}")]
    Unexpected { found: String, offset: u64 },
    #[error("invalid literal `{literal}` at byte {offset}")]
    InvalidLiteral { literal: String, offset: u64 },
    #[error("invalid number `{number}` at byte {offset}")]
    InvalidNumber { number: String, offset: u64 },
    #[error("invalid string at byte {offset}: {reason}")]
    InvalidString { offset: u64, reason: String },
    #[error("input ended in the middle of a value")]
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    ValueOrArrayEnd,
    Key,
    KeyOrObjectEnd,
    Colon,
    CommaOrEnd,
}

#[derive(Debug)]
enum Token {
    Str { raw: Vec<u8>, escaped: bool, key: bool },
    Number(Vec<u8>),
    Literal { raw: Vec<u8>, word: &'static [u8] },
}

#[derive(Debug)]
enum Frame {
    Object {
        fields: Map<String, Value>,
        pending_key: Option<String>,
    },
    Array(Vec<Value>),
}

#[derive(Debug)]
pub struct JsonStreamParser {
    stack: Vec<Frame>,
    path: Vec<PathSegment>,
    token: Option<Token>,
    expect: Expect,
    offset: u64,
    failed: Option<StreamParseError>,
}

impl Default for JsonStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonStreamParser {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            path: Vec::new(),
            token: None,
            expect: Expect::Value,
            offset: 0,
            failed: None,
        }
    }

    /// Whether the parser sits between top-level values.
    pub fn is_idle(&self) -> bool {
        self.stack.is_empty() && self.token.is_none()
    }

    /// Consumes `chunk`, reporting every node completed by it. After an
    /// error the parser refuses further input.
    pub fn feed<F>(&mut self, chunk: &[u8], sink: &mut F) -> Result<(), StreamParseError>
    where
        F: FnMut(&[PathSegment], &Value),
    {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        for &byte in chunk {
            if let Err(err) = self.push(byte, sink) {
                self.failed = Some(err.clone());
                return Err(err);
            }
            self.offset += 1;
        }
        Ok(())
    }

    /// Signals end of input. A trailing top-level number is completed here;
    /// anything else still open is reported as truncated.
    pub fn finish<F>(&mut self, sink: &mut F) -> Result<(), StreamParseError>
    where
        F: FnMut(&[PathSegment], &Value),
    {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        if matches!(self.token, Some(Token::Number(_))) {
            self.finish_number(sink)?;
        }
        if self.is_idle() {
            Ok(())
        } else {
            Err(StreamParseError::Truncated)
        }
    }

    fn push<F>(&mut self, byte: u8, sink: &mut F) -> Result<(), StreamParseError>
    where
        F: FnMut(&[PathSegment], &Value),
    {
        match &mut self.token {
            Some(Token::Str { raw, escaped, key }) => {
                raw.push(byte);
                if *escaped {
                    *escaped = false;
                } else if byte == b'\\' {
                    *escaped = true;
                } else if byte == b'"' {
                    let is_key = *key;
                    return self.finish_string(is_key, sink);
                }
                return Ok(());
            }
            Some(Token::Number(raw)) => {
                if is_number_byte(byte) {
                    raw.push(byte);
                    return Ok(());
                }
                self.finish_number(sink)?;
            }
            Some(Token::Literal { raw, word }) => {
                raw.push(byte);
                if !word.starts_with(raw) {
                    return Err(StreamParseError::InvalidLiteral {
                        literal: String::from_utf8_lossy(raw).into_owned(),
                        offset: self.offset,
                    });
                }
                if raw.len() == word.len() {
                    let value = match *word {
                        b"true" => Value::Bool(true),
                        b"false" => Value::Bool(false),
                        _ => Value::Null,
                    };
                    self.token = None;
                    self.complete(value, sink);
                }
                return Ok(());
            }
            None => {}
        }
        self.structural(byte, sink)
    }

    fn structural<F>(&mut self, byte: u8, sink: &mut F) -> Result<(), StreamParseError>
    where
        F: FnMut(&[PathSegment], &Value),
    {
        if byte.is_ascii_whitespace() {
            return Ok(());
        }
        match (self.expect, byte) {
            (Expect::Value | Expect::ValueOrArrayEnd, b'{') => {
                self.begin_value();
                self.stack.push(Frame::Object {
                    fields: Map::new(),
                    pending_key: None,
                });
                self.expect = Expect::KeyOrObjectEnd;
            }
            (Expect::Value | Expect::ValueOrArrayEnd, b'[') => {
                self.begin_value();
                self.stack.push(Frame::Array(Vec::new()));
                self.expect = Expect::ValueOrArrayEnd;
            }
            (Expect::Value | Expect::ValueOrArrayEnd, b'"') => {
                self.begin_value();
                self.token = Some(Token::Str {
                    raw: vec![byte],
                    escaped: false,
                    key: false,
                });
            }
            (Expect::Value | Expect::ValueOrArrayEnd, b'-' | b'0'..=b'9') => {
                self.begin_value();
                self.token = Some(Token::Number(vec![byte]));
            }
            (Expect::Value | Expect::ValueOrArrayEnd, b't' | b'f' | b'n') => {
                self.begin_value();
                let word: &'static [u8] = match byte {
                    b't' => b"true",
                    b'f' => b"false",
                    _ => b"null",
                };
                self.token = Some(Token::Literal {
                    raw: vec![byte],
                    word,
                });
            }
            (Expect::ValueOrArrayEnd, b']') => self.close(sink)?,
            (Expect::Key | Expect::KeyOrObjectEnd, b'"') => {
                self.token = Some(Token::Str {
                    raw: vec![byte],
                    escaped: false,
                    key: true,
                });
            }
            (Expect::KeyOrObjectEnd, b'}') => self.close(sink)?,
            (Expect::Colon, b':') => self.expect = Expect::Value,
            (Expect::CommaOrEnd, b',') => {
                self.expect = match self.stack.last() {
                    Some(Frame::Object { .. }) => Expect::Key,
                    _ => Expect::Value,
                };
            }
            (Expect::CommaOrEnd, b']') if matches!(self.stack.last(), Some(Frame::Array(_))) => {
                self.close(sink)?;
            }
            (Expect::CommaOrEnd, b'}')
                if matches!(self.stack.last(), Some(Frame::Object { .. })) =>
            {
                self.close(sink)?;
            }
            _ => return Err(self.unexpected(byte)),
        }
        Ok(())
    }

    /// Pushes the path segment of a value that starts inside a container.
    fn begin_value(&mut self) {
        match self.stack.last_mut() {
            Some(Frame::Array(items)) => self.path.push(PathSegment::Index(items.len())),
            Some(Frame::Object { pending_key, .. }) => {
                let key = pending_key.take().unwrap_or_default();
                self.path.push(PathSegment::Key(key));
            }
            None => {}
        }
    }

    fn close<F>(&mut self, sink: &mut F) -> Result<(), StreamParseError>
    where
        F: FnMut(&[PathSegment], &Value),
    {
        let value = match self.stack.pop() {
            Some(Frame::Object { fields, .. }) => Value::Object(fields),
            Some(Frame::Array(items)) => Value::Array(items),
            None => return Err(StreamParseError::Truncated),
        };
        self.complete(value, sink);
        Ok(())
    }

    /// Reports `value` at the current path and hands it to its parent.
    fn complete<F>(&mut self, value: Value, sink: &mut F)
    where
        F: FnMut(&[PathSegment], &Value),
    {
        sink(&self.path, &value);
        let segment = if self.stack.is_empty() {
            None
        } else {
            self.path.pop()
        };
        match (self.stack.last_mut(), segment) {
            (Some(Frame::Array(items)), _) => {
                items.push(value);
                self.expect = Expect::CommaOrEnd;
            }
            (Some(Frame::Object { fields, .. }), Some(PathSegment::Key(key))) => {
                fields.insert(key, value);
                self.expect = Expect::CommaOrEnd;
            }
            (Some(Frame::Object { .. }), _) => self.expect = Expect::CommaOrEnd,
            (None, _) => self.expect = Expect::Value,
        }
    }

    fn finish_string<F>(&mut self, is_key: bool, sink: &mut F) -> Result<(), StreamParseError>
    where
        F: FnMut(&[PathSegment], &Value),
    {
        let Some(Token::Str { raw, .. }) = self.token.take() else {
            return Ok(());
        };
        let text: String =
            serde_json::from_slice(&raw).map_err(|err| StreamParseError::InvalidString {
                offset: self.offset,
                reason: err.to_string(),
            })?;
        if is_key {
            if let Some(Frame::Object { pending_key, .. }) = self.stack.last_mut() {
                *pending_key = Some(text);
            }
            self.expect = Expect::Colon;
        } else {
            self.complete(Value::String(text), sink);
        }
        Ok(())
    }

    fn finish_number<F>(&mut self, sink: &mut F) -> Result<(), StreamParseError>
    where
        F: FnMut(&[PathSegment], &Value),
    {
        let Some(Token::Number(raw)) = self.token.take() else {
            return Ok(());
        };
        match serde_json::from_slice::<Value>(&raw) {
            Ok(value @ Value::Number(_)) => {
                self.complete(value, sink);
                Ok(())
            }
            _ => Err(StreamParseError::InvalidNumber {
                number: String::from_utf8_lossy(&raw).into_owned(),
                offset: self.offset,
            }),
        }
    }

    fn unexpected(&self, byte: u8) -> StreamParseError {
        let found = if byte.is_ascii_graphic() {
            format!("`{}`", byte as char)
        } else {
            format!("byte 0x{byte:02x}")
        };
        StreamParseError::Unexpected {
            found,
            offset: self.offset,
        }
    }
}

fn is_number_byte(byte: u8) -> bool {
    matches!(byte, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
}

#[cfg(test)]
#[path = "tests/json_stream_tests.rs"]
mod tests;
