//! Flat RESP Tokenizer
//!
//! This module turns raw request bytes into a flat sequence of [`Token`]s.
//! It walks the input once, left to right, with a single cursor and no
//! recursion: an array header is emitted as `Array(n)` and its elements simply
//! follow it in the token stream.
//!
//! ## Grammar
//!
//! ```text
//! request  = array-hdr *element
//! array-hdr = "*" number CRLF
//! element  = "$" number CRLF <number bytes> CRLF
//!          | "$-1" CRLF
//! ```
//!
//! Bulk string tokens are views into the input; nothing is copied.
//!
//! ## Frame Scanning
//!
//! TCP delivers a byte stream, not messages. [`FrameScanner`] walks one
//! complete request without building tokens that outlive the call, so the I/O
//! thread can cut pipelined or fragmented input into whole requests before
//! copying them onto the request queue.

use crate::protocol::types::{prefix, Token, CRLF};
use thiserror::Error;

/// Errors that can occur while tokenizing request bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A token starts with a byte other than `*` or `$`
    #[error("invalid RESP prefix: {0:?}")]
    InvalidPrefix(char),

    /// A length or count field is not a decimal integer
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Array header count too large to frame
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// The input ends in the middle of a token
    #[error("incomplete input")]
    Incomplete,

    /// Bulk payload not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,
}

/// Parses an ASCII decimal integer with an optional leading `-`.
///
/// Empty input, stray characters and values that overflow `i64` are errors.
#[inline]
pub fn parse_decimal(digits: &[u8]) -> Result<i64, ProtocolError> {
    let invalid = || ProtocolError::InvalidInteger(String::from_utf8_lossy(digits).into_owned());

    let (negative, body) = match digits.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, digits),
    };
    if body.is_empty() {
        return Err(invalid());
    }

    let mut value: i64 = 0;
    for &byte in body {
        if !byte.is_ascii_digit() {
            return Err(invalid());
        }
        let digit = i64::from(byte - b'0');
        value = value
            .checked_mul(10)
            .and_then(|v| {
                if negative {
                    v.checked_sub(digit)
                } else {
                    v.checked_add(digit)
                }
            })
            .ok_or_else(invalid)?;
    }

    Ok(value)
}

/// A cursor over request bytes that yields one token at a time.
///
/// # Example
///
/// ```
/// use relaykv::protocol::{Token, Tokenizer};
///
/// let input = b"*2\r\n$4\r\nECHO\r\n$3\r\nhey\r\n";
/// let tokens: Result<Vec<_>, _> = Tokenizer::new(input).collect();
/// assert_eq!(
///     tokens.unwrap(),
///     vec![Token::Array(2), Token::BulkString(b"ECHO"), Token::BulkString(b"hey")]
/// );
/// ```
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    input: &'a [u8],
    position: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, position: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Reads up to the next CRLF and steps over it.
    fn read_line(&mut self) -> Result<&'a [u8], ProtocolError> {
        let rest = &self.input[self.position..];
        let end = find_crlf(rest).ok_or(ProtocolError::Incomplete)?;
        self.position += end + CRLF.len();
        Ok(&rest[..end])
    }

    fn read_array(&mut self) -> Result<Token<'a>, ProtocolError> {
        let count = parse_decimal(self.read_line()?)?;
        Ok(Token::Array(count))
    }

    fn read_bulk_string(&mut self) -> Result<Token<'a>, ProtocolError> {
        let length = parse_decimal(self.read_line()?)?;

        if length == -1 {
            return Ok(Token::Null);
        }
        if length < 0 {
            return Err(ProtocolError::InvalidBulkLength(length));
        }

        let length = usize::try_from(length).map_err(|_| ProtocolError::InvalidBulkLength(length))?;
        let start = self.position;
        let end = start
            .checked_add(length)
            .ok_or(ProtocolError::InvalidBulkLength(length as i64))?;

        if self.input.len() < end + CRLF.len() {
            return Err(ProtocolError::Incomplete);
        }
        if &self.input[end..end + CRLF.len()] != CRLF {
            return Err(ProtocolError::MissingCrlf);
        }

        self.position = end + CRLF.len();
        Ok(Token::BulkString(&self.input[start..end]))
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Result<Token<'a>, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        let prefix_byte = *self.input.get(self.position)?;
        self.position += 1;

        let result = match prefix_byte {
            prefix::ARRAY => self.read_array(),
            prefix::BULK_STRING => self.read_bulk_string(),
            other => Err(ProtocolError::InvalidPrefix(char::from(other))),
        };

        // Stop at the first error rather than resynchronizing mid-stream.
        if result.is_err() {
            self.position = self.input.len();
        }
        Some(result)
    }
}

/// Tokenizes a whole buffer.
pub fn tokenize(input: &[u8]) -> Result<Vec<Token<'_>>, ProtocolError> {
    Tokenizer::new(input).collect()
}

/// Largest element count accepted in an array header while framing.
pub const MAX_ARRAY_ELEMENTS: i64 = 1024 * 1024;

/// Resumable scanner for request boundaries.
///
/// A request that arrives in pieces is scanned once: complete tokens are
/// remembered between calls, so each call only looks at the bytes after the
/// last complete token. The scanner must be given the same growing buffer
/// (same start) until it reports a frame or an error, after which it starts
/// over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameScanner {
    /// Length of the complete tokens seen so far
    scanned: usize,
    /// Tokens still needed to finish the frame
    remaining: i64,
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameScanner {
    pub fn new() -> Self {
        Self {
            scanned: 0,
            remaining: 1,
        }
    }

    /// Bytes of the current frame already scanned.
    pub fn scanned(&self) -> usize {
        self.scanned
    }

    /// Continues scanning `buf`.
    ///
    /// - `Ok(Some(n))`: the first `n` bytes form one request
    /// - `Ok(None)`: the request is not complete yet
    /// - `Err(e)`: the bytes can never form a valid request
    pub fn scan(&mut self, buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
        let result = self.advance(buf);
        if !matches!(result, Ok(None)) {
            *self = Self::new();
        }
        result
    }

    fn advance(&mut self, buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
        let base = self.scanned;
        let Some(rest) = buf.get(base..) else {
            return Ok(None);
        };
        let mut tokens = Tokenizer::new(rest);

        while self.remaining > 0 {
            match tokens.next() {
                None | Some(Err(ProtocolError::Incomplete)) => return Ok(None),
                Some(Err(e)) => return Err(e),
                Some(Ok(Token::Array(count))) => {
                    if count > MAX_ARRAY_ELEMENTS {
                        return Err(ProtocolError::InvalidArrayLength(count));
                    }
                    self.remaining = self
                        .remaining
                        .checked_add(count.max(0))
                        .ok_or(ProtocolError::InvalidArrayLength(count))?;
                }
                Some(Ok(_)) => {}
            }
            self.remaining -= 1;
            self.scanned = base + tokens.position();
        }

        Ok(Some(self.scanned))
    }
}

/// Returns the byte length of the first complete request in `buf`.
///
/// One-shot form of [`FrameScanner::scan`]. Elements of nested arrays are
/// counted as well, so the frame always ends after the last element the
/// headers declare.
pub fn frame_length(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    FrameScanner::new().scan(buf)
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == CRLF)
}
