//! RESP Protocol Implementation
//!
//! This module provides the request tokenizer and the reply encoder for the
//! RESP-like wire format RelayKV speaks.
//!
//! ## Overview
//!
//! Requests arrive as arrays of bulk strings. Replies go out as simple
//! strings, errors, bulk strings, null bulk strings or arrays.
//!
//! ## Modules
//!
//! - `types`: Defines `Token` (borrowed, flat) and `RespValue` (owned reply)
//! - `tokenizer`: Cursor-based tokenizer and request frame scanner
//!
//! ## Example
//!
//! ```
//! use relaykv::protocol::{tokenize, RespValue, Token};
//! use bytes::Bytes;
//!
//! // Tokenizing incoming data
//! let tokens = tokenize(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n").unwrap();
//! assert_eq!(tokens[0], Token::Array(2));
//!
//! // Creating responses
//! let response = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(response.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod tokenizer;
pub mod types;

// Re-export commonly used types for convenience
pub use tokenizer::{
    frame_length, parse_decimal, tokenize, FrameScanner, ProtocolError, Tokenizer,
    MAX_ARRAY_ELEMENTS,
};
pub use types::{RespValue, Token};
