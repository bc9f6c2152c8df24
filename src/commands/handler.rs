//! Command Handler Module
//!
//! This module implements the commands RelayKV understands. It takes the flat
//! token list of one request, validates its shape and dispatches on the
//! command name.
//!
//! ## Supported Commands
//!
//! - `PING` - Test connection
//! - `ECHO message` - Echo message
//! - `SET key value [PX milliseconds]` - Insert a key (never overwrites)
//! - `GET key` - Get a key's value
//! - `CONFIG GET dir|dbfilename` - Read snapshot settings
//! - `KEYS pattern` - Rejected with an error reply
//! - `INFO replication` - Report the replication role
//!
//! ## Request Shape
//!
//! ```text
//! [Array(3), BulkString("SET"), BulkString("k"), BulkString("v")]
//!     │           │                  └───────────────┴── arguments
//!     │           └── command name (case-insensitive)
//!     └── element count; only this many tokens after it are looked at
//! ```
//!
//! Every failure becomes an error reply. Nothing here panics on client input.

use crate::config::ServerConfig;
use crate::protocol::{parse_decimal, RespValue, Token};
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Dispatches tokenized requests against a store.
///
/// The handler holds only read-only configuration. The store is passed in on
/// every call because it belongs to the worker thread.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    config: Arc<ServerConfig>,
}

impl CommandHandler {
    /// Creates a new command handler with the given server configuration.
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }

    /// Executes one request and returns the reply.
    ///
    /// # Arguments
    ///
    /// * `store` - The key-value store the command runs against
    /// * `tokens` - The flat tokens of one request, array header first
    pub fn execute(&self, store: &mut StorageEngine, tokens: &[Token<'_>]) -> RespValue {
        let args = match verify_request(tokens) {
            Ok(args) => args,
            Err(reply) => return reply,
        };

        // count == 0
        let Some(first) = args.first() else {
            return RespValue::array(Vec::new());
        };

        let name = match first {
            Token::BulkString(name) => *name,
            _ => return RespValue::error("Expected second token to be a BULK_STRING type"),
        };

        debug!(command = %String::from_utf8_lossy(name), args = args.len() - 1, "Executing command");
        self.dispatch(store, name, args)
    }

    /// Dispatches a command to its handler.
    ///
    /// `args` includes the command name at index 0.
    fn dispatch(&self, store: &mut StorageEngine, name: &[u8], args: &[Token<'_>]) -> RespValue {
        if name.eq_ignore_ascii_case(b"PING") {
            RespValue::pong()
        } else if name.eq_ignore_ascii_case(b"ECHO") {
            self.cmd_echo(args)
        } else if name.eq_ignore_ascii_case(b"SET") {
            self.cmd_set(store, args)
        } else if name.eq_ignore_ascii_case(b"GET") {
            self.cmd_get(store, args)
        } else if name.eq_ignore_ascii_case(b"CONFIG") {
            self.cmd_config(args)
        } else if name.eq_ignore_ascii_case(b"KEYS") {
            self.cmd_keys(args)
        } else if name.eq_ignore_ascii_case(b"INFO") {
            self.cmd_info(args)
        } else {
            RespValue::error(format!("Unknown command: {}", String::from_utf8_lossy(name)))
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// ECHO message
    fn cmd_echo(&self, args: &[Token<'_>]) -> RespValue {
        if args.len() != 2 {
            return RespValue::error("ECHO command expects exactly one argument");
        }

        match bulk_arg(args, 1, "ECHO") {
            Ok(msg) => RespValue::bulk_string(Bytes::copy_from_slice(msg)),
            Err(reply) => reply,
        }
    }

    /// SET key value [PX milliseconds]
    fn cmd_set(&self, store: &mut StorageEngine, args: &[Token<'_>]) -> RespValue {
        if args.len() != 3 && args.len() != 5 {
            return wrong_arity("set");
        }

        let key = match bulk_arg(args, 1, "SET") {
            Ok(k) => k,
            Err(reply) => return reply,
        };
        let value = match bulk_arg(args, 2, "SET") {
            Ok(v) => v,
            Err(reply) => return reply,
        };

        let ttl = if args.len() == 5 {
            let option = match bulk_arg(args, 3, "SET") {
                Ok(o) => o,
                Err(reply) => return reply,
            };
            if !option.eq_ignore_ascii_case(b"PX") {
                return RespValue::error(format!(
                    "Unknown expiry option: {}",
                    String::from_utf8_lossy(option)
                ));
            }

            let raw = match bulk_arg(args, 4, "SET") {
                Ok(ms) => ms,
                Err(reply) => return reply,
            };
            match parse_decimal(raw) {
                Ok(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
                _ => {
                    return RespValue::error(format!(
                        "Invalid expiry time: {}",
                        String::from_utf8_lossy(raw)
                    ))
                }
            }
        } else {
            None
        };

        if store.set(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value), ttl) {
            RespValue::ok()
        } else {
            RespValue::error(format!(
                "Key already exists: {}",
                String::from_utf8_lossy(key)
            ))
        }
    }

    /// GET key
    fn cmd_get(&self, store: &mut StorageEngine, args: &[Token<'_>]) -> RespValue {
        if args.len() != 2 {
            return wrong_arity("get");
        }

        let key = match bulk_arg(args, 1, "GET") {
            Ok(k) => k,
            Err(reply) => return reply,
        };

        match store.get(key) {
            Some(value) => RespValue::bulk_string(value),
            None => RespValue::null(),
        }
    }

    /// CONFIG GET dir|dbfilename
    ///
    /// The first element of the reply is always `dir`, whichever parameter
    /// was asked for. Existing clients read the second element only.
    fn cmd_config(&self, args: &[Token<'_>]) -> RespValue {
        if args.len() != 3 {
            return wrong_arity("config");
        }

        let subcommand = match bulk_arg(args, 1, "CONFIG") {
            Ok(s) => s,
            Err(reply) => return reply,
        };
        if !subcommand.eq_ignore_ascii_case(b"GET") {
            return RespValue::error("Only GET is supported for CONFIG command");
        }

        let parameter = match bulk_arg(args, 2, "CONFIG") {
            Ok(p) => p,
            Err(reply) => return reply,
        };
        let value = if parameter.eq_ignore_ascii_case(b"dir") {
            &self.config.dir
        } else if parameter.eq_ignore_ascii_case(b"dbfilename") {
            &self.config.dbfilename
        } else {
            return RespValue::error("Only dir and dbfilename are supported");
        };

        RespValue::array(vec![
            RespValue::bulk_string(Bytes::from_static(b"dir")),
            RespValue::bulk_string(Bytes::copy_from_slice(value.as_bytes())),
        ])
    }

    /// KEYS pattern
    ///
    /// Listing keys is not offered over the wire; both forms answer with an
    /// error. [`StorageEngine::keys`] is therefore only exercised by tests.
    /// Enabling the command would mean answering `*` from it, which lists
    /// every key.
    fn cmd_keys(&self, args: &[Token<'_>]) -> RespValue {
        if args.len() != 2 {
            return wrong_arity("keys");
        }

        match bulk_arg(args, 1, "KEYS") {
            Ok(b"*") => RespValue::error("KEYS * is not supported"),
            Ok(_) => RespValue::error("Only \"*\" is accepted as a KEYS pattern"),
            Err(reply) => reply,
        }
    }

    /// INFO replication
    fn cmd_info(&self, args: &[Token<'_>]) -> RespValue {
        if args.len() != 2 {
            return wrong_arity("info");
        }

        let section = match bulk_arg(args, 1, "INFO") {
            Ok(s) => s,
            Err(reply) => return reply,
        };
        if !section.eq_ignore_ascii_case(b"replication") {
            return RespValue::error("Only replication is supported for INFO command");
        }

        RespValue::bulk_string(Bytes::from(format!("role:{}", self.config.role)))
    }
}

// ========================================================================
// Helper functions
// ========================================================================

/// Checks the request header and returns the `count` tokens after it.
fn verify_request<'t, 'a>(tokens: &'t [Token<'a>]) -> Result<&'t [Token<'a>], RespValue> {
    let Some(first) = tokens.first() else {
        return Err(RespValue::error("Empty message"));
    };

    let count = match first {
        Token::Array(count) => *count,
        _ => return Err(RespValue::error("Expected first token to be an ARRAY type")),
    };

    if count < 0 {
        return Err(RespValue::error(format!(
            "Invalid number of array elements: {}",
            count
        )));
    }

    let rest = &tokens[1..];
    let count = usize::try_from(count).unwrap_or(usize::MAX);
    if rest.len() < count {
        return Err(RespValue::error(
            "Not enough tokens for the number of array elements",
        ));
    }

    Ok(&rest[..count])
}

/// Extracts the bytes of argument `index`, which must be a bulk string.
fn bulk_arg<'a>(args: &[Token<'a>], index: usize, cmd: &str) -> Result<&'a [u8], RespValue> {
    args.get(index).and_then(Token::as_bulk).ok_or_else(|| {
        RespValue::error(format!(
            "Expected argument {} to be a BULK_STRING type for {} command",
            index, cmd
        ))
    })
}

fn wrong_arity(cmd: &str) -> RespValue {
    RespValue::error(format!("wrong number of arguments for '{}' command", cmd))
}
