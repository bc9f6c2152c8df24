//! Server Configuration
//!
//! Read-only settings shared by the binary, the reactor and the command
//! handler. The binary builds one from command-line arguments; tests build
//! one directly.

use std::fmt;
use std::path::PathBuf;

/// Default per-connection receive/send buffer size (64 KB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Replication role reported by `INFO replication`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Master,
    Slave,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Slave => write!(f, "slave"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Directory holding the snapshot file
    pub dir: String,
    /// Snapshot file name inside `dir`
    pub dbfilename: String,
    pub role: Role,
    /// Capacity of each connection's receive and send buffer
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            dir: String::new(),
            dbfilename: String::new(),
            role: Role::Master,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full path of the snapshot file, if both `dir` and `dbfilename` are set.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        if self.dir.is_empty() || self.dbfilename.is_empty() {
            return None;
        }
        Some(PathBuf::from(&self.dir).join(&self.dbfilename))
    }
}
