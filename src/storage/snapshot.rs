//! Startup Snapshot Loader
//!
//! Seeds the storage engine from an RDB-style dump file before the server
//! starts accepting connections. Only the parts of the format needed for
//! string keys are understood:
//!
//! ```text
//! "REDIS" <4 ascii version digits>
//! 0xFA <string name> <string value>        auxiliary field (skipped)
//! 0xFE <length db-number>                  database selector (ignored)
//! 0xFB <length size> <length expires>      hash table size hints (ignored)
//! 0xFD <u32 LE unix seconds>               expiry for the next record
//! 0xFC <u64 LE unix milliseconds>          expiry for the next record
//! 0x00 <string key> <string value>         string record
//! 0xFF <8 byte checksum>                   end of file (checksum not verified)
//! ```
//!
//! Lengths use the RDB 2-bit prefix encoding. Strings are either
//! length-prefixed or integer-encoded (`0xC0`/`0xC1`/`0xC2`). Records whose
//! expiry already lies in the past are skipped; the others are stored with the
//! remaining time as their TTL.

use crate::storage::StorageEngine;
use bytes::{Buf, Bytes};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

const MAGIC: &[u8] = b"REDIS";
const HEADER_LEN: usize = 9;

mod opcode {
    pub const AUX: u8 = 0xFA;
    pub const RESIZE_DB: u8 = 0xFB;
    pub const EXPIRE_TIME_MS: u8 = 0xFC;
    pub const EXPIRE_TIME: u8 = 0xFD;
    pub const SELECT_DB: u8 = 0xFE;
    pub const EOF: u8 = 0xFF;
    pub const STRING: u8 = 0x00;
}

/// Errors that can occur while loading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error reading snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("not an RDB snapshot (bad magic)")]
    BadMagic,

    #[error("snapshot truncated at offset {0}")]
    Truncated(usize),

    #[error("unsupported value type {kind:#04x} at offset {offset}")]
    UnsupportedValueType { kind: u8, offset: usize },

    #[error("unsupported string encoding {0:#04x}")]
    UnsupportedEncoding(u8),
}

/// Summary of a snapshot load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Records inserted into the engine
    pub loaded: usize,
    /// Records dropped because their expiry had already passed
    pub expired: usize,
}

/// Loads the snapshot at `path` into `engine`.
///
/// A missing file is not an error: the server simply starts empty.
pub fn load(path: &Path, engine: &mut StorageEngine) -> Result<LoadReport, SnapshotError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No snapshot found, starting empty");
            return Ok(LoadReport::default());
        }
        Err(e) => return Err(e.into()),
    };

    let report = load_from_bytes(&data, engine, SystemTime::now())?;
    info!(
        path = %path.display(),
        loaded = report.loaded,
        expired = report.expired,
        "Snapshot loaded"
    );
    Ok(report)
}

/// Loads an in-memory snapshot, evaluating expiries against `now`.
pub fn load_from_bytes(
    data: &[u8],
    engine: &mut StorageEngine,
    now: SystemTime,
) -> Result<LoadReport, SnapshotError> {
    let mut reader = Reader::new(data);

    let header = reader.take(HEADER_LEN).map_err(|_| SnapshotError::BadMagic)?;
    if &header[..MAGIC.len()] != MAGIC {
        return Err(SnapshotError::BadMagic);
    }

    let mut report = LoadReport::default();
    let mut expires_at: Option<SystemTime> = None;

    // A file cut short after a complete record is accepted as-is.
    while reader.has_remaining() {
        let offset = reader.offset();
        match reader.u8()? {
            opcode::AUX => {
                let name = reader.string()?;
                let value = reader.string()?;
                debug!(
                    name = %String::from_utf8_lossy(&name),
                    value = %String::from_utf8_lossy(&value),
                    "Snapshot aux field"
                );
            }
            opcode::SELECT_DB => {
                reader.length()?;
            }
            opcode::RESIZE_DB => {
                reader.length()?;
                reader.length()?;
            }
            opcode::EXPIRE_TIME => {
                let secs = reader.u32_le()?;
                expires_at = Some(UNIX_EPOCH + Duration::from_secs(u64::from(secs)));
            }
            opcode::EXPIRE_TIME_MS => {
                let millis = reader.u64_le()?;
                expires_at = Some(UNIX_EPOCH + Duration::from_millis(millis));
            }
            opcode::STRING => {
                let key = reader.string()?;
                let value = reader.string()?;

                let ttl = match expires_at.take() {
                    None => None,
                    Some(at) => match at.duration_since(now) {
                        Ok(remaining) => Some(remaining),
                        Err(_) => {
                            report.expired += 1;
                            continue;
                        }
                    },
                };

                if engine.set(key, value, ttl) {
                    report.loaded += 1;
                }
            }
            opcode::EOF => break,
            kind => return Err(SnapshotError::UnsupportedValueType { kind, offset }),
        }
    }

    Ok(report)
}

/// A decoded RDB length field.
enum Length {
    Plain(usize),
    /// Special string encoding selector (low 6 bits of a `0b11` prefix byte)
    Encoded(u8),
}

struct Reader<'a> {
    buf: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            total: buf.len(),
        }
    }

    fn offset(&self) -> usize {
        self.total - self.buf.remaining()
    }

    fn has_remaining(&self) -> bool {
        self.buf.has_remaining()
    }

    fn ensure(&self, n: usize) -> Result<(), SnapshotError> {
        if self.buf.remaining() < n {
            return Err(SnapshotError::Truncated(self.offset()));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<Bytes, SnapshotError> {
        self.ensure(n)?;
        Ok(self.buf.copy_to_bytes(n))
    }

    fn u8(&mut self) -> Result<u8, SnapshotError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn u32_le(&mut self) -> Result<u32, SnapshotError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn u64_le(&mut self) -> Result<u64, SnapshotError> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    fn raw_length(&mut self) -> Result<Length, SnapshotError> {
        let first = self.u8()?;
        let length = match first >> 6 {
            0b00 => Length::Plain(usize::from(first & 0x3F)),
            0b01 => {
                let next = self.u8()?;
                Length::Plain((usize::from(first & 0x3F) << 8) | usize::from(next))
            }
            0b10 if first == 0x80 => {
                self.ensure(4)?;
                Length::Plain(self.buf.get_u32() as usize)
            }
            0b10 if first == 0x81 => {
                self.ensure(8)?;
                Length::Plain(self.buf.get_u64() as usize)
            }
            0b10 => return Err(SnapshotError::UnsupportedEncoding(first)),
            _ => Length::Encoded(first & 0x3F),
        };
        Ok(length)
    }

    fn length(&mut self) -> Result<usize, SnapshotError> {
        match self.raw_length()? {
            Length::Plain(n) => Ok(n),
            Length::Encoded(kind) => Err(SnapshotError::UnsupportedEncoding(0xC0 | kind)),
        }
    }

    fn string(&mut self) -> Result<Bytes, SnapshotError> {
        match self.raw_length()? {
            Length::Plain(n) => self.take(n),
            Length::Encoded(0) => {
                self.ensure(1)?;
                Ok(Bytes::from(self.buf.get_i8().to_string()))
            }
            Length::Encoded(1) => {
                self.ensure(2)?;
                Ok(Bytes::from(self.buf.get_i16_le().to_string()))
            }
            Length::Encoded(2) => {
                self.ensure(4)?;
                Ok(Bytes::from(self.buf.get_i32_le().to_string()))
            }
            Length::Encoded(kind) => Err(SnapshotError::UnsupportedEncoding(0xC0 | kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_string(out: &mut Vec<u8>, s: &[u8]) {
        assert!(s.len() < 64);
        out.push(s.len() as u8);
        out.extend_from_slice(s);
    }

    fn unix_ms(t: SystemTime) -> u64 {
        t.duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
    }

    fn sample_snapshot(now: SystemTime) -> Vec<u8> {
        let mut out = b"REDIS0011".to_vec();

        out.push(opcode::AUX);
        push_string(&mut out, b"redis-ver");
        push_string(&mut out, b"7.2.0");

        out.extend_from_slice(&[opcode::SELECT_DB, 0x00, opcode::RESIZE_DB, 0x04, 0x02]);

        out.push(opcode::STRING);
        push_string(&mut out, b"foo");
        push_string(&mut out, b"bar");

        // Expires an hour from now
        out.push(opcode::EXPIRE_TIME_MS);
        out.extend_from_slice(&unix_ms(now + Duration::from_secs(3600)).to_le_bytes());
        out.push(opcode::STRING);
        push_string(&mut out, b"session");
        push_string(&mut out, b"token");

        // Already expired
        out.push(opcode::EXPIRE_TIME);
        out.extend_from_slice(&1_000u32.to_le_bytes());
        out.push(opcode::STRING);
        push_string(&mut out, b"old");
        push_string(&mut out, b"value");

        // Integer-encoded value
        out.push(opcode::STRING);
        push_string(&mut out, b"answer");
        out.extend_from_slice(&[0xC0, 42]);

        out.push(opcode::EOF);
        out.extend_from_slice(&[0u8; 8]);
        out
    }

    #[test]
    fn test_load_records() {
        let now = SystemTime::now();
        let mut engine = StorageEngine::new();

        let report = load_from_bytes(&sample_snapshot(now), &mut engine, now).unwrap();

        assert_eq!(report, LoadReport { loaded: 3, expired: 1 });
        assert_eq!(engine.get(b"foo"), Some(Bytes::from("bar")));
        assert_eq!(engine.get(b"session"), Some(Bytes::from("token")));
        assert_eq!(engine.get(b"answer"), Some(Bytes::from("42")));
        assert_eq!(engine.get(b"old"), None);
    }

    #[test]
    fn test_two_byte_length() {
        let mut out = b"REDIS0011".to_vec();
        let value = vec![b'x'; 300];
        out.push(opcode::STRING);
        push_string(&mut out, b"big");
        out.push(0x40 | (300 >> 8) as u8);
        out.push((300 & 0xFF) as u8);
        out.extend_from_slice(&value);
        out.push(opcode::EOF);

        let mut engine = StorageEngine::new();
        load_from_bytes(&out, &mut engine, SystemTime::now()).unwrap();
        assert_eq!(engine.get(b"big").map(|v| v.len()), Some(300));
    }

    #[test]
    fn test_bad_magic() {
        let mut engine = StorageEngine::new();
        let result = load_from_bytes(b"NOTRDB0011", &mut engine, SystemTime::now());
        assert!(matches!(result, Err(SnapshotError::BadMagic)));

        let result = load_from_bytes(b"RED", &mut engine, SystemTime::now());
        assert!(matches!(result, Err(SnapshotError::BadMagic)));
    }

    #[test]
    fn test_truncated_record() {
        let mut out = b"REDIS0011".to_vec();
        out.push(opcode::STRING);
        push_string(&mut out, b"key");
        out.push(10); // claims 10 bytes, provides 2
        out.extend_from_slice(b"ab");

        let mut engine = StorageEngine::new();
        let result = load_from_bytes(&out, &mut engine, SystemTime::now());
        assert!(matches!(result, Err(SnapshotError::Truncated(_))));
    }

    #[test]
    fn test_unsupported_value_type() {
        let mut out = b"REDIS0011".to_vec();
        out.push(0x01); // list
        push_string(&mut out, b"key");

        let mut engine = StorageEngine::new();
        let result = load_from_bytes(&out, &mut engine, SystemTime::now());
        assert!(matches!(
            result,
            Err(SnapshotError::UnsupportedValueType { kind: 0x01, offset: 9 })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.rdb");
        let now = SystemTime::now();
        std::fs::write(&path, sample_snapshot(now)).unwrap();

        let mut engine = StorageEngine::new();
        let report = load(&path, &mut engine).unwrap();
        assert_eq!(report.loaded, 3);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = StorageEngine::new();

        let report = load(&dir.path().join("missing.rdb"), &mut engine).unwrap();
        assert_eq!(report, LoadReport::default());
        assert!(engine.is_empty());
    }
}
