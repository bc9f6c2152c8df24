//! Messages exchanged between the I/O thread and the worker thread.

use crate::connection::ConnectionId;
use bytes::Bytes;

/// One complete request frame read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub connection_id: ConnectionId,
    pub payload: Bytes,
}

impl Request {
    pub fn new(connection_id: ConnectionId, payload: Bytes) -> Self {
        Self {
            connection_id,
            payload,
        }
    }
}

/// The encoded reply for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub connection_id: ConnectionId,
    pub payload: Bytes,
}

impl Response {
    pub fn new(connection_id: ConnectionId, payload: Bytes) -> Self {
        Self {
            connection_id,
            payload,
        }
    }
}
