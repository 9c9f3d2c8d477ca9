//! Stream transport: length-prefixed frames over TCP.
//!
//! Each frame starts with a big-endian `u32` whose low 31 bits hold the body
//! length and whose top bit marks a full-duplex frame. A full-duplex frame
//! carries a big-endian `u32` request id before its body; its response
//! echoes the id and may overtake responses to earlier requests. A
//! half-duplex response is fully written before the next frame is read.

use crate::io::ValueType;

/// Largest body a frame may carry.
pub const MAX_BODY_SIZE: usize = 64 << 20;

/// Parameter type bound to the connection's [`SocketContext`].
pub const SOCKET_CONTEXT: ValueType = ValueType::Transport("socket_context");

/// Parameter type bound to the live [`Connection`].
pub const CONNECTION: ValueType = ValueType::Transport("connection");

mod packet;
pub use packet::{HeaderFlags, Packet};

mod connection;
pub use connection::Connection;

mod socket_context;
pub use socket_context::{SocketContext, SocketFixer};

mod handler;
pub(crate) use handler::serve_connection;
