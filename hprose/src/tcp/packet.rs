use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::MAX_BODY_SIZE;
use crate::{Error, ErrorKind, Result};

/// Flag bits of a frame header.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
#[repr(transparent)]
pub struct HeaderFlags(u32);

bitflags! {
    impl HeaderFlags: u32 {
        /// A request id follows the header.
        const FullDuplex = 1 << 31;
    }
}

/// One frame of the stream transport.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Request id, present for full-duplex frames only.
    pub id: Option<u32>,
    pub body: Bytes,
}

impl Packet {
    /// A frame answered strictly in order.
    #[must_use]
    pub fn half_duplex(body: Bytes) -> Self {
        Self { id: None, body }
    }

    /// A frame tagged with a request id, answered in any order.
    #[must_use]
    pub fn full_duplex(id: u32, body: Bytes) -> Self {
        Self { id: Some(id), body }
    }

    #[must_use]
    pub fn is_full_duplex(&self) -> bool {
        self.id.is_some()
    }

    #[must_use]
    pub fn flags(&self) -> HeaderFlags {
        if self.is_full_duplex() {
            HeaderFlags::FullDuplex
        } else {
            HeaderFlags::empty()
        }
    }

    /// The response frame to this request: same duplex mode, same id.
    #[must_use]
    pub fn reply(self, body: Bytes) -> Self {
        Self { id: self.id, body }
    }

    /// Serializes the frame.
    ///
    /// # Errors
    ///
    /// Fails if the body exceeds [`MAX_BODY_SIZE`].
    pub fn encode(&self) -> Result<Bytes> {
        if self.body.len() > MAX_BODY_SIZE {
            return Err(Error::new(
                ErrorKind::TcpSendFailed,
                format!("msg is too long: {}", self.body.len()),
            ));
        }
        let len = u32::try_from(self.body.len())?;
        let mut buf = BytesMut::with_capacity(8 + self.body.len());
        buf.put_u32(len | self.flags().bits());
        if let Some(id) = self.id {
            buf.put_u32(id);
        }
        buf.extend_from_slice(&self.body);
        Ok(buf.freeze())
    }

    /// Splits one complete frame off the front of `buffer`.
    ///
    /// Returns `Ok(None)` while the buffer holds only part of a frame.
    ///
    /// # Errors
    ///
    /// Fails if the header announces a body larger than [`MAX_BODY_SIZE`].
    pub fn parse(buffer: &mut BytesMut) -> Result<Option<Self>> {
        const S: usize = std::mem::size_of::<u32>();
        if buffer.len() < S {
            return Ok(None);
        }
        let header = (&buffer[..S]).get_u32();
        let flags = HeaderFlags::from_bits_truncate(header);
        let len = usize::try_from(header & !HeaderFlags::all().bits())?;
        if len > MAX_BODY_SIZE {
            return Err(Error::new(
                ErrorKind::TcpParseMsgFailed,
                format!("msg is too long: {len}"),
            ));
        }

        let full_duplex = flags.contains(HeaderFlags::FullDuplex);
        let head = if full_duplex { 2 * S } else { S };
        if buffer.len() < head + len {
            return Ok(None);
        }
        buffer.advance(S);
        let id = full_duplex.then(|| buffer.get_u32());
        let body = buffer.split_to(len).freeze();
        Ok(Some(Self { id, body }))
    }
}
