use bytes::{Bytes, BytesMut};
use hprose::{
    Error, ErrorKind, Method, Result, Service, Signature,
    io::{Reader, Value, ValueType, Writer, tags::*},
    tcp::Packet,
};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
};

/// Registers the demo functions: `echo`, `greet` and `sum`.
pub fn register(service: &mut Service) {
    let counter = Arc::new(AtomicU64::default());
    service
        .add_function(
            "echo",
            Method::sync(Signature::new([ValueType::String]), |args| {
                Ok(vec![args.str(0)?.into()])
            }),
        )
        .add_function(
            "greet",
            Method::sync(Signature::new([ValueType::String]), move |args| {
                let val = counter.fetch_add(1, Ordering::AcqRel);
                Ok(vec![format!("hello {}({val})!", args.str(0)?).into()])
            }),
        )
        .add_function(
            "sum",
            Method::sync(Signature::variadic([], ValueType::Int), |args| {
                let mut total = 0i64;
                for i in 0..args.len() {
                    total += args.int(i)?;
                }
                Ok(vec![total.into()])
            }),
        );
}

/// Encodes a single call `name(args...)`.
#[must_use]
pub fn encode_call(name: &str, args: &[Value]) -> Bytes {
    let mut writer = Writer::new(false);
    writer.write_byte(TAG_CALL);
    writer.write_string(name);
    if !args.is_empty() {
        writer.write_slice(args);
    }
    writer.write_byte(TAG_END);
    writer.into_bytes()
}

/// Decodes the first result of a response.
///
/// # Errors
///
/// Returns the remote error for an `E` response, or a decode error.
pub fn decode_result(body: Bytes) -> Result<Value> {
    let mut reader = Reader::new(body);
    match reader.check_tags(&[TAG_RESULT, TAG_ERROR, TAG_END])? {
        TAG_RESULT => reader.read_value(),
        TAG_ERROR => Err(Error::invoke(reader.read_string()?)),
        _ => Ok(Value::Nil),
    }
}

/// A minimal client speaking one connection.
pub struct Client {
    stream: TcpStream,
    buffer: BytesMut,
    full_duplex: bool,
    next_id: u32,
}

impl Client {
    /// # Errors
    ///
    /// Returns [`ErrorKind::TcpConnectFailed`] if the server is unreachable.
    pub async fn connect(addr: impl ToSocketAddrs, full_duplex: bool) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpConnectFailed, e.to_string()))?;
        Ok(Self {
            stream,
            buffer: BytesMut::new(),
            full_duplex,
            next_id: 0,
        })
    }

    /// Sends `body` and waits for the frame answering it.
    ///
    /// # Errors
    ///
    /// Fails on any socket or framing error.
    pub async fn request(&mut self, body: Bytes) -> Result<Bytes> {
        let packet = if self.full_duplex {
            self.next_id = self.next_id.wrapping_add(1);
            Packet::full_duplex(self.next_id, body)
        } else {
            Packet::half_duplex(body)
        };
        self.stream
            .write_all(&packet.encode()?)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpSendFailed, e.to_string()))?;

        loop {
            if let Some(response) = Packet::parse(&mut self.buffer)? {
                if response.id != packet.id {
                    tracing::warn!("drop response {:?}, waiting for {:?}", response.id, packet.id);
                    continue;
                }
                return Ok(response.body);
            }
            let n = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| Error::new(ErrorKind::TcpRecvFailed, e.to_string()))?;
            if n == 0 {
                return Err(Error::new(ErrorKind::TcpRecvFailed, "connection closed"));
            }
        }
    }

    /// # Errors
    ///
    /// Fails on transport errors or when the remote call fails.
    pub async fn invoke(&mut self, name: &str, args: &[Value]) -> Result<Value> {
        let body = self.request(encode_call(name, args)).await?;
        decode_result(body)
    }
}
