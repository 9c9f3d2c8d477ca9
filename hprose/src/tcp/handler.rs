use std::{io::IoSlice, sync::Arc};

use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use super::{Connection, Packet, SocketContext, connection::Frame};
use crate::{Error, ErrorKind, Result, Service, ServiceContext};

/// Serves one connection until the peer goes away, an IO or framing error
/// occurs, [`Connection::close`] is called or `stop` is cancelled.
///
/// `on_close` fires exactly once for every accepted connection.
pub(crate) async fn serve_connection(
    service: Arc<Service>,
    stream: TcpStream,
    id: u64,
    stop: CancellationToken,
) {
    let (peer_addr, local_addr) = match (stream.peer_addr(), stream.local_addr()) {
        (Ok(peer_addr), Ok(local_addr)) => (peer_addr, local_addr),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!("connection {id} has no address: {e}");
            return;
        }
    };
    let (recv_stream, send_stream) = stream.into_split();
    let (sender, receiver) = mpsc::channel(1024);
    let connection = Connection::new(id, peer_addr, local_addr, sender);
    let socket_ctx = Arc::new(SocketContext::new(connection.clone()));
    let ctx = ServiceContext::with_transport(socket_ctx.clone());

    if let Err(e) = service.fire_accept_event(&ctx) {
        let e = service.fire_error_event(e, &ctx);
        tracing::warn!("connection from {peer_addr} rejected: {e}");
        return;
    }
    tracing::debug!("connection {id} from {peer_addr} accepted");

    let recv_loop = async {
        let result = tokio::select! {
            () = connection.closed() => Ok(()),
            r = start_recv_loop(recv_stream, &service, &socket_ctx) => r,
        };
        connection.close();
        result
    };
    let send_loop = async {
        let result = start_send_loop(send_stream, receiver, &connection).await;
        connection.close();
        result
    };
    let close_on_stop = async {
        tokio::select! {
            () = stop.cancelled() => connection.close(),
            () = connection.closed() => {}
        }
    };
    let (recv_result, send_result, ()) = tokio::join!(recv_loop, send_loop, close_on_stop);
    for e in [recv_result.err(), send_result.err()].into_iter().flatten() {
        tracing::warn!("connection {id} from {peer_addr} failed: {e}");
        service.fire_error_event(e, &ctx);
    }

    if let Err(e) = service.fire_close_event(&ctx) {
        service.fire_error_event(e, &ctx);
    }
    tracing::debug!("connection {id} from {peer_addr} closed");
}

async fn start_recv_loop(
    mut recv_stream: OwnedReadHalf,
    service: &Arc<Service>,
    socket_ctx: &Arc<SocketContext>,
) -> Result<()> {
    let mut buffer = BytesMut::with_capacity(1 << 16);
    loop {
        if let Some(packet) = Packet::parse(&mut buffer)? {
            if packet.is_full_duplex() {
                tokio::spawn({
                    let service = service.clone();
                    let socket_ctx = socket_ctx.clone();
                    async move { handle_packet(&service, &socket_ctx, packet).await }
                });
            } else {
                handle_packet(service, socket_ctx, packet).await;
            }
        } else {
            let n = recv_stream
                .read_buf(&mut buffer)
                .await
                .map_err(|e| Error::new(ErrorKind::TcpRecvFailed, e.to_string()))?;
            if n == 0 {
                if buffer.is_empty() {
                    return Ok(());
                }
                return Err(Error::new(
                    ErrorKind::TcpRecvFailed,
                    format!("socket eof with {} bytes of a partial frame", buffer.len()),
                ));
            }
        }
    }
}

async fn handle_packet(service: &Service, socket_ctx: &Arc<SocketContext>, packet: Packet) {
    let mut ctx = ServiceContext::with_transport(socket_ctx.clone());
    let response = service.handle(packet.body.clone(), &mut ctx).await;
    let connection = socket_ctx.connection();
    if let Err(e) = connection.send(&packet.reply(response)).await
        && !connection.is_closed()
    {
        tracing::error!("send response to {} failed: {e}", connection.peer_addr());
        service.fire_error_event(e, &ctx);
        connection.close();
    }
}

/// Writes queued frames until the connection closes, then flushes what is
/// still queued and shuts the write half down. Each sender is told once its
/// frame is on the socket.
async fn start_send_loop(
    mut send_stream: OwnedWriteHalf,
    mut receiver: mpsc::Receiver<Frame>,
    connection: &Connection,
) -> Result<()> {
    const LIMIT: usize = 64;
    let mut msgs = Vec::with_capacity(LIMIT);
    let mut closing = false;
    loop {
        tokio::select! {
            n = receiver.recv_many(&mut msgs, LIMIT) => {
                if n == 0 {
                    break;
                }
            }
            () = connection.closed(), if !closing => {
                closing = true;
                receiver.close();
                continue;
            }
        }

        let mut bufs = [IoSlice::new(&[]); LIMIT];
        for ((msg, _), io_slice) in msgs.iter().zip(&mut bufs) {
            *io_slice = IoSlice::new(msg);
        }
        let mut slices = &mut bufs[..msgs.len()];
        while !slices.is_empty() {
            let n = send_stream
                .write_vectored(slices)
                .await
                .map_err(|e| Error::new(ErrorKind::TcpSendFailed, e.to_string()))?;
            if n == 0 {
                return Err(Error::new(ErrorKind::TcpSendFailed, "socket closed"));
            }
            IoSlice::advance_slices(&mut slices, n);
        }
        for (_, written) in msgs.drain(..) {
            let _ = written.send(());
        }
    }
    send_stream
        .shutdown()
        .await
        .map_err(|e| Error::new(ErrorKind::TcpSendFailed, e.to_string()))
}
