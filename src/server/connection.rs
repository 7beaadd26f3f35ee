//! Connection handling for individual client connections
//!
//! Strict request/response: read one message, dispatch it, write one reply, repeat.
//! The loop ends on end-of-stream, a transport error, a processed `CLOSE`, or when the
//! server cancels the connection.

use super::Server;
use super::handler::{self, Flow};
use crate::Result;
use crate::protocol::ResponseWriter;
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle a single client connection
pub(super) async fn handle<S>(
    server: &Server,
    mut stream: S,
    peer: SocketAddr,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(peer = %peer, "Accepted connection");

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(peer = %peer, "Connection closed by server");
            Ok(())
        }
        result = message_loop(server, &mut stream) => result,
    };

    debug!(peer = %peer, "Closed connection");
    result
}

async fn message_loop<S>(server: &Server, stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut read_buf = BytesMut::with_capacity(server.max_message_size);
    let mut response = ResponseWriter::default();

    loop {
        // One read is one message
        read_buf.clear();
        let n = stream.read_buf(&mut read_buf).await?;
        if n == 0 {
            return Ok(());
        }
        server.metrics.bytes_read.inc_by(n as u64);

        let flow = handler::execute(server, &read_buf, &mut response);

        let buf = response.take();
        server.metrics.bytes_written.inc_by(buf.len() as u64);
        stream.write_all(&buf).await?;
        stream.flush().await?;

        if flow == Flow::Close {
            // Best effort; the peer may already be gone
            let _ = stream.shutdown().await;
            return Ok(());
        }
    }
}
