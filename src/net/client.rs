use super::lines::{Line, LineReader};
use crate::client::{Client, ClientConfig, Transport};
use crate::router::ResponseRouter;
use futures::future::BoxFuture;
use std::{io, str, sync::Arc};
use tokio::{
    io::AsyncWriteExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream, ToSocketAddrs,
    },
    sync::Mutex,
    task,
};
use tokio_util::sync::CancellationToken;

/// The sending half of a TCP connection.
pub struct TcpTransport {
    writer: Mutex<OwnedWriteHalf>,
}

impl TcpTransport {
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Client> {
        Self::connect_with(addr, ClientConfig::default()).await
    }

    /// Connects and spawns the task that routes replies to `Client` calls.
    /// When the server closes the connection, calls still waiting fail with
    /// [`CallError::Closed`](crate::CallError::Closed).
    pub async fn connect_with(addr: impl ToSocketAddrs, config: ClientConfig) -> io::Result<Client> {
        let sock = TcpStream::connect(addr).await?;
        sock.set_nodelay(true)?;
        let (read, write) = sock.into_split();
        let transport = Arc::new(TcpTransport {
            writer: Mutex::new(write),
        });
        let lines = LineReader::new(read, config.max_message_bytes);
        let client = Client::new(transport).with_config(config);
        task::spawn(read_responses(lines, client.router()));
        Ok(client)
    }
}

impl Transport for TcpTransport {
    fn send<'a>(
        &'a self,
        mut payload: String,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            payload.push('\n');
            let mut writer = tokio::select! {
                writer = self.writer.lock() => writer,
                _ = cancel.cancelled() => {
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "send cancelled"));
                }
            };
            writer.write_all(payload.as_bytes()).await?;
            writer.flush().await
        })
    }
}

/// Routes every line until the connection ends. Lines that are not UTF-8 or
/// are too long are skipped; only end of stream or an I/O error stops it.
async fn read_responses(mut lines: LineReader<OwnedReadHalf>, router: ResponseRouter) {
    loop {
        match lines.next_line().await {
            Ok(Some(Line::Complete(bytes))) => match str::from_utf8(&bytes) {
                Ok(line) => {
                    tracing::trace!(payload = %line, "Received JSON-RPC message");
                    router.on_data_received(line);
                }
                Err(err) => tracing::trace!(%err, "skipping line that is not UTF-8"),
            },
            Ok(Some(Line::TooLong)) => {
                tracing::warn!("skipping message over the size limit");
            }
            Ok(None) => {
                tracing::debug!("connection closed by server");
                break;
            }
            Err(err) => {
                tracing::warn!(%err, "reading from server failed");
                break;
            }
        }
    }
    router.close();
}
