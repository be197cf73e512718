use super::lines::{Line, LineReader, DEFAULT_MAX_MESSAGE_BYTES};
use crate::{dispatcher::Dispatcher, registry::ProcedureRegistry};
use std::{io, net::SocketAddr};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::mpsc,
    task,
};

pub struct Server {
    dispatcher: Dispatcher,
    max_message_bytes: usize,
}

impl Server {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }

    /// Requests longer than this are answered with a parse error and skipped.
    pub fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
        self.max_message_bytes = max_message_bytes;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn serve_tcp(self, addr: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accepts connections until accepting fails. Each connection gets its
    /// own task, and each message on it is dispatched on a task of its own,
    /// so a slow procedure does not hold up later calls.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        tracing::debug!(addr = ?listener.local_addr().ok(), "serving JSON-RPC");
        loop {
            let (sock, addr) = listener.accept().await?;
            let dispatcher = self.dispatcher.clone();
            task::spawn(handle_connection(dispatcher, sock, addr, self.max_message_bytes));
        }
    }
}

impl From<ProcedureRegistry> for Server {
    fn from(registry: ProcedureRegistry) -> Self {
        Self::new(Dispatcher::new(registry))
    }
}

async fn handle_connection(
    dispatcher: Dispatcher,
    sock: TcpStream,
    addr: SocketAddr,
    max_message_bytes: usize,
) {
    tracing::debug!(%addr, "client connected");
    let (read, mut write) = sock.into_split();

    // One writer per connection keeps concurrent responses from interleaving.
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<String>();
    let writer = task::spawn(async move {
        while let Some(mut response) = response_rx.recv().await {
            response.push('\n');
            if let Err(err) = write.write_all(response.as_bytes()).await {
                tracing::warn!(%addr, %err, "writing response failed");
                break;
            }
        }
    });

    let mut lines = LineReader::new(read, max_message_bytes);
    loop {
        let line = match lines.next_line().await {
            Ok(Some(Line::Complete(line))) => line,
            Ok(Some(Line::TooLong)) => {
                let reason = format!("message exceeds {max_message_bytes} bytes");
                if let Some(response) = dispatcher.reject_unparseable(reason) {
                    let _ = response_tx.send(response);
                }
                continue;
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(%addr, %err, "reading request failed");
                break;
            }
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let dispatcher = dispatcher.clone();
        let response_tx = response_tx.clone();
        task::spawn(async move {
            if let Some(response) = dispatcher.handle_bytes(&line).await {
                // The connection may be gone by now.
                let _ = response_tx.send(response);
            }
        });
    }

    drop(response_tx);
    _ = writer.await;
    tracing::debug!(%addr, "client disconnected");
}
