//! Line transport over a tokio TCP stream
//!
//! Outbound lines go through an unbounded queue to a writer task, so the
//! coordinator never blocks on the socket. Inbound lines are delivered to a
//! [`LineHandler`] by [`TcpTransport::run`]. Both need a running tokio runtime.

use std::io;
use std::sync::Arc;

use nagpool::{LineHandler, LineTransport};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

enum Outbound {
    Line(String),
    /// Flush what is queued, then shut the socket down
    Close,
}

pub struct TcpTransport {
    peer: String,
    tx: mpsc::UnboundedSender<Outbound>,
    /// Raised by the writer once the socket is shut down
    closed: Arc<Notify>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Splits `stream` and starts the writer task. Hand the read half to
    /// [`TcpTransport::run`] once a handler exists.
    pub fn new(stream: TcpStream) -> io::Result<(Arc<Self>, OwnedReadHalf)> {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(Notify::new());
        let writer = tokio::spawn(write_loop(write_half, rx, Arc::clone(&closed), peer.clone()));
        let transport = Arc::new(Self {
            peer,
            tx,
            closed,
            writer: Mutex::new(Some(writer)),
        });
        Ok((transport, read_half))
    }

    /// Delivers inbound lines to `handler` until EOF, a read error or
    /// [`LineTransport::close`], reports the close, then waits for the writer.
    pub async fn run(&self, read_half: OwnedReadHalf, handler: Arc<dyn LineHandler>) {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim_end_matches('\r');
                        if !line.is_empty() {
                            handler.on_line(line);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::debug!("{}: read failed: {e}", self.peer);
                        break;
                    }
                },
                () = self.closed.notified() => break,
            }
        }
        handler.on_closed();
        self.close();

        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                log::error!("{}: writer task failed: {e}", self.peer);
            }
        }
    }
}

async fn write_loop(
    write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    closed: Arc<Notify>,
    peer: String,
) {
    let mut out = BufWriter::new(write_half);
    while let Some(message) = rx.recv().await {
        let Outbound::Line(line) = message else {
            break;
        };
        let flush = rx.is_empty();
        if let Err(e) = write_line(&mut out, &line, flush).await {
            log::debug!("{peer}: write failed: {e}");
            break;
        }
    }
    rx.close();
    // flushes the buffer before shutting the write side
    if let Err(e) = out.shutdown().await {
        log::debug!("{peer}: shutdown failed: {e}");
    }
    closed.notify_one();
}

async fn write_line(
    out: &mut BufWriter<OwnedWriteHalf>,
    line: &str,
    flush: bool,
) -> io::Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    if flush {
        out.flush().await?;
    }
    Ok(())
}

impl LineTransport for TcpTransport {
    fn send_line(&self, line: &str) -> io::Result<()> {
        self.tx
            .send(Outbound::Line(line.to_string()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer stopped"))
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Collect {
        lines: Mutex<Vec<String>>,
        closed: Mutex<bool>,
    }

    impl LineHandler for Collect {
        fn on_line(&self, line: &str) {
            self.lines.lock().push(line.to_string());
        }

        fn on_closed(&self) {
            *self.closed.lock() = true;
        }
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_close_flushes_queued_lines() {
        let (server, client) = connected_pair().await;
        let (transport, read_half) = TcpTransport::new(server).unwrap();
        transport.send_line("1.1\tversion").unwrap();
        transport.send_line("2.1\tclear_patterns").unwrap();
        transport.close();

        let handler = Arc::new(Collect::default());
        transport.run(read_half, handler.clone()).await;
        assert!(*handler.closed.lock());
        assert!(transport.send_line("late").is_err());

        let mut lines = BufReader::new(client).lines();
        let mut received = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            received.push(line);
        }
        assert_eq!(received, ["1.1\tversion", "2.1\tclear_patterns"]);
    }

    #[tokio::test]
    async fn test_reader_delivers_lines_then_close() {
        let (server, mut client) = connected_pair().await;
        let (transport, read_half) = TcpTransport::new(server).unwrap();

        client.write_all(b"=\t1.1\t1\r\n\n!=\t2.6\t3 4\n").await.unwrap();
        drop(client);

        let handler = Arc::new(Collect::default());
        transport.run(read_half, handler.clone()).await;
        assert_eq!(*handler.lines.lock(), vec!["=\t1.1\t1", "!=\t2.6\t3 4"]);
        assert!(*handler.closed.lock());
    }
}
