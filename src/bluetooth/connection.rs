// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Individual RFCOMM connection session.
//!
//! The accepted socket sits in a shared cell. Reads and writes lock it only
//! for the length of one poll, so [`SessionHandle::close`] can drop the
//! socket from any thread at once; a blocked read then sees end of stream
//! and a blocked write fails.

use futures::task::AtomicWaker;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{debug, info};

use super::transport::RfcommSocket;

/// Why a session's read loop ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer closed its side (read returned zero).
    PeerClosed,
    /// The session was closed locally.
    Closed,
    /// Reading failed; treated as an abnormal disconnect.
    ReadError(io::Error),
}

struct SocketCell {
    socket: Mutex<Option<Box<dyn RfcommSocket>>>,
    read_waker: AtomicWaker,
    write_waker: AtomicWaker,
}

impl SocketCell {
    fn close(&self) {
        let socket = self.socket.lock().take();
        self.read_waker.wake();
        self.write_waker.wake();
        drop(socket);
    }

    fn is_closed(&self) -> bool {
        self.socket.lock().is_none()
    }
}

struct CellReader(Arc<SocketCell>);

impl AsyncRead for CellReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.0.read_waker.register(cx.waker());
        match self.0.socket.lock().as_mut() {
            Some(socket) => Pin::new(socket).poll_read(cx, buf),
            // Closed locally: end of stream.
            None => Poll::Ready(Ok(())),
        }
    }
}

struct CellWriter(Arc<SocketCell>);

fn session_closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "session closed")
}

impl AsyncWrite for CellWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.write_waker.register(cx.waker());
        match self.0.socket.lock().as_mut() {
            Some(socket) => Pin::new(socket).poll_write(cx, buf),
            None => Poll::Ready(Err(session_closed())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.0.write_waker.register(cx.waker());
        match self.0.socket.lock().as_mut() {
            Some(socket) => Pin::new(socket).poll_flush(cx),
            None => Poll::Ready(Err(session_closed())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.0.socket.lock().as_mut() {
            Some(socket) => Pin::new(socket).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Read side of an accepted connection.
pub struct ConnectionSession {
    reader: CellReader,
    cell: Arc<SocketCell>,
    peer: String,
    chunk_size: usize,
}

/// Shared write side of a session.
///
/// Cloning is cheap; all clones refer to the same connection. The socket is
/// closed by [`close`](Self::close) or when the last clone is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    peer: String,
    writer: tokio::sync::Mutex<CellWriter>,
    cell: Arc<SocketCell>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.cell.close();
    }
}

/// Wrap an accepted socket into its read loop and write handle.
pub fn open(
    socket: Box<dyn RfcommSocket>,
    peer: String,
    chunk_size: usize,
) -> (ConnectionSession, SessionHandle) {
    let cell = Arc::new(SocketCell {
        socket: Mutex::new(Some(socket)),
        read_waker: AtomicWaker::new(),
        write_waker: AtomicWaker::new(),
    });

    let session = ConnectionSession {
        reader: CellReader(cell.clone()),
        cell: cell.clone(),
        peer: peer.clone(),
        chunk_size: chunk_size.max(1),
    };
    let handle = SessionHandle {
        inner: Arc::new(HandleInner {
            peer,
            writer: tokio::sync::Mutex::new(CellWriter(cell.clone())),
            cell,
        }),
    };
    (session, handle)
}

impl ConnectionSession {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Run the read loop until the peer leaves, the session is closed, or a
    /// read fails. Every successful read is passed to `on_message` as one
    /// chunk of text; there is no line framing or reassembly.
    pub async fn run<F>(mut self, mut on_message: F) -> SessionEnd
    where
        F: FnMut(String),
    {
        info!("Session with {} started", self.peer);
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            match self.reader.read(&mut buf).await {
                Ok(0) if self.cell.is_closed() => return SessionEnd::Closed,
                Ok(0) => {
                    info!("Connection closed by remote");
                    return SessionEnd::PeerClosed;
                }
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                    debug!("Received {} bytes from {}", n, self.peer);
                    on_message(text);
                }
                Err(_) if self.cell.is_closed() => return SessionEnd::Closed,
                Err(e) => return SessionEnd::ReadError(e),
            }
        }
    }
}

impl SessionHandle {
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// Whether the socket has been closed.
    pub fn is_closing(&self) -> bool {
        self.inner.cell.is_closed()
    }

    /// Close the socket now. Idempotent. Pending reads end and pending
    /// writes fail.
    pub fn close(&self) {
        self.inner.cell.close();
    }

    /// Write `message` as UTF-8 and flush.
    pub async fn write(&self, message: &str) -> io::Result<()> {
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(message.as_bytes()).await?;
        writer.flush().await?;
        debug!("Sent {} bytes to {}", message.len(), self.inner.peer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::time::timeout;

    fn pair(chunk_size: usize) -> (ConnectionSession, SessionHandle, tokio::io::DuplexStream) {
        let (client, server) = duplex(4096);
        let (session, handle) = open(Box::new(server), "AA:BB".to_string(), chunk_size);
        (session, handle, client)
    }

    #[tokio::test]
    async fn test_message_then_peer_close() {
        let (session, _handle, mut client) = pair(1024);
        client.write_all(b"hello").await.unwrap();
        drop(client);

        let mut received = Vec::new();
        let end = session.run(|text| received.push(text)).await;

        assert!(matches!(end, SessionEnd::PeerClosed));
        assert_eq!(received, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_reads_are_chunked_verbatim() {
        let (session, _handle, mut client) = pair(4);
        client.write_all(b"abcdefghij").await.unwrap();
        drop(client);

        let mut received = Vec::new();
        session.run(|text| received.push(text)).await;

        assert_eq!(received.concat(), "abcdefghij");
        assert!(received.iter().all(|chunk| chunk.len() <= 4));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let (session, _handle, mut client) = pair(1024);
        client.write_all(&[b'o', b'k', 0xFF]).await.unwrap();
        drop(client);

        let mut received = Vec::new();
        session.run(|text| received.push(text)).await;

        assert_eq!(received, vec!["ok\u{FFFD}".to_string()]);
    }

    #[tokio::test]
    async fn test_close_unblocks_read() {
        let (session, handle, _client) = pair(1024);
        let task = tokio::spawn(session.run(|_| {}));

        handle.close();
        assert!(handle.is_closing());

        let end = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(matches!(end, SessionEnd::Closed));
    }

    #[tokio::test]
    async fn test_dropping_handle_ends_session() {
        let (session, handle, _client) = pair(1024);
        drop(handle);

        let end = timeout(Duration::from_secs(1), session.run(|_| {}))
            .await
            .unwrap();
        assert!(matches!(end, SessionEnd::Closed));
    }

    #[tokio::test]
    async fn test_close_fails_blocked_write() {
        let (_session, handle, _client) = pair(1024);
        let writer = handle.clone();
        // Larger than the pipe buffer, and the client never reads.
        let pending = tokio::spawn(async move { writer.write(&"x".repeat(16 * 1024)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle.close();

        let result = timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_close_releases_socket() {
        let (_session, handle, mut client) = pair(1024);
        handle.close();

        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_write_reaches_peer() {
        let (_session, handle, mut client) = pair(1024);
        handle.write("ping").await.unwrap();

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
