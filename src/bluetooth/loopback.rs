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

//! In-process transport over tokio duplex pipes.
//!
//! Stands in for a Bluetooth stack when driving the server from tests or an
//! embedding host: [`LoopbackTransport::connect`] plays the remote peer.

use futures::channel::mpsc;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tracing::debug;

use super::transport::{Accepted, Registration, ServiceListener, ServiceRecord, Transport};

/// Per-direction buffer of each loopback link.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Transport whose peers live in the same process.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    shared: Arc<Mutex<LoopbackState>>,
}

#[derive(Default)]
struct LoopbackState {
    incoming: Option<(u64, mpsc::UnboundedSender<Accepted>)>,
    next_id: u64,
    open_listeners: usize,
    listen_failure: Option<io::ErrorKind>,
    registered: Vec<ServiceRecord>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `listen()` fail with `kind` until cleared with `None`.
    pub fn set_listen_failure(&self, kind: Option<io::ErrorKind>) {
        self.shared.lock().listen_failure = kind;
    }

    /// Number of service listeners that have not been dropped yet.
    pub fn open_listeners(&self) -> usize {
        self.shared.lock().open_listeners
    }

    /// Every record passed to `listen()`, in order.
    pub fn registered(&self) -> Vec<ServiceRecord> {
        self.shared.lock().registered.clone()
    }

    /// Make pending and future accepts on the current listener fail.
    pub fn abort_accepts(&self) {
        self.shared.lock().incoming = None;
    }

    /// Connect to the current listener as `peer`, returning the peer's end.
    pub fn connect(&self, peer: impl Into<String>) -> io::Result<DuplexStream> {
        self.connect_inner(peer.into(), false)
    }

    /// Like [`connect`](Self::connect), but every write the server makes on
    /// this link fails with `BrokenPipe` while reads keep working.
    pub fn connect_with_write_failure(&self, peer: impl Into<String>) -> io::Result<DuplexStream> {
        self.connect_inner(peer.into(), true)
    }

    fn connect_inner(&self, peer: String, fail_writes: bool) -> io::Result<DuplexStream> {
        let state = self.shared.lock();
        let (_, incoming) = state
            .incoming
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no listener"))?;

        let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
        let accepted = Accepted {
            socket: Box::new(LoopbackSocket {
                pipe: remote,
                fail_writes,
            }),
            peer,
        };
        incoming
            .unbounded_send(accepted)
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "listener gone"))?;
        Ok(local)
    }
}

impl Transport for LoopbackTransport {
    fn listen<'a>(
        &'a self,
        record: &'a ServiceRecord,
    ) -> BoxFuture<'a, io::Result<Box<dyn ServiceListener>>> {
        async move {
            let mut state = self.shared.lock();
            if let Some(kind) = state.listen_failure {
                return Err(io::Error::new(kind, "loopback listen failure"));
            }

            let id = state.next_id;
            state.next_id += 1;
            let (tx, rx) = mpsc::unbounded();
            state.incoming = Some((id, tx));
            state.open_listeners += 1;
            state.registered.push(record.clone());
            debug!("Loopback listener {} registered for {}", id, record.name);

            let listener = LoopbackListener {
                id,
                incoming: Registration::new(rx),
                shared: self.shared.clone(),
            };
            Ok(Box::new(listener) as Box<dyn ServiceListener>)
        }
        .boxed()
    }
}

struct LoopbackListener {
    id: u64,
    incoming: Registration<mpsc::UnboundedReceiver<Accepted>>,
    shared: Arc<Mutex<LoopbackState>>,
}

impl ServiceListener for LoopbackListener {
    fn accept(&self) -> BoxFuture<'_, io::Result<Accepted>> {
        async move {
            self.incoming.next().await.ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionAborted, "listener closed")
            })
        }
        .boxed()
    }

    fn close(&self) {
        if !self.incoming.close() {
            return;
        }
        let mut state = self.shared.lock();
        state.open_listeners -= 1;
        if matches!(state.incoming, Some((id, _)) if id == self.id) {
            state.incoming = None;
        }
        debug!("Loopback listener {} closed", self.id);
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        self.close();
    }
}

/// Server end of a loopback link.
struct LoopbackSocket {
    pipe: DuplexStream,
    fail_writes: bool,
}

impl AsyncRead for LoopbackSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_read(cx, buf)
    }
}

impl AsyncWrite for LoopbackSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "loopback write failure",
            )));
        }
        Pin::new(&mut self.pipe).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.pipe).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::SPP_UUID;

    fn record() -> ServiceRecord {
        ServiceRecord {
            name: "Test".to_string(),
            uuid: SPP_UUID,
            channel: None,
            require_authentication: false,
            require_authorization: false,
        }
    }

    #[tokio::test]
    async fn test_connect_without_listener_is_refused() {
        let transport = LoopbackTransport::new();
        let err = transport.connect("peer").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
    }

    #[tokio::test]
    async fn test_listen_and_accept() {
        let transport = LoopbackTransport::new();
        let listener = transport.listen(&record()).await.unwrap();
        assert_eq!(transport.open_listeners(), 1);
        assert_eq!(transport.registered(), vec![record()]);

        let _peer = transport.connect("11:22").unwrap();
        let accepted = listener.accept().await.unwrap();
        assert_eq!(accepted.peer, "11:22");

        drop(listener);
        assert_eq!(transport.open_listeners(), 0);
        assert!(transport.connect("11:22").is_err());
    }

    #[tokio::test]
    async fn test_listen_failure() {
        let transport = LoopbackTransport::new();
        transport.set_listen_failure(Some(io::ErrorKind::NotFound));
        assert!(transport.listen(&record()).await.is_err());
        assert_eq!(transport.open_listeners(), 0);

        transport.set_listen_failure(None);
        assert!(transport.listen(&record()).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_immediate() {
        let transport = LoopbackTransport::new();
        let listener = transport.listen(&record()).await.unwrap();

        listener.close();
        listener.close();

        assert_eq!(transport.open_listeners(), 0);
        assert!(transport.connect("11:22").is_err());
        let err = listener.accept().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);

        drop(listener);
        assert_eq!(transport.open_listeners(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_link() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let transport = LoopbackTransport::new();
        let listener = transport.listen(&record()).await.unwrap();
        let mut peer = transport.connect_with_write_failure("11:22").unwrap();
        let mut accepted = listener.accept().await.unwrap();

        let err = accepted.socket.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        peer.write_all(b"up").await.unwrap();
        let mut buf = [0u8; 2];
        accepted.socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"up");
    }

    #[tokio::test]
    async fn test_abort_accepts() {
        let transport = LoopbackTransport::new();
        let listener = transport.listen(&record()).await.unwrap();
        transport.abort_accepts();

        let err = listener.accept().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
