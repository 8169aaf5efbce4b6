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

//! Transport seam between the server and a Bluetooth stack.
//!
//! A transport registers a service record and hands out accepted sockets.
//! [`ServiceListener::close`] unregisters the service synchronously, from
//! any thread, and fails a pending `accept()`. Dropping a socket closes the
//! link.

use futures::future::{self, BoxFuture};
use futures::stream::{Stream, StreamExt};
use futures::task::AtomicWaker;
use parking_lot::Mutex;
use std::io;
use std::task::Poll;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Service advertised to peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub name: String,
    pub uuid: Uuid,
    pub channel: Option<u8>,
    pub require_authentication: bool,
    pub require_authorization: bool,
}

/// Byte stream of an accepted RFCOMM connection.
pub trait RfcommSocket: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> RfcommSocket for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// An accepted connection and the peer it came from.
pub struct Accepted {
    pub socket: Box<dyn RfcommSocket>,
    /// Peer identifier, typically the remote device address.
    pub peer: String,
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepted").field("peer", &self.peer).finish()
    }
}

/// A registered service waiting for peers.
pub trait ServiceListener: Send + Sync + 'static {
    /// Wait for the next inbound connection. Fails once the listener is closed.
    fn accept(&self) -> BoxFuture<'_, io::Result<Accepted>>;

    /// Unregister the service now. Idempotent.
    fn close(&self);
}

/// Bluetooth stack capability used by the server.
pub trait Transport: Send + Sync + 'static {
    /// Register `record` and start accepting connections for it.
    fn listen<'a>(
        &'a self,
        record: &'a ServiceRecord,
    ) -> BoxFuture<'a, io::Result<Box<dyn ServiceListener>>>;
}

/// Stream of inbound connections that can be closed while a task waits on it.
///
/// The stream is only locked for the duration of each poll, so `close()`
/// never waits on a pending `next()`: it drops the stream and wakes the
/// waiter, which then sees the end of the stream.
pub struct Registration<S> {
    slot: Mutex<Option<S>>,
    waker: AtomicWaker,
}

impl<S> Registration<S>
where
    S: Stream + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            slot: Mutex::new(Some(stream)),
            waker: AtomicWaker::new(),
        }
    }

    /// Next item, or `None` once the stream ended or was closed.
    pub async fn next(&self) -> Option<S::Item> {
        future::poll_fn(|cx| {
            self.waker.register(cx.waker());
            match self.slot.lock().as_mut() {
                Some(stream) => stream.poll_next_unpin(cx),
                None => Poll::Ready(None),
            }
        })
        .await
    }

    /// Drop the stream. Returns `true` on the first call only.
    pub fn close(&self) -> bool {
        let stream = self.slot.lock().take();
        self.waker.wake();
        stream.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().is_none()
    }
}
