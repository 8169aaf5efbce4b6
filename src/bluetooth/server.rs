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

//! Single-client RFCOMM server.
//!
//! [`RfcommServer`] registers one service, accepts exactly one client on a
//! background task, forwards everything that client sends as
//! [`ServerEvent::Message`]s, and lets the host write back with
//! [`RfcommServer::send`]. When the client leaves, the service is closed and
//! the server returns to [`ServerState::Idle`]; the host may start it again.
//!
//! All state transitions happen under one lock. Each run gets a generation
//! number, and events from a run that is no longer current are dropped, so
//! nothing is emitted after [`RfcommServer::stop`] returns.

use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{self, SessionEnd, SessionHandle};
use super::transport::{Accepted, ServiceListener, Transport};
use crate::config::ServerConfig;
use crate::events::{EventSink, ServerEvent};
use crate::state::ServerState;

/// Handle to the server. Clones share the same server.
#[derive(Clone)]
pub struct RfcommServer {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: ServerConfig,
    sink: Arc<dyn EventSink>,
    shared: Mutex<Shared>,
    /// Held while an event is handed to the sink. `stop()` takes it too, so
    /// an emit in flight completes before the run is retired.
    emit_gate: ReentrantMutex<()>,
    /// Serializes `start()` calls.
    start_gate: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct Shared {
    state: ServerState,
    generation: u64,
    listener: Option<Arc<dyn ServiceListener>>,
    session: Option<SessionHandle>,
    task: Option<JoinHandle<()>>,
    /// Task of a stopped run that may still be unwinding. Its handles are
    /// already closed.
    retired: Option<JoinHandle<()>>,
}

impl RfcommServer {
    /// Create a server. Nothing is registered until [`start`](Self::start).
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ServerConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                sink,
                shared: Mutex::new(Shared::default()),
                emit_gate: ReentrantMutex::new(()),
                start_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.inner.shared.lock().state
    }

    /// Identifier of the connected peer, if any.
    pub fn peer(&self) -> Option<String> {
        let shared = self.inner.shared.lock();
        shared.session.as_ref().map(|s| s.peer().to_string())
    }

    /// Register the service and begin waiting for a client in the background.
    ///
    /// Does nothing unless the server is idle or stopped. Registration
    /// failures are reported as a log event and leave the server idle.
    /// Returns once the service is registered; it never waits for a client.
    pub async fn start(&self) {
        let _starting = self.inner.start_gate.lock().await;

        let (generation, retired) = {
            let mut shared = self.inner.shared.lock();
            if !shared.state.can_start() {
                debug!("start() ignored in state {}", shared.state);
                return;
            }
            (shared.generation, shared.retired.take())
        };

        // Let a stopped run release its handles before registering again.
        if let Some(retired) = retired {
            let _ = retired.await;
        }

        let record = self.inner.config.service_record();
        match self.inner.transport.listen(&record).await {
            Ok(listener) => self.inner.begin_run(generation, Arc::from(listener)),
            Err(e) => self.inner.fail_start(generation, e),
        }
    }

    /// Tear the server down from any state. Idempotent.
    ///
    /// Closes the client connection and the service listener before the
    /// state becomes `Stopped`, cancels the background task, and emits a
    /// final log event. A blocked `accept()`, read, or `send()` returns
    /// promptly. Safe to call from any thread, including from inside an
    /// [`EventSink`].
    pub fn stop(&self) {
        self.inner.halt();
    }

    /// [`stop`](Self::stop), then wait for the cancelled task to exit.
    ///
    /// Handles are closed by `stop()` itself; this only joins the task. If a
    /// concurrent `start()` already joined it, there is nothing left to wait
    /// for. Must not be awaited from the server's own event callbacks.
    pub async fn shutdown(&self) {
        self.inner.halt();
        let retired = self.inner.shared.lock().retired.take();
        if let Some(retired) = retired {
            let _ = retired.await;
        }
    }

    /// Write `message` to the connected client.
    ///
    /// Returns `false` without blocking when no client is connected. A failed
    /// write closes the session as if the peer had disconnected.
    pub async fn send(&self, message: &str) -> bool {
        let (session, generation) = {
            let shared = self.inner.shared.lock();
            if shared.state != ServerState::Connected {
                return false;
            }
            match &shared.session {
                Some(session) if !session.is_closing() => (session.clone(), shared.generation),
                _ => return false,
            }
        };

        match session.write(message).await {
            Ok(()) => true,
            Err(e) => {
                self.inner
                    .warn_if_current(generation, format!("Write failed: {}", e));
                session.close();
                false
            }
        }
    }
}

impl Inner {
    /// Move to `Listening` with a freshly registered listener and spawn the
    /// accept task, unless the server was stopped during registration.
    fn begin_run(self: &Arc<Self>, generation: u64, listener: Arc<dyn ServiceListener>) {
        let _gate = self.emit_gate.lock();
        let run = {
            let mut shared = self.shared.lock();
            if shared.generation != generation || !shared.state.can_start() {
                debug!("Server stopped during registration, closing listener");
                listener.close();
                return;
            }
            shared.generation += 1;
            shared.state = ServerState::Listening;
            let run = shared.generation;
            shared.listener = Some(listener.clone());
            shared.task = Some(tokio::spawn(serve(self.clone(), listener, run)));
            run
        };
        // The gate is still held, so this precedes anything the task emits.
        self.info_if_current(run, "Server socket opened, waiting for client...");
    }

    /// Registration failed: settle in `Idle` and report it.
    fn fail_start(&self, generation: u64, error: std::io::Error) {
        let _gate = self.emit_gate.lock();
        {
            let mut shared = self.shared.lock();
            if shared.generation != generation {
                return;
            }
            shared.state = ServerState::Idle;
        }
        self.warn_if_current(generation, format!("Failed to open server socket: {}", error));
    }

    /// Retire the current run. The aborted task is parked in `retired` for
    /// `start()` and `shutdown()` to await.
    fn halt(&self) {
        let _gate = self.emit_gate.lock();
        let was_stopped = {
            let mut shared = self.shared.lock();
            // Handles close before anyone can observe `Stopped`.
            if let Some(session) = shared.session.take() {
                session.close();
            }
            if let Some(listener) = shared.listener.take() {
                listener.close();
            }
            if let Some(task) = shared.task.take() {
                task.abort();
                shared.retired = Some(task);
            }
            let was_stopped = shared.state == ServerState::Stopped;
            shared.generation += 1;
            shared.state = ServerState::Stopped;
            was_stopped
        };

        if !was_stopped {
            info!("Server stopped (cleanly)");
            self.sink.emit(ServerEvent::log("Server stopped (cleanly)"));
        }
    }

    /// Hand `event` to the sink if `run` is still the current run.
    fn emit_if_current(&self, run: u64, event: ServerEvent) -> bool {
        let _gate = self.emit_gate.lock();
        let current = self.shared.lock().generation;
        if current != run {
            return false;
        }
        self.sink.emit(event);
        true
    }

    fn info_if_current(&self, run: u64, text: impl Into<String>) {
        let text = text.into();
        info!("{}", text);
        self.emit_if_current(run, ServerEvent::log(text));
    }

    fn warn_if_current(&self, run: u64, text: impl Into<String>) {
        let text = text.into();
        warn!("{}", text);
        self.emit_if_current(run, ServerEvent::log(text));
    }

    /// Install the accepted client as the session. Returns `None` if the run
    /// was stopped while accepting.
    fn attach(&self, run: u64, accepted: Accepted) -> Option<connection::ConnectionSession> {
        let _gate = self.emit_gate.lock();
        let (session, handle) =
            connection::open(accepted.socket, accepted.peer, self.config.read_chunk_size);
        {
            let mut shared = self.shared.lock();
            if shared.generation != run {
                return None;
            }
            shared.session = Some(handle);
            shared.state = ServerState::Connected;
        }
        self.info_if_current(run, format!("Client accepted: {}", session.peer()));
        Some(session)
    }

    /// End the run: close the session and the listener, go idle, and report
    /// the closure.
    fn finish_run(&self, run: u64, served: bool) {
        let _gate = self.emit_gate.lock();
        {
            let mut shared = self.shared.lock();
            if shared.generation != run {
                return;
            }
            if let Some(session) = shared.session.take() {
                session.close();
            }
            // One client per run: stop advertising before going idle.
            if let Some(listener) = shared.listener.take() {
                listener.close();
            }
            // Retire the run so late events from it (a failing send) are dropped.
            shared.generation += 1;
            shared.state = ServerState::Idle;
            // Detaches our own handle; the task is about to return.
            shared.task = None;
        }
        if served {
            self.sink.emit(ServerEvent::ClientClosed);
        }
        info!("Service closed, server idle");
        self.sink.emit(ServerEvent::log("Service closed, server idle"));
    }
}

/// Background task of one run: accept a single client, then serve it.
async fn serve(inner: Arc<Inner>, listener: Arc<dyn ServiceListener>, run: u64) {
    let served = match listener.accept().await {
        Ok(accepted) => match inner.attach(run, accepted) {
            Some(session) => {
                let end = session
                    .run(|text| {
                        inner.emit_if_current(run, ServerEvent::message(text));
                    })
                    .await;
                match end {
                    SessionEnd::PeerClosed => {}
                    SessionEnd::Closed => debug!("Session closed locally"),
                    SessionEnd::ReadError(e) => {
                        inner.warn_if_current(run, format!("Client read error: {}", e));
                    }
                }
                true
            }
            None => false,
        },
        Err(e) => {
            inner.warn_if_current(run, format!("Accept loop ended: {}", e));
            false
        }
    };

    inner.finish_run(run, served);
}
