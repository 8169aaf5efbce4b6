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

//! Server events and the sinks that receive them.
//!
//! The server only produces events. Consumers plug in through [`EventSink`],
//! which must never block the emitting task.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Events emitted by the RFCOMM server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Lifecycle or diagnostic line.
    Log { text: String },
    /// One chunk of text read from the client, verbatim.
    Message { text: String },
    /// The client connection has ended.
    ClientClosed,
}

impl ServerEvent {
    pub fn log(text: impl Into<String>) -> Self {
        Self::Log { text: text.into() }
    }

    pub fn message(text: impl Into<String>) -> Self {
        Self::Message { text: text.into() }
    }

    /// Serialize to a single JSON line.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Receiver of server events.
///
/// `emit` is called from the server's background task and from the caller's
/// thread. Implementations must return promptly. Calling
/// [`RfcommServer::stop`](crate::bluetooth::RfcommServer::stop) from inside
/// `emit` is allowed.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: ServerEvent);
}

impl EventSink for mpsc::UnboundedSender<ServerEvent> {
    fn emit(&self, event: ServerEvent) {
        // A closed receiver means nobody is subscribed; late subscribers miss events.
        let _ = self.send(event);
    }
}

impl EventSink for mpsc::Sender<ServerEvent> {
    fn emit(&self, event: ServerEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.try_send(event) {
            warn!("Event channel full, dropping {:?}", event);
        }
    }
}

impl EventSink for async_channel::Sender<ServerEvent> {
    fn emit(&self, event: ServerEvent) {
        if let Err(async_channel::TrySendError::Full(event)) = self.try_send(event) {
            warn!("Event channel full, dropping {:?}", event);
        }
    }
}

/// Adapts a plain closure into an [`EventSink`].
pub struct CallbackSink<F>(pub F);

impl<F> EventSink for CallbackSink<F>
where
    F: Fn(ServerEvent) + Send + Sync + 'static,
{
    fn emit(&self, event: ServerEvent) {
        (self.0)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_event_json_shape() {
        assert_eq!(
            ServerEvent::log("hi").to_json().unwrap(),
            r#"{"type":"log","text":"hi"}"#
        );
        assert_eq!(
            ServerEvent::message("hello").to_json().unwrap(),
            r#"{"type":"message","text":"hello"}"#
        );
        assert_eq!(
            ServerEvent::ClientClosed.to_json().unwrap(),
            r#"{"type":"client_closed"}"#
        );
    }

    #[test]
    fn test_event_from_json() {
        let event = ServerEvent::from_json(r#"{"type":"message","text":"x"}"#).unwrap();
        assert_eq!(event, ServerEvent::message("x"));
        assert!(ServerEvent::from_json(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn test_bounded_sink_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        tx.emit(ServerEvent::log("first"));
        tx.emit(ServerEvent::log("second"));

        assert_eq!(rx.try_recv().unwrap(), ServerEvent::log("first"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_async_channel_sink() {
        let (tx, rx) = async_channel::bounded(4);
        tx.emit(ServerEvent::ClientClosed);
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::ClientClosed);
    }

    #[test]
    fn test_unbounded_sink_ignores_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.emit(ServerEvent::log("nobody listening"));
    }

    #[test]
    fn test_callback_sink() {
        let seen: Arc<Mutex<Vec<ServerEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let sink = CallbackSink(move |event: ServerEvent| seen_cb.lock().unwrap().push(event));

        sink.emit(ServerEvent::message("a"));
        sink.emit(ServerEvent::ClientClosed);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ServerEvent::message("a"), ServerEvent::ClientClosed]
        );
    }
}
