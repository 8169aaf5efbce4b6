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

//! Server lifecycle state.

use std::fmt;

/// Lifecycle state of the RFCOMM server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    /// Nothing registered; `start()` may run.
    #[default]
    Idle,
    /// Service registered, waiting in `accept()`.
    Listening,
    /// A client is attached and the read loop is running.
    Connected,
    /// Torn down by `stop()`.
    Stopped,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Idle => "idle",
            ServerState::Listening => "listening",
            ServerState::Connected => "connected",
            ServerState::Stopped => "stopped",
        }
    }

    /// Whether a new run may begin from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, ServerState::Idle | ServerState::Stopped)
    }

    /// Whether a listening handle is held in this state.
    pub fn holds_listener(&self) -> bool {
        matches!(self, ServerState::Listening | ServerState::Connected)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        assert_eq!(ServerState::default(), ServerState::Idle);
    }

    #[test]
    fn test_can_start() {
        assert!(ServerState::Idle.can_start());
        assert!(ServerState::Stopped.can_start());
        assert!(!ServerState::Listening.can_start());
        assert!(!ServerState::Connected.can_start());
    }

    #[test]
    fn test_holds_listener() {
        assert!(ServerState::Listening.holds_listener());
        assert!(ServerState::Connected.holds_listener());
        assert!(!ServerState::Idle.holds_listener());
        assert!(!ServerState::Stopped.holds_listener());
    }

    #[test]
    fn test_display() {
        assert_eq!(ServerState::Connected.to_string(), "connected");
    }
}
