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

//! Host shell commands.
//!
//! The binary drives the server from stdin, one command per line, and
//! answers on stdout with JSON lines shaped like the server's events.

use serde::Serialize;

use crate::state::ServerState;

/// A command read from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Start,
    Stop,
    Send(String),
    Status,
    Quit,
}

impl ShellCommand {
    /// Parse one input line. Returns `None` for blank or unknown input.
    ///
    /// Everything after `send ` is sent verbatim, including inner spaces.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n').trim_start();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let bare = rest.trim().is_empty();

        match verb {
            "start" | "startServer" if bare => Some(Self::Start),
            "stop" | "stopServer" if bare => Some(Self::Stop),
            "send" | "sendToClient" => Some(Self::Send(rest.to_string())),
            "status" if bare => Some(Self::Status),
            "quit" | "exit" if bare => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Replies printed by the shell, alongside forwarded events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShellReply {
    SendResult { ok: bool },
    Status { state: String },
    Error { text: String },
}

impl ShellReply {
    pub fn status(state: ServerState) -> Self {
        Self::Status {
            state: state.as_str().to_string(),
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lifecycle_commands() {
        assert_eq!(ShellCommand::parse("start"), Some(ShellCommand::Start));
        assert_eq!(ShellCommand::parse("startServer\n"), Some(ShellCommand::Start));
        assert_eq!(ShellCommand::parse("  stop  "), Some(ShellCommand::Stop));
        assert_eq!(ShellCommand::parse("stopServer"), Some(ShellCommand::Stop));
        assert_eq!(ShellCommand::parse("status"), Some(ShellCommand::Status));
        assert_eq!(ShellCommand::parse("quit"), Some(ShellCommand::Quit));
    }

    #[test]
    fn test_parse_send_keeps_message_verbatim() {
        assert_eq!(
            ShellCommand::parse("send hello  world \r\n"),
            Some(ShellCommand::Send("hello  world ".to_string()))
        );
        assert_eq!(
            ShellCommand::parse("sendToClient ping"),
            Some(ShellCommand::Send("ping".to_string()))
        );
        assert_eq!(
            ShellCommand::parse("send"),
            Some(ShellCommand::Send(String::new()))
        );
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(ShellCommand::parse(""), None);
        assert_eq!(ShellCommand::parse("reboot"), None);
        assert_eq!(ShellCommand::parse("start now"), None);
    }

    #[test]
    fn test_reply_json() {
        assert_eq!(
            ShellReply::SendResult { ok: true }.to_json().unwrap(),
            r#"{"type":"send_result","ok":true}"#
        );
        assert_eq!(
            ShellReply::status(ServerState::Listening).to_json().unwrap(),
            r#"{"type":"status","state":"listening"}"#
        );
    }
}
