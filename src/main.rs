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

//! SPP chat host shell.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spp_chat::bluetooth::{BluezTransport, RfcommServer};
use spp_chat::config::Config;
use spp_chat::events::ServerEvent;
use spp_chat::shell::{ShellCommand, ShellReply};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("loading configuration")?;

    // Initialize logging; stdout is reserved for the event stream
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .context("invalid logging filter")?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    info!("Starting SPP chat v{}...", env!("CARGO_PKG_VERSION"));

    let transport = BluezTransport::new().await?;
    if let Err(e) = transport.set_name(&config.server.service_name).await {
        error!("Could not set adapter name: {}", e);
    }

    let (event_tx, event_rx) = async_channel::bounded::<ServerEvent>(64);
    let server = RfcommServer::new(Arc::new(transport), config.server.clone(), Arc::new(event_tx));

    // Forward events to stdout
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match event.to_json() {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to encode event: {}", e),
            }
        }
    });

    if config.autostart {
        server.start().await;
    }

    info!("Ready. Commands: start, stop, send <text>, status, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };
                let reply = match ShellCommand::parse(&line) {
                    Some(ShellCommand::Start) => {
                        server.start().await;
                        None
                    }
                    Some(ShellCommand::Stop) => {
                        server.stop();
                        None
                    }
                    Some(ShellCommand::Send(message)) => {
                        // A slow peer must not stall the shell or Ctrl-C.
                        let server = server.clone();
                        tokio::spawn(async move {
                            let ok = server.send(&message).await;
                            match (ShellReply::SendResult { ok }).to_json() {
                                Ok(line) => println!("{}", line),
                                Err(e) => error!("Failed to encode reply: {}", e),
                            }
                        });
                        None
                    }
                    Some(ShellCommand::Status) => Some(ShellReply::status(server.state())),
                    Some(ShellCommand::Quit) => break,
                    None if line.trim().is_empty() => None,
                    None => Some(ShellReply::Error {
                        text: format!("unknown command: {}", line.trim()),
                    }),
                };
                if let Some(reply) = reply {
                    println!("{}", reply.to_json()?);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    server.shutdown().await;
    info!("SPP chat stopped");
    Ok(())
}
