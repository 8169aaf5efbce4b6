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

//! BlueZ transport using RFCOMM profiles.

use bluer::rfcomm::{Profile, ProfileHandle, Role};
use bluer::Session;
use futures::future::{BoxFuture, FutureExt};
use std::io;
use tracing::info;

use super::transport::{Accepted, Registration, ServiceListener, ServiceRecord, Transport};

/// Transport backed by the system's BlueZ daemon.
pub struct BluezTransport {
    session: Session,
}

impl BluezTransport {
    /// Connect to BlueZ. The adapter is resolved when a service is registered.
    pub async fn new() -> anyhow::Result<Self> {
        let session = Session::new().await?;
        info!("BlueZ session created");
        Ok(Self { session })
    }

    /// Set the adapter alias peers see during discovery.
    pub async fn set_name(&self, name: &str) -> anyhow::Result<()> {
        let adapter = self.session.default_adapter().await?;
        adapter.set_alias(name.to_string()).await?;
        info!("Bluetooth name set to: {}", name);
        Ok(())
    }

    async fn register(&self, record: &ServiceRecord) -> bluer::Result<ProfileHandle> {
        let adapter = self.session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        let profile = Profile {
            uuid: record.uuid,
            name: Some(record.name.clone()),
            role: Some(Role::Server),
            channel: record.channel.map(u16::from),
            require_authentication: Some(record.require_authentication),
            require_authorization: Some(record.require_authorization),
            ..Default::default()
        };
        let handle = self.session.register_profile(profile).await?;
        info!("RFCOMM profile '{}' registered (UUID: {})", record.name, record.uuid);
        Ok(handle)
    }
}

impl Transport for BluezTransport {
    fn listen<'a>(
        &'a self,
        record: &'a ServiceRecord,
    ) -> BoxFuture<'a, io::Result<Box<dyn ServiceListener>>> {
        async move {
            let handle = self.register(record).await.map_err(|e| {
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("No Bluetooth adapter available or registration refused: {}", e),
                )
            })?;
            Ok(Box::new(BluezListener {
                registration: Registration::new(handle),
            }) as Box<dyn ServiceListener>)
        }
        .boxed()
    }
}

/// Registered profile. Closing it drops the handle, which unregisters the
/// service with BlueZ.
struct BluezListener {
    registration: Registration<ProfileHandle>,
}

impl ServiceListener for BluezListener {
    fn accept(&self) -> BoxFuture<'_, io::Result<Accepted>> {
        async move {
            let request = self.registration.next().await.ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionAborted, "profile unregistered")
            })?;
            let peer = request.device().to_string();
            let stream = request
                .accept()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            Ok(Accepted {
                socket: Box::new(stream),
                peer,
            })
        }
        .boxed()
    }

    fn close(&self) {
        if self.registration.close() {
            info!("RFCOMM profile unregistered");
        }
    }
}
