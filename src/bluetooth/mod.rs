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

//! Bluetooth communication module.
//!
//! Handles the RFCOMM server and the transports it runs on.

#[cfg(feature = "bluez")]
mod bluez;
mod connection;
mod loopback;
mod server;
mod transport;

#[cfg(feature = "bluez")]
pub use bluez::BluezTransport;
pub use connection::{ConnectionSession, SessionEnd, SessionHandle};
pub use loopback::LoopbackTransport;
pub use server::RfcommServer;
pub use transport::{
    Accepted, Registration, RfcommSocket, ServiceListener, ServiceRecord, Transport, SPP_UUID,
};
