// Copyright 2023, The Android Open Source Project
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

//! NCI adapter: the layer between a generic NFC framework and an NCI core
//! state machine.
//!
//! Activation notifications and RF state transitions coming up from the
//! core become framework notifications about tags, peers and initiators;
//! framework data exchanges go back down over the static RF connection.
//! The core sits behind a command/event channel pair
//! ([`CoreCommand`]/[`CoreEvent`]), the framework behind a notification
//! stream ([`AdapterEvent`]) and a set of handles.
//!
//! ```no_run
//! use nci_adapter::{Adapter, CoreLink};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> nci_adapter::Result<()> {
//! let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
//! let (_event_tx, event_rx) = mpsc::unbounded_channel();
//! let (adapter, handle, _notifications) = Adapter::new(CoreLink::new(cmd_tx), event_rx);
//! handle.set_powered(true);
//! handle.set_enabled(true);
//! adapter.run().await
//! # }
//! ```

use thiserror::Error;

pub mod adapter;
pub mod core;
pub mod framework;
mod initiator;
pub mod nci;
mod target;

pub use crate::adapter::Adapter;
pub use crate::core::{CoreCommand, CoreEvent, CoreLink, SendToken};
pub use crate::framework::{
    AdapterEvent, AdapterHandle, InitiatorHandle, InitiatorId, Mode, TargetHandle, TargetId,
    TransmitStatus,
};

/// Errors surfaced by the adapter itself.
#[derive(Error, Debug)]
pub enum Error {
    /// `run` was called on an adapter that is already running.
    #[error("adapter is already running")]
    AlreadyRunning,
    /// The NCI core closed its event stream.
    #[error("NCI core event stream closed")]
    CoreDisconnected,
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
