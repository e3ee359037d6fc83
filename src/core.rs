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

//! Boundary towards the NCI core state machine.
//!
//! The core lives on the other side of a pair of channels: it feeds
//! [`CoreEvent`]s in and consumes [`CoreCommand`]s out. [`CoreLink`] wraps
//! the command sender together with a mirror of the core's current and next
//! RF state and the allocator for data send tokens.

use bytes::Bytes;
use log::debug;
use tokio::sync::mpsc::UnboundedSender;

use crate::nci::{IntfActivationNtf, OpMode, RfState};

/// Identifies one outstanding data send on a logical connection.
pub type SendToken = u32;

/// Commands issued to the NCI core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreCommand {
    SetState(RfState),
    SetOpMode(OpMode),
    SendData { conn_id: u8, payload: Bytes, token: SendToken },
    CancelSend(SendToken),
}

/// Events delivered by the NCI core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CoreEvent {
    CurrentStateChanged(RfState),
    NextStateChanged(RfState),
    IntfActivated(IntfActivationNtf),
    DataPacket { conn_id: u8, payload: Bytes },
    SendComplete { token: SendToken, ok: bool },
}

/// Command-side handle to the NCI core.
pub struct CoreLink {
    cmd_tx: UnboundedSender<CoreCommand>,
    current_state: RfState,
    next_state: RfState,
    next_token: SendToken,
}

impl CoreLink {
    /// Creates a link sending commands over `cmd_tx`. Both mirrored states
    /// start out as `Idle`, matching a freshly reset core.
    pub fn new(cmd_tx: UnboundedSender<CoreCommand>) -> Self {
        CoreLink {
            cmd_tx,
            current_state: RfState::Idle,
            next_state: RfState::Idle,
            next_token: 1,
        }
    }

    /// Last RF state reported by the core.
    pub fn current_state(&self) -> RfState {
        self.current_state
    }

    /// RF state the core is transitioning to.
    pub fn next_state(&self) -> RfState {
        self.next_state
    }

    pub(crate) fn note_current_state(&mut self, state: RfState) {
        self.current_state = state;
    }

    pub(crate) fn note_next_state(&mut self, state: RfState) {
        self.next_state = state;
    }

    /// Requests a transition to the given RF state.
    pub fn set_state(&self, state: RfState) {
        self.command(CoreCommand::SetState(state));
    }

    /// Pushes the operating mode bitmask down to the core.
    pub fn set_op_mode(&self, op_mode: OpMode) {
        self.command(CoreCommand::SetOpMode(op_mode));
    }

    /// Starts one data send on the given connection. Returns the token
    /// identifying the send, or `None` when the core is gone and the send
    /// could not be started.
    pub fn send_data_msg(&mut self, conn_id: u8, payload: Bytes) -> Option<SendToken> {
        let token = self.next_token;
        let cmd = CoreCommand::SendData { conn_id, payload, token };
        if self.cmd_tx.send(cmd).is_err() {
            debug!("NCI core is gone, dropping data send");
            return None;
        }
        self.next_token = self.next_token.wrapping_add(1).max(1);
        Some(token)
    }

    /// Cancels an outstanding data send.
    pub fn cancel(&self, token: SendToken) {
        self.command(CoreCommand::CancelSend(token));
    }

    fn command(&self, cmd: CoreCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            debug!("NCI core is gone, dropping command");
        }
    }
}
