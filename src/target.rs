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

//! Poll-side endpoint: a tag, or a peer we discovered by polling.
//!
//! Owns the send/receive state of the static RF connection while active.
//! The core may deliver the reply data packet before the send completion
//! callback for the command that provoked it; the reply is then parked in
//! `pending_reply` and delivered once the completion arrives, so the
//! framework always observes send-then-result ordering.

use bytes::Bytes;
use log::debug;

use crate::core::{CoreLink, SendToken};
use crate::framework::{Protocol, TargetId, Technology, TransmitStatus};
use crate::nci::{IntfActivationNtf, RfInterface, RfMode, RfProtocol, STATIC_RF_CONN_ID, STATUS_OK};

/// First byte of the Type 2 tag READ command.
const T2T_CMD_READ: u8 = 0x30;

/// Who asked for the exchange currently in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TransmitPurpose {
    Framework,
    PresenceCheck,
}

/// How replies on the static RF connection are turned into transmit results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Framing {
    /// Frame RF interface: the last payload byte is an NCI status.
    Frame,
    /// ISO-DEP RF interface: payload passed through verbatim.
    IsoDep,
    Unsupported,
}

/// Probe used by the periodic presence check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PresenceStrategy {
    /// READ block 0; any answer proves the tag is still there.
    T2Read,
    /// Empty ISO-DEP frame.
    IsoDepEmpty,
    None,
}

/// A completed exchange, ready to be routed by the adapter.
#[derive(Debug)]
pub(crate) struct Finished {
    pub(crate) target: TargetId,
    pub(crate) purpose: TransmitPurpose,
    pub(crate) status: TransmitStatus,
    pub(crate) payload: Bytes,
}

pub(crate) struct Target {
    id: TargetId,
    technology: Technology,
    protocol: Protocol,
    framing: Framing,
    presence: PresenceStrategy,
    send_in_progress: Option<SendToken>,
    transmit_in_progress: bool,
    purpose: TransmitPurpose,
    /// Reply that arrived before the send completion callback.
    pending_reply: Option<Bytes>,
}

impl Target {
    /// Builds a target for a poll-side activation. Listen-side activations
    /// belong to [`crate::initiator::Initiator`] and return `None` here.
    pub(crate) fn new(ntf: &IntfActivationNtf, id: TargetId) -> Option<Target> {
        let technology = match ntf.mode {
            RfMode::PassivePollA | RfMode::ActivePollA => Technology::A,
            RfMode::PassivePollB => Technology::B,
            RfMode::PassivePollF | RfMode::ActivePollF => Technology::F,
            RfMode::PassivePoll15693 => Technology::Unknown,
            RfMode::PassiveListenA
            | RfMode::PassiveListenB
            | RfMode::PassiveListenF
            | RfMode::ActiveListenA
            | RfMode::ActiveListenF
            | RfMode::PassiveListen15693 => return None,
        };

        let mut presence = PresenceStrategy::None;
        let protocol = match ntf.protocol {
            RfProtocol::T1t => Protocol::T1Tag,
            RfProtocol::T2t => {
                presence = PresenceStrategy::T2Read;
                Protocol::T2Tag
            }
            RfProtocol::T3t => Protocol::T3Tag,
            RfProtocol::IsoDep => {
                presence = PresenceStrategy::IsoDepEmpty;
                match technology {
                    Technology::A => Protocol::T4ATag,
                    Technology::B => Protocol::T4BTag,
                    _ => {
                        debug!("Unexpected ISO_DEP technology");
                        Protocol::Unknown
                    }
                }
            }
            RfProtocol::NfcDep => Protocol::NfcDep,
            RfProtocol::Undetermined | RfProtocol::Proprietary => {
                debug!("Unsupported protocol {:?}", ntf.protocol);
                Protocol::Unknown
            }
        };

        let framing = match ntf.rf_intf {
            RfInterface::Frame => Framing::Frame,
            RfInterface::IsoDep => Framing::IsoDep,
            other => {
                debug!("Unsupported RF interface {:?}", other);
                Framing::Unsupported
            }
        };

        Some(Target {
            id,
            technology,
            protocol,
            framing,
            presence,
            send_in_progress: None,
            transmit_in_progress: false,
            purpose: TransmitPurpose::Framework,
            pending_reply: None,
        })
    }

    pub(crate) fn id(&self) -> TargetId {
        self.id
    }

    pub(crate) fn technology(&self) -> Technology {
        self.technology
    }

    pub(crate) fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// ISO-DEP timeouts are reported by the core, so the framework level
    /// transmit timeout must be off for those targets.
    pub(crate) fn timeout_disabled(&self) -> bool {
        self.framing == Framing::IsoDep
    }

    /// An exchange is in flight; no new one may start yet.
    pub(crate) fn busy(&self) -> bool {
        self.transmit_in_progress
    }

    pub(crate) fn probe_in_flight(&self) -> bool {
        self.transmit_in_progress && self.purpose == TransmitPurpose::PresenceCheck
    }

    pub(crate) fn framework_op_in_flight(&self) -> bool {
        self.transmit_in_progress && self.purpose == TransmitPurpose::Framework
    }

    pub(crate) fn owns_token(&self, token: SendToken) -> bool {
        self.send_in_progress == Some(token)
    }

    /// Starts one send on the static RF connection. Returns whether the core
    /// accepted it.
    pub(crate) fn begin_transmit(
        &mut self,
        core: &mut CoreLink,
        payload: Bytes,
        purpose: TransmitPurpose,
    ) -> bool {
        debug_assert!(self.send_in_progress.is_none());
        debug_assert!(!self.transmit_in_progress);
        match core.send_data_msg(STATIC_RF_CONN_ID, payload) {
            Some(token) => {
                self.send_in_progress = Some(token);
                self.transmit_in_progress = true;
                self.purpose = purpose;
                true
            }
            None => false,
        }
    }

    /// Cancels the exchange in flight and discards any parked reply.
    pub(crate) fn cancel_transmit(&mut self, core: &CoreLink) {
        self.transmit_in_progress = false;
        self.pending_reply = None;
        if let Some(token) = self.send_in_progress.take() {
            core.cancel(token);
        }
    }

    /// Starts the protocol-appropriate presence probe. Returns `false` when
    /// the protocol has no probe or the core refused the send.
    pub(crate) fn presence_probe(&mut self, core: &mut CoreLink) -> bool {
        let payload = match self.presence {
            PresenceStrategy::T2Read => Bytes::from_static(&[T2T_CMD_READ, 0x00]),
            PresenceStrategy::IsoDepEmpty => Bytes::new(),
            PresenceStrategy::None => return false,
        };
        self.begin_transmit(core, payload, TransmitPurpose::PresenceCheck)
    }

    /// Handles a data packet from the core. Returns the finished exchange
    /// when the packet completes one.
    pub(crate) fn on_data_packet(&mut self, conn_id: u8, payload: &Bytes) -> Option<Finished> {
        if conn_id == STATIC_RF_CONN_ID
            && self.transmit_in_progress
            && self.pending_reply.is_none()
        {
            if self.send_in_progress.is_some() {
                // The reply outran the send completion callback. Park it so
                // the framework still sees send-then-result ordering.
                debug!("Waiting for send to complete");
                self.pending_reply = Some(payload.clone());
                None
            } else {
                Some(self.finish(payload.clone()))
            }
        } else {
            debug!("Unhandled data packet, cid={:#04x} {} byte(s)", conn_id, payload.len());
            None
        }
    }

    /// Handles the completion callback of our outstanding send. Flushes a
    /// parked reply, if one arrived early.
    pub(crate) fn on_send_complete(&mut self, token: SendToken, ok: bool) -> Option<Finished> {
        if self.send_in_progress != Some(token) {
            return None;
        }
        self.send_in_progress = None;
        if !ok {
            debug!("Send failed, waiting for the reply to time out");
        }
        match self.pending_reply.take() {
            Some(reply) => {
                debug!("Send completed");
                Some(self.finish(reply))
            }
            None => None,
        }
    }

    fn finish(&mut self, payload: Bytes) -> Finished {
        self.transmit_in_progress = false;
        let (status, payload) = match self.framing {
            Framing::Frame => frame_result(payload),
            Framing::IsoDep => (TransmitStatus::Ok, payload),
            Framing::Unsupported => (TransmitStatus::Error, Bytes::new()),
        };
        Finished { target: self.id, purpose: self.purpose, status, payload }
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        if self.pending_reply.is_some() {
            assert!(self.send_in_progress.is_some());
            assert!(self.transmit_in_progress);
        }
    }
}

/// Frame RF interface reply: payload followed by one NCI status byte.
fn frame_result(payload: Bytes) -> (TransmitStatus, Bytes) {
    if let Some((&status, _)) = payload.split_last() {
        if status == STATUS_OK {
            let len = payload.len() - 1;
            return (TransmitStatus::Ok, payload.slice(..len));
        }
        debug!("Transmission status {:#04x}", status);
    }
    (TransmitStatus::Error, Bytes::new())
}
