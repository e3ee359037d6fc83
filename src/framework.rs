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

//! Boundary towards the NFC framework.
//!
//! The framework consumes a stream of [`AdapterEvent`]s and talks back
//! through [`AdapterHandle`], [`TargetHandle`] and [`InitiatorHandle`]. The
//! handles relay calls over the adapter's request channel; once the adapter
//! is gone the channel is closed and every call fails fast without touching
//! adapter state.

use bitflags::bitflags;
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

use crate::adapter::Request;

bitflags! {
    /// High-level operating modes requested by the framework.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Mode: u8 {
        const P2P_INITIATOR = 0x01;
        const READER_WRITER = 0x02;
        const P2P_TARGET = 0x04;
        const CARD_EMULATION = 0x08;
    }
}

bitflags! {
    /// Tag families the adapter can drive.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TagTypes: u8 {
        const MIFARE_ULTRALIGHT = 0x01;
    }
}

/// RF technology of a remote endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Technology {
    Unknown,
    A,
    B,
    F,
}

/// Tag or peer protocol of a remote endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Protocol {
    Unknown,
    T1Tag,
    T2Tag,
    T3Tag,
    T4ATag,
    T4BTag,
    NfcDep,
}

/// Outcome of a data exchange reported to the framework.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransmitStatus {
    Ok,
    Error,
}

/// NFC-A poll parameters as seen by the framework.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollA {
    pub sel_res: u8,
    pub nfcid1: Vec<u8>,
}

/// NFC-B poll parameters as seen by the framework.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollB {
    pub fsc: u16,
    pub nfcid0: Vec<u8>,
    pub app_data: [u8; 4],
    pub prot_info: Vec<u8>,
}

/// NFC-F poll parameters. The bitrate is in kbit/s (212 or 424), zero when
/// the notification carried a reserved value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollF {
    pub bitrate: u16,
    pub nfcid2: Vec<u8>,
}

/// NFC-F listen parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenF {
    pub nfcid2: Vec<u8>,
}

/// ISO-DEP (Type 4A) activation parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsoDepPollA {
    pub fsc: u16,
    pub t0: u8,
    pub ta: u8,
    pub tb: u8,
    pub tc: u8,
    pub t1: Vec<u8>,
}

/// ISO-DEP (Type 4B) activation parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IsoDepPollB {
    pub mbli: u8,
    pub did: u8,
    pub hlr: Vec<u8>,
}

/// NFC-DEP parameters of a remote peer we polled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NfcDepInitiator {
    pub atr_res_g: Vec<u8>,
}

/// NFC-DEP parameters of a remote peer that polled us.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NfcDepTarget {
    pub atr_req_g: Vec<u8>,
}

/// Poll parameters of a tag without a more specific type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Poll {
    A(PollA),
    B(PollB),
}

/// Identity of a target across its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetId(pub(crate) u32);

/// Identity of an initiator across its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InitiatorId(pub(crate) u32);

/// Notifications delivered to the framework.
#[derive(Clone, Debug)]
pub enum AdapterEvent {
    /// The observable mode changed; `confirmed` is set when this completes a
    /// mode request, clear when the mode drifted on its own.
    ModeChanged { mode: Mode, confirmed: bool },
    TagAddedT2 { target: TargetHandle, poll_a: PollA },
    TagAddedT4a { target: TargetHandle, poll_a: PollA, iso_dep: IsoDepPollA },
    TagAddedT4b { target: TargetHandle, poll_b: PollB, iso_dep: IsoDepPollB },
    TagAddedOther { target: TargetHandle, poll: Option<Poll> },
    PeerInitiatorA { target: TargetHandle, poll_a: Option<PollA>, nfc_dep: NfcDepInitiator },
    PeerInitiatorF { target: TargetHandle, poll_f: Option<PollF>, nfc_dep: NfcDepInitiator },
    PeerTargetA { initiator: InitiatorHandle, nfc_dep: NfcDepTarget },
    PeerTargetF { initiator: InitiatorHandle, listen_f: Option<ListenF>, nfc_dep: NfcDepTarget },
    TargetGone { target: TargetId },
    TargetReactivated { target: TargetId },
    InitiatorGone { initiator: InitiatorId },
    TransmitDone { target: TargetId, status: TransmitStatus, payload: Bytes },
    ResponseSent { initiator: InitiatorId, status: TransmitStatus },
    DataReceived { initiator: InitiatorId, payload: Bytes },
}

/// Framework-side handle to the adapter itself.
#[derive(Clone, Debug)]
pub struct AdapterHandle {
    requests: UnboundedSender<Request>,
}

impl AdapterHandle {
    pub(crate) fn new(requests: UnboundedSender<Request>) -> Self {
        AdapterHandle { requests }
    }

    /// Requests a new operating mode. Completion is reported asynchronously
    /// with a confirmed [`AdapterEvent::ModeChanged`]. Returns whether the
    /// adapter was there to take the request.
    pub fn submit_mode_request(&self, mode: Mode) -> bool {
        self.requests.send(Request::SubmitModeRequest(mode)).is_ok()
    }

    /// Abandons a pending mode request. The currently settled mode is
    /// re-reported so the framework observes where things actually are.
    pub fn cancel_mode_request(&self) {
        let _ = self.requests.send(Request::CancelModeRequest);
    }

    pub fn set_powered(&self, powered: bool) {
        let _ = self.requests.send(Request::SetPowered(powered));
    }

    pub fn set_enabled(&self, enabled: bool) {
        let _ = self.requests.send(Request::SetEnabled(enabled));
    }
}

/// Framework-side handle to an activated target (tag or poll-side peer).
#[derive(Clone, Debug)]
pub struct TargetHandle {
    id: TargetId,
    technology: Technology,
    protocol: Protocol,
    timeout_disabled: bool,
    requests: UnboundedSender<Request>,
}

impl TargetHandle {
    pub(crate) fn new(
        id: TargetId,
        technology: Technology,
        protocol: Protocol,
        timeout_disabled: bool,
        requests: UnboundedSender<Request>,
    ) -> Self {
        TargetHandle { id, technology, protocol, timeout_disabled, requests }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn technology(&self) -> Technology {
        self.technology
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// When set, the framework must not apply its own transmit timeout; the
    /// core reports ISO-DEP timeouts through `CORE_INTERFACE_ERROR_NTF`.
    pub fn transmit_timeout_disabled(&self) -> bool {
        self.timeout_disabled
    }

    /// Starts one data exchange with the target. The outcome arrives as an
    /// [`AdapterEvent::TransmitDone`]. Returns whether the adapter was there
    /// to take the request.
    pub fn transmit(&self, payload: &[u8]) -> bool {
        self.requests
            .send(Request::Transmit { target: self.id, payload: Bytes::copy_from_slice(payload) })
            .is_ok()
    }

    /// Cancels the exchange in flight, if any.
    pub fn cancel_transmit(&self) {
        let _ = self.requests.send(Request::CancelTransmit { target: self.id });
    }

    /// Asks the adapter to drop this target and resume discovery.
    pub fn deactivate(&self) {
        let _ = self.requests.send(Request::DeactivateTarget { target: self.id });
    }

    /// Asks the adapter to re-discover this same target.
    pub fn reactivate(&self) -> bool {
        self.requests.send(Request::Reactivate { target: self.id }).is_ok()
    }
}

/// Framework-side handle to an activated initiator (listen-side peer).
#[derive(Clone, Debug)]
pub struct InitiatorHandle {
    id: InitiatorId,
    technology: Technology,
    requests: UnboundedSender<Request>,
}

impl InitiatorHandle {
    pub(crate) fn new(
        id: InitiatorId,
        technology: Technology,
        requests: UnboundedSender<Request>,
    ) -> Self {
        InitiatorHandle { id, technology, requests }
    }

    pub fn id(&self) -> InitiatorId {
        self.id
    }

    pub fn technology(&self) -> Technology {
        self.technology
    }

    /// Sends one response to the remote initiator. The outcome arrives as an
    /// [`AdapterEvent::ResponseSent`].
    pub fn respond(&self, payload: &[u8]) -> bool {
        self.requests
            .send(Request::Respond {
                initiator: self.id,
                payload: Bytes::copy_from_slice(payload),
            })
            .is_ok()
    }

    /// Asks the adapter to drop this initiator.
    pub fn deactivate(&self) {
        let _ = self.requests.send(Request::DeactivateInitiator { initiator: self.id });
    }
}
