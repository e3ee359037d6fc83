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

//! Coordination layer between the NFC framework and the NCI core.
//!
//! Translates RF state transitions and interface activation notifications
//! into the appearance and disappearance of targets (tags, poll-side peers)
//! and initiators (listen-side peers), arbitrates operating mode changes,
//! runs periodic presence checks and recovers the same tag across a brief
//! field dip (reactivation).
//!
//! The adapter is an actor: all state lives in plain fields and [`run`]
//! drives a `select!` loop over core events, framework requests and the
//! presence check timer, so every handler runs on one task and nothing
//! needs a lock.
//!
//! [`run`]: Adapter::run

use bytes::Bytes;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant};

use crate::core::{CoreEvent, CoreLink, SendToken};
use crate::framework::{
    AdapterEvent, AdapterHandle, InitiatorHandle, InitiatorId, IsoDepPollA, IsoDepPollB, ListenF,
    Mode, NfcDepInitiator, NfcDepTarget, Poll, PollA, PollB, PollF, Protocol, TagTypes,
    TargetHandle, TargetId, TransmitStatus,
};
use crate::initiator::Initiator;
use crate::nci::{
    ActivationParam, IntfActivationNtf, ModeParam, ModeParamPollA, ModeParamPollB, OpMode,
    RfInterface, RfMode, RfProtocol, RfState, BIT_RATE_212, BIT_RATE_424,
};
use crate::target::{Finished, Target, TransmitPurpose};
use crate::{Error, Result};

const PRESENCE_CHECK_PERIOD: Duration = Duration::from_millis(250);

/// AN10927: a single size NFCID1 starting with 0x08 is a random UID.
const RANDOM_UID_SIZE: usize = 4;
const RANDOM_UID_START_BYTE: u8 = 0x08;

/// Framework calls relayed by the handles in [`crate::framework`].
#[derive(Debug)]
pub(crate) enum Request {
    SubmitModeRequest(Mode),
    CancelModeRequest,
    SetPowered(bool),
    SetEnabled(bool),
    Transmit { target: TargetId, payload: Bytes },
    CancelTransmit { target: TargetId },
    DeactivateTarget { target: TargetId },
    Reactivate { target: TargetId },
    Respond { initiator: InitiatorId, payload: Bytes },
    DeactivateInitiator { initiator: InitiatorId },
}

/// Snapshot of the activated interface, kept so a reactivated tag can be
/// recognized as the one we already have.
struct IntfInfo {
    rf_intf: RfInterface,
    protocol: RfProtocol,
    mode: RfMode,
    mode_param_bytes: Bytes,
    activation_param_bytes: Bytes,
    mode_param: Option<ModeParam>,
}

impl IntfInfo {
    fn new(ntf: &IntfActivationNtf) -> IntfInfo {
        IntfInfo {
            rf_intf: ntf.rf_intf,
            protocol: ntf.protocol,
            mode: ntf.mode,
            mode_param_bytes: ntf.mode_param_bytes.clone(),
            activation_param_bytes: ntf.activation_param_bytes.clone(),
            mode_param: ntf.mode_param.clone(),
        }
    }

    /// An identical endpoint: same interface triple, matching mode
    /// parameters (with protocol specific tolerance for changing UIDs) and
    /// byte-identical activation parameters.
    fn matches(&self, ntf: &IntfActivationNtf) -> bool {
        self.rf_intf == ntf.rf_intf
            && self.protocol == ntf.protocol
            && self.mode == ntf.mode
            && self.mode_param_matches(ntf)
            && self.activation_param_bytes == ntf.activation_param_bytes
    }

    fn mode_param_matches(&self, ntf: &IntfActivationNtf) -> bool {
        if let (Some(mp1), Some(mp2)) = (self.mode_param.as_ref(), ntf.mode_param.as_ref()) {
            // Mode parameter criteria depend on the type of tag.
            match (ntf.mode, ntf.rf_intf, mp1, mp2) {
                (
                    RfMode::PassivePollA,
                    RfInterface::Frame,
                    ModeParam::PollA(a),
                    ModeParam::PollA(b),
                ) => return poll_a_match_t2(a, b),
                (
                    RfMode::PassivePollA,
                    RfInterface::IsoDep,
                    ModeParam::PollA(a),
                    ModeParam::PollA(b),
                ) => return poll_a_match(a, b),
                (
                    RfMode::PassivePollB,
                    RfInterface::IsoDep,
                    ModeParam::PollB(a),
                    ModeParam::PollB(b),
                ) => return poll_b_match(a, b),
                _ => {}
            }
        }
        // Full match is expected in the other cases.
        self.mode_param_bytes == ntf.mode_param_bytes
    }
}

/// Type 4A: the UID may change after losing the field, so it is excluded.
fn poll_a_match(a: &ModeParamPollA, b: &ModeParamPollA) -> bool {
    a.sel_res == b.sel_res && a.sens_res == b.sens_res
}

/// Type 2: same as above, except that only a random UID (4 bytes starting
/// with 0x08, per AN10927) may change; any other NFCID1 must match in full.
fn poll_a_match_t2(a: &ModeParamPollA, b: &ModeParamPollA) -> bool {
    let partial = poll_a_match(a, b);
    if a.nfcid1.len() == RANDOM_UID_SIZE
        && b.nfcid1.len() == RANDOM_UID_SIZE
        && a.nfcid1[0] == RANDOM_UID_START_BYTE
        && b.nfcid1[0] == RANDOM_UID_START_BYTE
    {
        partial
    } else {
        partial && a.nfcid1 == b.nfcid1
    }
}

/// Type 4B: NFCID0 is excluded for the same reason.
fn poll_b_match(a: &ModeParamPollB, b: &ModeParamPollB) -> bool {
    a.fsc == b.fsc && a.app_data == b.app_data && a.prot_info == b.prot_info
}

fn poll_a_param(mp: &ModeParam) -> Option<PollA> {
    match mp {
        ModeParam::PollA(p) => {
            Some(PollA { sel_res: p.sel_res.unwrap_or(0), nfcid1: p.nfcid1.clone() })
        }
        _ => None,
    }
}

fn poll_b_param(mp: &ModeParam) -> Option<PollB> {
    match mp {
        ModeParam::PollB(p) => Some(PollB {
            fsc: p.fsc,
            nfcid0: p.nfcid0.to_vec(),
            app_data: p.app_data,
            prot_info: p.prot_info.clone(),
        }),
        _ => None,
    }
}

fn poll_f_param(mp: &ModeParam) -> Option<PollF> {
    match mp {
        ModeParam::PollF(p) => Some(PollF {
            bitrate: match p.bitrate {
                BIT_RATE_212 => 212,
                BIT_RATE_424 => 424,
                // The rest is reserved in NCI 1.0
                _ => 0,
            },
            nfcid2: p.nfcid2.to_vec(),
        }),
        _ => None,
    }
}

fn listen_f_param(mp: &ModeParam) -> Option<ListenF> {
    match mp {
        ModeParam::ListenF(p) => Some(ListenF { nfcid2: p.nfcid2.clone() }),
        _ => None,
    }
}

/// Tag registration for the (protocol, interface, mode) combinations with a
/// concrete tag type. Anything else becomes an "other" tag.
fn known_tag_event(ntf: &IntfActivationNtf, target: TargetHandle) -> Option<AdapterEvent> {
    let mp = ntf.mode_param.as_ref()?;
    match ntf.protocol {
        RfProtocol::T2t if ntf.rf_intf == RfInterface::Frame => match ntf.mode {
            RfMode::PassivePollA | RfMode::ActivePollA => {
                Some(AdapterEvent::TagAddedT2 { target, poll_a: poll_a_param(mp)? })
            }
            _ => None,
        },
        RfProtocol::IsoDep if ntf.rf_intf == RfInterface::IsoDep => match ntf.mode {
            RfMode::PassivePollA => match ntf.activation_param.as_ref()? {
                ActivationParam::IsoDepPollA(ap) => Some(AdapterEvent::TagAddedT4a {
                    target,
                    poll_a: poll_a_param(mp)?,
                    iso_dep: IsoDepPollA {
                        fsc: ap.fsc,
                        t0: ap.t0,
                        ta: ap.ta,
                        tb: ap.tb,
                        tc: ap.tc,
                        t1: ap.t1.clone(),
                    },
                }),
                _ => None,
            },
            RfMode::PassivePollB => match ntf.activation_param.as_ref()? {
                ActivationParam::IsoDepPollB(ap) => Some(AdapterEvent::TagAddedT4b {
                    target,
                    poll_b: poll_b_param(mp)?,
                    iso_dep: IsoDepPollB { mbli: ap.mbli, did: ap.did, hlr: ap.hlr.clone() },
                }),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

/// Peer registration for NFC-DEP activations on the poll side.
fn peer_initiator_event(ntf: &IntfActivationNtf, target: TargetHandle) -> Option<AdapterEvent> {
    if ntf.protocol != RfProtocol::NfcDep || ntf.rf_intf != RfInterface::NfcDep {
        return None;
    }
    let atr_res_g = match ntf.activation_param.as_ref()? {
        ActivationParam::NfcDepPoll(ap) => ap.g.clone(),
        _ => return None,
    };
    match ntf.mode {
        RfMode::ActivePollA | RfMode::PassivePollA => Some(AdapterEvent::PeerInitiatorA {
            target,
            poll_a: ntf.mode_param.as_ref().and_then(poll_a_param),
            nfc_dep: NfcDepInitiator { atr_res_g },
        }),
        RfMode::ActivePollF | RfMode::PassivePollF => Some(AdapterEvent::PeerInitiatorF {
            target,
            poll_f: ntf.mode_param.as_ref().and_then(poll_f_param),
            nfc_dep: NfcDepInitiator { atr_res_g },
        }),
        _ => None,
    }
}

/// Peer registration for NFC-DEP activations on the listen side.
fn peer_target_event(ntf: &IntfActivationNtf, initiator: InitiatorHandle) -> Option<AdapterEvent> {
    if ntf.rf_intf != RfInterface::NfcDep {
        return None;
    }
    let atr_req_g = match ntf.activation_param.as_ref()? {
        ActivationParam::NfcDepListen(ap) => ap.g.clone(),
        _ => return None,
    };
    match ntf.mode {
        RfMode::ActiveListenA | RfMode::PassiveListenA => Some(AdapterEvent::PeerTargetA {
            initiator,
            nfc_dep: NfcDepTarget { atr_req_g },
        }),
        RfMode::PassiveListenF | RfMode::ActiveListenF => Some(AdapterEvent::PeerTargetF {
            initiator,
            listen_f: ntf.mode_param.as_ref().and_then(listen_f_param),
            nfc_dep: NfcDepTarget { atr_req_g },
        }),
        _ => None,
    }
}

/// Poll parameters for a tag without a concrete type.
fn other_tag_poll(ntf: &IntfActivationNtf) -> Option<Poll> {
    let mp = ntf.mode_param.as_ref()?;
    match ntf.mode {
        RfMode::PassivePollA => poll_a_param(mp).map(Poll::A),
        RfMode::PassivePollB => poll_b_param(mp).map(Poll::B),
        _ => None,
    }
}

/// The adapter. One per NFC controller.
pub struct Adapter {
    core: CoreLink,
    core_rx: Option<UnboundedReceiver<CoreEvent>>,
    req_tx: UnboundedSender<Request>,
    req_rx: Option<UnboundedReceiver<Request>>,
    events: UnboundedSender<AdapterEvent>,
    powered: bool,
    enabled: bool,
    desired_mode: Mode,
    current_mode: Mode,
    mode_change_pending: bool,
    mode_check_scheduled: bool,
    reactivating: bool,
    target: Option<Target>,
    initiator: Option<Initiator>,
    active_intf: Option<IntfInfo>,
    /// Framework exchange waiting for an in-flight presence probe to finish.
    queued_transmit: Option<(TargetId, Bytes)>,
    presence_armed: bool,
    rearm_presence: bool,
    endpoint_seq: u32,
}

impl Adapter {
    pub const SUPPORTED_MODES: Mode =
        Mode::READER_WRITER.union(Mode::P2P_INITIATOR).union(Mode::P2P_TARGET);
    pub const SUPPORTED_TAG_TYPES: TagTypes = TagTypes::MIFARE_ULTRALIGHT;
    pub const SUPPORTED_PROTOCOLS: &'static [Protocol] =
        &[Protocol::T2Tag, Protocol::T4ATag, Protocol::T4BTag, Protocol::NfcDep];

    /// Creates an adapter over the given core link and event stream.
    /// Returns the adapter together with the framework's control handle and
    /// notification stream.
    pub fn new(
        core: CoreLink,
        core_rx: UnboundedReceiver<CoreEvent>,
    ) -> (Adapter, AdapterHandle, UnboundedReceiver<AdapterEvent>) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = AdapterHandle::new(req_tx.clone());
        let adapter = Adapter {
            core,
            core_rx: Some(core_rx),
            req_tx,
            req_rx: Some(req_rx),
            events: event_tx,
            powered: false,
            enabled: false,
            desired_mode: Mode::empty(),
            current_mode: Mode::empty(),
            mode_change_pending: false,
            mode_check_scheduled: false,
            reactivating: false,
            target: None,
            initiator: None,
            active_intf: None,
            queued_transmit: None,
            presence_armed: false,
            rearm_presence: false,
            endpoint_seq: 1,
        };
        (adapter, handle, event_rx)
    }

    /// Drives the adapter until the core goes away.
    pub async fn run(mut self) -> Result<()> {
        let mut core_rx = self.core_rx.take().ok_or(Error::AlreadyRunning)?;
        let mut req_rx = self.req_rx.take().ok_or(Error::AlreadyRunning)?;
        let mut presence =
            time::interval_at(Instant::now() + PRESENCE_CHECK_PERIOD, PRESENCE_CHECK_PERIOD);
        loop {
            if self.rearm_presence {
                self.rearm_presence = false;
                presence = time::interval_at(
                    Instant::now() + PRESENCE_CHECK_PERIOD,
                    PRESENCE_CHECK_PERIOD,
                );
            }
            let presence_armed = self.presence_armed;
            tokio::select! {
                event = core_rx.recv() => match event {
                    Some(event) => self.core_event(event),
                    None => return Err(Error::CoreDisconnected),
                },
                request = req_rx.recv() => match request {
                    Some(request) => self.request(request),
                    None => return Ok(()),
                },
                _ = presence.tick(), if presence_armed => self.presence_tick(),
            }
            // Mode checks are deferred out of the handler that asked for
            // them, while the core settles. Coalesced: one flag, one check.
            if self.mode_check_scheduled {
                self.mode_check();
            }
        }
    }

    pub(crate) fn core_event(&mut self, event: CoreEvent) {
        match event {
            CoreEvent::CurrentStateChanged(state) => {
                self.core.note_current_state(state);
                self.current_state_changed();
            }
            CoreEvent::NextStateChanged(state) => {
                self.core.note_next_state(state);
                self.next_state_changed();
            }
            CoreEvent::IntfActivated(ntf) => self.intf_activated(ntf),
            CoreEvent::DataPacket { conn_id, payload } => self.data_packet(conn_id, payload),
            CoreEvent::SendComplete { token, ok } => self.send_complete(token, ok),
        }
    }

    pub(crate) fn request(&mut self, request: Request) {
        match request {
            Request::SubmitModeRequest(mode) => self.submit_mode_request(mode),
            Request::CancelModeRequest => self.cancel_mode_request(),
            Request::SetPowered(powered) => self.set_powered(powered),
            Request::SetEnabled(enabled) => self.set_enabled(enabled),
            Request::Transmit { target, payload } => self.framework_transmit(target, payload),
            Request::CancelTransmit { target } => self.framework_cancel_transmit(target),
            Request::DeactivateTarget { target } => self.deactivate_target(target),
            Request::Reactivate { target } => self.reactivate(target),
            Request::Respond { initiator, payload } => self.framework_respond(initiator, payload),
            Request::DeactivateInitiator { initiator } => self.deactivate_initiator(initiator),
        }
    }

    fn current_state_changed(&mut self) {
        self.state_check();
        self.mode_check();
    }

    fn next_state_changed(&mut self) {
        match self.core.next_state() {
            RfState::PollActive => {}
            RfState::Discovery | RfState::W4AllDiscoveries | RfState::W4HostSelect => {
                // Keep the target if we are waiting for it to reappear.
                if !self.reactivating {
                    self.drop_all();
                }
            }
            RfState::Idle | RfState::ListenActive | RfState::ListenSleep => self.drop_all(),
        }
        self.state_check();
        self.mode_check();
    }

    fn state_check(&mut self) {
        if self.core.current_state() == RfState::Idle
            && self.core.next_state() == RfState::Idle
            && self.powered
            && self.enabled
        {
            // The state machine may land in IDLE in the process of changing
            // the operating mode. Kick it back to discovery.
            self.core.set_state(RfState::Discovery);
        }
    }

    fn mode_check(&mut self) {
        self.mode_check_scheduled = false;
        let mode = if self.core.current_state() != RfState::Idle {
            if self.current_mode.is_empty() {
                self.desired_mode
            } else {
                self.current_mode
            }
        } else {
            Mode::empty()
        };
        if self.mode_change_pending {
            if mode == self.desired_mode {
                self.mode_change_pending = false;
                self.current_mode = mode;
                self.notify(AdapterEvent::ModeChanged { mode, confirmed: true });
            }
        } else if self.current_mode != mode {
            self.current_mode = mode;
            self.notify(AdapterEvent::ModeChanged { mode, confirmed: false });
        }
    }

    fn schedule_mode_check(&mut self) {
        self.mode_check_scheduled = true;
    }

    fn submit_mode_request(&mut self, mode: Mode) {
        let mut op_mode = OpMode::empty();
        if mode.contains(Mode::READER_WRITER) {
            op_mode |= OpMode::RW | OpMode::POLL;
        }
        if mode.contains(Mode::P2P_INITIATOR) {
            op_mode |= OpMode::PEER | OpMode::POLL;
        }
        if mode.contains(Mode::P2P_TARGET) {
            op_mode |= OpMode::PEER | OpMode::LISTEN;
        }
        if mode.contains(Mode::CARD_EMULATION) {
            op_mode |= OpMode::CE | OpMode::LISTEN;
        }
        self.desired_mode = mode;
        self.mode_change_pending = true;
        self.core.set_op_mode(op_mode);
        if !op_mode.is_empty() && self.powered {
            self.core.set_state(RfState::Discovery);
        }
        self.schedule_mode_check();
    }

    fn cancel_mode_request(&mut self) {
        self.mode_change_pending = false;
        self.schedule_mode_check();
    }

    fn set_powered(&mut self, powered: bool) {
        if self.powered != powered {
            self.powered = powered;
            self.state_check();
            self.schedule_mode_check();
        }
    }

    fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.state_check();
            self.schedule_mode_check();
        }
    }

    fn intf_activated(&mut self, ntf: IntfActivationNtf) {
        self.drop_initiator();
        if !self.reactivating {
            // Drop the previous target, if any.
            self.drop_target();
        } else if self.target.is_some()
            && !self.active_intf.as_ref().map_or(false, |info| info.matches(&ntf))
        {
            debug!("Different tag has arrived, dropping the old one");
            self.drop_target();
        }

        let mut reactivated = None;
        if let Some(target) = self.target.as_ref() {
            // The same target has arrived or we have been woken up.
            self.reactivating = false;
            reactivated = Some(target.id());
        } else if let Some(target) = Target::new(&ntf, TargetId(self.next_endpoint_id())) {
            let handle = TargetHandle::new(
                target.id(),
                target.technology(),
                target.protocol(),
                target.timeout_disabled(),
                self.req_tx.clone(),
            );
            if let Some(event) = peer_initiator_event(&ntf, handle.clone()) {
                self.notify(event);
            } else {
                // Not a peer interface, so assume a tag.
                self.active_intf = Some(IntfInfo::new(&ntf));
                match known_tag_event(&ntf, handle.clone()) {
                    Some(event) => self.notify(event),
                    None => {
                        let poll = other_tag_poll(&ntf);
                        self.notify(AdapterEvent::TagAddedOther { target: handle, poll });
                    }
                }
            }
            self.target = Some(target);
        } else if let Some(initiator) = Initiator::new(&ntf, InitiatorId(self.next_endpoint_id()))
        {
            let handle =
                InitiatorHandle::new(initiator.id(), initiator.technology(), self.req_tx.clone());
            if let Some(event) = peer_target_event(&ntf, handle) {
                self.notify(event);
            }
            self.initiator = Some(initiator);
        }

        // Start periodic presence checks.
        if self.need_presence_checks() {
            self.presence_armed = true;
            self.rearm_presence = true;
        }

        if let Some(target) = reactivated {
            debug!("Target reactivated");
            self.notify(AdapterEvent::TargetReactivated { target });
        }

        if self.target.is_none() && self.initiator.is_none() {
            debug!("No idea what this is");
            self.core.set_state(RfState::Idle);
        }
    }

    fn data_packet(&mut self, conn_id: u8, payload: Bytes) {
        if self.target.is_some() {
            let finished = self.target.as_mut().and_then(|t| t.on_data_packet(conn_id, &payload));
            if let Some(done) = finished {
                self.finish_target_op(done);
            }
        } else if self.initiator.is_some() {
            let forwarded =
                self.initiator.as_ref().and_then(|i| i.on_data_packet(conn_id, &payload));
            let id = self.initiator.as_ref().map(|i| i.id());
            if let (Some(payload), Some(initiator)) = (forwarded, id) {
                self.notify(AdapterEvent::DataReceived { initiator, payload });
            }
        } else {
            debug!("Unhandled data packet, cid={:#04x} {} byte(s)", conn_id, payload.len());
        }
    }

    fn send_complete(&mut self, token: SendToken, ok: bool) {
        if self.target.as_ref().map_or(false, |t| t.owns_token(token)) {
            let finished = self.target.as_mut().and_then(|t| t.on_send_complete(token, ok));
            if let Some(done) = finished {
                self.finish_target_op(done);
            }
            return;
        }
        if self.initiator.as_ref().map_or(false, |i| i.owns_token(token)) {
            let status = self.initiator.as_mut().and_then(|i| i.on_send_complete(token, ok));
            let id = self.initiator.as_ref().map(|i| i.id());
            if let (Some(status), Some(initiator)) = (status, id) {
                self.notify(AdapterEvent::ResponseSent { initiator, status });
            }
            return;
        }
        debug!("Stale send completion, token={}", token);
    }

    fn finish_target_op(&mut self, done: Finished) {
        match done.purpose {
            TransmitPurpose::Framework => {
                self.notify(AdapterEvent::TransmitDone {
                    target: done.target,
                    status: done.status,
                    payload: done.payload,
                });
            }
            TransmitPurpose::PresenceCheck => {
                debug!(
                    "Presence check {}",
                    if done.status == TransmitStatus::Ok { "ok" } else { "failed" }
                );
                if done.status != TransmitStatus::Ok {
                    self.deactivate_target(done.target);
                } else if let Some((target, payload)) = self.queued_transmit.take() {
                    self.framework_transmit(target, payload);
                }
            }
        }
    }

    fn framework_transmit(&mut self, id: TargetId, payload: Bytes) {
        let current = self.target.as_ref().map_or(false, |t| t.id() == id);
        if !current {
            debug!("Transmit for a target that is gone");
            self.notify_transmit_error(id);
            return;
        }
        if self.target.as_ref().map_or(false, |t| t.probe_in_flight()) {
            // The probe's reply must not be mistaken for the reply to this
            // exchange, so wait for it to finish.
            debug!("Presence check in flight, delaying transmit");
            self.queued_transmit = Some((id, payload));
            return;
        }
        if self.target.as_ref().map_or(false, |t| t.busy()) {
            warn!("Transmit while another one is in flight");
            self.notify_transmit_error(id);
            return;
        }
        let started = match self.target.as_mut() {
            Some(target) => target.begin_transmit(&mut self.core, payload, TransmitPurpose::Framework),
            None => false,
        };
        if !started {
            self.notify_transmit_error(id);
        }
    }

    fn framework_cancel_transmit(&mut self, id: TargetId) {
        let current = self.target.as_ref().map_or(false, |t| t.id() == id);
        if !current {
            return;
        }
        if self.queued_transmit.as_ref().map_or(false, |(queued, _)| *queued == id) {
            self.queued_transmit = None;
        }
        if self.target.as_ref().map_or(false, |t| t.framework_op_in_flight()) {
            if let Some(target) = self.target.as_mut() {
                target.cancel_transmit(&self.core);
            }
        }
    }

    fn framework_respond(&mut self, id: InitiatorId, payload: Bytes) {
        let current = self.initiator.as_ref().map_or(false, |i| i.id() == id);
        if !current {
            debug!("Response for an initiator that is gone");
            self.notify(AdapterEvent::ResponseSent { initiator: id, status: TransmitStatus::Error });
            return;
        }
        let started = match self.initiator.as_mut() {
            Some(initiator) => initiator.begin_respond(&mut self.core, payload),
            None => false,
        };
        if !started {
            self.notify(AdapterEvent::ResponseSent { initiator: id, status: TransmitStatus::Error });
        }
    }

    fn reactivate(&mut self, id: TargetId) {
        let current = self.target.as_ref().map_or(false, |t| t.id() == id);
        let state_ok = matches!(
            (self.core.current_state(), self.core.next_state()),
            (RfState::PollActive, RfState::PollActive)
                | (RfState::ListenActive, RfState::ListenActive)
        );
        if current && self.active_intf.is_some() && !self.reactivating && state_ok {
            self.reactivating = true;
            // Stop presence checks for the time being.
            self.presence_armed = false;
            // Switch to discovery and expect the same target to reappear.
            self.core.set_state(RfState::Discovery);
        } else {
            warn!("Can't reactivate the tag in this state");
        }
    }

    fn deactivate_target(&mut self, id: TargetId) {
        if self.target.as_ref().map_or(false, |t| t.id() == id) {
            self.drop_target();
            if self.powered {
                self.core.set_state(RfState::Discovery);
            }
        }
    }

    fn deactivate_initiator(&mut self, id: InitiatorId) {
        if self.initiator.as_ref().map_or(false, |i| i.id() == id) {
            self.drop_initiator();
            if self.powered {
                self.core.set_state(RfState::Discovery);
            }
        }
    }

    fn presence_tick(&mut self) {
        if self.target.is_none() {
            self.presence_armed = false;
            return;
        }
        if self.target.as_ref().map_or(false, |t| t.busy()) {
            debug!("Skipped presence check");
            return;
        }
        let started = match self.target.as_mut() {
            Some(target) => target.presence_probe(&mut self.core),
            None => false,
        };
        if !started {
            debug!("Failed to start presence check");
            self.presence_armed = false;
            self.core.set_state(RfState::Discovery);
        }
    }

    /// NFC-DEP presence is handled at LLCP level by the layer above.
    fn need_presence_checks(&self) -> bool {
        self.active_intf.as_ref().map_or(false, |info| info.protocol != RfProtocol::NfcDep)
    }

    fn drop_target(&mut self) {
        if let Some(mut target) = self.target.take() {
            self.reactivating = false;
            self.presence_armed = false;
            target.cancel_transmit(&self.core);
            self.active_intf = None;
            info!("Target is gone");
            self.notify(AdapterEvent::TargetGone { target: target.id() });
            if let Some((queued, _)) = self.queued_transmit.take() {
                self.notify_transmit_error(queued);
            }
        }
    }

    fn drop_initiator(&mut self) {
        if let Some(mut initiator) = self.initiator.take() {
            initiator.cancel_response(&self.core);
            info!("Initiator is gone");
            self.notify(AdapterEvent::InitiatorGone { initiator: initiator.id() });
        }
    }

    fn drop_all(&mut self) {
        self.drop_target();
        self.drop_initiator();
    }

    fn notify(&self, event: AdapterEvent) {
        if self.events.send(event).is_err() {
            debug!("Framework is gone, dropping notification");
        }
    }

    fn notify_transmit_error(&self, target: TargetId) {
        self.notify(AdapterEvent::TransmitDone {
            target,
            status: TransmitStatus::Error,
            payload: Bytes::new(),
        });
    }

    fn next_endpoint_id(&mut self) -> u32 {
        let id = self.endpoint_seq;
        self.endpoint_seq += 1;
        id
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.drop_all();
    }
}
