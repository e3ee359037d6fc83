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

//! NCI-level vocabulary shared with the core state machine: RF states,
//! technology-and-mode values, protocols, interfaces and the parsed contents
//! of `RF_INTF_ACTIVATED_NTF`.

use bitflags::bitflags;
use bytes::Bytes;

/// Connection id of the static RF connection.
pub const STATIC_RF_CONN_ID: u8 = 0x00;

/// NCI status value reported for a successful transmission.
pub const STATUS_OK: u8 = 0x00;

/// Bit rate value for 212 kbit/s (NFC-F).
pub const BIT_RATE_212: u8 = 0x01;
/// Bit rate value for 424 kbit/s (NFC-F).
pub const BIT_RATE_424: u8 = 0x02;

/// RF states of the NCI state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RfState {
    Idle,
    Discovery,
    W4AllDiscoveries,
    W4HostSelect,
    PollActive,
    ListenActive,
    ListenSleep,
}

/// RF technology and mode from the activation notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RfMode {
    PassivePollA,
    PassivePollB,
    PassivePollF,
    ActivePollA,
    ActivePollF,
    PassivePoll15693,
    PassiveListenA,
    PassiveListenB,
    PassiveListenF,
    ActiveListenA,
    ActiveListenF,
    PassiveListen15693,
}

/// RF protocols.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RfProtocol {
    Undetermined,
    T1t,
    T2t,
    T3t,
    IsoDep,
    NfcDep,
    Proprietary,
}

/// RF interfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RfInterface {
    NfceeDirect,
    Frame,
    IsoDep,
    NfcDep,
    Proprietary,
}

bitflags! {
    /// Operating mode bits pushed down to the core with `set_op_mode`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpMode: u8 {
        const RW = 0x01;
        const PEER = 0x02;
        const CE = 0x04;
        const POLL = 0x08;
        const LISTEN = 0x10;
    }
}

/// NFC-A poll mode parameters (SENS_RES, NFCID1, SEL_RES).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeParamPollA {
    pub sens_res: [u8; 2],
    pub nfcid1: Vec<u8>,
    /// Absent when the SEL_RES Response length is zero.
    pub sel_res: Option<u8>,
}

/// NFC-B poll mode parameters (SENSB_RES contents).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeParamPollB {
    pub nfcid0: [u8; 4],
    pub fsc: u16,
    pub app_data: [u8; 4],
    pub prot_info: Vec<u8>,
}

/// NFC-F poll mode parameters (SENSF_RES contents).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeParamPollF {
    pub bitrate: u8,
    pub nfcid2: [u8; 8],
}

/// NFC-F listen mode parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeParamListenF {
    pub nfcid2: Vec<u8>,
}

/// Parsed RF technology specific parameters of the activation notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModeParam {
    PollA(ModeParamPollA),
    PollB(ModeParamPollB),
    PollF(ModeParamPollF),
    ListenF(ModeParamListenF),
}

/// ISO-DEP poll A activation parameters (RATS response).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationParamIsoDepPollA {
    pub fsc: u16,
    pub t0: u8,
    pub ta: u8,
    pub tb: u8,
    pub tc: u8,
    /// Historical bytes.
    pub t1: Vec<u8>,
}

/// ISO-DEP poll B activation parameters (ATTRIB response).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationParamIsoDepPollB {
    pub mbli: u8,
    pub did: u8,
    /// Higher layer response.
    pub hlr: Vec<u8>,
}

/// NFC-DEP poll side activation parameters (ATR_RES).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationParamNfcDepPoll {
    /// ATR_RES general bytes.
    pub g: Vec<u8>,
}

/// NFC-DEP listen side activation parameters (ATR_REQ).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationParamNfcDepListen {
    /// ATR_REQ general bytes.
    pub g: Vec<u8>,
}

/// Parsed activation parameters of the activation notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActivationParam {
    IsoDepPollA(ActivationParamIsoDepPollA),
    IsoDepPollB(ActivationParamIsoDepPollB),
    NfcDepPoll(ActivationParamNfcDepPoll),
    NfcDepListen(ActivationParamNfcDepListen),
}

/// Relevant contents of `RF_INTF_ACTIVATED_NTF`, carrying both the raw
/// parameter buffers and their parsed form. The raw buffers are kept because
/// reactivation matching falls back to byte comparison for parameter types
/// it has no specific rules for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntfActivationNtf {
    pub rf_intf: RfInterface,
    pub protocol: RfProtocol,
    pub mode: RfMode,
    pub mode_param_bytes: Bytes,
    pub mode_param: Option<ModeParam>,
    pub activation_param_bytes: Bytes,
    pub activation_param: Option<ActivationParam>,
}
