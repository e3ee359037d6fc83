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

//! Listen-side endpoint: a remote peer that polled us over NFC-DEP.
//!
//! Simpler than the poll side: incoming data packets are forwarded to the
//! framework verbatim and there is no presence checking; the layer above
//! keeps the link alive.

use bytes::Bytes;
use log::debug;

use crate::core::{CoreLink, SendToken};
use crate::framework::{InitiatorId, Technology, TransmitStatus};
use crate::nci::{IntfActivationNtf, RfMode, RfProtocol, STATIC_RF_CONN_ID};

pub(crate) struct Initiator {
    id: InitiatorId,
    technology: Technology,
    response_in_progress: Option<SendToken>,
}

impl Initiator {
    /// Builds an initiator for a listen-side NFC-DEP activation. ISO-DEP
    /// listen activations are card emulation and are refused.
    pub(crate) fn new(ntf: &IntfActivationNtf, id: InitiatorId) -> Option<Initiator> {
        let technology = match ntf.mode {
            RfMode::ActiveListenA | RfMode::PassiveListenA => Technology::A,
            RfMode::PassiveListenB => Technology::B,
            RfMode::ActiveListenF | RfMode::PassiveListenF => Technology::F,
            RfMode::PassivePollA
            | RfMode::PassivePollB
            | RfMode::PassivePollF
            | RfMode::ActivePollA
            | RfMode::ActivePollF
            | RfMode::PassivePoll15693
            | RfMode::PassiveListen15693 => return None,
        };

        match ntf.protocol {
            RfProtocol::NfcDep => {}
            RfProtocol::IsoDep => {
                debug!("Card emulation (ISO-DEP) not supported yet");
                return None;
            }
            other => {
                debug!("Unsupported initiator protocol {:?}", other);
                return None;
            }
        }

        Some(Initiator { id, technology, response_in_progress: None })
    }

    pub(crate) fn id(&self) -> InitiatorId {
        self.id
    }

    pub(crate) fn technology(&self) -> Technology {
        self.technology
    }

    pub(crate) fn owns_token(&self, token: SendToken) -> bool {
        self.response_in_progress == Some(token)
    }

    /// Starts one response on the static RF connection. Returns whether the
    /// core accepted it.
    pub(crate) fn begin_respond(&mut self, core: &mut CoreLink, payload: Bytes) -> bool {
        debug_assert!(self.response_in_progress.is_none());
        match core.send_data_msg(STATIC_RF_CONN_ID, payload) {
            Some(token) => {
                self.response_in_progress = Some(token);
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_response(&mut self, core: &CoreLink) {
        if let Some(token) = self.response_in_progress.take() {
            core.cancel(token);
        }
    }

    /// Data from the remote initiator, passed to the framework as-is.
    pub(crate) fn on_data_packet(&self, conn_id: u8, payload: &Bytes) -> Option<Bytes> {
        if conn_id == STATIC_RF_CONN_ID {
            Some(payload.clone())
        } else {
            debug!("Unhandled data packet, cid={:#04x} {} byte(s)", conn_id, payload.len());
            None
        }
    }

    /// Completion of our outstanding response.
    pub(crate) fn on_send_complete(&mut self, token: SendToken, ok: bool) -> Option<TransmitStatus> {
        if self.response_in_progress != Some(token) {
            return None;
        }
        self.response_in_progress = None;
        Some(if ok { TransmitStatus::Ok } else { TransmitStatus::Error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CoreCommand;
    use crate::nci::{ActivationParam, ActivationParamNfcDepListen, RfInterface};
    use tokio::sync::mpsc;

    fn listen_ntf(mode: RfMode, protocol: RfProtocol) -> IntfActivationNtf {
        IntfActivationNtf {
            rf_intf: RfInterface::NfcDep,
            protocol,
            mode,
            mode_param_bytes: Bytes::new(),
            mode_param: None,
            activation_param_bytes: Bytes::from_static(&[0x46, 0x66, 0x6d]),
            activation_param: Some(ActivationParam::NfcDepListen(ActivationParamNfcDepListen {
                g: vec![0x46, 0x66, 0x6d],
            })),
        }
    }

    #[test]
    fn accepts_listen_nfc_dep() {
        let init =
            Initiator::new(&listen_ntf(RfMode::PassiveListenF, RfProtocol::NfcDep), InitiatorId(1))
                .unwrap();
        assert_eq!(init.technology(), Technology::F);
    }

    #[test]
    fn refuses_card_emulation() {
        assert!(
            Initiator::new(&listen_ntf(RfMode::PassiveListenA, RfProtocol::IsoDep), InitiatorId(1))
                .is_none()
        );
    }

    #[test]
    fn refuses_poll_modes() {
        assert!(
            Initiator::new(&listen_ntf(RfMode::PassivePollA, RfProtocol::NfcDep), InitiatorId(1))
                .is_none()
        );
    }

    #[test]
    fn respond_round_trip() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut core = CoreLink::new(tx);
        let mut init =
            Initiator::new(&listen_ntf(RfMode::PassiveListenF, RfProtocol::NfcDep), InitiatorId(1))
                .unwrap();
        assert!(init.begin_respond(&mut core, Bytes::from_static(b"pong")));
        let token = match rx.try_recv().unwrap() {
            CoreCommand::SendData { token, payload, .. } => {
                assert_eq!(&payload[..], b"pong");
                token
            }
            cmd => panic!("unexpected command {:?}", cmd),
        };
        assert_eq!(init.on_send_complete(token, true), Some(TransmitStatus::Ok));
        assert!(init.on_send_complete(token, true).is_none());
    }

    #[test]
    fn forwards_static_rf_data_only() {
        let init =
            Initiator::new(&listen_ntf(RfMode::PassiveListenA, RfProtocol::NfcDep), InitiatorId(1))
                .unwrap();
        let data = Bytes::from_static(b"hello");
        assert_eq!(init.on_data_packet(STATIC_RF_CONN_ID, &data).unwrap(), data);
        assert!(init.on_data_packet(0x01, &data).is_none());
    }
}
