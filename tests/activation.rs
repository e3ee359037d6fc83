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

//! End-to-end scenarios through the adapter's event loop, with the core and
//! the framework played by the test over the channel boundaries.

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

use nci_adapter::nci::{
    IntfActivationNtf, ModeParam, ModeParamPollA, OpMode, RfInterface, RfMode, RfProtocol,
    RfState, STATIC_RF_CONN_ID,
};
use nci_adapter::{
    Adapter, AdapterEvent, AdapterHandle, CoreCommand, CoreEvent, CoreLink, Error, Mode,
    TransmitStatus,
};

struct Harness {
    handle: AdapterHandle,
    core_tx: UnboundedSender<CoreEvent>,
    cmds: UnboundedReceiver<CoreCommand>,
    events: UnboundedReceiver<AdapterEvent>,
    run: tokio::task::JoinHandle<nci_adapter::Result<()>>,
}

fn start() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let (cmd_tx, cmds) = mpsc::unbounded_channel();
    let (core_tx, core_rx) = mpsc::unbounded_channel();
    let (adapter, handle, events) = Adapter::new(CoreLink::new(cmd_tx), core_rx);
    let run = tokio::spawn(adapter.run());
    Harness { handle, core_tx, cmds, events, run }
}

async fn next_cmd(h: &mut Harness) -> CoreCommand {
    timeout(Duration::from_secs(5), h.cmds.recv())
        .await
        .expect("timed out waiting for a core command")
        .expect("core command stream closed")
}

async fn next_event(h: &mut Harness) -> AdapterEvent {
    timeout(Duration::from_secs(5), h.events.recv())
        .await
        .expect("timed out waiting for a framework event")
        .expect("framework event stream closed")
}

fn t2_ntf() -> IntfActivationNtf {
    IntfActivationNtf {
        rf_intf: RfInterface::Frame,
        protocol: RfProtocol::T2t,
        mode: RfMode::PassivePollA,
        mode_param_bytes: Bytes::from_static(&[
            0x44, 0x00, 0x07, 0x04, 0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6,
        ]),
        mode_param: Some(ModeParam::PollA(ModeParamPollA {
            sens_res: [0x44, 0x00],
            nfcid1: vec![0x04, 0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6],
            sel_res: Some(0x00),
        })),
        activation_param_bytes: Bytes::new(),
        activation_param: None,
    }
}

#[tokio::test(start_paused = true)]
async fn reader_session_from_power_on_to_presence_check() {
    let mut h = start();

    h.handle.set_powered(true);
    h.handle.set_enabled(true);
    // Both RF states idle and the radio up: the adapter nudges the core
    // towards discovery.
    assert_eq!(next_cmd(&mut h).await, CoreCommand::SetState(RfState::Discovery));

    assert!(h.handle.submit_mode_request(Mode::READER_WRITER));
    assert_eq!(next_cmd(&mut h).await, CoreCommand::SetOpMode(OpMode::RW | OpMode::POLL));
    assert_eq!(next_cmd(&mut h).await, CoreCommand::SetState(RfState::Discovery));

    h.core_tx.send(CoreEvent::CurrentStateChanged(RfState::Discovery)).unwrap();
    match next_event(&mut h).await {
        AdapterEvent::ModeChanged { mode, confirmed } => {
            assert_eq!(mode, Mode::READER_WRITER);
            assert!(confirmed);
        }
        event => panic!("unexpected event {:?}", event),
    }

    // A Type 2 tag shows up.
    h.core_tx.send(CoreEvent::NextStateChanged(RfState::PollActive)).unwrap();
    h.core_tx.send(CoreEvent::CurrentStateChanged(RfState::PollActive)).unwrap();
    h.core_tx.send(CoreEvent::IntfActivated(t2_ntf())).unwrap();
    let target = match next_event(&mut h).await {
        AdapterEvent::TagAddedT2 { target, poll_a } => {
            assert_eq!(poll_a.nfcid1.len(), 7);
            target
        }
        event => panic!("unexpected event {:?}", event),
    };

    // One exchange, with the reply outrunning the send completion.
    assert!(target.transmit(&[0x30, 0x04]));
    let token = match next_cmd(&mut h).await {
        CoreCommand::SendData { conn_id, payload, token } => {
            assert_eq!(conn_id, STATIC_RF_CONN_ID);
            assert_eq!(&payload[..], &[0x30, 0x04]);
            token
        }
        cmd => panic!("unexpected command {:?}", cmd),
    };
    h.core_tx
        .send(CoreEvent::DataPacket {
            conn_id: STATIC_RF_CONN_ID,
            payload: Bytes::from_static(&[0xde, 0xad, 0x00]),
        })
        .unwrap();
    h.core_tx.send(CoreEvent::SendComplete { token, ok: true }).unwrap();
    match next_event(&mut h).await {
        AdapterEvent::TransmitDone { status, payload, .. } => {
            assert_eq!(status, TransmitStatus::Ok);
            assert_eq!(&payload[..], &[0xde, 0xad]);
        }
        event => panic!("unexpected event {:?}", event),
    }

    // With the tag idle the presence timer kicks in after 250 ms.
    let token = match next_cmd(&mut h).await {
        CoreCommand::SendData { payload, token, .. } => {
            assert_eq!(&payload[..], &[0x30, 0x00]);
            token
        }
        cmd => panic!("unexpected command {:?}", cmd),
    };
    h.core_tx.send(CoreEvent::SendComplete { token, ok: true }).unwrap();
    h.core_tx
        .send(CoreEvent::DataPacket {
            conn_id: STATIC_RF_CONN_ID,
            payload: Bytes::from_static(&[0x00]),
        })
        .unwrap();

    // A failing probe drops the tag and resumes discovery.
    let token = match next_cmd(&mut h).await {
        CoreCommand::SendData { payload, token, .. } => {
            assert_eq!(&payload[..], &[0x30, 0x00]);
            token
        }
        cmd => panic!("unexpected command {:?}", cmd),
    };
    h.core_tx.send(CoreEvent::SendComplete { token, ok: true }).unwrap();
    h.core_tx
        .send(CoreEvent::DataPacket {
            conn_id: STATIC_RF_CONN_ID,
            payload: Bytes::from_static(&[0xb2]),
        })
        .unwrap();
    match next_event(&mut h).await {
        AdapterEvent::TargetGone { target: id } => assert_eq!(id, target.id()),
        event => panic!("unexpected event {:?}", event),
    }
    assert_eq!(next_cmd(&mut h).await, CoreCommand::SetState(RfState::Discovery));

    // A transmit on the dropped target fails without touching the core.
    assert!(target.transmit(&[0x30, 0x04]));
    match next_event(&mut h).await {
        AdapterEvent::TransmitDone { status, .. } => assert_eq!(status, TransmitStatus::Error),
        event => panic!("unexpected event {:?}", event),
    }

    h.run.abort();
}

#[tokio::test(start_paused = true)]
async fn run_ends_when_the_core_goes_away() {
    let h = start();
    h.core_tx.send(CoreEvent::CurrentStateChanged(RfState::Discovery)).unwrap();
    let Harness { core_tx, run, .. } = h;
    drop(core_tx);
    match timeout(Duration::from_secs(5), run).await.expect("run did not end").unwrap() {
        Err(Error::CoreDisconnected) => {}
        result => panic!("unexpected run result {:?}", result),
    }
}

#[tokio::test(start_paused = true)]
async fn handles_fail_fast_once_the_adapter_is_gone() {
    let mut h = start();
    h.handle.set_powered(true);
    h.handle.set_enabled(true);
    h.core_tx.send(CoreEvent::IntfActivated(t2_ntf())).unwrap();
    let target = match next_event(&mut h).await {
        AdapterEvent::TagAddedT2 { target, .. } => target,
        event => panic!("unexpected event {:?}", event),
    };
    h.run.abort();
    let _ = h.run.await;
    assert!(!target.transmit(&[0x30, 0x04]));
    assert!(!h.handle.submit_mode_request(Mode::READER_WRITER));
}
