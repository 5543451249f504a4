//! Integration tests for the dice accessory, driven through the public API
//! with a stack double that records every call.

use std::cell::RefCell;
use std::collections::VecDeque;

use dice_accessory::advertising::AdvParams;
use dice_accessory::connection::{ConnId, PeerAddress, Phase, TransId};
use dice_accessory::effect::AttStatus;
use dice_accessory::error::{BleError, CccdError, Error};
use dice_accessory::gatt::{
    AttributeCreated, AttributeKind, CharacteristicDef, DescriptorDef, ResponseMode, Uuid,
};
use dice_accessory::security::{IdentityKey, SecurityState};
use dice_accessory::{Accessory, BleStack, DiceValue, Event, GapEvent, GattEvent, Outcome};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use rand::rngs::mock::StepRng;
use rand::rngs::StdRng;
use rand::SeedableRng;

const PEER: PeerAddress = PeerAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
const CONN: ConnId = ConnId(1);
const SERVICE: u16 = 0x0010;
const VALUE: u16 = 0x0012;
const CCCD: u16 = 0x0013;

#[derive(Clone, Debug, PartialEq)]
enum Call {
    AdvData,
    ScanData,
    StartAdv,
    StopAdv,
    CreateService,
    StartService(u16),
    AddCharacteristic(u16),
    AddDescriptor(u16),
    ReadResponse(u16, AttStatus, Vec<u8>),
    WriteResponse(u16, AttStatus),
    SetValue(u16, Vec<u8>),
    Notify(ConnId, u16, Vec<u8>),
    Encrypt,
    AcceptSecurity,
    Lookup,
}

/// Records calls and, like a real stack, answers creation calls with
/// "created" events that the test feeds back in.
#[derive(Default)]
struct RecordingStack {
    calls: RefCell<Vec<Call>>,
    pending: RefCell<VecDeque<Event>>,
    /// Transaction ids echoed by read and write responses, in order.
    answered: RefCell<Vec<TransId>>,
    characteristic: RefCell<Option<CharacteristicDef>>,
    descriptor: RefCell<Option<DescriptorDef>>,
}

impl RecordingStack {
    fn created(&self, kind: AttributeKind, handle: u16) {
        self.pending
            .borrow_mut()
            .push_back(GattEvent::AttributeCreated(AttributeCreated { kind, status: 0, handle }).into());
    }

    fn record(&self, call: Call) -> Result<(), BleError> {
        self.calls.borrow_mut().push(call);
        Ok(())
    }

    fn take(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    fn notifications(&self) -> Vec<Vec<u8>> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Notify(_, _, v) => Some(v.clone()),
                _ => None,
            })
            .collect()
    }
}

impl BleStack for RecordingStack {
    fn set_advertising_data(&self, _data: &[u8]) -> Result<(), BleError> {
        self.pending
            .borrow_mut()
            .push_back(GapEvent::AdvertisingDataSet { status: 0 }.into());
        self.record(Call::AdvData)
    }
    fn set_scan_response_data(&self, _data: &[u8]) -> Result<(), BleError> {
        self.pending
            .borrow_mut()
            .push_back(GapEvent::ScanResponseDataSet { status: 0 }.into());
        self.record(Call::ScanData)
    }
    fn start_advertising(&self, params: &AdvParams) -> Result<(), BleError> {
        assert_eq!(*params, AdvParams::DEFAULT);
        self.record(Call::StartAdv)
    }
    fn stop_advertising(&self) -> Result<(), BleError> {
        self.record(Call::StopAdv)
    }
    fn create_service(&self, uuid: &Uuid, _num_handles: u16) -> Result<(), BleError> {
        assert!(matches!(uuid, Uuid::Uuid128(_)));
        self.created(AttributeKind::Service, SERVICE);
        self.record(Call::CreateService)
    }
    fn start_service(&self, service: u16) -> Result<(), BleError> {
        self.created(AttributeKind::ServiceStarted, service);
        self.record(Call::StartService(service))
    }
    fn add_characteristic(&self, service: u16, def: &CharacteristicDef) -> Result<(), BleError> {
        *self.characteristic.borrow_mut() = Some(def.clone());
        self.created(AttributeKind::Characteristic, VALUE);
        self.record(Call::AddCharacteristic(service))
    }
    fn add_descriptor(&self, service: u16, def: &DescriptorDef) -> Result<(), BleError> {
        *self.descriptor.borrow_mut() = Some(*def);
        self.created(AttributeKind::Descriptor, CCCD);
        self.record(Call::AddDescriptor(service))
    }
    fn send_read_response(
        &self,
        _conn: ConnId,
        trans: TransId,
        handle: u16,
        status: AttStatus,
        value: &[u8],
    ) -> Result<(), BleError> {
        self.answered.borrow_mut().push(trans);
        self.record(Call::ReadResponse(handle, status, value.to_vec()))
    }
    fn send_write_response(
        &self,
        _conn: ConnId,
        trans: TransId,
        handle: u16,
        status: AttStatus,
    ) -> Result<(), BleError> {
        self.answered.borrow_mut().push(trans);
        self.record(Call::WriteResponse(handle, status))
    }
    fn set_value(&self, handle: u16, value: &[u8]) -> Result<(), BleError> {
        self.record(Call::SetValue(handle, value.to_vec()))
    }
    fn send_notification(&self, conn: ConnId, handle: u16, value: &[u8]) -> Result<(), BleError> {
        self.record(Call::Notify(conn, handle, value.to_vec()))
    }
    fn initiate_encryption(&self, _peer: PeerAddress) -> Result<(), BleError> {
        self.record(Call::Encrypt)
    }
    fn accept_security(&self, _peer: PeerAddress) -> Result<(), BleError> {
        self.record(Call::AcceptSecurity)
    }
    fn lookup_bonded_identity(&self, _peer: PeerAddress) -> Option<IdentityKey> {
        let _ = self.record(Call::Lookup);
        Some(IdentityKey([0x5A; 16]))
    }
}

struct Harness {
    acc: Accessory<CriticalSectionRawMutex>,
    stack: RecordingStack,
}

impl Harness {
    /// Started, with every stack answer delivered: advertising.
    fn advertising() -> Self {
        let h = Self {
            acc: Accessory::new(),
            stack: RecordingStack::default(),
        };
        assert!(h.acc.start(&h.stack).is_clean());
        h.drain();
        h
    }

    fn connected() -> Self {
        let h = Self::advertising();
        h.dispatch(GattEvent::Connected {
            conn: CONN,
            peer: PEER,
            status: 0,
        });
        h
    }

    /// Deliver stack answers until there are none left.
    fn drain(&self) {
        loop {
            let next = self.stack.pending.borrow_mut().pop_front();
            let Some(event) = next else { break };
            let out = self.acc.dispatch(event, &self.stack);
            assert!(out.is_clean(), "unexpected faults: {:?}", out.faults);
        }
    }

    fn dispatch(&self, event: impl Into<Event>) -> Outcome {
        self.acc.dispatch(event.into(), &self.stack)
    }

    fn write_cccd(&self, bytes: &[u8]) -> Outcome {
        self.dispatch(GattEvent::write(CONN, TransId(3), CCCD, bytes, false))
    }

    fn read(&self, handle: u16) -> (AttStatus, Vec<u8>) {
        self.stack.take();
        self.dispatch(GattEvent::Read {
            conn: CONN,
            trans: TransId(4),
            handle,
        });
        match self.stack.take().as_slice() {
            [Call::ReadResponse(h, status, value)] if *h == handle => (*status, value.clone()),
            other => panic!("expected one read response, got {:?}", other),
        }
    }

    /// Tick with a known face.
    fn tick(&self, face: u8) -> Outcome {
        self.dispatch(Event::Tick(DiceValue::new(face).unwrap()))
    }

    fn disconnect(&self) -> Outcome {
        self.dispatch(GattEvent::Disconnected {
            conn: CONN,
            reason: 0x13,
        })
    }
}

#[test]
fn bring_up_builds_table_in_order_then_advertises() {
    let h = Harness::advertising();
    let calls = h.stack.take();
    assert_eq!(
        calls,
        vec![
            Call::AdvData,
            Call::ScanData,
            Call::CreateService,
            Call::StartService(SERVICE),
            Call::AddCharacteristic(SERVICE),
            Call::AddDescriptor(SERVICE),
            Call::StartAdv,
        ]
    );
    assert_eq!(h.acc.snapshot().phase, Phase::Advertising);
}

#[test]
fn subscribed_peer_gets_one_notification_per_tick() {
    let h = Harness::connected();
    assert!(h.write_cccd(&[0x01, 0x00]).is_clean());
    h.stack.take();

    h.tick(4);
    assert_eq!(h.stack.notifications(), vec![b"4".to_vec()]);
    assert!(h
        .stack
        .take()
        .contains(&Call::Notify(CONN, VALUE, b"4".to_vec())));
}

#[test]
fn unsubscribed_peer_gets_nothing_but_reads_latest() {
    let h = Harness::connected();
    h.tick(2);
    assert!(h.stack.notifications().is_empty());
    assert_eq!(h.read(VALUE), (AttStatus::Success, b"2".to_vec()));
}

#[test]
fn disconnect_drops_subscription_and_readvertises() {
    let h = Harness::connected();
    h.write_cccd(&[0x01, 0x00]);
    h.stack.take();

    h.disconnect();
    assert_eq!(h.stack.take(), vec![Call::StartAdv]);
    let snap = h.acc.snapshot();
    assert_eq!(snap.phase, Phase::Advertising);
    assert!(!snap.subscribed);
    assert_eq!(snap.security, None);

    h.tick(5);
    assert!(h.stack.notifications().is_empty());

    h.dispatch(GattEvent::Connected {
        conn: CONN,
        peer: PEER,
        status: 0,
    });
    assert!(!h.acc.snapshot().subscribed);
    h.tick(6);
    assert!(h.stack.notifications().is_empty());
}

#[test]
fn invalid_cccd_value_is_acked_and_reported_once() {
    let h = Harness::connected();
    h.stack.take();

    let out = h.write_cccd(&[0x02, 0x00]);
    assert_eq!(
        h.stack.take(),
        vec![Call::WriteResponse(CCCD, AttStatus::Success)]
    );
    assert_eq!(
        out.faults.as_slice(),
        &[Error::Cccd(CccdError::InvalidValue(0x0002))]
    );
    assert!(!h.acc.snapshot().subscribed);
}

#[test]
fn connect_pairs_proactively_and_reports_identity() {
    let h = Harness::advertising();
    h.stack.take();
    h.dispatch(GattEvent::Connected {
        conn: CONN,
        peer: PEER,
        status: 0,
    });
    assert_eq!(h.stack.take(), vec![Call::Encrypt]);
    assert_eq!(h.acc.snapshot().security, Some(SecurityState::Negotiating));

    let out = h.dispatch(GapEvent::AuthComplete {
        peer: PEER,
        result: Ok(()),
    });
    assert_eq!(h.stack.take(), vec![Call::Lookup]);
    assert_eq!(out.identity, Some(IdentityKey([0x5A; 16])));
    assert_eq!(h.acc.snapshot().security, Some(SecurityState::Secured));
}

#[test]
fn failed_pairing_leaves_reads_and_notifications_working() {
    let h = Harness::connected();
    let out = h.dispatch(GapEvent::AuthComplete {
        peer: PEER,
        result: Err(0x05),
    });
    assert_eq!(out.faults.as_slice(), &[Error::AuthFailed(0x05)]);
    assert_eq!(h.acc.snapshot().security, Some(SecurityState::Failed));

    h.write_cccd(&[0x01, 0x00]);
    h.tick(3);
    assert_eq!(h.stack.notifications(), vec![b"3".to_vec()]);
    assert_eq!(h.read(VALUE), (AttStatus::Success, b"3".to_vec()));
}

#[test]
fn peer_security_request_is_accepted() {
    let h = Harness::connected();
    h.stack.take();
    h.dispatch(GapEvent::SecurityRequest { peer: PEER });
    assert_eq!(h.stack.take(), vec![Call::AcceptSecurity]);
}

#[test]
fn every_tick_mirrors_value_into_the_table() {
    let h = Harness::advertising();
    h.stack.take();
    h.tick(6);
    assert_eq!(h.stack.take(), vec![Call::SetValue(VALUE, b"6".to_vec())]);
}

#[test]
fn dice_stays_in_range_for_many_random_ticks() {
    let h = Harness::connected();
    h.write_cccd(&[0x01, 0x00]);
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..500 {
        assert!(h.acc.tick(&mut rng, &h.stack).is_clean());
        let face = h.acc.snapshot().dice.get();
        assert!((1..=6).contains(&face));
    }
    let sent = h.stack.notifications();
    assert_eq!(sent.len(), 500);
    assert!(sent.iter().all(|v| v.len() == 1 && (b'1'..=b'6').contains(&v[0])));
}

#[test]
fn notification_only_with_connection_subscription_and_tick() {
    let h = Harness::advertising();
    let mut rng = StepRng::new(0, 1);

    // Tick without a connection.
    h.acc.tick(&mut rng, &h.stack);
    assert!(h.stack.notifications().is_empty());

    // Connection, no subscription.
    h.dispatch(GattEvent::Connected {
        conn: CONN,
        peer: PEER,
        status: 0,
    });
    h.acc.tick(&mut rng, &h.stack);
    assert!(h.stack.notifications().is_empty());

    // Subscription without a tick sends nothing.
    h.write_cccd(&[0x01, 0x00]);
    assert!(h.stack.notifications().is_empty());

    h.acc.tick(&mut rng, &h.stack);
    assert_eq!(h.stack.notifications(), vec![b"3".to_vec()]);

    // Unsubscribe again.
    h.write_cccd(&[0x00, 0x00]);
    h.acc.tick(&mut rng, &h.stack);
    assert_eq!(h.stack.notifications().len(), 1);
}

#[test]
fn cccd_read_reflects_subscription() {
    let h = Harness::connected();
    assert_eq!(h.read(CCCD), (AttStatus::Success, vec![0x00, 0x00]));
    h.write_cccd(&[0x01, 0x00]);
    assert_eq!(h.read(CCCD), (AttStatus::Success, vec![0x01, 0x00]));
    assert_eq!(h.read(0x0099), (AttStatus::InvalidHandle, vec![]));
}

#[test]
fn unknown_event_kinds_do_not_disturb_the_link() {
    let h = Harness::connected();
    h.write_cccd(&[0x01, 0x00]);
    let before = h.acc.snapshot();

    let out = h.dispatch(GattEvent::Other(0x7F));
    assert_eq!(out.faults.as_slice(), &[Error::UnknownEvent(0x7F)]);
    assert_eq!(h.acc.snapshot(), before);
}

#[test]
fn stop_then_start_resumes_advertising() {
    let h = Harness::advertising();
    h.stack.take();
    h.acc.stop(&h.stack);
    assert_eq!(h.stack.take(), vec![Call::StopAdv]);
    assert_eq!(h.acc.snapshot().phase, Phase::Idle);

    h.acc.start(&h.stack);
    assert_eq!(h.stack.take(), vec![Call::StartAdv]);
}

#[test]
fn cccd_requests_are_answered_by_the_application() {
    let h = Harness::connected();
    let cccd = h.stack.descriptor.borrow().unwrap();
    assert_eq!(cccd.response, ResponseMode::Application);
    let value = h.stack.characteristic.borrow().clone().unwrap();
    assert_eq!(value.response, ResponseMode::Stack);

    h.dispatch(GattEvent::write(CONN, TransId(41), CCCD, &[0x01, 0x00], false));
    h.dispatch(GattEvent::Read {
        conn: CONN,
        trans: TransId(42),
        handle: CCCD,
    });
    h.dispatch(GattEvent::write(CONN, TransId(43), CCCD, &[0x07, 0x00], false));
    assert_eq!(*h.stack.answered.borrow(), vec![TransId(41), TransId(42), TransId(43)]);
    assert!(h.acc.snapshot().subscribed);
}

#[test]
fn disconnect_after_a_burst_of_writes_readvertises() {
    let h = Harness::connected();
    for i in 0..32 {
        let on = i % 2 == 0;
        h.dispatch(GattEvent::write(CONN, TransId(i), CCCD, &[on as u8, 0x00], false));
    }
    h.stack.take();

    h.dispatch(GattEvent::Disconnected { conn: CONN, reason: 0x13 });
    assert_eq!(h.acc.snapshot().phase, Phase::Advertising);
    assert_eq!(h.stack.take(), vec![Call::StartAdv]);
}
