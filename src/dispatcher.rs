//! Event dispatcher: the accessory's state and its transition function.
//!
//! [`State::step`] maps one event to a [`Transition`] (effects to run plus
//! an optional fault to log). It never touches the stack, so the whole
//! lifecycle can be driven and checked on the host.

use crate::advertising::{advertising_payload, scan_response_payload, AdvParams};
use crate::config::{ADV_TX_POWER_DBM, DEVICE_NAME};
use crate::connection::{ConnId, Connection, Link, PeerAddress, Phase, TransId};
use crate::dice::DiceValue;
use crate::effect::{AttStatus, Effect, Transition};
use crate::error::{BleError, CccdError, Error};
use crate::event::{Event, GapEvent, GattEvent};
use crate::gatt::{AttrValue, AttributeCreated, TreeBuilder};
use crate::security::SecurityState;
use crate::subscription::{cccd_bytes, on_descriptor_write, WriteOutcome};

/// Progress of one advertising payload upload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Upload {
    #[default]
    NotSent,
    Pending,
    Done,
}

/// Consistent copy of the shared state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Snapshot {
    pub phase: Phase,
    /// `None` without a connection.
    pub security: Option<SecurityState>,
    pub subscribed: bool,
    pub dice: DiceValue,
}

/// Everything the dispatcher and the generator share. Guard with one lock.
#[derive(Clone, Debug)]
pub struct State {
    phase: Phase,
    /// Advertising wanted (between `start` and `stop`).
    enabled: bool,
    builder: TreeBuilder,
    dice: DiceValue,
    adv_data: Upload,
    scan_rsp: Upload,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            enabled: false,
            builder: TreeBuilder::new(DiceValue::INITIAL),
            dice: DiceValue::INITIAL,
            adv_data: Upload::NotSent,
            scan_rsp: Upload::NotSent,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn dice(&self) -> DiceValue {
        self.dice
    }

    pub fn snapshot(&self) -> Snapshot {
        let link = self.phase.link();
        Snapshot {
            phase: self.phase,
            security: link.map(|l| l.security),
            subscribed: link.is_some_and(|l| l.subscribed),
            dice: self.dice,
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Lifecycle
    // ───────────────────────────────────────────────────────────────────

    /// Begin advertising. The first call also uploads both payloads and
    /// kicks off the attribute table.
    pub fn start(&mut self) -> Transition {
        if self.phase.is_halted() {
            return Transition::none();
        }
        self.enabled = true;
        let mut t = Transition::none();

        if self.phase == Phase::Idle {
            self.phase = Phase::Advertising;
            if self.adv_data == Upload::NotSent {
                match advertising_payload(DEVICE_NAME, ADV_TX_POWER_DBM) {
                    Ok(adv) => {
                        self.adv_data = Upload::Pending;
                        t.push(Effect::SetAdvertisingData(adv));
                    }
                    Err(e) => t.fault = Some(e),
                }
                match scan_response_payload(DEVICE_NAME, ADV_TX_POWER_DBM) {
                    Ok(rsp) => {
                        self.scan_rsp = Upload::Pending;
                        t.push(Effect::SetScanResponseData(rsp));
                    }
                    Err(e) => t.fault = Some(e),
                }
            } else if self.ready_to_advertise() {
                t.push(Effect::StartAdvertising(AdvParams::DEFAULT));
            }
        }

        if let Some(step) = self.builder.begin() {
            t.push(Effect::Build(step));
        }
        t
    }

    /// Stop advertising. A live connection is kept; it is not followed by
    /// re-advertising once it ends.
    pub fn stop(&mut self) -> Transition {
        self.enabled = false;
        match self.phase {
            Phase::Advertising => {
                self.phase = Phase::Idle;
                Transition::none().with(Effect::StopAdvertising)
            }
            _ => Transition::none(),
        }
    }

    /// Both payloads uploaded and the attribute table complete.
    fn ready_to_advertise(&self) -> bool {
        self.adv_data == Upload::Done
            && self.scan_rsp == Upload::Done
            && self.builder.handles().is_some()
    }

    fn advertise(&self) -> Transition {
        if self.phase == Phase::Advertising && self.ready_to_advertise() {
            Transition::none().with(Effect::StartAdvertising(AdvParams::DEFAULT))
        } else {
            Transition::none()
        }
    }

    /// After a setup failure nothing but the dice keeps running.
    fn halt(&mut self, err: Error) -> Transition {
        let was_advertising = self.phase == Phase::Advertising;
        self.phase = Phase::Halted;
        self.enabled = false;
        let mut t = Transition::fault(err);
        if was_advertising {
            t.push(Effect::StopAdvertising);
        }
        t
    }

    // ───────────────────────────────────────────────────────────────────
    // Dispatch
    // ───────────────────────────────────────────────────────────────────

    pub fn step(&mut self, event: Event) -> Transition {
        if let Event::Tick(value) = event {
            return self.on_tick(value);
        }
        if self.phase.is_halted() {
            return Transition::none();
        }
        match event {
            Event::Gap(e) => self.on_gap(e),
            Event::Gatt(e) => self.on_gatt(e),
            Event::Tick(_) => Transition::none(),
        }
    }

    fn on_gap(&mut self, event: GapEvent) -> Transition {
        match event {
            GapEvent::AdvertisingDataSet { status } => {
                self.adv_data = if status == 0 { Upload::Done } else { Upload::NotSent };
                self.after_upload(status)
            }
            GapEvent::ScanResponseDataSet { status } => {
                self.scan_rsp = if status == 0 { Upload::Done } else { Upload::NotSent };
                self.after_upload(status)
            }
            GapEvent::AdvertisingStarted { status: 0 } => Transition::none(),
            GapEvent::AdvertisingStarted { .. } => Transition::fault(BleError::AdvertisingFailed),
            GapEvent::AdvertisingComplete => self.advertise(),
            GapEvent::AdvertisingStopped => Transition::none(),
            GapEvent::SecurityRequest { peer } => {
                if let Some(link) = self.phase.link_mut() {
                    link.begin_security();
                }
                Transition::none().with(Effect::AcceptSecurity { peer })
            }
            GapEvent::AuthComplete { peer, result } => self.on_auth_complete(peer, result),
            GapEvent::PacketLengthSet { .. } | GapEvent::PhyUpdated { .. } => Transition::none(),
            GapEvent::Other(kind) => Transition::fault(Error::UnknownEvent(kind)),
        }
    }

    fn after_upload(&self, status: u8) -> Transition {
        if status != 0 {
            return Transition::fault(BleError::AdvertisingFailed);
        }
        self.advertise()
    }

    fn on_auth_complete(&mut self, peer: PeerAddress, result: Result<(), u8>) -> Transition {
        let Some(link) = self.phase.link_mut() else {
            return Transition::none();
        };
        link.complete_security(result);
        match result {
            Ok(()) => Transition::none().with(Effect::LookupPeerIdentity { peer }),
            Err(reason) => Transition::fault(Error::AuthFailed(reason)),
        }
    }

    fn on_gatt(&mut self, event: GattEvent) -> Transition {
        match event {
            GattEvent::AttributeCreated(created) => self.on_created(created),
            GattEvent::Connected { conn, peer, status } => self.on_connected(conn, peer, status),
            GattEvent::Disconnected { conn, .. } => self.on_disconnected(conn),
            GattEvent::Read {
                conn,
                trans,
                handle,
            } => self.on_read(conn, trans, handle),
            GattEvent::Write {
                conn,
                trans,
                handle,
                value,
                len,
                prepared,
            } => self.on_write(conn, trans, handle, &value, len, prepared),
            GattEvent::NotifyComplete { status: 0 } => Transition::none(),
            GattEvent::NotifyComplete { .. } => Transition::fault(BleError::NotifyFailed),
            GattEvent::MtuExchanged { .. } => Transition::none(),
            GattEvent::Other(kind) => Transition::fault(Error::UnknownEvent(kind)),
        }
    }

    fn on_created(&mut self, created: AttributeCreated) -> Transition {
        match self.builder.on_created(created) {
            Ok(Some(step)) => Transition::none().with(Effect::Build(step)),
            // Table complete.
            Ok(None) => self.advertise(),
            Err(e) => self.halt(e.into()),
        }
    }

    fn on_connected(&mut self, conn: ConnId, peer: PeerAddress, status: u8) -> Transition {
        if status != 0 {
            let mut t = self.advertise();
            t.fault = Some(BleError::Raw(status as u32).into());
            return t;
        }
        let mut link = Link::new(Connection { id: conn, peer });
        link.begin_security();
        self.phase.connect(link);
        Transition::none().with(Effect::InitiateEncryption { peer })
    }

    fn on_disconnected(&mut self, conn: ConnId) -> Transition {
        if let Some(link) = self.phase.link() {
            if link.conn.id != conn {
                // Stale event for a connection we already dropped.
                return Transition::none();
            }
        }
        self.phase.disconnect();
        if !self.enabled {
            self.phase = Phase::Idle;
            return Transition::none();
        }
        // Straight back to advertising, even if the payloads are still in
        // flight: their completion events start it then.
        self.advertise()
    }

    fn on_read(&self, conn: ConnId, trans: TransId, handle: u16) -> Transition {
        let mut value = AttrValue::new();
        let status = match self.builder.handles() {
            Some(h) if handle == h.value => {
                value = self.dice.to_ascii();
                AttStatus::Success
            }
            Some(h) if handle == h.cccd => {
                let subscribed = self.phase.link().is_some_and(|l| l.subscribed);
                // Two bytes always fit.
                let _ = value.extend_from_slice(&cccd_bytes(subscribed));
                AttStatus::Success
            }
            _ => AttStatus::InvalidHandle,
        };
        Transition::none().with(Effect::SendReadResponse {
            conn,
            trans,
            handle,
            status,
            value,
        })
    }

    fn on_write(
        &mut self,
        conn: ConnId,
        trans: TransId,
        handle: u16,
        raw: &[u8],
        len: usize,
        prepared: bool,
    ) -> Transition {
        // Every write is acknowledged, whatever happens to its value.
        let mut t = Transition::none().with(Effect::SendWriteResponse {
            conn,
            trans,
            handle,
            status: AttStatus::Success,
        });
        if prepared {
            return t;
        }
        let (Some(handles), Some(link)) = (self.builder.handles(), self.phase.link_mut()) else {
            return t;
        };
        if link.conn.id != conn {
            return t;
        }
        match on_descriptor_write(&mut link.subscribed, handles.cccd, handle, raw) {
            // Report what the peer sent, not the truncated copy.
            WriteOutcome::Rejected(CccdError::Length(_)) => {
                t.fault = Some(CccdError::Length(len).into());
            }
            WriteOutcome::Rejected(e) => t.fault = Some(e.into()),
            WriteOutcome::Ignored | WriteOutcome::Applied(_) => {}
        }
        t
    }

    fn on_tick(&mut self, value: DiceValue) -> Transition {
        self.dice = value;
        let Some(handles) = self.builder.handles() else {
            return Transition::none();
        };
        let ascii = value.to_ascii();
        let mut t = Transition::none().with(Effect::SetValue {
            handle: handles.value,
            value: ascii.clone(),
        });
        if let Some(link) = self.phase.link() {
            if link.subscribed {
                t.push(Effect::Notify {
                    conn: link.conn.id,
                    handle: handles.value,
                    value: ascii,
                });
            }
        }
        t
    }
}
