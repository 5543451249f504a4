//! [`BleStack`] on the Nordic SoftDevice.
//!
//! The SoftDevice hands out attribute handles synchronously, so every
//! creation call posts its "created" event right away.
//!
//! Attributes created with [`ResponseMode::Application`] get read and write
//! authorization: the SoftDevice parks each request, the core sees it as an
//! event, and the parked request is answered by `send_read_response` /
//! `send_write_response` under the transaction id handed out here.
//! Everything else is served from the SoftDevice's attribute table, which
//! `set_value` keeps in sync with the dice.

use core::cell::{Cell, RefCell};
use core::mem;

use defmt::{debug, info, warn};
use dice_accessory::advertising::{AdvParams, AdvPayload, FilterPolicy};
use dice_accessory::connection::{ConnId, PeerAddress, TransId};
use dice_accessory::effect::AttStatus;
use dice_accessory::error::BleError;
use dice_accessory::event::{GapEvent, GattEvent, WriteValue};
use dice_accessory::gatt::{
    AttributeCreated, AttributeKind, CharacteristicDef, DescriptorDef, Permissions, Properties,
    ResponseMode, Uuid,
};
use dice_accessory::security::IdentityKey;
use dice_accessory::subscription::parse_cccd;
use dice_accessory::BleStack;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Timer};
use nrf_softdevice::ble::gatt_server::{self, DeferredReadReply, DeferredWriteReply, WriteOp};
use nrf_softdevice::ble::{peripheral, Connection, GattError, SecurityMode};
use nrf_softdevice::{raw, RawError, Softdevice};
use rand_core::{impls, RngCore};

use super::bonder::Bonder;
use super::{post, AdvCommand, ADV_CONTROL, EVENTS};

/// Disconnect reason reported when the SoftDevice does not tell us one.
const DISCONNECT_REASON_UNKNOWN: u8 = 0;

/// Status posted when `advertise_pairable` fails to start.
const ADV_START_FAILED: u8 = 0xFF;

/// How long the peer gets to finish pairing before we report a failure.
const PAIRING_TIMEOUT: Duration = Duration::from_secs(10);

struct AdvData {
    adv: AdvPayload,
    scan: AdvPayload,
}

/// Authorized requests waiting for the core's answer.
#[derive(Default)]
struct Parked {
    next_trans: u32,
    read: Option<(TransId, DeferredReadReply)>,
    write: Option<(TransId, DeferredWriteReply, WriteValue)>,
}

impl Parked {
    fn trans(&mut self) -> TransId {
        self.next_trans = self.next_trans.wrapping_add(1);
        TransId(self.next_trans)
    }
}

pub struct SoftDeviceStack {
    sd: &'static Softdevice,
    bonder: &'static Bonder,
    adv: Mutex<CriticalSectionRawMutex, RefCell<AdvData>>,
    conn: Mutex<CriticalSectionRawMutex, RefCell<Option<Connection>>>,
    /// CCCD handle the SoftDevice created along with the characteristic.
    cccd: Mutex<CriticalSectionRawMutex, Cell<u16>>,
    parked: Mutex<CriticalSectionRawMutex, RefCell<Parked>>,
}

fn open(allowed: bool) -> raw::ble_gap_conn_sec_mode_t {
    let mut mode: raw::ble_gap_conn_sec_mode_t = unsafe { mem::zeroed() };
    // sm=1 lv=1: open link; sm=0 lv=0: no access
    let level = allowed as u8;
    mode.set_sm(level);
    mode.set_lv(level);
    mode
}

fn attr_md(perms: Permissions, response: ResponseMode) -> raw::ble_gatts_attr_md_t {
    let mut md: raw::ble_gatts_attr_md_t = unsafe { mem::zeroed() };
    md.read_perm = open(perms.read);
    md.write_perm = open(perms.write);
    md.set_vloc(raw::BLE_GATTS_VLOC_STACK as u8);
    if response == ResponseMode::Application {
        md.set_rd_auth(perms.read as u8);
        md.set_wr_auth(perms.write as u8);
    }
    md
}

fn att_result(status: AttStatus) -> Result<(), GattError> {
    match status {
        AttStatus::Success => Ok(()),
        AttStatus::InvalidHandle => Err(GattError::ATTERR_INVALID_HANDLE),
    }
}

fn sd_uuid(uuid: &Uuid) -> nrf_softdevice::ble::Uuid {
    match uuid {
        Uuid::Uuid16(u) => nrf_softdevice::ble::Uuid::new_16(*u),
        Uuid::Uuid128(bytes) => nrf_softdevice::ble::Uuid::new_128(bytes),
    }
}

fn raw_err(e: RawError) -> BleError {
    BleError::Raw(e as u32)
}

fn created(kind: AttributeKind, handle: u16) {
    post(
        GattEvent::AttributeCreated(AttributeCreated {
            kind,
            status: 0,
            handle,
        })
        .into(),
    );
}

impl SoftDeviceStack {
    pub fn new(sd: &'static Softdevice, bonder: &'static Bonder) -> Self {
        Self {
            sd,
            bonder,
            adv: Mutex::new(RefCell::new(AdvData {
                adv: AdvPayload::new(),
                scan: AdvPayload::new(),
            })),
            conn: Mutex::new(RefCell::new(None)),
            cccd: Mutex::new(Cell::new(0)),
            parked: Mutex::new(RefCell::new(Parked::default())),
        }
    }

    fn conn_id(&self) -> ConnId {
        ConnId(self.connection().and_then(|c| c.handle()).unwrap_or(0))
    }

    fn park_read(&self, reply: DeferredReadReply) -> TransId {
        self.parked.lock(|p| {
            let mut p = p.borrow_mut();
            let trans = p.trans();
            p.read = Some((trans, reply));
            trans
        })
    }

    fn park_write(&self, reply: DeferredWriteReply, data: &[u8]) -> TransId {
        let mut value = WriteValue::new();
        let n = data.len().min(value.capacity());
        // n <= capacity
        let _ = value.extend_from_slice(&data[..n]);
        self.parked.lock(|p| {
            let mut p = p.borrow_mut();
            let trans = p.trans();
            p.write = Some((trans, reply, value));
            trans
        })
    }

    fn unpark_read(&self, trans: TransId) -> Option<DeferredReadReply> {
        self.parked.lock(|p| {
            let mut p = p.borrow_mut();
            match p.read.take() {
                Some((t, reply)) if t == trans => Some(reply),
                other => {
                    p.read = other;
                    None
                }
            }
        })
    }

    fn unpark_write(&self, trans: TransId) -> Option<(DeferredWriteReply, WriteValue)> {
        self.parked.lock(|p| {
            let mut p = p.borrow_mut();
            match p.write.take() {
                Some((t, reply, value)) if t == trans => Some((reply, value)),
                other => {
                    p.write = other;
                    None
                }
            }
        })
    }

    fn payloads(&self) -> (AdvPayload, AdvPayload) {
        self.adv.lock(|a| {
            let a = a.borrow();
            (a.adv.clone(), a.scan.clone())
        })
    }

    fn connection(&self) -> Option<Connection> {
        self.conn.lock(|c| c.borrow().clone())
    }

    fn set_connection(&self, conn: Option<Connection>) {
        self.conn.lock(|c| *c.borrow_mut() = conn);
    }

    /// Current connection, if it belongs to `peer`.
    fn connection_to(&self, peer: PeerAddress) -> Result<Connection, BleError> {
        self.connection()
            .filter(|c| c.peer_address().bytes() == peer.0)
            .ok_or(BleError::NotConnected)
    }
}

impl BleStack for SoftDeviceStack {
    fn set_advertising_data(&self, data: &[u8]) -> Result<(), BleError> {
        let stored = self.adv.lock(|a| {
            let mut a = a.borrow_mut();
            a.adv.clear();
            a.adv.extend_from_slice(data)
        });
        stored.map_err(|_| BleError::AdvertisingFailed)?;
        post(GapEvent::AdvertisingDataSet { status: 0 }.into());
        Ok(())
    }

    fn set_scan_response_data(&self, data: &[u8]) -> Result<(), BleError> {
        let stored = self.adv.lock(|a| {
            let mut a = a.borrow_mut();
            a.scan.clear();
            a.scan.extend_from_slice(data)
        });
        stored.map_err(|_| BleError::AdvertisingFailed)?;
        post(GapEvent::ScanResponseDataSet { status: 0 }.into());
        Ok(())
    }

    fn start_advertising(&self, params: &AdvParams) -> Result<(), BleError> {
        ADV_CONTROL.signal(AdvCommand::Start(*params));
        Ok(())
    }

    fn stop_advertising(&self) -> Result<(), BleError> {
        ADV_CONTROL.signal(AdvCommand::Stop);
        Ok(())
    }

    fn create_service(&self, uuid: &Uuid, _num_handles: u16) -> Result<(), BleError> {
        let uuid = sd_uuid(uuid);
        let mut handle: u16 = 0;
        let ret = unsafe {
            raw::sd_ble_gatts_service_add(
                raw::BLE_GATTS_SRVC_TYPE_PRIMARY as u8,
                uuid.as_raw_ptr(),
                &mut handle as _,
            )
        };
        RawError::convert(ret).map_err(raw_err)?;
        created(AttributeKind::Service, handle);
        Ok(())
    }

    fn start_service(&self, service: u16) -> Result<(), BleError> {
        // Services are live as soon as they are added.
        created(AttributeKind::ServiceStarted, service);
        Ok(())
    }

    fn add_characteristic(&self, service: u16, def: &CharacteristicDef) -> Result<(), BleError> {
        let uuid = sd_uuid(&def.uuid);

        let cccd = DescriptorDef::CCCD;
        let cccd_md = attr_md(cccd.permissions, cccd.response);
        let mut value_md = attr_md(def.permissions, def.response);
        value_md.set_vlen(1);

        let mut char_md: raw::ble_gatts_char_md_t = unsafe { mem::zeroed() };
        char_md
            .char_props
            .set_read(def.properties.contains(Properties::READ) as u8);
        char_md
            .char_props
            .set_notify(def.properties.contains(Properties::NOTIFY) as u8);
        char_md.p_cccd_md = &cccd_md as *const _;

        let attr = raw::ble_gatts_attr_t {
            p_uuid: uuid.as_raw_ptr(),
            p_attr_md: &value_md as *const _,
            init_len: def.initial_value.len() as u16,
            init_offs: 0,
            max_len: def.max_len,
            p_value: def.initial_value.as_ptr() as *mut u8,
        };

        let mut handles: raw::ble_gatts_char_handles_t = unsafe { mem::zeroed() };
        let ret = unsafe {
            raw::sd_ble_gatts_characteristic_add(service, &char_md as _, &attr as _, &mut handles as _)
        };
        RawError::convert(ret).map_err(raw_err)?;

        self.cccd.lock(|c| c.set(handles.cccd_handle));
        created(AttributeKind::Characteristic, handles.value_handle);
        Ok(())
    }

    fn add_descriptor(&self, _service: u16, def: &DescriptorDef) -> Result<(), BleError> {
        // The SoftDevice created the CCCD together with the notifiable
        // characteristic, from `DescriptorDef::CCCD`. Nothing else can be
        // added afterwards.
        if *def != DescriptorDef::CCCD {
            return Err(BleError::AttributeFailed);
        }
        let handle = self.cccd.lock(|c| c.get());
        created(AttributeKind::Descriptor, handle);
        Ok(())
    }

    fn send_read_response(
        &self,
        _conn: ConnId,
        trans: TransId,
        handle: u16,
        status: AttStatus,
        value: &[u8],
    ) -> Result<(), BleError> {
        let Some(reply) = self.unpark_read(trans) else {
            // Served from the attribute table.
            debug!("no parked read {} for handle {}", trans.0, handle);
            return Ok(());
        };
        reply
            .reply(att_result(status).map(|()| Some(value)))
            .map_err(raw_err)
    }

    fn send_write_response(
        &self,
        _conn: ConnId,
        trans: TransId,
        handle: u16,
        status: AttStatus,
    ) -> Result<(), BleError> {
        let Some((reply, value)) = self.unpark_write(trans) else {
            debug!("no parked write {} for handle {}", trans.0, handle);
            return Ok(());
        };
        // The SoftDevice checks its own CCCD copy before notifying, so a
        // value the core accepted is stored there too.
        let stored = parse_cccd(&value).is_ok().then_some(value.as_slice());
        reply
            .reply(att_result(status).map(|()| stored))
            .map_err(raw_err)
    }

    fn set_value(&self, handle: u16, value: &[u8]) -> Result<(), BleError> {
        gatt_server::set_value(self.sd, handle, value).map_err(|_| BleError::SetValueFailed)
    }

    fn send_notification(&self, conn: ConnId, handle: u16, value: &[u8]) -> Result<(), BleError> {
        let c = self
            .connection()
            .filter(|c| c.handle() == Some(conn.0))
            .ok_or(BleError::NotConnected)?;
        gatt_server::notify_value(&c, handle, value).map_err(|_| BleError::NotifyFailed)
    }

    fn initiate_encryption(&self, peer: PeerAddress) -> Result<(), BleError> {
        let conn = self.connection_to(peer)?;
        conn.request_pairing()
            .map_err(|_| BleError::EncryptionFailed)
    }

    fn accept_security(&self, _peer: PeerAddress) -> Result<(), BleError> {
        // Pairing requests are answered through the Bonder.
        Ok(())
    }

    fn lookup_bonded_identity(&self, peer: PeerAddress) -> Option<IdentityKey> {
        let conn = self.connection_to(peer).ok()?;
        self.bonder.identity_of(conn.peer_address())
    }
}

/// GATT server callbacks. Reads and writes reach the core as events.
pub struct DiceServer {
    stack: &'static SoftDeviceStack,
}

impl DiceServer {
    pub fn new(stack: &'static SoftDeviceStack) -> Self {
        Self { stack }
    }
}

impl gatt_server::Server for DiceServer {
    type Event = ();

    fn on_write(
        &self,
        conn: &Connection,
        handle: u16,
        op: WriteOp,
        _offset: usize,
        data: &[u8],
    ) -> Option<Self::Event> {
        // Already applied and acked by the SoftDevice.
        let id = ConnId(conn.handle().unwrap_or(0));
        let prepared = matches!(op, WriteOp::PrepWriteReq);
        post(GattEvent::write(id, TransId(0), handle, data, prepared).into());
        None
    }

    fn on_deferred_read(
        &self,
        handle: u16,
        _offset: usize,
        reply: DeferredReadReply,
    ) -> Option<Self::Event> {
        let conn = self.stack.conn_id();
        let trans = self.stack.park_read(reply);
        if !post(GattEvent::Read { conn, trans, handle }.into()) {
            if let Some(reply) = self.stack.unpark_read(trans) {
                let _ = reply.reply(Err(GattError::ATTERR_UNLIKELY_ERROR));
            }
        }
        None
    }

    fn on_deferred_write(
        &self,
        handle: u16,
        op: WriteOp,
        _offset: usize,
        data: &[u8],
        reply: DeferredWriteReply,
    ) -> Option<Self::Event> {
        let conn = self.stack.conn_id();
        let trans = self.stack.park_write(reply, data);
        let prepared = matches!(op, WriteOp::PrepWriteReq);
        if !post(GattEvent::write(conn, trans, handle, data, prepared).into()) {
            // Acked without being applied; the core never saw it.
            if let Some((reply, _)) = self.stack.unpark_write(trans) {
                let _ = reply.reply(Ok(None));
            }
        }
        None
    }
}

/// Report a pairing that never completes as a failed one.
async fn pairing_watchdog(conn: &Connection) {
    Timer::after(PAIRING_TIMEOUT).await;
    if matches!(conn.security_mode(), SecurityMode::NoAccess | SecurityMode::Open) {
        warn!("pairing did not complete");
        post(
            GapEvent::AuthComplete {
                peer: PeerAddress(conn.peer_address().bytes()),
                result: Err(dice_accessory::accessory::SMP_UNSPECIFIED_REASON),
            }
            .into(),
        );
    }
    core::future::pending::<()>().await
}

/// Run one connection until it drops.
async fn serve(stack: &SoftDeviceStack, server: &DiceServer, conn: Connection) {
    let id = ConnId(conn.handle().unwrap_or(0));
    stack.set_connection(Some(conn.clone()));
    EVENTS
        .send(
            GattEvent::Connected {
                conn: id,
                peer: PeerAddress(conn.peer_address().bytes()),
                status: 0,
            }
            .into(),
        )
        .await;

    let _ = select(gatt_server::run(&conn, server, |_| {}), pairing_watchdog(&conn)).await;

    stack.set_connection(None);
    info!("connection {} closed", id.0);
    EVENTS
        .send(
            GattEvent::Disconnected {
                conn: id,
                reason: DISCONNECT_REASON_UNKNOWN,
            }
            .into(),
        )
        .await;
}

/// Advertises whenever the core asks for it and serves each connection.
pub async fn advertising_loop(
    sd: &'static Softdevice,
    stack: &'static SoftDeviceStack,
    server: &'static DiceServer,
) -> ! {
    let mut next: Option<AdvParams> = None;
    loop {
        let params = match next.take() {
            Some(p) => p,
            None => match ADV_CONTROL.wait().await {
                AdvCommand::Start(p) => p,
                AdvCommand::Stop => continue,
            },
        };

        let (adv_data, scan_data) = stack.payloads();
        let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
            adv_data: &adv_data,
            scan_data: &scan_data,
        };
        let config = peripheral::Config {
            interval: u32::from(params.interval),
            filter_policy: match params.filter {
                FilterPolicy::AllowAny => peripheral::FilterPolicy::Any,
            },
            timeout: None,
            ..Default::default()
        };

        debug!("advertising");
        let advertise = peripheral::advertise_pairable(sd, adv, &config, stack.bonder);
        match select(advertise, ADV_CONTROL.wait()).await {
            Either::First(Ok(conn)) => serve(stack, server, conn).await,
            Either::First(Err(peripheral::AdvertiseError::Timeout)) => {
                post(GapEvent::AdvertisingComplete.into());
            }
            Either::First(Err(e)) => {
                warn!("advertising failed: {}", e);
                post(GapEvent::AdvertisingStarted { status: ADV_START_FAILED }.into());
            }
            Either::Second(AdvCommand::Stop) => {
                post(GapEvent::AdvertisingStopped.into());
            }
            Either::Second(AdvCommand::Start(p)) => next = Some(p),
        }
    }
}

/// SoftDevice TRNG as a [`RngCore`].
pub struct SdRng {
    sd: &'static Softdevice,
}

impl SdRng {
    pub fn new(sd: &'static Softdevice) -> Self {
        Self { sd }
    }
}

impl RngCore for SdRng {
    fn next_u32(&mut self) -> u32 {
        impls::next_u32_via_fill(self)
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        // Fails only while the entropy pool refills.
        while nrf_softdevice::random_bytes(self.sd, dest).is_err() {
            cortex_m::asm::nop();
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
