//! Capability interface over the BLE host stack.
//!
//! The core is written once against [`BleStack`]; each host stack gets a
//! thin adapter. Calls are fire-and-forget: outcomes that the stack
//! reports later arrive as [`Event`](crate::event::Event)s.

use crate::advertising::AdvParams;
use crate::connection::{ConnId, PeerAddress, TransId};
use crate::effect::{AttStatus, Effect};
use crate::error::BleError;
use crate::gatt::{BuildStep, CharacteristicDef, DescriptorDef, Uuid};
use crate::security::IdentityKey;

pub trait BleStack {
    fn set_advertising_data(&self, data: &[u8]) -> Result<(), BleError>;
    fn set_scan_response_data(&self, data: &[u8]) -> Result<(), BleError>;
    fn start_advertising(&self, params: &AdvParams) -> Result<(), BleError>;
    fn stop_advertising(&self) -> Result<(), BleError>;

    // Attribute table. Handles come back in `AttributeCreated` events.
    fn create_service(&self, uuid: &Uuid, num_handles: u16) -> Result<(), BleError>;
    fn start_service(&self, service: u16) -> Result<(), BleError>;
    fn add_characteristic(&self, service: u16, def: &CharacteristicDef) -> Result<(), BleError>;
    fn add_descriptor(&self, service: u16, def: &DescriptorDef) -> Result<(), BleError>;

    fn send_read_response(
        &self,
        conn: ConnId,
        trans: TransId,
        handle: u16,
        status: AttStatus,
        value: &[u8],
    ) -> Result<(), BleError>;
    fn send_write_response(
        &self,
        conn: ConnId,
        trans: TransId,
        handle: u16,
        status: AttStatus,
    ) -> Result<(), BleError>;
    fn set_value(&self, handle: u16, value: &[u8]) -> Result<(), BleError>;
    /// Unacknowledged notification.
    fn send_notification(&self, conn: ConnId, handle: u16, value: &[u8]) -> Result<(), BleError>;

    fn initiate_encryption(&self, peer: PeerAddress) -> Result<(), BleError>;
    fn accept_security(&self, peer: PeerAddress) -> Result<(), BleError>;
    fn lookup_bonded_identity(&self, peer: PeerAddress) -> Option<IdentityKey>;
}

/// Run one effect against the stack. Returns the peer identity for
/// [`Effect::LookupPeerIdentity`] when the bond store knows it.
pub fn execute<S: BleStack + ?Sized>(
    stack: &S,
    effect: &Effect,
) -> Result<Option<IdentityKey>, BleError> {
    match effect {
        Effect::SetAdvertisingData(data) => stack.set_advertising_data(data)?,
        Effect::SetScanResponseData(data) => stack.set_scan_response_data(data)?,
        Effect::StartAdvertising(params) => stack.start_advertising(params)?,
        Effect::StopAdvertising => stack.stop_advertising()?,
        Effect::Build(step) => match step {
            BuildStep::CreateService { uuid, num_handles } => {
                stack.create_service(uuid, *num_handles)?
            }
            BuildStep::StartService { service } => stack.start_service(*service)?,
            BuildStep::AddCharacteristic { service, def } => {
                stack.add_characteristic(*service, def)?
            }
            BuildStep::AddDescriptor { service, def } => stack.add_descriptor(*service, def)?,
        },
        Effect::InitiateEncryption { peer } => stack.initiate_encryption(*peer)?,
        Effect::AcceptSecurity { peer } => stack.accept_security(*peer)?,
        Effect::LookupPeerIdentity { peer } => return Ok(stack.lookup_bonded_identity(*peer)),
        Effect::SendReadResponse {
            conn,
            trans,
            handle,
            status,
            value,
        } => stack.send_read_response(*conn, *trans, *handle, *status, value)?,
        Effect::SendWriteResponse {
            conn,
            trans,
            handle,
            status,
        } => stack.send_write_response(*conn, *trans, *handle, *status)?,
        Effect::SetValue { handle, value } => stack.set_value(*handle, value)?,
        Effect::Notify {
            conn,
            handle,
            value,
        } => stack.send_notification(*conn, *handle, value)?,
    }
    Ok(None)
}
