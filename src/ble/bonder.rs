//! RAM bond cache and pairing policy for the SoftDevice.
//!
//! Keys are kept only until reset. When the cache is full the oldest bond
//! is evicted; a peer that bonds again is updated in place.

use core::cell::RefCell;

use defmt::{debug, info};
use dice_accessory::config::MAX_BONDED_PEERS;
use dice_accessory::connection::PeerAddress;
use dice_accessory::event::GapEvent;
use dice_accessory::security::{self, SECURITY_PARAMS};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;
use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{Address, Connection, EncryptionInfo, IdentityKey, MasterId, SecurityMode};
use static_cell::StaticCell;

use super::post;

struct PeerBond {
    master_id: MasterId,
    key: EncryptionInfo,
    peer_id: IdentityKey,
}

pub struct Bonder {
    peers: Mutex<CriticalSectionRawMutex, RefCell<Vec<PeerBond, MAX_BONDED_PEERS>>>,
}

impl Bonder {
    fn new() -> Self {
        Self {
            peers: Mutex::new(RefCell::new(Vec::new())),
        }
    }

    /// IRK of the bonded peer behind `addr`, if any.
    pub fn identity_of(&self, addr: Address) -> Option<security::IdentityKey> {
        self.peers.lock(|peers| {
            peers
                .borrow()
                .iter()
                .find(|p| p.peer_id.is_match(addr))
                .map(|p| security::IdentityKey(p.peer_id.irk.as_raw().irk))
        })
    }
}

impl SecurityHandler for Bonder {
    fn io_capabilities(&self) -> IoCapabilities {
        match SECURITY_PARAMS.io_capabilities {
            security::IoCapabilities::NoInputNoOutput => IoCapabilities::None,
        }
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        SECURITY_PARAMS.bonding
    }

    fn on_bonded(
        &self,
        _conn: &Connection,
        master_id: MasterId,
        key: EncryptionInfo,
        peer_id: IdentityKey,
    ) {
        debug!("bonded, storing keys");
        self.peers.lock(|peers| {
            let mut peers = peers.borrow_mut();
            if let Some(existing) = peers.iter_mut().find(|p| p.master_id == master_id) {
                existing.key = key;
                existing.peer_id = peer_id;
                return;
            }

            if peers.is_full() {
                peers.remove(0);
            }

            let _ = peers.push(PeerBond {
                master_id,
                key,
                peer_id,
            });
        });
    }

    fn get_key(&self, _conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        self.peers.lock(|peers| {
            peers
                .borrow()
                .iter()
                .find_map(|p| (p.master_id == master_id).then_some(p.key))
        })
    }

    fn get_peripheral_key(&self, conn: &Connection) -> Option<(MasterId, EncryptionInfo)> {
        self.peers.lock(|peers| {
            peers.borrow().iter().find_map(|p| {
                p.peer_id
                    .is_match(conn.peer_address())
                    .then_some((p.master_id, p.key))
            })
        })
    }

    fn on_security_update(&self, conn: &Connection, mode: SecurityMode) {
        info!("security mode updated: {}", mode);
        if matches!(mode, SecurityMode::NoAccess | SecurityMode::Open) {
            return;
        }
        post(
            GapEvent::AuthComplete {
                peer: PeerAddress(conn.peer_address().bytes()),
                result: Ok(()),
            }
            .into(),
        );
    }
}

/// Call once at startup.
pub fn init() -> &'static Bonder {
    static BONDER: StaticCell<Bonder> = StaticCell::new();
    BONDER.init(Bonder::new())
}
