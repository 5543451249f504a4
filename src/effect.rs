//! Collaborator calls requested by the dispatcher.
//!
//! A transition never calls the stack itself; it returns a list of
//! effects that the caller runs after releasing the state lock.

use heapless::Vec;

use crate::advertising::{AdvParams, AdvPayload};
use crate::connection::{ConnId, PeerAddress, TransId};
use crate::error::Error;
use crate::gatt::{AttrValue, BuildStep};

/// Most effects a single event can produce (start: two payloads plus the
/// first build step).
pub const MAX_EFFECTS: usize = 4;

pub type Effects = Vec<Effect, MAX_EFFECTS>;

/// ATT status carried in read / write responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttStatus {
    Success,
    InvalidHandle,
}

impl AttStatus {
    /// ATT error code (0 on success).
    pub const fn code(self) -> u8 {
        match self {
            AttStatus::Success => 0x00,
            AttStatus::InvalidHandle => 0x01,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Effect {
    SetAdvertisingData(AdvPayload),
    SetScanResponseData(AdvPayload),
    StartAdvertising(AdvParams),
    StopAdvertising,
    /// Next attribute-table creation call.
    Build(BuildStep),
    InitiateEncryption {
        peer: PeerAddress,
    },
    AcceptSecurity {
        peer: PeerAddress,
    },
    /// Fetch the bonded peer's IRK (diagnostics only).
    LookupPeerIdentity {
        peer: PeerAddress,
    },
    SendReadResponse {
        conn: ConnId,
        trans: TransId,
        handle: u16,
        status: AttStatus,
        value: AttrValue,
    },
    SendWriteResponse {
        conn: ConnId,
        trans: TransId,
        handle: u16,
        status: AttStatus,
    },
    /// Update the value held in the stack's attribute table.
    SetValue {
        handle: u16,
        value: AttrValue,
    },
    Notify {
        conn: ConnId,
        handle: u16,
        value: AttrValue,
    },
}

/// Result of feeding one event to the state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transition {
    pub effects: Effects,
    /// Error to log; the state already reflects how it was handled.
    pub fault: Option<Error>,
}

impl Transition {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fault(err: impl Into<Error>) -> Self {
        Self {
            effects: Effects::new(),
            fault: Some(err.into()),
        }
    }

    /// Queue an effect. Dropped if the list is full.
    pub fn push(&mut self, effect: Effect) {
        let _ = self.effects.push(effect);
    }

    pub fn with(mut self, effect: Effect) -> Self {
        self.push(effect);
        self
    }

    pub fn notifications(&self) -> usize {
        self.effects
            .iter()
            .filter(|e| matches!(e, Effect::Notify { .. }))
            .count()
    }
}
