//! Events fed into the dispatcher.
//!
//! The stack delivers two planes of events (GAP and GATT); adapters
//! translate their native callbacks into these variants. The periodic
//! generator contributes [`Event::Tick`].

use heapless::Vec;

use crate::config::MAX_WRITE_LEN;
use crate::connection::{ConnId, PeerAddress, TransId};
use crate::dice::DiceValue;
use crate::gatt::AttributeCreated;

/// Raw write payload as received over ATT.
pub type WriteValue = Vec<u8, MAX_WRITE_LEN>;

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    Gap(GapEvent),
    Gatt(GattEvent),
    /// The generator rolled a new value.
    Tick(DiceValue),
}

/// Status fields: 0 means success, anything else is the stack's error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GapEvent {
    AdvertisingDataSet { status: u8 },
    ScanResponseDataSet { status: u8 },
    AdvertisingStarted { status: u8 },
    /// Advertising ran out without a connection.
    AdvertisingComplete,
    AdvertisingStopped,
    /// Peer asked for security (SMP Security Request).
    SecurityRequest { peer: PeerAddress },
    /// Pairing / encryption finished. `Err` carries the failure reason.
    AuthComplete {
        peer: PeerAddress,
        result: Result<(), u8>,
    },
    PacketLengthSet { status: u8 },
    PhyUpdated { status: u8 },
    /// Event kind this crate has no mapping for.
    Other(u16),
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattEvent {
    AttributeCreated(AttributeCreated),
    Connected {
        conn: ConnId,
        peer: PeerAddress,
        status: u8,
    },
    Disconnected {
        conn: ConnId,
        reason: u8,
    },
    Read {
        conn: ConnId,
        trans: TransId,
        handle: u16,
    },
    Write {
        conn: ConnId,
        trans: TransId,
        handle: u16,
        value: WriteValue,
        /// Payload length on the wire; `value` keeps at most the first
        /// `MAX_WRITE_LEN` bytes.
        len: usize,
        /// Queued (prepare) write rather than an immediate one.
        prepared: bool,
    },
    NotifyComplete { status: u16 },
    MtuExchanged { mtu: u16 },
    Other(u16),
}

impl From<GapEvent> for Event {
    fn from(e: GapEvent) -> Self {
        Event::Gap(e)
    }
}

impl From<GattEvent> for Event {
    fn from(e: GattEvent) -> Self {
        Event::Gatt(e)
    }
}

impl GattEvent {
    /// Build a write event, truncating payloads longer than one ATT PDU.
    pub fn write(conn: ConnId, trans: TransId, handle: u16, data: &[u8], prepared: bool) -> Self {
        let n = data.len().min(MAX_WRITE_LEN);
        let mut value = WriteValue::new();
        // n <= capacity
        let _ = value.extend_from_slice(&data[..n]);
        GattEvent::Write {
            conn,
            trans,
            handle,
            value,
            len: data.len(),
            prepared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_write_keeps_its_wire_length() {
        let data = [0xAB; 25];
        match GattEvent::write(ConnId(1), TransId(2), 43, &data, false) {
            GattEvent::Write { value, len, .. } => {
                assert_eq!(value.len(), MAX_WRITE_LEN);
                assert_eq!(len, 25);
            }
            other => panic!("expected a write, got {:?}", other),
        }
    }
}
