//! Advertising and scan-response payloads.
//!
//! Payloads are legacy advertising data: a sequence of AD structures
//! `[len][type][data...]`, at most 31 bytes in total.

use heapless::Vec;

use crate::config::{ADV_INTERVAL, PREFERRED_CONN_INTERVAL_MAX, PREFERRED_CONN_INTERVAL_MIN};
use crate::error::Error;
use crate::gatt::SERVICE_UUID;

/// Legacy advertising payload limit.
pub const MAX_ADV_LEN: usize = 31;

pub type AdvPayload = Vec<u8, MAX_ADV_LEN>;

// AD types
const AD_FLAGS: u8 = 0x01;
const AD_COMPLETE_UUID128: u8 = 0x07;
const AD_SHORTENED_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;
const AD_TX_POWER: u8 = 0x0A;
const AD_CONN_INTERVAL_RANGE: u8 = 0x12;

/// LE General Discoverable Mode.
pub const FLAG_GENERAL_DISCOVERABLE: u8 = 0x02;
/// BR/EDR Not Supported.
pub const FLAG_BR_EDR_NOT_SUPPORTED: u8 = 0x04;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterPolicy {
    /// Scan and connect requests from any device.
    AllowAny,
}

/// Parameters for the advertising start call. Advertising is always
/// connectable, scannable and undirected (ADV_IND) on all three primary
/// channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvParams {
    /// 0.625 ms units.
    pub interval: u16,
    pub filter: FilterPolicy,
}

impl AdvParams {
    pub const DEFAULT: AdvParams = AdvParams {
        interval: ADV_INTERVAL,
        filter: FilterPolicy::AllowAny,
    };
}

impl Default for AdvParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

fn push_ad(buf: &mut AdvPayload, ad_type: u8, data: &[u8]) -> Result<(), Error> {
    if buf.len() + 2 + data.len() > MAX_ADV_LEN {
        return Err(Error::BufferOverflow);
    }
    // Capacity checked above.
    let _ = buf.push(data.len() as u8 + 1);
    let _ = buf.push(ad_type);
    let _ = buf.extend_from_slice(data);
    Ok(())
}

/// Primary advertising data: flags, service UUID, name, TX power.
///
/// The name goes in as a Complete Local Name when it fits; otherwise it is
/// cut down to a Shortened Local Name filling the remaining space.
pub fn advertising_payload(name: &str, tx_power: i8) -> Result<AdvPayload, Error> {
    let mut buf = AdvPayload::new();
    push_ad(
        &mut buf,
        AD_FLAGS,
        &[FLAG_GENERAL_DISCOVERABLE | FLAG_BR_EDR_NOT_SUPPORTED],
    )?;
    push_ad(&mut buf, AD_COMPLETE_UUID128, &SERVICE_UUID)?;

    // Reserve room for the TX power structure (3 bytes).
    let room = MAX_ADV_LEN.saturating_sub(buf.len() + 3 + 2);
    let name = name.as_bytes();
    if name.len() <= room {
        push_ad(&mut buf, AD_COMPLETE_NAME, name)?;
    } else if room > 0 {
        push_ad(&mut buf, AD_SHORTENED_NAME, &name[..room])?;
    }

    push_ad(&mut buf, AD_TX_POWER, &[tx_power as u8])?;
    Ok(buf)
}

/// Scan response: name, TX power and the preferred connection interval range.
pub fn scan_response_payload(name: &str, tx_power: i8) -> Result<AdvPayload, Error> {
    let mut buf = AdvPayload::new();
    push_ad(&mut buf, AD_COMPLETE_NAME, name.as_bytes())?;
    push_ad(&mut buf, AD_TX_POWER, &[tx_power as u8])?;

    // Not in the primary payload: flags, the 128-bit UUID and the name
    // leave no room there for another 6 bytes.
    let mut range = [0u8; 4];
    range[..2].copy_from_slice(&PREFERRED_CONN_INTERVAL_MIN.to_le_bytes());
    range[2..].copy_from_slice(&PREFERRED_CONN_INTERVAL_MAX.to_le_bytes());
    push_ad(&mut buf, AD_CONN_INTERVAL_RANGE, &range)?;
    Ok(buf)
}

/// Find the first AD structure of `ad_type` in `data`.
pub fn find_ad(data: &[u8], ad_type: u8) -> Option<&[u8]> {
    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            break;
        }
        if data[i + 1] == ad_type {
            return Some(&data[i + 2..i + 1 + len]);
        }
        i += len + 1;
    }
    None
}
