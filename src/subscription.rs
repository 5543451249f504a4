//! CCCD handling: whether the connected peer wants notifications.
//!
//! The subscription flag itself lives in [`Link`](crate::connection::Link)
//! so it disappears with the connection.

use crate::error::CccdError;

pub const CCCD_NOTIFY: u16 = 0x0001;
pub const CCCD_DISABLED: u16 = 0x0000;

/// Decode a raw CCCD write. `Ok(true)` means notifications on.
pub fn parse_cccd(raw: &[u8]) -> Result<bool, CccdError> {
    let bytes: [u8; 2] = raw.try_into().map_err(|_| CccdError::Length(raw.len()))?;
    match u16::from_le_bytes(bytes) {
        CCCD_NOTIFY => Ok(true),
        CCCD_DISABLED => Ok(false),
        other => Err(CccdError::InvalidValue(other)),
    }
}

/// Value returned for a CCCD read.
pub fn cccd_bytes(subscribed: bool) -> [u8; 2] {
    let value = if subscribed { CCCD_NOTIFY } else { CCCD_DISABLED };
    value.to_le_bytes()
}

/// What a descriptor write did to the subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteOutcome {
    /// Not the CCCD handle.
    Ignored,
    /// Flag now holds this value.
    Applied(bool),
    /// Flag left unchanged.
    Rejected(CccdError),
}

/// Apply a write to `handle` against the CCCD at `cccd_handle`.
pub fn on_descriptor_write(
    subscribed: &mut bool,
    cccd_handle: u16,
    handle: u16,
    raw: &[u8],
) -> WriteOutcome {
    if handle != cccd_handle {
        return WriteOutcome::Ignored;
    }
    match parse_cccd(raw) {
        Ok(on) => {
            *subscribed = on;
            WriteOutcome::Applied(on)
        }
        Err(e) => WriteOutcome::Rejected(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_and_disable() {
        assert_eq!(parse_cccd(&[0x01, 0x00]), Ok(true));
        assert_eq!(parse_cccd(&[0x00, 0x00]), Ok(false));
    }

    #[test]
    fn indication_bit_is_not_accepted() {
        assert_eq!(parse_cccd(&[0x02, 0x00]), Err(CccdError::InvalidValue(2)));
        assert_eq!(
            parse_cccd(&[0x00, 0x01]),
            Err(CccdError::InvalidValue(0x0100))
        );
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert_eq!(parse_cccd(&[]), Err(CccdError::Length(0)));
        assert_eq!(parse_cccd(&[0x01]), Err(CccdError::Length(1)));
        assert_eq!(parse_cccd(&[0x01, 0x00, 0x00]), Err(CccdError::Length(3)));
    }

    #[test]
    fn invalid_write_leaves_flag_alone() {
        let mut subscribed = true;
        let out = on_descriptor_write(&mut subscribed, 43, 43, &[0x02, 0x00]);
        assert_eq!(out, WriteOutcome::Rejected(CccdError::InvalidValue(2)));
        assert!(subscribed);

        let mut subscribed = false;
        on_descriptor_write(&mut subscribed, 43, 43, &[0xFF, 0xFF]);
        assert!(!subscribed);
    }

    #[test]
    fn other_handles_are_ignored() {
        let mut subscribed = false;
        let out = on_descriptor_write(&mut subscribed, 43, 42, &[0x01, 0x00]);
        assert_eq!(out, WriteOutcome::Ignored);
        assert!(!subscribed);
    }

    #[test]
    fn valid_writes_toggle() {
        let mut subscribed = false;
        assert_eq!(
            on_descriptor_write(&mut subscribed, 43, 43, &[0x01, 0x00]),
            WriteOutcome::Applied(true)
        );
        assert!(subscribed);
        on_descriptor_write(&mut subscribed, 43, 43, &[0x00, 0x00]);
        assert!(!subscribed);
    }

    #[test]
    fn read_bytes_are_little_endian() {
        assert_eq!(cccd_bytes(true), [0x01, 0x00]);
        assert_eq!(cccd_bytes(false), [0x00, 0x00]);
    }
}
