//! Unified error type for the dice accessory.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (behind the `defmt` feature) for efficient
//! on-target logging.

use crate::gatt::AttributeKind;

/// Top-level error type used across the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // Bring-up
    /// The attribute table could not be built. The accessory halts.
    Setup(SetupError),

    // BLE
    /// A call into the BLE stack failed, or the stack reported a failed
    /// operation in a later event.
    Ble(BleError),

    /// A write to the CCCD was rejected.
    Cccd(CccdError),

    /// Pairing / encryption with the peer failed (stack reason code).
    AuthFailed(u8),

    /// The stack delivered an event kind the dispatcher does not know.
    UnknownEvent(u16),

    // Generic
    /// Buffer too small for the requested operation.
    BufferOverflow,
}

/// How the accessory reacts to an error (see `Error::severity`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Severity {
    /// One-time bring-up failed; nothing useful can run afterwards.
    Fatal,
    /// Logged, the accessory keeps its previous state.
    Transient,
    /// Security negotiation failed; the link stays up unsecured.
    Negotiation,
}

/// Attribute-table bring-up failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SetupError {
    /// The stack rejected the creation of an attribute (raw status).
    CreateFailed { kind: AttributeKind, status: u16 },
    /// A "created" event arrived for an attribute we did not ask for.
    OutOfOrder { kind: AttributeKind },
}

/// Subset of BLE errors we propagate (keeps the enum `Copy`-friendly).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleError {
    /// Raw error code from the stack.
    Raw(u32),
    /// Advertising data, scan response, or advertising start failed.
    AdvertisingFailed,
    /// Attribute creation call was refused.
    AttributeFailed,
    /// Read or write response could not be sent.
    ResponseFailed,
    /// Attribute value could not be updated.
    SetValueFailed,
    /// Notification could not be queued or was not delivered.
    NotifyFailed,
    /// Encryption / security request toward the peer failed.
    EncryptionFailed,
    /// There is no such connection (already gone).
    NotConnected,
}

/// Rejected CCCD writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CccdError {
    /// The written value was not exactly two bytes long.
    Length(usize),
    /// Two bytes, but neither 0x0000 nor 0x0001.
    InvalidValue(u16),
}

impl Error {
    /// Place this error in the failure taxonomy.
    pub fn severity(&self) -> Severity {
        match self {
            Error::Setup(_) => Severity::Fatal,
            Error::AuthFailed(_) => Severity::Negotiation,
            Error::Ble(_) | Error::Cccd(_) | Error::UnknownEvent(_) | Error::BufferOverflow => {
                Severity::Transient
            }
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

// Convenience conversions

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Error::Ble(e)
    }
}

impl From<SetupError> for Error {
    fn from(e: SetupError) -> Self {
        Error::Setup(e)
    }
}

impl From<CccdError> for Error {
    fn from(e: CccdError) -> Self {
        Error::Cccd(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_setup_errors_are_fatal() {
        let setup = Error::from(SetupError::OutOfOrder {
            kind: AttributeKind::Descriptor,
        });
        assert!(setup.is_fatal());
        assert!(!Error::from(BleError::NotifyFailed).is_fatal());
        assert!(!Error::from(CccdError::InvalidValue(2)).is_fatal());
        assert!(!Error::UnknownEvent(0x42).is_fatal());
    }

    #[test]
    fn auth_failure_is_a_negotiation_error() {
        assert_eq!(Error::AuthFailed(0x05).severity(), Severity::Negotiation);
    }
}
