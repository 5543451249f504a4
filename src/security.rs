//! Pairing / bonding parameters.
//!
//! The accessory has no display or keyboard, so pairing is "Just Works"
//! (no MITM protection) with bonding. Only the choices a stack leaves to
//! the application are listed here; LE Secure Connections, the 16-byte key
//! size and the key distribution are fixed by the stack.

/// IO capabilities advertised during pairing feature exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoCapabilities {
    NoInputNoOutput,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecurityParams {
    pub io_capabilities: IoCapabilities,
    /// Store keys so the peer can reconnect without pairing again.
    pub bonding: bool,
}

pub const SECURITY_PARAMS: SecurityParams = SecurityParams {
    io_capabilities: IoCapabilities::NoInputNoOutput,
    bonding: true,
};

/// Security state of the current link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityState {
    #[default]
    Unsecured,
    Negotiating,
    Secured,
    /// Pairing failed; the link is still up but unencrypted.
    Failed,
}

/// Identity Resolving Key of a bonded peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IdentityKey(pub [u8; 16]);
