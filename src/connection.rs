//! The single peer connection and its pairing outcome.
//!
//! ```text
//!   Idle ──start──▶ Advertising ──connect──▶ Connected(Negotiating)
//!                      ▲                         │ auth ok / failed
//!                      │                         ▼
//!                      └──────disconnect──── Connected(Secured | Failed)
//! ```
//!
//! Security and subscription state live inside [`Link`], so dropping the
//! link on disconnect clears both in one step.

use crate::security::SecurityState;

/// Stack-assigned connection identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnId(pub u16);

/// Peer Bluetooth device address, as delivered by the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress(pub [u8; 6]);

/// ATT transaction identifier, echoed back in read/write responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Connection {
    pub id: ConnId,
    pub peer: PeerAddress,
}

/// Per-connection state. Exists only while a peer is connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Link {
    pub conn: Connection,
    pub security: SecurityState,
    /// Peer enabled notifications through the CCCD.
    pub subscribed: bool,
}

impl Link {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            security: SecurityState::Unsecured,
            subscribed: false,
        }
    }

    /// We asked for encryption, or the peer asked for security.
    pub fn begin_security(&mut self) {
        self.security = SecurityState::Negotiating;
    }

    /// Pairing finished. Failure keeps the link up, unencrypted.
    pub fn complete_security(&mut self, outcome: Result<(), u8>) {
        self.security = match outcome {
            Ok(()) => SecurityState::Secured,
            Err(_) => SecurityState::Failed,
        };
    }
}

/// Lifecycle phase of the peripheral.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Not started, or stopped.
    #[default]
    Idle,
    Advertising,
    Connected(Link),
    /// Bring-up failed; nothing runs anymore.
    Halted,
}

impl Phase {
    pub fn link(&self) -> Option<&Link> {
        match self {
            Phase::Connected(link) => Some(link),
            _ => None,
        }
    }

    pub fn link_mut(&mut self) -> Option<&mut Link> {
        match self {
            Phase::Connected(link) => Some(link),
            _ => None,
        }
    }

    /// Replace the phase with `link`. At most one link exists.
    pub fn connect(&mut self, link: Link) {
        *self = Phase::Connected(link);
    }

    /// Tear the link down (security and subscription with it) and go back
    /// to advertising. Returns the link that was dropped.
    pub fn disconnect(&mut self) -> Option<Link> {
        let old = core::mem::replace(self, Phase::Advertising);
        old.link().copied()
    }

    pub fn is_halted(&self) -> bool {
        *self == Phase::Halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection {
            id: ConnId(0),
            peer: PeerAddress([1, 2, 3, 4, 5, 6]),
        }
    }

    #[test]
    fn new_link_is_unsecured_and_unsubscribed() {
        let link = Link::new(conn());
        assert_eq!(link.security, SecurityState::Unsecured);
        assert!(!link.subscribed);
    }

    #[test]
    fn security_outcomes() {
        let mut link = Link::new(conn());
        link.begin_security();
        assert_eq!(link.security, SecurityState::Negotiating);
        link.complete_security(Ok(()));
        assert_eq!(link.security, SecurityState::Secured);

        let mut link = Link::new(conn());
        link.begin_security();
        link.complete_security(Err(0x05));
        assert_eq!(link.security, SecurityState::Failed);
    }

    #[test]
    fn disconnect_drops_link_state_together() {
        let mut phase = Phase::Advertising;
        let mut link = Link::new(conn());
        link.subscribed = true;
        link.complete_security(Ok(()));
        phase.connect(link);

        let dropped = phase.disconnect().unwrap();
        assert!(dropped.subscribed);
        assert_eq!(phase, Phase::Advertising);
        assert!(phase.link().is_none());

        // Next connection starts clean.
        phase.connect(Link::new(conn()));
        let link = phase.link().unwrap();
        assert!(!link.subscribed);
        assert_eq!(link.security, SecurityState::Unsecured);
    }

    #[test]
    fn connect_replaces_any_previous_link() {
        let mut phase = Phase::Advertising;
        let mut first = Link::new(conn());
        first.subscribed = true;
        phase.connect(first);

        let second = Connection {
            id: ConnId(3),
            peer: PeerAddress([9; 6]),
        };
        phase.connect(Link::new(second));
        let link = phase.link_mut().unwrap();
        assert_eq!(link.conn, second);
        assert!(!link.subscribed);
    }

    #[test]
    fn disconnect_without_link_still_advertises() {
        let mut phase = Phase::Idle;
        assert!(phase.disconnect().is_none());
        assert_eq!(phase, Phase::Advertising);
    }
}
