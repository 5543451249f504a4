//! Application-wide constants and compile-time configuration.
//!
//! Device identity, timing parameters, and attribute-table sizing live
//! here so they can be tuned in one place.

// Device

/// GAP device name, carried in both the advertising and scan-response data.
pub const DEVICE_NAME: &str = "Dice";

// Dice generator

/// Period between two dice rolls (seconds).
pub const DICE_ROLL_PERIOD_SECS: u64 = 5;

// Advertising

/// Advertising interval (in 0.625 ms units). 0x20 = 20 ms.
pub const ADV_INTERVAL: u16 = 0x20;

/// TX power advertised in the TX Power Level AD structure (dBm).
pub const ADV_TX_POWER_DBM: i8 = 0;

/// Preferred connection interval range (in 1.25 ms units) carried in the
/// scan response. 6 = 7.5 ms, 16 = 20 ms.
pub const PREFERRED_CONN_INTERVAL_MIN: u16 = 0x0006;
pub const PREFERRED_CONN_INTERVAL_MAX: u16 = 0x0010;

// Attribute table

/// Handles reserved for the dice service: service declaration,
/// characteristic declaration, value, CCCD.
pub const SERVICE_NUM_HANDLES: u16 = 4;

/// Maximum length of the dice characteristic value (bytes).
pub const CHAR_VALUE_MAX_LEN: usize = 4;

/// Longest write payload the dispatcher keeps (ATT_MTU 23 - 3 byte header).
pub const MAX_WRITE_LEN: usize = 20;

// Bonding

/// Maximum number of bonds kept in RAM by the SoftDevice adapter.
pub const MAX_BONDED_PEERS: usize = 4;

// Tasks

/// Depth of the stack-event channel between the SoftDevice tasks and the
/// dispatcher task.
pub const EVENT_CHANNEL_DEPTH: usize = 8;
