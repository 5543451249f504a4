//! Library interface for the dice accessory.
//!
//! Everything that decides *what* the accessory does lives here and runs
//! on the host: the attribute-table builder, the connection and security
//! state, the CCCD subscription, the dice generator and the dispatcher
//! tying them together. The BLE stack is reached only through
//! [`stack::BleStack`].
//!
//! Usage: `cargo test`
//!
//! Note: The embedded binary (main.rs, `--features embedded`) supplies the
//! SoftDevice adapter and the Embassy tasks around this library.

#![cfg_attr(not(test), no_std)]

// ═══════════════════════════════════════════════════════════════════════════
// Configuration & errors
// ═══════════════════════════════════════════════════════════════════════════

pub mod config;
pub mod error;

// ═══════════════════════════════════════════════════════════════════════════
// Wire formats
// ═══════════════════════════════════════════════════════════════════════════

pub mod advertising;
pub mod gatt;
pub mod security;

// ═══════════════════════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════════════════════

pub mod connection;
pub mod dice;
pub mod subscription;

// ═══════════════════════════════════════════════════════════════════════════
// Dispatch
// ═══════════════════════════════════════════════════════════════════════════

pub mod accessory;
pub mod dispatcher;
pub mod effect;
pub mod event;
pub mod stack;

pub use accessory::{Accessory, Outcome};
pub use dice::DiceValue;
pub use dispatcher::Snapshot;
pub use error::{Error, Severity};
pub use event::{Event, GapEvent, GattEvent};
pub use stack::BleStack;
