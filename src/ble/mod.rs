//! Bluetooth Low Energy glue for the Nordic SoftDevice S140.
//!
//! The SoftDevice runs in **Peripheral** role:
//!
//! 1. **Adapter** - implements [`BleStack`](dice_accessory::BleStack) on top
//!    of the SoftDevice and turns its callbacks into core events.
//! 2. **Advertising task** - runs connectable advertising on request and
//!    serves the GATT table for the lifetime of each connection.
//! 3. **Bonder** - pairing policy and the RAM bond cache.
//!
//! Everything the SoftDevice reports goes through [`EVENTS`] to the
//! dispatcher task in main.rs, so the core sees one event at a time.
//! Connection lifecycle events are sent with backpressure; callbacks that
//! cannot wait use [`post`].

pub mod bonder;
pub mod softdevice;

use defmt::warn;
use dice_accessory::advertising::AdvParams;
use dice_accessory::config::EVENT_CHANNEL_DEPTH;
use dice_accessory::Event;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::signal::Signal;

/// Stack events waiting for the dispatcher.
pub static EVENTS: Channel<CriticalSectionRawMutex, Event, EVENT_CHANNEL_DEPTH> = Channel::new();

/// Requests for the advertising task.
#[derive(Clone, Copy, defmt::Format)]
pub enum AdvCommand {
    Start(AdvParams),
    Stop,
}

pub static ADV_CONTROL: Signal<CriticalSectionRawMutex, AdvCommand> = Signal::new();

/// Queue an event from a synchronous SoftDevice callback. Returns `false`
/// when the queue was full and the event got dropped.
pub fn post(event: Event) -> bool {
    match EVENTS.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            warn!("event queue full, dropping {}", event);
            false
        }
    }
}
