//! Dice value and the uniform roll used by the periodic generator.

use core::fmt::Write;

use heapless::String;
use rand_core::RngCore;

use crate::config::CHAR_VALUE_MAX_LEN;
use crate::gatt::AttrValue;

/// Number of faces on the die.
pub const FACES: u8 = 6;

/// Largest multiple of `FACES` that fits in a `u32` draw; draws at or above
/// it are rejected so every face is equally likely.
const ACCEPT_ZONE: u32 = u32::MAX - u32::MAX % FACES as u32;

/// Current face of the die, always in `1..=6`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiceValue(u8);

impl DiceValue {
    /// Value the characteristic is created with.
    pub const INITIAL: DiceValue = DiceValue(1);

    /// Returns `None` outside `1..=6`.
    pub const fn new(value: u8) -> Option<Self> {
        if value >= 1 && value <= FACES {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// Draw a face uniformly from `rng`.
    pub fn roll<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        loop {
            let draw = rng.next_u32();
            if draw < ACCEPT_ZONE {
                return Self((draw % FACES as u32) as u8 + 1);
            }
        }
    }

    /// Decimal ASCII rendering, no leading zeros, no terminator.
    pub fn to_ascii(self) -> AttrValue {
        let mut s: String<CHAR_VALUE_MAX_LEN> = String::new();
        // A u8 needs at most three digits.
        let _ = write!(&mut s, "{}", self.0);
        let mut value = AttrValue::new();
        let _ = value.extend_from_slice(s.as_bytes());
        value
    }
}

impl Default for DiceValue {
    fn default() -> Self {
        Self::INITIAL
    }
}
