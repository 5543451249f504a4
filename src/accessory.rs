//! The dice accessory: shared state behind one lock, driven by stack
//! events and by the periodic roll.
//!
//! Every entry point takes the lock once to run the transition, releases
//! it, then executes the resulting effects against the stack. Collaborator
//! failures that change the lifecycle (a refused attribute creation, a
//! refused encryption request) are turned back into events and dispatched
//! in the same call.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::{Deque, Vec};
use rand_core::RngCore;

use crate::dice::DiceValue;
use crate::dispatcher::{Snapshot, State};
use crate::effect::{Effect, Transition};
use crate::error::{BleError, Error};
use crate::event::{Event, GapEvent, GattEvent};
use crate::gatt::AttributeCreated;
use crate::security::IdentityKey;
use crate::stack::{execute, BleStack};

/// Faults kept per call; further ones are dropped.
pub const MAX_FAULTS: usize = 4;

/// SMP pairing failure reason "Unspecified Reason".
pub const SMP_UNSPECIFIED_REASON: u8 = 0x08;

const FEEDBACK_DEPTH: usize = 2;

/// What a call produced besides state changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Errors to log, in the order they happened.
    pub faults: Vec<Error, MAX_FAULTS>,
    /// Bonded peer IRK, when a completed pairing let us look it up.
    pub identity: Option<IdentityKey>,
}

impl Outcome {
    fn record(&mut self, err: Error) {
        let _ = self.faults.push(err);
    }

    pub fn is_clean(&self) -> bool {
        self.faults.is_empty()
    }
}

pub struct Accessory<M: RawMutex> {
    state: Mutex<M, RefCell<State>>,
}

impl<M: RawMutex> Default for Accessory<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> Accessory<M> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State::new())),
        }
    }

    pub fn start<S: BleStack + ?Sized>(&self, stack: &S) -> Outcome {
        let t = self.with_state(State::start);
        self.run(t, stack)
    }

    pub fn stop<S: BleStack + ?Sized>(&self, stack: &S) -> Outcome {
        let t = self.with_state(State::stop);
        self.run(t, stack)
    }

    /// Feed one stack event.
    pub fn dispatch<S: BleStack + ?Sized>(&self, event: Event, stack: &S) -> Outcome {
        let t = self.with_state(|s| s.step(event));
        self.run(t, stack)
    }

    /// Roll the die and publish the result. Called once per roll period.
    pub fn tick<R, S>(&self, rng: &mut R, stack: &S) -> Outcome
    where
        R: RngCore + ?Sized,
        S: BleStack + ?Sized,
    {
        // Drawing can loop on rejected samples; keep it outside the lock.
        let value = DiceValue::roll(rng);
        self.dispatch(Event::Tick(value), stack)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state.lock(|cell| cell.borrow().snapshot())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    fn run<S: BleStack + ?Sized>(&self, first: Transition, stack: &S) -> Outcome {
        let mut out = Outcome::default();
        let mut pending: Deque<Event, FEEDBACK_DEPTH> = Deque::new();
        let mut next = Some(first);

        while let Some(t) = next.take() {
            if let Some(fault) = t.fault {
                out.record(fault);
            }
            for effect in &t.effects {
                match execute(stack, effect) {
                    Ok(Some(identity)) => out.identity = Some(identity),
                    Ok(None) => {}
                    Err(e) => match feedback(effect, e) {
                        Some(event) => {
                            let _ = pending.push_back(event);
                        }
                        None => out.record(e.into()),
                    },
                }
            }
            if let Some(event) = pending.pop_front() {
                next = Some(self.with_state(|s| s.step(event)));
            }
        }
        out
    }
}

/// Event that reports a failed call back to the state, if the failure
/// matters to it.
fn feedback(effect: &Effect, err: BleError) -> Option<Event> {
    match effect {
        Effect::Build(step) => Some(
            GattEvent::AttributeCreated(AttributeCreated {
                kind: step.answered_by(),
                status: match err {
                    BleError::Raw(code) => code as u16,
                    _ => u16::MAX,
                },
                handle: 0,
            })
            .into(),
        ),
        Effect::InitiateEncryption { peer } => Some(
            GapEvent::AuthComplete {
                peer: *peer,
                result: Err(SMP_UNSPECIFIED_REASON),
            }
            .into(),
        ),
        _ => None,
    }
}
