//! Attribute table of the dice service and the builder that brings it up.
//!
//! The stack assigns handles asynchronously: each creation call is
//! answered later by a "created" event carrying the handle. Creation is
//! strictly sequenced:
//!
//! 1. create the primary service (128-bit UUID),
//! 2. start it,
//! 3. add the dice characteristic (0xFF3F, read + notify),
//! 4. add its CCCD, answered by the application rather than the stack.
//!
//! Any failed step is fatal; attribute-table creation is never retried.

use heapless::Vec;

use crate::config::{CHAR_VALUE_MAX_LEN, SERVICE_NUM_HANDLES};
use crate::dice::DiceValue;
use crate::error::SetupError;

/// Dice service UUID, bytes in over-the-air (little-endian) order.
pub const SERVICE_UUID: [u8; 16] = [
    0xE3, 0xAB, 0xB8, 0x27, 0x91, 0x38, 0xAB, 0xA2, 0xCA, 0x47, 0x9B, 0xC4, 0x2E, 0x08, 0x6A, 0xE5,
];

/// Dice roll characteristic UUID.
pub const DICE_CHAR_UUID: u16 = 0xFF3F;

/// Client Characteristic Configuration Descriptor UUID.
pub const CCCD_UUID: u16 = 0x2902;

/// Characteristic value buffer (ASCII digits).
pub type AttrValue = Vec<u8, CHAR_VALUE_MAX_LEN>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Uuid {
    Uuid16(u16),
    Uuid128([u8; 16]),
}

/// Characteristic properties, bit values as in the characteristic
/// declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Properties(u8);

impl Properties {
    pub const READ: Properties = Properties(0x02);
    pub const NOTIFY: Properties = Properties(0x10);

    pub const fn union(self, other: Properties) -> Properties {
        Properties(self.0 | other.0)
    }

    pub const fn contains(self, other: Properties) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Attribute access permissions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
}

impl Permissions {
    pub const READ: Permissions = Permissions {
        read: true,
        write: false,
    };
    pub const READ_WRITE: Permissions = Permissions {
        read: true,
        write: true,
    };
}

/// Who answers ATT requests on an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResponseMode {
    /// The stack answers from its attribute table.
    Stack,
    /// The request is forwarded to the application, which must respond.
    Application,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicDef {
    pub uuid: Uuid,
    pub properties: Properties,
    pub permissions: Permissions,
    pub initial_value: AttrValue,
    pub max_len: u16,
    pub response: ResponseMode,
}

impl CharacteristicDef {
    /// The dice roll characteristic: readable by anyone, notifiable. The
    /// stack serves reads from the value mirrored on every roll.
    pub fn dice(initial: DiceValue) -> Self {
        Self {
            uuid: Uuid::Uuid16(DICE_CHAR_UUID),
            properties: Properties::READ.union(Properties::NOTIFY),
            permissions: Permissions::READ,
            initial_value: initial.to_ascii(),
            max_len: CHAR_VALUE_MAX_LEN as u16,
            response: ResponseMode::Stack,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DescriptorDef {
    pub uuid: Uuid,
    pub permissions: Permissions,
    pub initial_value: [u8; 2],
    pub response: ResponseMode,
}

impl DescriptorDef {
    /// CCCD with notifications off; writes are answered by the application
    /// so subscription changes can be validated before they are acked.
    pub const CCCD: DescriptorDef = DescriptorDef {
        uuid: Uuid::Uuid16(CCCD_UUID),
        permissions: Permissions::READ_WRITE,
        initial_value: [0x00, 0x00],
        response: ResponseMode::Application,
    };
}

/// Attribute kinds reported by "created" events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttributeKind {
    Service,
    ServiceStarted,
    Characteristic,
    Descriptor,
}

/// A "created" event from the stack: status 0 means success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttributeCreated {
    pub kind: AttributeKind,
    pub status: u16,
    pub handle: u16,
}

/// Creation call the builder wants issued next.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BuildStep {
    CreateService { uuid: Uuid, num_handles: u16 },
    StartService { service: u16 },
    AddCharacteristic { service: u16, def: CharacteristicDef },
    AddDescriptor { service: u16, def: DescriptorDef },
}

impl BuildStep {
    /// Kind of the "created" event that answers this step.
    pub fn answered_by(&self) -> AttributeKind {
        match self {
            BuildStep::CreateService { .. } => AttributeKind::Service,
            BuildStep::StartService { .. } => AttributeKind::ServiceStarted,
            BuildStep::AddCharacteristic { .. } => AttributeKind::Characteristic,
            BuildStep::AddDescriptor { .. } => AttributeKind::Descriptor,
        }
    }
}

/// Handles of the finished table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handles {
    pub service: u16,
    pub value: u16,
    pub cccd: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Stage {
    NotStarted,
    Awaiting(AttributeKind),
    Complete,
    Failed,
}

/// Drives the create → start → characteristic → descriptor sequence.
#[derive(Clone, Debug)]
pub struct TreeBuilder {
    stage: Stage,
    service: u16,
    value: u16,
    characteristic: CharacteristicDef,
    handles: Option<Handles>,
}

impl TreeBuilder {
    pub fn new(initial: DiceValue) -> Self {
        Self {
            stage: Stage::NotStarted,
            service: 0,
            value: 0,
            characteristic: CharacteristicDef::dice(initial),
            handles: None,
        }
    }

    /// First creation call. `None` once the build has begun.
    pub fn begin(&mut self) -> Option<BuildStep> {
        if self.stage != Stage::NotStarted {
            return None;
        }
        self.stage = Stage::Awaiting(AttributeKind::Service);
        Some(BuildStep::CreateService {
            uuid: Uuid::Uuid128(SERVICE_UUID),
            num_handles: SERVICE_NUM_HANDLES,
        })
    }

    /// Record a "created" event and return the next call, if any.
    pub fn on_created(&mut self, created: AttributeCreated) -> Result<Option<BuildStep>, SetupError> {
        if self.stage != Stage::Awaiting(created.kind) {
            self.stage = Stage::Failed;
            return Err(SetupError::OutOfOrder { kind: created.kind });
        }
        if created.status != 0 {
            self.stage = Stage::Failed;
            return Err(SetupError::CreateFailed {
                kind: created.kind,
                status: created.status,
            });
        }

        let next = match created.kind {
            AttributeKind::Service => {
                self.service = created.handle;
                BuildStep::StartService {
                    service: self.service,
                }
            }
            AttributeKind::ServiceStarted => BuildStep::AddCharacteristic {
                service: self.service,
                def: self.characteristic.clone(),
            },
            AttributeKind::Characteristic => {
                self.value = created.handle;
                BuildStep::AddDescriptor {
                    service: self.service,
                    def: DescriptorDef::CCCD,
                }
            }
            AttributeKind::Descriptor => {
                self.stage = Stage::Complete;
                self.handles = Some(Handles {
                    service: self.service,
                    value: self.value,
                    cccd: created.handle,
                });
                return Ok(None);
            }
        };
        self.stage = Stage::Awaiting(next.answered_by());
        Ok(Some(next))
    }

    /// Handles, once every attribute exists.
    pub fn handles(&self) -> Option<Handles> {
        self.handles
    }

}
