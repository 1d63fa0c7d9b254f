//! payload-link Shared Types
//!
//! This crate provides the radio-independent domain model and the connection
//! state machine used by the payload-link central and its test peripheral.

pub mod event;
pub mod state_machine;
pub mod status;

use std::fmt;
use uuid::Uuid;

pub use event::{DiscoveredCharacteristic, Effect, RadioEvent, RadioRequest};
pub use state_machine::LinkStateMachine;
pub use status::{ConnectionStatus, FailureReason, LinkError, Phase, StatusSink};

/// Well-known identifiers searched for when nothing else is configured
pub mod defaults {
    use uuid::Uuid;

    /// User Data service
    pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000181c_0000_1000_8000_00805f9b34fb);

    /// Characteristic the payload is written to
    pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

    /// Time allowed for each asynchronous transition, in milliseconds
    pub const TRANSITION_TIMEOUT_MS: u64 = 10_000;
}

/// The service/characteristic pair the manager searches for.
///
/// Fixed at construction and never changed for the lifetime of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDescriptor {
    service_id: Uuid,
    characteristic_id: Uuid,
}

impl TargetDescriptor {
    pub const fn new(service_id: Uuid, characteristic_id: Uuid) -> Self {
        Self {
            service_id,
            characteristic_id,
        }
    }

    pub fn service_id(&self) -> Uuid {
        self.service_id
    }

    pub fn characteristic_id(&self) -> Uuid {
        self.characteristic_id
    }
}

impl Default for TargetDescriptor {
    fn default() -> Self {
        Self::new(defaults::SERVICE_UUID, defaults::CHARACTERISTIC_UUID)
    }
}

/// Opaque handle to a remote device (its 48-bit address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeripheralId([u8; 6]);

impl PeripheralId {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Advertised identity reported alongside a discovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

/// A peripheral adopted as the current target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePeripheral {
    pub id: PeripheralId,
    pub advertisement: Advertisement,
}

/// Opaque handle to a GATT service on a peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    pub peripheral: PeripheralId,
    pub id: u16,
}

/// Opaque handle to a GATT characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub service: ServiceHandle,
    pub id: u16,
}

impl CharacteristicHandle {
    pub fn peripheral(&self) -> PeripheralId {
        self.service.peripheral
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_target_matches_well_known_uuids() {
        let target = TargetDescriptor::default();
        assert_eq!(
            target.service_id().to_string(),
            "0000181c-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            target.characteristic_id().to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_peripheral_id_display() {
        let id = PeripheralId::new([0x00, 0x11, 0x22, 0xAA, 0xBB, 0x0F]);
        assert_eq!(id.to_string(), "00:11:22:AA:BB:0F");
    }
}
