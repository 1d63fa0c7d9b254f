//! Radio stack boundary
//!
//! Inbound events delivered by a radio stack and the fire-and-forget requests
//! the state machine hands back to it.

use bytes::Bytes;
use uuid::Uuid;

use crate::status::Phase;
use crate::{Advertisement, CharacteristicHandle, PeripheralId, ServiceHandle};

/// A characteristic reported by characteristic discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub handle: CharacteristicHandle,
    pub uuid: Uuid,
}

/// Events delivered serially by the radio stack
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// Adapter power state changed (or was reported on attach)
    PowerStateChanged { powered_on: bool },
    /// A device advertising the scanned service was seen
    PeripheralDiscovered {
        peripheral: PeripheralId,
        advertisement: Advertisement,
    },
    /// The stack could not start scanning
    ScanFailed { reason: String },
    /// A connect request completed
    ConnectionEstablished { peripheral: PeripheralId },
    /// A connect request failed
    ConnectionFailed {
        peripheral: PeripheralId,
        reason: String,
    },
    /// An established connection went away
    ConnectionLost { peripheral: PeripheralId },
    /// Service discovery completed
    ServicesDiscovered {
        peripheral: PeripheralId,
        services: Vec<ServiceHandle>,
        error: Option<String>,
    },
    /// Characteristic discovery for one service completed
    CharacteristicsDiscovered {
        service: ServiceHandle,
        characteristics: Vec<DiscoveredCharacteristic>,
        error: Option<String>,
    },
    /// Delivery confirmation for an acknowledged write
    WriteCompleted {
        characteristic: CharacteristicHandle,
        result: Result<(), String>,
    },
}

/// Requests handed to the radio stack. None of them wait for an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioRequest {
    StartScan { service_filter: Uuid },
    StopScan,
    Connect { peripheral: PeripheralId },
    CancelConnection { peripheral: PeripheralId },
    DiscoverServices {
        peripheral: PeripheralId,
        service_filter: Uuid,
    },
    DiscoverCharacteristics {
        service: ServiceHandle,
        characteristic_filter: Uuid,
    },
    WriteValue {
        characteristic: CharacteristicHandle,
        payload: Bytes,
        acknowledged: bool,
    },
}

impl RadioRequest {
    /// The event reporting that this request could not be issued at all.
    ///
    /// `None` for requests without an asynchronous outcome.
    pub fn failure_event(&self, reason: String) -> Option<RadioEvent> {
        match self {
            RadioRequest::StartScan { .. } => Some(RadioEvent::ScanFailed { reason }),
            RadioRequest::Connect { peripheral } => Some(RadioEvent::ConnectionFailed {
                peripheral: *peripheral,
                reason,
            }),
            RadioRequest::DiscoverServices { peripheral, .. } => {
                Some(RadioEvent::ServicesDiscovered {
                    peripheral: *peripheral,
                    services: Vec::new(),
                    error: Some(reason),
                })
            }
            RadioRequest::DiscoverCharacteristics { service, .. } => {
                Some(RadioEvent::CharacteristicsDiscovered {
                    service: *service,
                    characteristics: Vec::new(),
                    error: Some(reason),
                })
            }
            RadioRequest::WriteValue {
                characteristic,
                acknowledged: true,
                ..
            } => Some(RadioEvent::WriteCompleted {
                characteristic: *characteristic,
                result: Err(reason),
            }),
            RadioRequest::WriteValue { .. }
            | RadioRequest::StopScan
            | RadioRequest::CancelConnection { .. } => None,
        }
    }
}

/// Side effects produced by handling one input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Hand this request to the radio stack
    Radio(RadioRequest),
    /// Start the deadline for the phase just entered
    ArmTimeout { generation: u64, phase: Phase },
}

impl Effect {
    pub fn as_radio(&self) -> Option<&RadioRequest> {
        match self {
            Effect::Radio(request) => Some(request),
            Effect::ArmTimeout { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P1: PeripheralId = PeripheralId::new([1, 2, 3, 4, 5, 6]);

    #[test]
    fn test_connect_failure_event_names_peripheral() {
        let request = RadioRequest::Connect { peripheral: P1 };
        assert_eq!(
            request.failure_event("no such device".into()),
            Some(RadioEvent::ConnectionFailed {
                peripheral: P1,
                reason: "no such device".into(),
            })
        );
    }

    #[test]
    fn test_discovery_failures_carry_error() {
        let service = ServiceHandle {
            peripheral: P1,
            id: 4,
        };
        let event = RadioRequest::DiscoverCharacteristics {
            service,
            characteristic_filter: Uuid::nil(),
        }
        .failure_event("gone".into());
        assert_eq!(
            event,
            Some(RadioEvent::CharacteristicsDiscovered {
                service,
                characteristics: Vec::new(),
                error: Some("gone".into()),
            })
        );
    }

    #[test]
    fn test_requests_without_outcome_have_no_failure_event() {
        assert_eq!(RadioRequest::StopScan.failure_event("x".into()), None);
        assert_eq!(
            RadioRequest::CancelConnection { peripheral: P1 }.failure_event("x".into()),
            None
        );
        let unacknowledged = RadioRequest::WriteValue {
            characteristic: CharacteristicHandle {
                service: ServiceHandle {
                    peripheral: P1,
                    id: 1,
                },
                id: 2,
            },
            payload: Bytes::from_static(&[0x01]),
            acknowledged: false,
        };
        assert_eq!(unacknowledged.failure_event("x".into()), None);
    }
}
