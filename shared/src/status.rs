//! Connection status, failure reasons and the status sink

use std::fmt;
use thiserror::Error;

/// Human-readable status strings mirrored to the sink
pub mod text {
    pub const SCANNING: &str = "Scanning";
    pub const CONNECTING: &str = "Connected to device";
    pub const DISCOVERING_SERVICES: &str = "Scanning for Services";
    pub const DISCOVERING_CHARACTERISTICS: &str = "Discovering characteristics";
    pub const READY: &str = "Connected";
    pub const NO_SERVICES: &str = "No services found for peripheral";
    pub const NO_CHARACTERISTICS: &str = "No characteristics found for service";
    pub const RADIO_OFF: &str = "Bluetooth unavailable";
}

/// Asynchronous phases that carry a deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Connecting => write!(f, "connecting"),
            Phase::DiscoveringServices => write!(f, "discovering services"),
            Phase::DiscoveringCharacteristics => write!(f, "discovering characteristics"),
        }
    }
}

/// Why the chain halted for the current candidate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error("Failed: Could not scan ({0})")]
    Scan(String),

    #[error("Failed: Could not connect ({0})")]
    Connect(String),

    #[error("{}", text::NO_SERVICES)]
    ServiceDiscovery(String),

    #[error("{}", text::NO_SERVICES)]
    NoServices,

    #[error("{}", text::NO_CHARACTERISTICS)]
    CharacteristicDiscovery(String),

    #[error("Failed: Timeout while {0}")]
    Timeout(Phase),
}

/// Errors reported through the status sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// `send` before any device was discovered
    #[error("Failed: No Peripheral")]
    NoPeripheral,

    /// Device known but the target characteristic is not resolved
    #[error("Failed: No Characteristic")]
    NoCharacteristic,

    /// The transport rejected an acknowledged write
    #[error("Failed: Write error ({0})")]
    WriteFailed(String),
}

/// Connection status exposed to callers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Ready,
    Failed(FailureReason),
}

impl ConnectionStatus {
    /// True when a payload can be written
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionStatus::Ready)
    }

    /// The deadline phase for this status, if it has one
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ConnectionStatus::Connecting => Some(Phase::Connecting),
            ConnectionStatus::DiscoveringServices => Some(Phase::DiscoveringServices),
            ConnectionStatus::DiscoveringCharacteristics => {
                Some(Phase::DiscoveringCharacteristics)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Idle => write!(f, "Idle"),
            ConnectionStatus::Scanning => write!(f, "Scanning"),
            ConnectionStatus::Connecting => write!(f, "Connecting"),
            ConnectionStatus::DiscoveringServices => write!(f, "DiscoveringServices"),
            ConnectionStatus::DiscoveringCharacteristics => {
                write!(f, "DiscoveringCharacteristics")
            }
            ConnectionStatus::Ready => write!(f, "Ready"),
            ConnectionStatus::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

/// Anything that can receive a status string.
///
/// Invoked synchronously from the event-handling path.
pub trait StatusSink: Send {
    fn update(&self, status: &str);
}

impl<F> StatusSink for F
where
    F: Fn(&str) + Send,
{
    fn update(&self, status: &str) {
        self(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_errors_render_status_text() {
        assert_eq!(LinkError::NoPeripheral.to_string(), "Failed: No Peripheral");
        assert_eq!(
            LinkError::NoCharacteristic.to_string(),
            "Failed: No Characteristic"
        );
    }

    #[test]
    fn test_timeout_text_names_phase() {
        let reason = FailureReason::Timeout(Phase::DiscoveringServices);
        assert_eq!(reason.to_string(), "Failed: Timeout while discovering services");
    }

    #[test]
    fn test_discovery_failures_use_status_text() {
        assert_eq!(FailureReason::NoServices.to_string(), text::NO_SERVICES);
        assert_eq!(
            FailureReason::ServiceDiscovery("att error".into()).to_string(),
            text::NO_SERVICES
        );
        assert_eq!(
            FailureReason::CharacteristicDiscovery("busy".into()).to_string(),
            text::NO_CHARACTERISTICS
        );
    }

    #[test]
    fn test_only_ready_is_ready() {
        assert!(ConnectionStatus::Ready.is_ready());
        assert!(!ConnectionStatus::DiscoveringCharacteristics.is_ready());
        assert!(!ConnectionStatus::Failed(FailureReason::NoServices).is_ready());
    }
}
