//! Command-line configuration

use crate::connection::{ManagerConfig, TransitionTimeouts};
use crate::radio::BluezConfig;
use clap::Parser;
use payload_link_shared::{defaults, TargetDescriptor};
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "payload-link")]
#[command(about = "Connect to a BLE payload device and write hex payloads read from stdin")]
pub struct Cli {
    /// Service UUID the peripheral must advertise
    #[arg(long, default_value_t = defaults::SERVICE_UUID)]
    pub service: Uuid,

    /// Characteristic UUID payloads are written to
    #[arg(long, default_value_t = defaults::CHARACTERISTIC_UUID)]
    pub characteristic: Uuid,

    /// Connect deadline in milliseconds (0 disables)
    #[arg(long, default_value_t = defaults::TRANSITION_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,

    /// Service discovery deadline in milliseconds (0 disables)
    #[arg(long, default_value_t = defaults::TRANSITION_TIMEOUT_MS)]
    pub services_timeout_ms: u64,

    /// Characteristic discovery deadline in milliseconds (0 disables)
    #[arg(long, default_value_t = defaults::TRANSITION_TIMEOUT_MS)]
    pub characteristics_timeout_ms: u64,

    /// Wait forever in every phase, ignoring the deadline flags
    #[arg(long)]
    pub no_timeouts: bool,

    /// Bluetooth adapter name (e.g. hci0); the default adapter when omitted
    #[arg(short, long)]
    pub adapter: Option<String>,

    /// Power the adapter on at startup
    #[arg(long)]
    pub power_on: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log: String,
}

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub manager: ManagerConfig,
    pub radio: BluezConfig,
    pub log_filter: String,
}

impl From<Cli> for LinkConfig {
    fn from(cli: Cli) -> Self {
        Self {
            manager: ManagerConfig {
                target: TargetDescriptor::new(cli.service, cli.characteristic),
                timeouts: if cli.no_timeouts {
                    TransitionTimeouts::disabled()
                } else {
                    TransitionTimeouts {
                        connect: deadline(cli.connect_timeout_ms),
                        services: deadline(cli.services_timeout_ms),
                        characteristics: deadline(cli.characteristics_timeout_ms),
                    }
                },
            },
            radio: BluezConfig {
                adapter_name: cli.adapter,
                power_on: cli.power_on,
            },
            log_filter: cli.log,
        }
    }
}

fn deadline(millis: u64) -> Option<Duration> {
    (millis > 0).then(|| Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> LinkConfig {
        let argv = std::iter::once("payload-link").chain(args.iter().copied());
        Cli::try_parse_from(argv).unwrap().into()
    }

    #[test]
    fn test_defaults_match_well_known_target() {
        let config = parse(&[]);
        assert_eq!(config.manager.target, TargetDescriptor::default());
        assert_eq!(config.manager.timeouts, TransitionTimeouts::default());
        assert_eq!(config.radio.adapter_name, None);
        assert!(!config.radio.power_on);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_custom_target_and_adapter() {
        let config = parse(&[
            "--service",
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e",
            "--characteristic",
            "6e400002-b5a3-f393-e0a9-e50e24dcca9e",
            "--adapter",
            "hci1",
            "--power-on",
        ]);
        assert_eq!(
            config.manager.target.service_id(),
            Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e)
        );
        assert_eq!(
            config.manager.target.characteristic_id(),
            Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e)
        );
        assert_eq!(config.radio.adapter_name.as_deref(), Some("hci1"));
        assert!(config.radio.power_on);
    }

    #[test]
    fn test_zero_timeout_disables_phase() {
        let config = parse(&["--connect-timeout-ms", "0", "--services-timeout-ms", "2500"]);
        let timeouts = config.manager.timeouts;
        assert_eq!(timeouts.connect, None);
        assert_eq!(timeouts.services, Some(Duration::from_millis(2500)));
        assert_eq!(timeouts.characteristics, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_no_timeouts_overrides_deadlines() {
        let config = parse(&["--no-timeouts", "--connect-timeout-ms", "500"]);
        assert_eq!(config.manager.timeouts, TransitionTimeouts::disabled());
    }

    #[test]
    fn test_invalid_uuid_rejected() {
        let result = Cli::try_parse_from(["payload-link", "--service", "not-a-uuid"]);
        assert!(result.is_err());
    }
}
