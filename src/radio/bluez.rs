//! BlueZ radio stack built on `bluer`

use crate::radio::traits::{RadioEventSender, RadioStack};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bluer::gatt::remote::CharacteristicWriteRequest;
use bluer::gatt::WriteOp;
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, DeviceEvent, DeviceProperty,
    DiscoveryFilter, DiscoveryTransport, Uuid,
};
use bytes::Bytes;
use futures::StreamExt;
use payload_link_shared::{
    Advertisement, CharacteristicHandle, DiscoveredCharacteristic, PeripheralId, RadioEvent,
    RadioRequest, ServiceHandle,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for the BlueZ stack
#[derive(Debug, Clone, Default)]
pub struct BluezConfig {
    /// Adapter name (e.g. "hci0"); the default adapter when unset
    pub adapter_name: Option<String>,
    /// Power the adapter on when attaching
    pub power_on: bool,
}

/// Radio stack backed by the system BlueZ daemon
pub struct BluezRadio {
    config: BluezConfig,
    adapter: Option<Adapter>,
    events: Option<RadioEventSender>,
    power_monitor: Option<JoinHandle<()>>,
    scan_task: Option<JoinHandle<()>>,
    connection_monitor: Option<JoinHandle<()>>,
    service_discovery: Option<JoinHandle<()>>,
    /// Peripheral the last connect request targeted
    connected: Option<PeripheralId>,
}

impl BluezRadio {
    pub fn new(config: BluezConfig) -> Self {
        Self {
            config,
            adapter: None,
            events: None,
            power_monitor: None,
            scan_task: None,
            connection_monitor: None,
            service_discovery: None,
            connected: None,
        }
    }

    fn handles(&self) -> Result<(Adapter, RadioEventSender)> {
        match (&self.adapter, &self.events) {
            (Some(adapter), Some(events)) => Ok((adapter.clone(), events.clone())),
            _ => Err(anyhow!("BlueZ radio used before attach")),
        }
    }

    async fn start_scan(&mut self, service: Uuid) -> Result<()> {
        let (adapter, events) = self.handles()?;
        self.stop_scan();

        let filter = DiscoveryFilter {
            uuids: [service].into_iter().collect(),
            transport: DiscoveryTransport::Le,
            ..Default::default()
        };
        adapter.set_discovery_filter(filter).await?;

        info!("[BT] Scanning for service {}", service);
        let discover = adapter.discover_devices().await?;

        self.scan_task = Some(tokio::spawn(async move {
            tokio::pin!(discover);
            while let Some(evt) = discover.next().await {
                let AdapterEvent::DeviceAdded(addr) = evt else {
                    continue;
                };
                match advertised_identity(&adapter, addr, service).await {
                    Ok(Some(advertisement)) => {
                        let _ = events.send(RadioEvent::PeripheralDiscovered {
                            peripheral: PeripheralId::new(addr.0),
                            advertisement,
                        });
                    }
                    Ok(None) => debug!("[BT] {} does not advertise {}", addr, service),
                    Err(e) => debug!("[BT] Could not inspect {}: {}", addr, e),
                }
            }
            debug!("[BT] Discovery stream ended");
        }));
        Ok(())
    }

    fn stop_scan(&mut self) {
        // Dropping the discovery stream ends the BlueZ discovery session
        if let Some(task) = self.scan_task.take() {
            info!("[BT] Scan stopped");
            task.abort();
        }
    }

    /// Stop watching the current peripheral and abandon its pending discovery
    fn release_connection(&mut self) {
        for task in [self.connection_monitor.take(), self.service_discovery.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }

    /// Make `peripheral` the connect target, returning a different previous target
    fn retarget(&mut self, peripheral: PeripheralId) -> Option<PeripheralId> {
        self.connected
            .replace(peripheral)
            .filter(|previous| *previous != peripheral)
    }

    fn connect(&mut self, peripheral: PeripheralId) -> Result<()> {
        let (adapter, events) = self.handles()?;
        let device = adapter.device(Address::new(peripheral.octets()))?;

        self.release_connection();
        if let Some(previous) = self.retarget(peripheral) {
            info!("[BT] Dropping link to {}", previous);
            if let Err(e) = disconnect(&adapter, previous) {
                debug!("[BT] Cannot release {}: {}", previous, e);
            }
        }

        self.connection_monitor = Some(tokio::spawn(async move {
            // Subscribe before connecting so a fast disconnect is not missed
            let changes = device.events().await;

            info!("[BT] Connecting to {}", peripheral);
            if let Err(e) = device.connect().await {
                let _ = events.send(RadioEvent::ConnectionFailed {
                    peripheral,
                    reason: e.to_string(),
                });
                return;
            }
            let _ = events.send(RadioEvent::ConnectionEstablished { peripheral });

            let Ok(changes) = changes else {
                warn!("[BT] Cannot watch {} for disconnects", peripheral);
                return;
            };
            tokio::pin!(changes);
            while let Some(evt) = changes.next().await {
                if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = evt {
                    info!("[BT] {} disconnected", peripheral);
                    let _ = events.send(RadioEvent::ConnectionLost { peripheral });
                    break;
                }
            }
        }));
        Ok(())
    }

    fn cancel_connection(&mut self, peripheral: PeripheralId) -> Result<()> {
        let (adapter, _) = self.handles()?;

        self.release_connection();
        if self.connected == Some(peripheral) {
            self.connected = None;
        }
        disconnect(&adapter, peripheral)
    }

    fn discover_services(&mut self, peripheral: PeripheralId, filter: Uuid) -> Result<()> {
        let (adapter, events) = self.handles()?;
        if let Some(previous) = self.service_discovery.take() {
            previous.abort();
        }

        self.service_discovery = Some(tokio::spawn(async move {
            let event = match find_services(&adapter, peripheral, filter).await {
                Ok(services) => RadioEvent::ServicesDiscovered {
                    peripheral,
                    services,
                    error: None,
                },
                Err(e) => RadioEvent::ServicesDiscovered {
                    peripheral,
                    services: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            let _ = events.send(event);
        }));
        Ok(())
    }

    fn discover_characteristics(&self, service: ServiceHandle, filter: Uuid) -> Result<()> {
        let (adapter, events) = self.handles()?;
        tokio::spawn(async move {
            let event = match find_characteristics(&adapter, service, filter).await {
                Ok(characteristics) => RadioEvent::CharacteristicsDiscovered {
                    service,
                    characteristics,
                    error: None,
                },
                Err(e) => RadioEvent::CharacteristicsDiscovered {
                    service,
                    characteristics: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            let _ = events.send(event);
        });
        Ok(())
    }

    fn write_value(
        &self,
        characteristic: CharacteristicHandle,
        payload: Bytes,
        acknowledged: bool,
    ) -> Result<()> {
        let (adapter, events) = self.handles()?;
        tokio::spawn(async move {
            let result = write(&adapter, characteristic, &payload, acknowledged)
                .await
                .map_err(|e| e.to_string());
            if acknowledged {
                let _ = events.send(RadioEvent::WriteCompleted {
                    characteristic,
                    result,
                });
            }
        });
        Ok(())
    }
}

#[async_trait]
impl RadioStack for BluezRadio {
    async fn attach(&mut self, events: RadioEventSender) -> Result<()> {
        let session = bluer::Session::new().await?;
        let adapter = match &self.config.adapter_name {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("[BT] Using adapter {}", adapter.name());

        let changes = adapter.events().await?;
        let _ = events.send(RadioEvent::PowerStateChanged {
            powered_on: adapter.is_powered().await?,
        });
        if self.config.power_on && !adapter.is_powered().await? {
            info!("[BT] Powering on adapter");
            adapter.set_powered(true).await?;
        }

        let power_events = events.clone();
        self.power_monitor = Some(tokio::spawn(async move {
            tokio::pin!(changes);
            while let Some(evt) = changes.next().await {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered_on)) = evt {
                    info!("[BT] Adapter powered: {}", powered_on);
                    let _ = power_events.send(RadioEvent::PowerStateChanged { powered_on });
                }
            }
        }));

        self.adapter = Some(adapter);
        self.events = Some(events);
        Ok(())
    }

    async fn submit(&mut self, request: RadioRequest) -> Result<()> {
        match request {
            RadioRequest::StartScan { service_filter } => self.start_scan(service_filter).await,
            RadioRequest::StopScan => {
                self.stop_scan();
                Ok(())
            }
            RadioRequest::Connect { peripheral } => self.connect(peripheral),
            RadioRequest::CancelConnection { peripheral } => self.cancel_connection(peripheral),
            RadioRequest::DiscoverServices {
                peripheral,
                service_filter,
            } => self.discover_services(peripheral, service_filter),
            RadioRequest::DiscoverCharacteristics {
                service,
                characteristic_filter,
            } => self.discover_characteristics(service, characteristic_filter),
            RadioRequest::WriteValue {
                characteristic,
                payload,
                acknowledged,
            } => self.write_value(characteristic, payload, acknowledged),
        }
    }

    fn name(&self) -> &'static str {
        "BlueZ"
    }
}

impl Drop for BluezRadio {
    fn drop(&mut self) {
        for task in [
            self.power_monitor.take(),
            self.scan_task.take(),
            self.connection_monitor.take(),
            self.service_discovery.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

/// Advertised identity of `addr`, if it advertises `service`
async fn advertised_identity(
    adapter: &Adapter,
    addr: Address,
    service: Uuid,
) -> Result<Option<Advertisement>> {
    let device = adapter.device(addr)?;
    let advertises = device
        .uuids()
        .await?
        .is_some_and(|uuids| uuids.contains(&service));
    if !advertises {
        return Ok(None);
    }

    Ok(Some(Advertisement {
        local_name: device.name().await?,
        rssi: device.rssi().await?,
    }))
}

/// Disconnect `peripheral` in the background
fn disconnect(adapter: &Adapter, peripheral: PeripheralId) -> Result<()> {
    let device = adapter.device(Address::new(peripheral.octets()))?;
    tokio::spawn(async move {
        if let Err(e) = device.disconnect().await {
            debug!("[BT] Disconnect of {} failed: {}", peripheral, e);
        }
    });
    Ok(())
}

async fn find_services(
    adapter: &Adapter,
    peripheral: PeripheralId,
    filter: Uuid,
) -> Result<Vec<ServiceHandle>> {
    let device = adapter.device(Address::new(peripheral.octets()))?;

    // BlueZ only lists services once it has resolved them
    let changes = device.events().await?;
    tokio::pin!(changes);
    while !device.is_services_resolved().await? {
        match changes.next().await {
            Some(DeviceEvent::PropertyChanged(DeviceProperty::ServicesResolved(true))) => break,
            Some(DeviceEvent::PropertyChanged(DeviceProperty::Connected(false))) | None => {
                bail!("{} disconnected before services resolved", peripheral)
            }
            Some(_) => {}
        }
    }

    let mut handles = Vec::new();
    for service in device.services().await? {
        if service.uuid().await? == filter {
            handles.push(ServiceHandle {
                peripheral,
                id: service.id(),
            });
        }
    }
    Ok(handles)
}

async fn find_characteristics(
    adapter: &Adapter,
    service: ServiceHandle,
    filter: Uuid,
) -> Result<Vec<DiscoveredCharacteristic>> {
    let device = adapter.device(Address::new(service.peripheral.octets()))?;
    let remote = device.service(service.id).await?;

    let mut found = Vec::new();
    for characteristic in remote.characteristics().await? {
        let uuid = characteristic.uuid().await?;
        if uuid == filter {
            found.push(DiscoveredCharacteristic {
                handle: CharacteristicHandle {
                    service,
                    id: characteristic.id(),
                },
                uuid,
            });
        }
    }
    Ok(found)
}

async fn write(
    adapter: &Adapter,
    handle: CharacteristicHandle,
    payload: &[u8],
    acknowledged: bool,
) -> Result<()> {
    let device = adapter.device(Address::new(handle.peripheral().octets()))?;
    let characteristic = device
        .service(handle.service.id)
        .await?
        .characteristic(handle.id)
        .await?;

    let request = CharacteristicWriteRequest {
        op_type: if acknowledged {
            WriteOp::Request
        } else {
            WriteOp::Command
        },
        ..Default::default()
    };
    characteristic.write_ext(payload, &request).await?;
    debug!("[BT] Wrote {} bytes to characteristic {}", payload.len(), handle.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BluezConfig::default();
        assert!(config.adapter_name.is_none());
        assert!(!config.power_on);
    }

    #[tokio::test]
    async fn test_requests_before_attach_fail() {
        let mut radio = BluezRadio::new(BluezConfig::default());
        let result = radio
            .submit(RadioRequest::Connect {
                peripheral: PeripheralId::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
            })
            .await;
        assert!(result.is_err());
        assert_eq!(radio.name(), "BlueZ");
    }

    /// A task that never finishes and reports through the receiver when dropped
    fn pending_task() -> (JoinHandle<()>, tokio::sync::oneshot::Receiver<()>) {
        let (alive, dropped) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive;
            futures::future::pending::<()>().await;
        });
        (task, dropped)
    }

    #[tokio::test]
    async fn test_release_connection_abandons_service_discovery() {
        let mut radio = BluezRadio::new(BluezConfig::default());
        let (monitor, monitor_dropped) = pending_task();
        let (discovery, discovery_dropped) = pending_task();
        radio.connection_monitor = Some(monitor);
        radio.service_discovery = Some(discovery);

        radio.release_connection();
        assert!(monitor_dropped.await.is_err());
        assert!(discovery_dropped.await.is_err());
        assert!(radio.service_discovery.is_none());
    }

    #[test]
    fn test_retarget_reports_replaced_peripheral() {
        let p1 = PeripheralId::new([1, 1, 1, 1, 1, 1]);
        let p2 = PeripheralId::new([2, 2, 2, 2, 2, 2]);
        let mut radio = BluezRadio::new(BluezConfig::default());

        assert_eq!(radio.retarget(p1), None);
        assert_eq!(radio.retarget(p1), None);
        assert_eq!(radio.retarget(p2), Some(p1));
        assert_eq!(radio.connected, Some(p2));
    }

    #[tokio::test]
    async fn test_drop_aborts_background_tasks() {
        let mut radio = BluezRadio::new(BluezConfig::default());
        let (discovery, discovery_dropped) = pending_task();
        radio.service_discovery = Some(discovery);

        drop(radio);
        assert!(discovery_dropped.await.is_err());
    }
}
