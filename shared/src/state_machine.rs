//! Connection State Machine
//!
//! Drives the discovery → connect → resolve chain for a single target. All
//! mutation happens inside [`LinkStateMachine::process_event`],
//! [`LinkStateMachine::send`] and [`LinkStateMachine::on_timeout`]; the
//! caller is expected to invoke them from one serial consumer.

use bytes::Bytes;
use tracing::debug;

use crate::event::{DiscoveredCharacteristic, Effect, RadioEvent, RadioRequest};
use crate::status::{text, ConnectionStatus, FailureReason, LinkError, Phase, StatusSink};
use crate::{
    Advertisement, CandidatePeripheral, CharacteristicHandle, PeripheralId, ServiceHandle,
    TargetDescriptor,
};

/// Single-target connection state machine
pub struct LinkStateMachine {
    target: TargetDescriptor,
    sink: Box<dyn StatusSink>,
    status: ConnectionStatus,
    candidate: Option<CandidatePeripheral>,
    characteristic: Option<CharacteristicHandle>,
    /// Bumped on every state change so late timer expiries can be recognised
    generation: u64,
}

impl LinkStateMachine {
    /// Create a machine in the Idle state
    pub fn new(sink: impl StatusSink + 'static, target: TargetDescriptor) -> Self {
        Self {
            target,
            sink: Box::new(sink),
            status: ConnectionStatus::Idle,
            candidate: None,
            characteristic: None,
            generation: 0,
        }
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn candidate(&self) -> Option<&CandidatePeripheral> {
        self.candidate.as_ref()
    }

    pub fn characteristic(&self) -> Option<&CharacteristicHandle> {
        self.characteristic.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Handle one inbound radio event and return the resulting effects
    pub fn process_event(&mut self, event: RadioEvent) -> Vec<Effect> {
        match event {
            RadioEvent::PowerStateChanged { powered_on } => self.on_power(powered_on),
            RadioEvent::PeripheralDiscovered {
                peripheral,
                advertisement,
            } => self.on_discovered(peripheral, advertisement),
            RadioEvent::ScanFailed { reason } => self.on_scan_failed(reason),
            RadioEvent::ConnectionEstablished { peripheral } => self.on_connected(peripheral),
            RadioEvent::ConnectionFailed { peripheral, reason } => {
                self.on_connect_failed(peripheral, reason)
            }
            RadioEvent::ConnectionLost { peripheral } => self.on_connection_lost(peripheral),
            RadioEvent::ServicesDiscovered {
                peripheral,
                services,
                error,
            } => self.on_services(peripheral, services, error),
            RadioEvent::CharacteristicsDiscovered {
                service,
                characteristics,
                error,
            } => self.on_characteristics(service, characteristics, error),
            RadioEvent::WriteCompleted {
                characteristic,
                result,
            } => self.on_write_completed(characteristic, result),
        }
    }

    /// Request a write of `payload` to the resolved characteristic.
    ///
    /// Failing precondition checks are reported to the sink and returned;
    /// no request is produced for them.
    pub fn send(&mut self, payload: Bytes) -> Result<RadioRequest, LinkError> {
        if self.candidate.is_none() {
            return Err(self.report(LinkError::NoPeripheral));
        }
        let Some(characteristic) = self.characteristic else {
            return Err(self.report(LinkError::NoCharacteristic));
        };

        Ok(RadioRequest::WriteValue {
            characteristic,
            payload,
            acknowledged: true,
        })
    }

    /// A phase deadline fired. Expiries from earlier transitions are ignored.
    pub fn on_timeout(&mut self, generation: u64) -> Vec<Effect> {
        if generation != self.generation {
            debug!(generation, current = self.generation, "Ignoring stale timeout");
            return Vec::new();
        }
        let Some(phase) = self.status.phase() else {
            return Vec::new();
        };

        let mut effects = Vec::new();
        if let Some(candidate) = &self.candidate {
            effects.push(Effect::Radio(RadioRequest::CancelConnection {
                peripheral: candidate.id,
            }));
        }
        self.fail(FailureReason::Timeout(phase));
        effects
    }

    fn on_power(&mut self, powered_on: bool) -> Vec<Effect> {
        if !powered_on {
            self.candidate = None;
            self.characteristic = None;
            self.transition(ConnectionStatus::Idle);
            self.sink.update(text::RADIO_OFF);
            return Vec::new();
        }

        if self.status != ConnectionStatus::Idle {
            debug!(status = %self.status, "Radio already powered");
            return Vec::new();
        }
        self.start_scan()
    }

    fn on_discovered(
        &mut self,
        peripheral: PeripheralId,
        advertisement: Advertisement,
    ) -> Vec<Effect> {
        if self.status.is_ready() {
            debug!(%peripheral, "Ignoring discovery while a target is resolved");
            return Vec::new();
        }

        // The newest discovery always wins; the previous candidate is abandoned.
        self.candidate = Some(CandidatePeripheral {
            id: peripheral,
            advertisement,
        });
        self.characteristic = None;
        self.transition(ConnectionStatus::Connecting);
        self.sink.update(text::CONNECTING);

        vec![
            Effect::Radio(RadioRequest::Connect { peripheral }),
            self.arm(Phase::Connecting),
        ]
    }

    fn on_scan_failed(&mut self, reason: String) -> Vec<Effect> {
        if self.status == ConnectionStatus::Scanning {
            self.fail(FailureReason::Scan(reason));
        }
        Vec::new()
    }

    fn on_connected(&mut self, peripheral: PeripheralId) -> Vec<Effect> {
        if !self.expects(ConnectionStatus::Connecting, peripheral) {
            return Vec::new();
        }

        self.transition(ConnectionStatus::DiscoveringServices);
        self.sink.update(text::DISCOVERING_SERVICES);

        vec![
            Effect::Radio(RadioRequest::DiscoverServices {
                peripheral,
                service_filter: self.target.service_id(),
            }),
            self.arm(Phase::DiscoveringServices),
        ]
    }

    fn on_connect_failed(&mut self, peripheral: PeripheralId, reason: String) -> Vec<Effect> {
        if self.expects(ConnectionStatus::Connecting, peripheral) {
            self.fail(FailureReason::Connect(reason));
        }
        Vec::new()
    }

    fn on_connection_lost(&mut self, peripheral: PeripheralId) -> Vec<Effect> {
        if !self.is_candidate(peripheral) {
            debug!(%peripheral, "Ignoring disconnect of abandoned peripheral");
            return Vec::new();
        }

        self.candidate = None;
        self.characteristic = None;
        self.start_scan()
    }

    fn on_services(
        &mut self,
        peripheral: PeripheralId,
        services: Vec<ServiceHandle>,
        error: Option<String>,
    ) -> Vec<Effect> {
        if !self.expects(ConnectionStatus::DiscoveringServices, peripheral) {
            return Vec::new();
        }

        if let Some(err) = error {
            self.fail(FailureReason::ServiceDiscovery(err));
            return Vec::new();
        }
        if services.is_empty() {
            self.fail(FailureReason::NoServices);
            return Vec::new();
        }

        self.transition(ConnectionStatus::DiscoveringCharacteristics);
        self.sink.update(text::DISCOVERING_CHARACTERISTICS);

        let characteristic_filter = self.target.characteristic_id();
        let mut effects: Vec<Effect> = services
            .into_iter()
            .map(|service| {
                Effect::Radio(RadioRequest::DiscoverCharacteristics {
                    service,
                    characteristic_filter,
                })
            })
            .collect();
        effects.push(self.arm(Phase::DiscoveringCharacteristics));
        effects
    }

    fn on_characteristics(
        &mut self,
        service: ServiceHandle,
        characteristics: Vec<DiscoveredCharacteristic>,
        error: Option<String>,
    ) -> Vec<Effect> {
        if !self.expects(ConnectionStatus::DiscoveringCharacteristics, service.peripheral) {
            return Vec::new();
        }

        if let Some(err) = error {
            self.fail(FailureReason::CharacteristicDiscovery(err));
            return Vec::new();
        }

        let wanted = self.target.characteristic_id();
        let Some(found) = characteristics.iter().find(|c| c.uuid == wanted) else {
            debug!(service = service.id, "No matching characteristic on service");
            return Vec::new();
        };

        self.characteristic = Some(found.handle);
        self.transition(ConnectionStatus::Ready);
        self.sink.update(text::READY);

        vec![Effect::Radio(RadioRequest::StopScan)]
    }

    fn on_write_completed(
        &mut self,
        characteristic: CharacteristicHandle,
        result: Result<(), String>,
    ) -> Vec<Effect> {
        match result {
            Ok(()) => debug!(characteristic = characteristic.id, "Write acknowledged"),
            Err(reason) => {
                self.report(LinkError::WriteFailed(reason));
            }
        }
        Vec::new()
    }

    fn start_scan(&mut self) -> Vec<Effect> {
        self.transition(ConnectionStatus::Scanning);
        self.sink.update(text::SCANNING);
        vec![Effect::Radio(RadioRequest::StartScan {
            service_filter: self.target.service_id(),
        })]
    }

    /// True when `peripheral` is the candidate and the machine is in `status`
    fn expects(&self, status: ConnectionStatus, peripheral: PeripheralId) -> bool {
        let expected = self.status == status && self.is_candidate(peripheral);
        if !expected {
            debug!(%peripheral, status = %self.status, "Ignoring stale event");
        }
        expected
    }

    fn is_candidate(&self, peripheral: PeripheralId) -> bool {
        self.candidate.as_ref().is_some_and(|c| c.id == peripheral)
    }

    fn fail(&mut self, reason: FailureReason) {
        self.sink.update(&reason.to_string());
        self.transition(ConnectionStatus::Failed(reason));
    }

    fn arm(&self, phase: Phase) -> Effect {
        Effect::ArmTimeout {
            generation: self.generation,
            phase,
        }
    }

    fn transition(&mut self, status: ConnectionStatus) {
        debug!(from = %self.status, to = %status, "Link transition");
        self.status = status;
        self.generation += 1;
    }

    fn report(&self, err: LinkError) -> LinkError {
        self.sink.update(&err.to_string());
        err
    }
}
