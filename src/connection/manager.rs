//! Connection manager owning the radio stack and the link state machine

use crate::radio::RadioStack;
use anyhow::{anyhow, Result};
use bytes::Bytes;
use payload_link_shared::{
    defaults, ConnectionStatus, Effect, LinkStateMachine, Phase, RadioEvent, RadioRequest,
    StatusSink, TargetDescriptor,
};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Deadline for each asynchronous phase; `None` waits forever
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionTimeouts {
    pub connect: Option<Duration>,
    pub services: Option<Duration>,
    pub characteristics: Option<Duration>,
}

impl TransitionTimeouts {
    /// No deadlines at all
    pub fn disabled() -> Self {
        Self {
            connect: None,
            services: None,
            characteristics: None,
        }
    }

    pub fn for_phase(&self, phase: Phase) -> Option<Duration> {
        match phase {
            Phase::Connecting => self.connect,
            Phase::DiscoveringServices => self.services,
            Phase::DiscoveringCharacteristics => self.characteristics,
        }
    }
}

impl Default for TransitionTimeouts {
    fn default() -> Self {
        let deadline = Some(Duration::from_millis(defaults::TRANSITION_TIMEOUT_MS));
        Self {
            connect: deadline,
            services: deadline,
            characteristics: deadline,
        }
    }
}

/// Configuration for the connection manager
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Service and characteristic to resolve
    pub target: TargetDescriptor,
    /// Per-phase deadlines
    pub timeouts: TransitionTimeouts,
}

/// Commands accepted by the manager task
#[derive(Debug)]
enum ManagerCommand {
    Send(Bytes),
    Shutdown,
}

/// Handle to the connection manager task.
///
/// Every input (radio events, sends, deadlines) is handled by one task, so
/// the state machine is never touched concurrently.
pub struct ConnectionManager {
    command_tx: mpsc::UnboundedSender<ManagerCommand>,
    status_rx: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    /// Create the manager and attach it to `radio`.
    ///
    /// Scanning starts once the radio reports it is powered on.
    pub fn new<R: RadioStack>(
        sink: impl StatusSink + 'static,
        config: ManagerConfig,
        radio: R,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Idle);

        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let machine = LinkStateMachine::new(sink, config.target);
        let task = tokio::spawn(async move {
            ManagerTask {
                machine,
                radio,
                timeouts: config.timeouts,
                status_tx,
                timer_tx,
                timer: None,
            }
            .run(command_rx, timer_rx)
            .await;
        });

        Self {
            command_tx,
            status_rx,
            task,
        }
    }

    /// Queue `payload` for the resolved characteristic.
    ///
    /// Returns immediately. Missing peripheral or characteristic is reported
    /// through the status sink; an error here only means the manager stopped.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.command_tx
            .send(ManagerCommand::Send(payload.into()))
            .map_err(|_| anyhow!("Connection manager stopped"))
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    /// True when a payload device is ready to receive writes
    pub fn is_ready(&self) -> bool {
        self.status_rx.borrow().is_ready()
    }

    /// Stop the manager task and release the radio
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.command_tx.send(ManagerCommand::Shutdown);
        self.task.await?;
        Ok(())
    }
}

/// State owned by the manager task
struct ManagerTask<R> {
    machine: LinkStateMachine,
    radio: R,
    timeouts: TransitionTimeouts,
    status_tx: watch::Sender<ConnectionStatus>,
    /// Loopback for expired deadlines, tagged with the arming generation
    timer_tx: mpsc::UnboundedSender<u64>,
    timer: Option<JoinHandle<()>>,
}

impl<R: RadioStack> ManagerTask<R> {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<ManagerCommand>,
        mut timer_rx: mpsc::UnboundedReceiver<u64>,
    ) {
        let (radio_tx, mut radio_rx) = mpsc::unbounded_channel::<RadioEvent>();

        info!("[LINK] Attaching to {} radio", self.radio.name());
        if let Err(e) = self.radio.attach(radio_tx).await {
            error!("[LINK] Radio unavailable: {}", e);
            let effects = self
                .machine
                .process_event(RadioEvent::PowerStateChanged { powered_on: false });
            self.apply(effects).await;
        }

        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(ManagerCommand::Send(payload)) => self.handle_send(payload).await,
                    Some(ManagerCommand::Shutdown) | None => break,
                },
                Some(event) = radio_rx.recv() => {
                    debug!("[LINK] Radio event: {:?}", event);
                    let effects = self.machine.process_event(event);
                    self.apply(effects).await;
                }
                Some(generation) = timer_rx.recv() => {
                    let effects = self.machine.on_timeout(generation);
                    self.apply(effects).await;
                }
            }
            self.publish_status();
        }

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        info!("[LINK] Connection manager stopped");
    }

    async fn handle_send(&mut self, payload: Bytes) {
        match self.machine.send(payload) {
            Ok(request) => self.apply(vec![Effect::Radio(request)]).await,
            Err(e) => debug!("[LINK] Send rejected: {}", e),
        }
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        let mut pending = VecDeque::from(effects);
        while let Some(effect) = pending.pop_front() {
            match effect {
                Effect::Radio(request) => {
                    if let Some(event) = self.submit(request).await {
                        pending.extend(self.machine.process_event(event));
                    }
                }
                Effect::ArmTimeout { generation, phase } => self.arm(generation, phase),
            }
        }
        self.publish_status();
    }

    /// Issue `request`. A rejected request comes back as its failure event.
    async fn submit(&mut self, request: RadioRequest) -> Option<RadioEvent> {
        debug!("[LINK] Radio request: {:?}", request);
        let fallback = request.clone();
        match self.radio.submit(request).await {
            Ok(()) => None,
            Err(e) => {
                warn!("[LINK] {} rejected request: {:#}", self.radio.name(), e);
                fallback.failure_event(e.to_string())
            }
        }
    }

    fn arm(&mut self, generation: u64, phase: Phase) {
        if let Some(previous) = self.timer.take() {
            previous.abort();
        }
        let Some(deadline) = self.timeouts.for_phase(phase) else {
            return;
        };

        let timer_tx = self.timer_tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let _ = timer_tx.send(generation);
        }));
    }

    fn publish_status(&self) {
        let current = self.machine.status();
        self.status_tx.send_if_modified(|status| {
            if status == current {
                return false;
            }
            info!("[LINK] {} -> {}", status, current);
            *status = current.clone();
            true
        });
    }
}
