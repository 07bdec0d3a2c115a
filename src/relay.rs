//! Relay supervisor: lifecycle state machine, control channel, timers.
//!
//! The supervisor loop is the only writer of the relay state. Everything else
//! — bus handlers, workers, timers, the public API — feeds it control
//! messages and observes state through a watch channel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::bus::{
    reconnect_delay, BusConnector, Handlers, MessageBus, EXECUTION_TOPIC_PREFIX,
    RELAY_DISCOVERY_TOPIC, RELAY_INFO_TOPIC,
};
use crate::catalog::BundleCatalog;
use crate::config::Config;
use crate::engines::EngineFactory;
use crate::error::{RelayError, Result};
use crate::protocol::{BundleAnnouncementEnvelope, ListBundlesEnvelope, ListBundlesMessage};
use crate::queue::WorkQueue;
use crate::worker::{Incoming, WorkerPool};

/// Async signals sent to a running relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Stop,
    Restart,
    RefreshBundles,
    RefreshBundlesDone,
}

/// Relay runtime states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Stopped,
    Starting,
    Refreshing,
    Ready,
}

// Two slots for external signals plus headroom for the loop's own re-prime.
const CONTROL_QUEUE_DEPTH: usize = 4;

/// State shared between the supervisor loop, the workers, and the bus
/// handlers. The catalog is the only mutable piece workers touch.
pub(crate) struct RelayShared {
    pub config: Config,
    pub catalog: BundleCatalog,
    pub queue: WorkQueue<Incoming>,
    pub engines: Arc<dyn EngineFactory>,
    pub active_workers: AtomicUsize,
    bus: Mutex<Option<Arc<dyn MessageBus>>>,
    control_tx: mpsc::Sender<ControlMessage>,
}

impl RelayShared {
    pub fn publish(&self, topic: &str, payload: Vec<u8>) {
        let bus = self.bus.lock().clone();
        match bus {
            Some(bus) => {
                if let Err(err) = bus.publish(topic, payload) {
                    tracing::error!(topic = %topic, error = %err, "publish failed");
                }
            }
            None => {
                tracing::error!(topic = %topic, "dropping publish: bus link is down");
            }
        }
    }

    pub fn send_control(&self, message: ControlMessage) {
        if let Err(err) = self.control_tx.try_send(message) {
            tracing::error!(error = %err, "control channel rejected {message:?}");
        }
    }

    /// Signal the supervisor that a worker finished applying a bundle list.
    pub fn finish_refresh(&self) {
        self.send_control(ControlMessage::RefreshBundlesDone);
    }

    fn directive_reply_to(&self) -> Option<String> {
        self.bus.lock().as_ref().map(|bus| bus.directive_reply_to())
    }

    fn install_bus(&self, bus: Arc<dyn MessageBus>) {
        *self.bus.lock() = Some(bus);
    }

    fn halt_bus(&self) {
        if let Some(bus) = self.bus.lock().take() {
            bus.halt();
        }
    }
}

/// Resources the supervisor loop hands back when it exits, so the relay can
/// be started again.
struct LoopResources {
    control_rx: mpsc::Receiver<ControlMessage>,
    state_tx: watch::Sender<RelayState>,
}

/// A single relay instance: owns the work queue, the catalog, and the
/// supervisor loop driving the broker link.
pub struct Relay {
    shared: Arc<RelayShared>,
    connector: Arc<dyn BusConnector>,
    control_tx: mpsc::Sender<ControlMessage>,
    state_rx: watch::Receiver<RelayState>,
    idle: Mutex<Option<LoopResources>>,
    loop_handle: Mutex<Option<JoinHandle<LoopResources>>>,
}

impl Relay {
    pub fn new(
        config: Config,
        connector: Arc<dyn BusConnector>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let (state_tx, state_rx) = watch::channel(RelayState::Stopped);
        let shared = Arc::new(RelayShared {
            queue: WorkQueue::new(config.queue_depth()),
            config,
            catalog: BundleCatalog::new(),
            engines,
            active_workers: AtomicUsize::new(0),
            bus: Mutex::new(None),
            control_tx: control_tx.clone(),
        });
        Self {
            shared,
            connector,
            control_tx,
            state_rx,
            idle: Mutex::new(Some(LoopResources {
                control_rx,
                state_tx,
            })),
            loop_handle: Mutex::new(None),
        }
    }

    /// Connect to Cog and bring the relay up. Fails fast on configuration
    /// problems or an unreachable broker; no side effects are retained on
    /// error.
    pub async fn start(&self) -> Result<()> {
        self.verify_engines()?;

        let resources = match self.idle.lock().take() {
            Some(resources) => resources,
            None => return Err(RelayError::AlreadyRunning),
        };

        // Open the queue before the bus link so deliveries that race startup
        // are parked for the workers instead of dropped.
        self.shared.queue.start();

        let bus = match self.connector.connect(handlers(&self.shared)).await {
            Ok(bus) => bus,
            Err(err) => {
                tracing::error!(error = %err, "Error connecting to Cog.");
                *self.idle.lock() = Some(resources);
                return Err(err.into());
            }
        };
        tracing::info!(host = %self.shared.config.cog.host, "Connected to Cog host.");
        self.shared.install_bus(bus);

        let supervisor = Supervisor {
            shared: Arc::clone(&self.shared),
            connector: Arc::clone(&self.connector),
            state_tx: resources.state_tx,
            state: RelayState::Stopped,
            pool: WorkerPool::default(),
            refresh_timer: None,
            clean_timer: None,
            has_started: false,
        };
        *self.loop_handle.lock() = Some(tokio::spawn(supervisor.run(resources.control_rx)));

        // Prime the first refresh; the loop arms timers when it handles it.
        self.shared.send_control(ControlMessage::RefreshBundles);
        Ok(())
    }

    /// Stop a running relay. No-op when already stopped.
    pub async fn stop(&self) {
        let handle = match self.loop_handle.lock().take() {
            Some(handle) => handle,
            None => return,
        };
        let _ = self.control_tx.send(ControlMessage::Stop).await;
        if let Ok(resources) = handle.await {
            *self.idle.lock() = Some(resources);
        }
    }

    /// Ask Cog for the relay's current bundle assignments.
    pub fn update_bundles(&self) {
        self.shared.send_control(ControlMessage::RefreshBundles);
    }

    /// Signal that a bundle refresh finished. Normally sent by the worker
    /// that applied the bundle list; ignored (with an error log) outside the
    /// `Refreshing` state.
    pub fn finish_refresh(&self) {
        self.shared.finish_refresh();
    }

    pub fn state(&self) -> RelayState {
        *self.state_rx.borrow()
    }

    /// Watch handle for observing lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state_rx.clone()
    }

    pub fn bundle_names(&self) -> Vec<String> {
        self.shared.catalog.names()
    }

    /// Number of live workers; `max_concurrent + 2` while running.
    pub fn active_workers(&self) -> usize {
        self.shared.active_workers.load(Ordering::SeqCst)
    }

    fn verify_engines(&self) -> Result<()> {
        let config = &self.shared.config;
        if !config.docker_enabled() && !config.native_enabled() {
            let err = RelayError::NoExecutionEngines;
            tracing::error!("{err}");
            return Err(err);
        }
        if config.native_enabled() {
            tracing::info!("Native execution engine enabled.");
        }
        if config.docker_enabled() {
            if let Err(err) = self.shared.engines.verify() {
                tracing::error!(error = %err, "Error verifying Docker configuration.");
                return Err(RelayError::EngineVerification(err));
            }
            tracing::info!("Docker execution engine enabled.");
        } else {
            tracing::info!("Docker support disabled.");
        }
        Ok(())
    }
}

fn handlers(shared: &Arc<RelayShared>) -> Handlers {
    let on_message = {
        let shared = Arc::clone(shared);
        Box::new(move |topic: &str, payload: &[u8]| {
            let incoming = Incoming {
                relay: Arc::clone(&shared),
                topic: topic.to_string(),
                payload: payload.to_vec(),
                is_execution: topic.starts_with(EXECUTION_TOPIC_PREFIX),
            };
            if let Err(err) = shared.queue.enqueue(incoming) {
                tracing::warn!(topic = %topic, error = %err, "dropping incoming message");
            }
        }) as Box<dyn Fn(&str, &[u8]) + Send + Sync>
    };
    let on_disconnect = {
        let shared = Arc::clone(shared);
        Box::new(move |reason: &str| {
            tracing::error!(
                relay = %shared.config.id,
                reason = %reason,
                "Relay disconnected."
            );
            shared.send_control(ControlMessage::Restart);
        }) as Box<dyn Fn(&str) + Send + Sync>
    };
    Handlers {
        on_message,
        on_disconnect,
    }
}

enum LoopFlow {
    Continue,
    Shutdown,
}

struct Supervisor {
    shared: Arc<RelayShared>,
    connector: Arc<dyn BusConnector>,
    state_tx: watch::Sender<RelayState>,
    state: RelayState,
    pool: WorkerPool,
    refresh_timer: Option<JoinHandle<()>>,
    clean_timer: Option<JoinHandle<()>>,
    has_started: bool,
}

impl Supervisor {
    async fn run(mut self, mut control_rx: mpsc::Receiver<ControlMessage>) -> LoopResources {
        self.set_state(RelayState::Starting);
        self.shared.queue.start();
        self.pool
            .start(self.shared.config.worker_count(), &self.shared);

        while let Some(message) = control_rx.recv().await {
            let flow = match message {
                ControlMessage::Stop => {
                    self.handle_stop().await;
                    LoopFlow::Shutdown
                }
                ControlMessage::Restart => self.handle_restart(&mut control_rx).await,
                ControlMessage::RefreshBundles => {
                    self.handle_refresh_bundles();
                    LoopFlow::Continue
                }
                ControlMessage::RefreshBundlesDone => {
                    self.handle_refresh_done();
                    LoopFlow::Continue
                }
            };
            if matches!(flow, LoopFlow::Shutdown) {
                break;
            }
        }

        LoopResources {
            control_rx,
            state_tx: self.state_tx,
        }
    }

    fn set_state(&mut self, state: RelayState) {
        self.state = state;
        let _ = self.state_tx.send(state);
    }

    fn log_bad_state(&self, operation: &str, required: RelayState) {
        tracing::error!(
            required = ?required,
            actual = ?self.state,
            "{operation} arrived in the wrong relay state"
        );
    }

    fn handle_refresh_bundles(&mut self) {
        if self.state == RelayState::Stopped {
            self.log_bad_state("bundle refresh", RelayState::Starting);
            return;
        }
        if self.state == RelayState::Starting {
            tracing::info!(
                period_secs = self.shared.config.refresh_interval_secs,
                "Refreshing bundles and related assets periodically."
            );
            self.arm_refresh_timer();
            if let Some(docker) = &self.shared.config.docker {
                tracing::info!(
                    period_secs = docker.clean_interval_secs,
                    "Cleaning up expired container assets periodically."
                );
                self.arm_clean_timer();
            }
        }

        let reply_to = match self.shared.directive_reply_to() {
            Some(reply_to) => reply_to,
            None => {
                tracing::error!("cannot request bundles: bus link is down");
                return;
            }
        };
        let envelope = ListBundlesEnvelope {
            list_bundles: ListBundlesMessage {
                relay_id: self.shared.config.id.clone(),
                reply_to,
            },
        };
        tracing::info!("Refreshing command bundles.");
        match serde_json::to_vec(&envelope) {
            Ok(payload) => self.shared.publish(RELAY_INFO_TOPIC, payload),
            Err(err) => tracing::error!(error = %err, "failed to serialize bundle-list request"),
        }
        self.set_state(RelayState::Refreshing);
    }

    fn handle_refresh_done(&mut self) {
        if self.state != RelayState::Refreshing {
            self.log_bad_state("bundle refresh completion", RelayState::Refreshing);
            return;
        }
        if self.shared.catalog.take_announce() {
            self.announce_bundles();
        }
        tracing::info!("Bundle refresh complete.");
        if !self.has_started {
            tracing::info!(relay = %self.shared.config.id, "Relay ready.");
            self.has_started = true;
        }
        self.set_state(RelayState::Ready);
    }

    fn announce_bundles(&self) {
        let envelope = BundleAnnouncementEnvelope::new(
            self.shared.config.id.clone(),
            self.shared.catalog.names(),
        );
        match serde_json::to_vec(&envelope) {
            Ok(payload) => self.shared.publish(RELAY_DISCOVERY_TOPIC, payload),
            Err(err) => tracing::error!(error = %err, "failed to serialize bundle announcement"),
        }
    }

    /// Tear the broker link and worker pool down, then bring both back and
    /// re-prime the catalog. The bundle catalog survives the cycle.
    async fn handle_restart(
        &mut self,
        control_rx: &mut mpsc::Receiver<ControlMessage>,
    ) -> LoopFlow {
        self.stop_timers();
        self.shared.halt_bus();
        self.shared.queue.stop();
        self.pool.stop().await;

        tracing::info!(relay = %self.shared.config.id, "Relay restarting.");
        self.set_state(RelayState::Starting);
        self.shared.queue.start();
        self.pool
            .start(self.shared.config.worker_count(), &self.shared);

        let mut attempt = 0u32;
        loop {
            match self.connector.connect(handlers(&self.shared)).await {
                Ok(bus) => {
                    tracing::info!(host = %self.shared.config.cog.host, "Reconnected to Cog host.");
                    self.shared.install_bus(bus);
                    break;
                }
                Err(err) => {
                    attempt += 1;
                    let delay = reconnect_delay(attempt, self.shared.config.cog.reconnect_cap());
                    tracing::error!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Error reconnecting to Cog."
                    );
                    // Keep the control channel responsive while backing off,
                    // so Stop can interrupt a long reconnect.
                    tokio::select! {
                        message = control_rx.recv() => match message {
                            Some(ControlMessage::Stop) | None => {
                                self.handle_stop().await;
                                return LoopFlow::Shutdown;
                            }
                            Some(other) => {
                                tracing::error!(message = ?other, "dropping control message during reconnect");
                            }
                        },
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.shared.send_control(ControlMessage::RefreshBundles);
        LoopFlow::Continue
    }

    async fn handle_stop(&mut self) {
        self.stop_timers();
        self.shared.halt_bus();
        self.shared.queue.stop();
        self.pool.stop().await;
        self.set_state(RelayState::Stopped);
        tracing::info!(relay = %self.shared.config.id, "Relay stopped.");
    }

    fn arm_refresh_timer(&mut self) {
        let shared = Arc::clone(&self.shared);
        let period = self.shared.config.refresh_duration();
        self.refresh_timer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                shared.send_control(ControlMessage::RefreshBundles);
            }
        }));
    }

    fn arm_clean_timer(&mut self) {
        let docker = match &self.shared.config.docker {
            Some(docker) => docker.clone(),
            None => return,
        };
        let engines = Arc::clone(&self.shared.engines);
        self.clean_timer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(docker.clean_duration()).await;
                match engines.clean() {
                    Ok(0) => {}
                    Ok(count) => tracing::info!("Removed {count} dead containers."),
                    Err(err) => tracing::error!(error = %err, "container cleanup failed"),
                }
            }
        }));
    }

    fn stop_timers(&mut self) {
        if let Some(timer) = self.refresh_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.clean_timer.take() {
            timer.abort();
        }
    }
}
